mod args;
mod env;
mod file;

use std::{collections::HashSet, path::PathBuf};

use thiserror::Error;

use crate::service::{cop, modbus};

pub(crate) const DEFAULT_PORT: u16 = 502;
pub(crate) const DEFAULT_UNIT: u8 = 1;
pub(crate) const DEFAULT_TIMEOUT_MS: u32 = 2000;
pub(crate) const DEFAULT_DELAY_MS: u32 = 120;
pub(crate) const MIN_INTERVAL_SECONDS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Mode {
  Once,
  Continuous(chrono::Duration),
}

#[derive(Debug, Clone)]
pub(crate) struct Values {
  pub(crate) log_level: tracing::level_filters::LevelFilter,
  pub(crate) log: Option<PathBuf>,
  pub(crate) out: PathBuf,
  pub(crate) mode: Mode,
  pub(crate) convention: modbus::Convention,
  pub(crate) connection: modbus::Params,
  pub(crate) registers: Vec<modbus::RegisterSpec>,
  pub(crate) cop: Option<cop::Roles>,
}

#[derive(Debug, Clone)]
struct Unparsed {
  from_args: args::Values,
  from_env: env::Values,
  from_file: file::Values,
}

#[derive(Debug, Clone)]
pub(crate) struct Manager {
  unparsed: Unparsed,
}

#[derive(Debug, Error)]
pub(crate) enum InvalidError {
  #[error("Connection host is not set")]
  MissingHost,

  #[error("No registers configured")]
  NoRegisters,

  #[error("Register {0} is configured more than once")]
  DuplicateName(String),

  #[error("Register {0} has an invalid number")]
  InvalidNumber(String, #[source] modbus::address::AddressError),

  #[error("Register {0} uses auto table on bit register {1}")]
  AutoOnBitTable(String, u32),

  #[error("Register {0} has a non finite scale")]
  InvalidScale(String),

  #[error("COP register {0} is not in the register list")]
  CopRegisterNotPolled(u32),
}

#[derive(Debug, Error)]
pub(crate) enum ReadError {
  #[error("Failed reading args")]
  ArgsReadError(#[from] clap::Error),

  #[error("Failed reading file")]
  FileReadError(#[from] file::ParseError),

  #[error("Failed reading env")]
  EnvReadError(#[from] env::ParseError),

  #[error("Invalid configuration")]
  Invalid(#[from] InvalidError),
}

impl Manager {
  pub(crate) async fn new() -> Result<Self, ReadError> {
    let unparsed = Self::read_async().await?;

    Ok(Self { unparsed })
  }

  pub(crate) fn values(&self) -> Result<Values, ReadError> {
    let values = Self::parse(self.unparsed.clone())?;

    Ok(values)
  }

  fn parse(config: Unparsed) -> Result<Values, InvalidError> {
    let convention = config.from_file.convention.unwrap_or_default();
    let connection = config.from_file.connection;

    let registers = config
      .from_file
      .registers
      .into_iter()
      .map(|register| {
        let name = register.name.clone();
        file::to_register_spec(register, convention)
          .map_err(|error| InvalidError::InvalidNumber(name, error))
      })
      .collect::<Result<Vec<_>, _>>()?;
    Self::validate(&registers, convention)?;

    let cop = config.from_file.cop.map(file::to_cop_roles);
    if let Some(roles) = &cop {
      if let Some(number) = roles.numbers().find(|number| {
        !registers.iter().any(|register| register.number == *number)
      }) {
        return Err(InvalidError::CopRegisterNotPolled(number));
      }
    }

    let host = config
      .from_env
      .connection
      .host
      .or(connection.host)
      .filter(|host| !host.trim().is_empty())
      .ok_or(InvalidError::MissingHost)?;

    Ok(Values {
      log_level: config.from_file.log_level.map_or_else(
        || {
          if config.from_args.trace {
            tracing::level_filters::LevelFilter::TRACE
          } else {
            #[cfg(debug_assertions)]
            {
              tracing::level_filters::LevelFilter::DEBUG
            }
            #[cfg(not(debug_assertions))]
            {
              tracing::level_filters::LevelFilter::INFO
            }
          }
        },
        |log_level| match log_level {
          file::LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
          file::LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
          file::LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
          file::LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
          file::LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
        },
      ),
      log: config.from_args.log,
      out: config.from_args.out,
      mode: match config.from_args.interval {
        Some(seconds) if !config.from_args.once => Mode::Continuous(
          chrono::Duration::milliseconds(
            (seconds.max(MIN_INTERVAL_SECONDS) * 1000.0) as i64,
          ),
        ),
        _ => Mode::Once,
      },
      convention,
      connection: modbus::Params {
        host,
        port: config
          .from_env
          .connection
          .port
          .or(connection.port)
          .unwrap_or(DEFAULT_PORT),
        unit: config
          .from_env
          .connection
          .unit
          .or(connection.unit)
          .unwrap_or(DEFAULT_UNIT),
        timeout: file::milliseconds_to_chrono(
          connection.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        ),
        delay: file::milliseconds_to_chrono(
          connection.delay_ms.unwrap_or(DEFAULT_DELAY_MS),
        ),
        backend: connection.backend.unwrap_or_default(),
      },
      registers,
      cop,
    })
  }

  fn validate(
    registers: &[modbus::RegisterSpec],
    convention: modbus::Convention,
  ) -> Result<(), InvalidError> {
    if registers.is_empty() {
      return Err(InvalidError::NoRegisters);
    }

    let mut names = HashSet::new();
    for register in registers {
      if !names.insert(register.name.as_str()) {
        return Err(InvalidError::DuplicateName(register.name.clone()));
      }

      let address =
        convention.translate(register.number).map_err(|error| {
          InvalidError::InvalidNumber(register.name.clone(), error)
        })?;

      if register.table == modbus::TableSpec::Auto && address.table.is_bit() {
        return Err(InvalidError::AutoOnBitTable(
          register.name.clone(),
          register.number,
        ));
      }

      if !register.scale.is_finite() {
        return Err(InvalidError::InvalidScale(register.name.clone()));
      }
    }

    Ok(())
  }

  async fn read_async() -> Result<Unparsed, ReadError> {
    let from_args = args::parse()?;
    let from_env = env::parse()?;
    let from_file = file::parse_file(from_args.config.as_deref()).await?;

    Ok(Unparsed {
      from_args,
      from_env,
      from_file,
    })
  }
}
