use serde::{Deserialize, Serialize};

use crate::service::{cop, modbus};

pub(crate) const DEFAULT_LOCATION: &str = "registers.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Connection {
  pub(crate) host: Option<String>,
  pub(crate) port: Option<u16>,
  #[serde(alias = "unit_id")]
  pub(crate) unit: Option<u8>,
  pub(crate) timeout_ms: Option<u32>,
  pub(crate) delay_ms: Option<u32>,
  pub(crate) backend: Option<modbus::Backend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Register {
  pub(crate) name: String,
  #[serde(alias = "number")]
  pub(crate) reg: u32,
  pub(crate) table: Option<modbus::TableSpec>,
  pub(crate) scale: Option<f64>,
  pub(crate) unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Cop {
  pub(crate) inlet: u32,
  pub(crate) outlet: u32,
  pub(crate) flow: u32,
  pub(crate) power: u32,
  pub(crate) compressor: Option<u32>,
  pub(crate) defrost: Option<u32>,
  pub(crate) mode: Option<u32>,
  pub(crate) heating_mode: Option<i16>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Values {
  pub(crate) log_level: Option<LogLevel>,
  pub(crate) convention: Option<modbus::Convention>,
  #[serde(default)]
  pub(crate) connection: Connection,
  #[serde(default)]
  pub(crate) registers: Vec<Register>,
  pub(crate) cop: Option<Cop>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ParseError {
  #[error("Failed creating project directories")]
  MissingProjectDirs,

  #[error("Failed reading config file {0}")]
  Read(std::path::PathBuf, #[source] std::io::Error),

  #[error("Config file is missing an extension")]
  MissingExtension,

  #[error("Config file has invalid extension")]
  InvalidExtension,

  #[error("Failed deserializing config from yaml")]
  DeserializetionYaml(#[from] serde_yaml::Error),

  #[error("Failed deserializing config from toml")]
  DeserializetionToml(#[from] toml::de::Error),

  #[error("Failed deserializing config from json")]
  DeserializetionJson(#[from] serde_json::Error),
}

pub(crate) fn location(
  location: Option<&str>,
) -> Result<std::path::PathBuf, ParseError> {
  if let Some(location) = location {
    return Ok(std::path::PathBuf::from(location));
  }

  let local = std::path::PathBuf::from(DEFAULT_LOCATION);
  if local.exists() {
    return Ok(local);
  }

  match directories::ProjectDirs::from("com", "altibiz", "heatscan") {
    Some(project_dirs) => Ok(project_dirs.config_dir().join("config.yaml")),
    None => Err(ParseError::MissingProjectDirs),
  }
}

pub(crate) async fn parse_file(
  location: Option<&str>,
) -> Result<Values, ParseError> {
  let location = self::location(location)?;

  let raw = tokio::fs::read_to_string(&location)
    .await
    .map_err(|error| ParseError::Read(location.clone(), error))?;

  parse_str(
    raw.as_str(),
    location.extension().and_then(|str| str.to_str()),
  )
}

pub(crate) fn parse_str(
  raw: &str,
  extension: Option<&str>,
) -> Result<Values, ParseError> {
  let values = match extension {
    None => return Err(ParseError::MissingExtension),
    Some("yaml" | "yml") => serde_yaml::from_str::<Values>(raw)?,
    Some("toml") => toml::from_str::<Values>(raw)?,
    Some("json") => serde_json::from_str::<Values>(raw)?,
    Some(_) => return Err(ParseError::InvalidExtension),
  };

  Ok(values)
}

pub(crate) fn to_register_spec(
  register: Register,
  convention: modbus::Convention,
) -> Result<modbus::RegisterSpec, modbus::address::AddressError> {
  let table = match register.table {
    Some(table) => table,
    None => convention.translate(register.reg)?.table.into(),
  };

  Ok(modbus::RegisterSpec {
    name: register.name,
    number: register.reg,
    table,
    scale: register.scale.unwrap_or(1.0),
    unit: register.unit.unwrap_or_default(),
  })
}

pub(crate) fn to_cop_roles(cop: Cop) -> cop::Roles {
  cop::Roles {
    inlet: cop.inlet,
    outlet: cop.outlet,
    flow: cop.flow,
    power: cop.power,
    compressor: cop.compressor,
    defrost: cop.defrost,
    mode: cop.mode,
    heating_mode: cop.heating_mode.unwrap_or(cop::HEATING_MODE),
  }
}

pub(crate) fn milliseconds_to_chrono(milliseconds: u32) -> chrono::Duration {
  chrono::Duration::milliseconds(milliseconds as i64)
}
