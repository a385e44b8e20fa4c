#![deny(
  unsafe_code,
  // reason = "Let's just not do it"
)]
#![deny(
  clippy::unwrap_used,
  clippy::expect_used,
  clippy::panic,
  clippy::unreachable,
  // reason = "We have to handle errors properly"
)]

mod config;
mod logging;
mod process;
mod service;

use std::{process::ExitCode, sync::Arc};

const CONFIG_ERROR: u8 = 1;
const RUNTIME_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
  let config = match read_config().await {
    Ok(config) => config,
    Err(error) => {
      eprintln!("Error: {error:?}");
      return ExitCode::from(CONFIG_ERROR);
    }
  };

  if let Err(error) = logging::init(config.log_level, config.log.as_deref()) {
    eprintln!("Error: {:?}", anyhow::Error::from(error));
    return ExitCode::from(RUNTIME_ERROR);
  }

  match run(config).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      tracing::error!("{:?}", error);
      ExitCode::from(RUNTIME_ERROR)
    }
  }
}

async fn read_config() -> anyhow::Result<config::Values> {
  let manager = config::Manager::new().await?;
  let values = manager.values()?;

  Ok(values)
}

async fn run(config: config::Values) -> anyhow::Result<()> {
  let services = service::Container::new(config.clone());

  let sink = services.sink().open()?;
  let connection = services.modbus().connect().await?;

  let processes = process::Container::new(
    config.mode,
    Arc::new(process::measure::Process::new(
      &config,
      services,
      Some(connection),
      sink,
    )),
  );

  processes.spawn().await;
  let result = tokio::select! {
    result = processes.join() => result,
    signal = tokio::signal::ctrl_c() => match signal {
      Ok(()) => {
        tracing::info!("Interrupted, stopping after the current cycle");
        processes.cancel().await
      }
      Err(error) => {
        tracing::warn!(%error, "Failed listening for interrupt");
        processes.join().await
      }
    }
  };

  // NOTE: release the connection even when the run failed
  let finished = processes.finish().await;
  result?;
  finished?;

  tracing::info!("Done");
  Ok(())
}
