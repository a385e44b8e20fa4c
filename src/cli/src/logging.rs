use std::path::{Path, PathBuf};

use tracing_subscriber::{
  fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Debug, thiserror::Error)]
pub(crate) enum InitError {
  #[error("Failed opening log file {0}")]
  Open(PathBuf, #[source] std::io::Error),

  #[error("Failed installing the subscriber")]
  Install(#[from] tracing_subscriber::util::TryInitError),
}

/// `RUST_LOG` wins over the configured level. The optional log file gets the
/// same lines without colors.
pub(crate) fn init(
  level: tracing::level_filters::LevelFilter,
  log: Option<&Path>,
) -> Result<(), InitError> {
  let filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let file = match log {
    Some(path) => Some(open(path)?),
    None => None,
  };

  let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_target(false).with_ansi(is_terminal))
    .with(file.map(|file| {
      fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
    }))
    .try_init()?;

  Ok(())
}

fn open(path: &Path) -> Result<std::fs::File, InitError> {
  let open_error = |error| InitError::Open(path.to_path_buf(), error);

  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent).map_err(open_error)?;
    }
  }

  std::fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(open_error)
}
