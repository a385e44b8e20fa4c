use std::path::PathBuf;

#[derive(Debug, Clone, clap::Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
  clap::ArgGroup::new("mode")
    .required(true)
    .args(["once", "interval"]),
))]
pub(crate) struct Values {
  /// Poll every register once and exit
  #[arg(long)]
  pub(crate) once: bool,

  /// Poll continuously, waiting this many seconds between cycles
  #[arg(long, value_name = "SECONDS")]
  pub(crate) interval: Option<f64>,

  /// Alternative configuration location
  #[arg(short, long)]
  pub(crate) config: Option<String>,

  /// CSV file the readings are appended to
  #[arg(long)]
  pub(crate) out: PathBuf,

  /// Human readable log file
  #[arg(long)]
  pub(crate) log: Option<PathBuf>,

  /// Trace level logging when the config file sets no level
  #[arg(long)]
  pub(crate) trace: bool,
}

pub(crate) fn parse() -> Result<Values, clap::Error> {
  match <Values as clap::Parser>::try_parse() {
    // NOTE: help and version are not failures
    Err(error) if !error.use_stderr() => error.exit(),
    result => result,
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[test]
  fn requires_exactly_one_mode() {
    assert!(Values::try_parse_from(["heatscan", "--out", "a.csv"]).is_err());
    assert!(Values::try_parse_from([
      "heatscan",
      "--once",
      "--interval",
      "5",
      "--out",
      "a.csv"
    ])
    .is_err());

    let values =
      Values::try_parse_from(["heatscan", "--interval", "2.5", "--out", "a.csv"])
        .unwrap();
    assert_eq!(values.interval, Some(2.5));
    assert!(!values.once);
  }
}
