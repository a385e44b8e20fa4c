#[derive(Debug, Clone, Default)]
pub(crate) struct Connection {
  pub(crate) host: Option<String>,
  pub(crate) port: Option<u16>,
  pub(crate) unit: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Values {
  pub(crate) connection: Connection,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ParseError {
  #[error("Env var {0} is not a valid number")]
  InvalidNumber(&'static str, #[source] std::num::ParseIntError),
}

pub(crate) fn parse() -> Result<Values, ParseError> {
  let _ = dotenv::dotenv();

  let values = Values {
    connection: Connection {
      host: std::env::var("HEATSCAN_HOST").ok(),
      port: parse_number("HEATSCAN_PORT")?,
      unit: parse_number("HEATSCAN_UNIT")?,
    },
  };

  Ok(values)
}

fn parse_number<T: std::str::FromStr<Err = std::num::ParseIntError>>(
  name: &'static str,
) -> Result<Option<T>, ParseError> {
  std::env::var(name)
    .ok()
    .map(|value| value.trim().parse::<T>())
    .transpose()
    .map_err(|error| ParseError::InvalidNumber(name, error))
}
