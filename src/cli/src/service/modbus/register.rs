use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio_modbus::Address;

use super::address::Convention;
use super::connection::{ReadError, Transport};

/// Concrete table a read is performed against.
#[derive(
  Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Table {
  Holding,
  Input,
  Discrete,
  Coil,
}

/// Table as configured - `Auto` resolves to a concrete table on every read.
#[derive(
  Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TableSpec {
  Holding,
  Input,
  Discrete,
  Coil,
  Auto,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub(crate) enum Word {
  Register(u16),
  Bit(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RegisterSpec {
  pub(crate) name: String,
  pub(crate) number: u32,
  pub(crate) table: TableSpec,
  pub(crate) scale: f64,
  pub(crate) unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReadResult {
  pub(crate) timestamp: chrono::DateTime<chrono::Utc>,
  pub(crate) name: String,
  pub(crate) number: u32,
  pub(crate) offset: Option<Address>,
  pub(crate) table: Table,
  pub(crate) raw: Option<i16>,
  pub(crate) scaled: Option<f64>,
  pub(crate) unit: String,
  pub(crate) ok: bool,
  pub(crate) error: Option<String>,
  pub(crate) supplementary: Option<String>,
  pub(crate) fallback: bool,
  pub(crate) delta: Option<String>,
  pub(crate) previous: Option<f64>,
}

impl Table {
  pub(crate) fn is_bit(self) -> bool {
    matches!(self, Table::Discrete | Table::Coil)
  }
}

impl Display for Table {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Table::Holding => "holding",
      Table::Input => "input",
      Table::Discrete => "discrete",
      Table::Coil => "coil",
    };
    f.write_str(name)
  }
}

impl TableSpec {
  pub(crate) fn concrete(self) -> Option<Table> {
    match self {
      TableSpec::Holding => Some(Table::Holding),
      TableSpec::Input => Some(Table::Input),
      TableSpec::Discrete => Some(Table::Discrete),
      TableSpec::Coil => Some(Table::Coil),
      TableSpec::Auto => None,
    }
  }
}

impl From<Table> for TableSpec {
  fn from(table: Table) -> Self {
    match table {
      Table::Holding => TableSpec::Holding,
      Table::Input => TableSpec::Input,
      Table::Discrete => TableSpec::Discrete,
      Table::Coil => TableSpec::Coil,
    }
  }
}

impl Word {
  /// Register words are two's complement, bits are 0 or 1.
  pub(crate) fn raw(self) -> i16 {
    match self {
      Word::Register(word) => decode_signed(word),
      Word::Bit(bit) => i16::from(bit),
    }
  }
}

pub(crate) fn decode_signed(word: u16) -> i16 {
  i16::from_be_bytes(word.to_be_bytes())
}

impl ReadResult {
  fn new(spec: &RegisterSpec, offset: Option<Address>, table: Table) -> Self {
    Self {
      timestamp: chrono::Utc::now(),
      name: spec.name.clone(),
      number: spec.number,
      offset,
      table,
      raw: None,
      scaled: None,
      unit: spec.unit.clone(),
      ok: false,
      error: None,
      supplementary: None,
      fallback: false,
      delta: None,
      previous: None,
    }
  }

  fn succeed(mut self, raw: i16, scale: f64) -> Self {
    self.raw = Some(raw);
    self.scaled = Some(f64::from(raw) * scale);
    self.ok = true;
    self
  }

  fn fail(mut self, error: String) -> Self {
    self.error = Some(if error.is_empty() {
      "Unknown error".to_owned()
    } else {
      error
    });
    self
  }
}

/// Reads one configured register and never fails - every outcome is a row.
pub(crate) async fn read<TTransport: Transport + ?Sized>(
  transport: &mut TTransport,
  convention: Convention,
  spec: &RegisterSpec,
) -> ReadResult {
  let address = match convention.translate(spec.number) {
    Ok(address) => address,
    Err(error) => {
      let table = spec.table.concrete().unwrap_or(Table::Holding);
      return ReadResult::new(spec, None, table)
        .fail(ReadError::from(error).to_string());
    }
  };

  match spec.table.concrete() {
    Some(table) => {
      let result = ReadResult::new(spec, Some(address.offset), table);
      match transport.read(table, address.offset).await {
        Ok(word) => result.succeed(word.raw(), spec.scale),
        Err(error) => result.fail(error.to_string()),
      }
    }
    None => read_auto(transport, spec, address.offset).await,
  }
}

// NOTE: a zero is ambiguous between a real zero and the wrong table so a
// non-zero reading from either table wins over any zero
async fn read_auto<TTransport: Transport + ?Sized>(
  transport: &mut TTransport,
  spec: &RegisterSpec,
  offset: Address,
) -> ReadResult {
  let holding = transport
    .read(Table::Holding, offset)
    .await
    .map(Word::raw);
  if let Ok(raw) = holding {
    if raw != 0 {
      return ReadResult::new(spec, Some(offset), Table::Holding)
        .succeed(raw, spec.scale);
    }
  }

  let input = transport.read(Table::Input, offset).await.map(Word::raw);
  let result = match (holding, input) {
    (_, Ok(raw)) if raw != 0 => {
      ReadResult::new(spec, Some(offset), Table::Input).succeed(raw, spec.scale)
    }
    (Ok(raw), input) => {
      let mut result = ReadResult::new(spec, Some(offset), Table::Holding)
        .succeed(raw, spec.scale);
      result.supplementary = input.err().map(|error| error.to_string());
      result
    }
    (Err(holding), Ok(raw)) => {
      let mut result = ReadResult::new(spec, Some(offset), Table::Input)
        .succeed(raw, spec.scale);
      result.supplementary = Some(holding.to_string());
      result
    }
    (Err(holding), Err(input)) => {
      let holding = holding.to_string();
      let error = if holding.is_empty() {
        input.to_string()
      } else {
        holding
      };
      ReadResult::new(spec, Some(offset), Table::Holding).fail(error)
    }
  };

  if result.ok && result.table == Table::Input {
    tracing::debug!(
      "Register {} ({}) resolved to the input table",
      spec.number,
      spec.name
    );
    return ReadResult {
      fallback: true,
      ..result
    };
  }

  result
}

#[cfg(test)]
pub(crate) mod tests {
  use std::collections::{HashMap, VecDeque};

  use super::*;

  pub(crate) enum Scripted {
    Word(Word),
    Exception,
    Empty,
    Timeout,
  }

  /// Answers reads from a per table script, erroring when it runs dry.
  #[derive(Default)]
  pub(crate) struct MockTransport {
    pub(crate) script: HashMap<(Table, Address), VecDeque<Scripted>>,
    pub(crate) calls: Vec<(Table, Address)>,
  }

  impl MockTransport {
    pub(crate) fn with(
      mut self,
      table: Table,
      offset: Address,
      answer: Scripted,
    ) -> Self {
      self
        .script
        .entry((table, offset))
        .or_default()
        .push_back(answer);
      self
    }
  }

  #[async_trait::async_trait]
  impl Transport for MockTransport {
    async fn read(
      &mut self,
      table: Table,
      offset: Address,
    ) -> Result<Word, ReadError> {
      self.calls.push((table, offset));
      match self
        .script
        .get_mut(&(table, offset))
        .and_then(VecDeque::pop_front)
      {
        Some(Scripted::Word(word)) => Ok(word),
        Some(Scripted::Exception) => Err(ReadError::Protocol(
          "Modbus exception 0x02 (Illegal data address) for function 0x03"
            .to_owned(),
        )),
        Some(Scripted::Empty) => Err(ReadError::EmptyResponse),
        Some(Scripted::Timeout) | None => Err(ReadError::Timeout(1000)),
      }
    }
  }

  fn spec(number: u32, table: TableSpec, scale: f64) -> RegisterSpec {
    RegisterSpec {
      name: format!("register {number}"),
      number,
      table,
      scale,
      unit: "°C".to_owned(),
    }
  }

  #[test]
  fn decodes_signed_boundaries() {
    assert_eq!(decode_signed(65535), -1);
    assert_eq!(decode_signed(32768), -32768);
    assert_eq!(decode_signed(32767), 32767);
    assert_eq!(decode_signed(0), 0);
    assert_eq!(Word::Bit(true).raw(), 1);
    assert_eq!(Word::Bit(false).raw(), 0);
  }

  #[tokio::test]
  async fn reads_concrete_table_and_scales() {
    let mut transport = MockTransport::default().with(
      Table::Input,
      2,
      Scripted::Word(Word::Register(65436)),
    );

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Input, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.table, Table::Input);
    assert_eq!(result.offset, Some(2));
    assert_eq!(result.raw, Some(-100));
    assert!((result.scaled.unwrap() + 10.0).abs() < 1e-9);
    assert_eq!(result.error, None);
  }

  #[tokio::test]
  async fn configured_table_overrides_implied_table() {
    let mut transport = MockTransport::default().with(
      Table::Holding,
      3,
      Scripted::Word(Word::Register(452)),
    );

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30004, TableSpec::Holding, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(transport.calls, vec![(Table::Holding, 3)]);
  }

  #[tokio::test]
  async fn failed_read_keeps_error_verbatim() {
    let mut transport = MockTransport::default().with(
      Table::Holding,
      17,
      Scripted::Exception,
    );

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(40018, TableSpec::Holding, 0.00479),
    )
    .await;

    assert!(!result.ok);
    assert_eq!(result.raw, None);
    assert_eq!(result.scaled, None);
    assert_eq!(
      result.error.as_deref(),
      Some("Modbus exception 0x02 (Illegal data address) for function 0x03")
    );
  }

  #[tokio::test]
  async fn bit_tables_read_zero_or_one() {
    let mut transport = MockTransport::default().with(
      Table::Coil,
      4,
      Scripted::Word(Word::Bit(true)),
    );

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(5, TableSpec::Coil, 1.0),
    )
    .await;

    assert_eq!(result.raw, Some(1));
    assert_eq!(result.scaled, Some(1.0));
  }

  #[tokio::test]
  async fn invalid_number_is_a_failed_row() {
    let mut transport = MockTransport::default();

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(20000, TableSpec::Holding, 1.0),
    )
    .await;

    assert!(!result.ok);
    assert_eq!(result.offset, None);
    assert!(result.error.unwrap().contains("20000"));
    assert!(transport.calls.is_empty());
  }

  #[tokio::test]
  async fn auto_accepts_non_zero_holding() {
    let mut transport = MockTransport::default().with(
      Table::Holding,
      2,
      Scripted::Word(Word::Register(351)),
    );

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.table, Table::Holding);
    assert!(!result.fallback);
    assert_eq!(transport.calls, vec![(Table::Holding, 2)]);
  }

  #[tokio::test]
  async fn auto_falls_back_to_input_when_holding_fails() {
    let mut transport = MockTransport::default()
      .with(Table::Holding, 2, Scripted::Exception)
      .with(Table::Input, 2, Scripted::Word(Word::Register(120)));

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.table, Table::Input);
    assert_eq!(result.raw, Some(120));
    assert!(result.fallback);
    assert_eq!(result.error, None);
  }

  #[tokio::test]
  async fn auto_prefers_non_zero_input_over_holding_zero() {
    let mut transport = MockTransport::default()
      .with(Table::Holding, 2, Scripted::Word(Word::Register(0)))
      .with(Table::Input, 2, Scripted::Word(Word::Register(351)));

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert_eq!(result.table, Table::Input);
    assert_eq!(result.raw, Some(351));
    assert_eq!(result.supplementary, None);
  }

  #[tokio::test]
  async fn auto_keeps_holding_zero_when_input_fails() {
    let mut transport = MockTransport::default()
      .with(Table::Holding, 2, Scripted::Word(Word::Register(0)))
      .with(Table::Input, 2, Scripted::Exception);

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.table, Table::Holding);
    assert_eq!(result.raw, Some(0));
    assert_eq!(result.error, None);
    assert!(result.supplementary.unwrap().contains("Illegal data address"));
  }

  #[tokio::test]
  async fn auto_keeps_input_zero_when_holding_fails() {
    let mut transport = MockTransport::default()
      .with(Table::Holding, 2, Scripted::Empty)
      .with(Table::Input, 2, Scripted::Word(Word::Register(0)));

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert!(result.ok);
    assert_eq!(result.table, Table::Input);
    assert_eq!(result.raw, Some(0));
    assert_eq!(result.supplementary.as_deref(), Some("Empty response"));
  }

  #[tokio::test]
  async fn auto_reports_holding_error_when_both_fail() {
    let mut transport = MockTransport::default()
      .with(Table::Holding, 2, Scripted::Exception)
      .with(Table::Input, 2, Scripted::Timeout);

    let result = read(
      &mut transport,
      Convention::Standard,
      &spec(30003, TableSpec::Auto, 0.1),
    )
    .await;

    assert!(!result.ok);
    assert_eq!(result.table, Table::Holding);
    assert_eq!(result.raw, None);
    assert!(result.error.unwrap().contains("Illegal data address"));
  }
}
