use std::collections::HashMap;

use crate::service::{
  cop,
  modbus::{self, ReadResult, RegisterSpec, Transport},
  sink::{Record, Sink, SinkError},
};

/// Most recent successful scaled value per register number.
#[derive(Debug, Clone, Default)]
pub(crate) struct LastValues {
  values: HashMap<u32, f64>,
}

impl LastValues {
  #[cfg(test)]
  pub(crate) fn get(&self, number: u32) -> Option<f64> {
    self.values.get(&number).copied()
  }

  /// Fills in previous value and delta of a successful read and remembers it.
  pub(crate) fn track(&mut self, result: &mut ReadResult) {
    let scaled = match result.scaled {
      Some(scaled) if result.ok => scaled,
      _ => return,
    };

    if let Some(previous) = self.values.insert(result.number, scaled) {
      result.previous = Some(previous);
      if previous != scaled {
        result.delta =
          Some(format_delta(result.table.is_bit(), previous, scaled));
      }
    }
  }
}

pub(crate) fn format_delta(bit: bool, previous: f64, current: f64) -> String {
  if bit {
    format!("{previous}→{current}")
  } else {
    format!("{:+.3}", current - previous)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Summary {
  pub(crate) read: usize,
  pub(crate) failed: usize,
  pub(crate) cop: Option<cop::Cop>,
}

/// Drives one pass over the configured registers per cycle.
#[derive(Debug, Clone)]
pub(crate) struct Poller {
  registers: Vec<RegisterSpec>,
  convention: modbus::Convention,
  delay: std::time::Duration,
  cop: Option<cop::Roles>,
  last: LastValues,
}

impl Poller {
  pub(crate) fn new(
    registers: Vec<RegisterSpec>,
    convention: modbus::Convention,
    delay: std::time::Duration,
    cop: Option<cop::Roles>,
  ) -> Self {
    Self {
      registers,
      convention,
      delay,
      cop,
      last: LastValues::default(),
    }
  }

  #[cfg(test)]
  pub(crate) fn last(&self) -> &LastValues {
    &self.last
  }

  /// Rows stream into the sink as they are read except for those feeding the
  /// COP which are held until the cycle's COP is known.
  #[tracing::instrument(skip_all)]
  pub(crate) async fn cycle<TTransport, TSink>(
    &mut self,
    transport: &mut TTransport,
    sink: &mut TSink,
  ) -> Result<Summary, SinkError>
  where
    TTransport: Transport + ?Sized,
    TSink: Sink + ?Sized,
  {
    let mut held = Vec::new();
    let mut failed = 0;

    for (index, spec) in self.registers.iter().enumerate() {
      if index > 0 && !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }

      let mut result = modbus::read(transport, self.convention, spec).await;
      self.last.track(&mut result);
      log_result(&result);
      if !result.ok {
        failed += 1;
      }

      match &self.cop {
        Some(roles) if roles.contains(spec.number) => held.push(result),
        _ => sink.record(&Record::new(&result, None))?,
      }
    }

    let cop = self
      .cop
      .as_ref()
      .map(|roles| cop::evaluate(roles, &cop::Sample::new(&held)));
    let value = cop.as_ref().and_then(cop::Cop::value);
    for result in &held {
      sink.record(&Record::new(result, value))?;
    }
    sink.flush()?;

    Ok(Summary {
      read: self.registers.len(),
      failed,
      cop,
    })
  }
}

fn log_result(result: &ReadResult) {
  match (result.raw, result.scaled) {
    (Some(raw), Some(scaled)) if result.ok => tracing::info!(
      "{} ({}, {}) raw={} value={:.3}{}{}",
      result.name,
      result.number,
      result.table,
      raw,
      scaled,
      result.unit,
      result
        .delta
        .as_ref()
        .map(|delta| format!(" delta={delta}"))
        .unwrap_or_default()
    ),
    _ => tracing::warn!(
      "{} ({}) failed: {}",
      result.name,
      result.number,
      result.error.as_deref().unwrap_or_default()
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::service::{
    modbus::{
      register::tests::{MockTransport, Scripted},
      Table, TableSpec, Word,
    },
    sink::tests::MemorySink,
  };

  fn spec(name: &str, number: u32, table: TableSpec, scale: f64) -> RegisterSpec {
    RegisterSpec {
      name: name.to_owned(),
      number,
      table,
      scale,
      unit: String::new(),
    }
  }

  fn registers() -> Vec<RegisterSpec> {
    vec![
      spec("Inlet Temperature", 30003, TableSpec::Input, 0.1),
      spec("Outlet Temperature", 30004, TableSpec::Input, 0.1),
      spec("Water Flow", 30009, TableSpec::Input, 1.0),
      spec("Error Code", 30001, TableSpec::Input, 1.0),
      spec("Electrical Power", 40018, TableSpec::Holding, 0.01),
      spec("Compressor", 1, TableSpec::Coil, 1.0),
    ]
  }

  fn roles() -> cop::Roles {
    cop::Roles {
      inlet: 30003,
      outlet: 30004,
      flow: 30009,
      power: 40018,
      compressor: None,
      defrost: None,
      mode: None,
      heating_mode: cop::HEATING_MODE,
    }
  }

  fn device(outlet: u16, compressor: bool) -> MockTransport {
    MockTransport::default()
      .with(Table::Input, 2, Scripted::Word(Word::Register(350)))
      .with(Table::Input, 3, Scripted::Word(Word::Register(outlet)))
      .with(Table::Input, 8, Scripted::Word(Word::Register(20)))
      .with(Table::Input, 0, Scripted::Exception)
      .with(Table::Holding, 17, Scripted::Word(Word::Register(300)))
      .with(Table::Coil, 0, Scripted::Word(Word::Bit(compressor)))
  }

  fn poller(cop: Option<cop::Roles>) -> Poller {
    Poller::new(
      registers(),
      modbus::Convention::Standard,
      std::time::Duration::ZERO,
      cop,
    )
  }

  #[tokio::test]
  async fn streams_every_register_once_per_cycle() {
    let mut poller = poller(None);
    let mut transport = device(450, true);
    let mut sink = MemorySink::default();

    let summary = poller.cycle(&mut transport, &mut sink).await.unwrap();

    assert_eq!(summary.read, 6);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cop, None);
    assert_eq!(sink.flushes, 1);
    let names = sink
      .records
      .iter()
      .map(|record| record.name.as_str())
      .collect::<Vec<_>>();
    assert_eq!(
      names,
      vec![
        "Inlet Temperature",
        "Outlet Temperature",
        "Water Flow",
        "Error Code",
        "Electrical Power",
        "Compressor"
      ]
    );
    assert!(sink.records.iter().all(|record| record.cop.is_none()));
  }

  #[tokio::test]
  async fn failed_register_does_not_abort_cycle() {
    let mut poller = poller(None);
    let mut transport = device(450, true);
    let mut sink = MemorySink::default();

    poller.cycle(&mut transport, &mut sink).await.unwrap();

    let failed = &sink.records[3];
    assert!(!failed.ok);
    assert_eq!(failed.raw, None);
    assert_eq!(failed.scaled, None);
    assert!(failed.error.as_deref().unwrap().contains("exception"));
    assert!(sink.records[4].ok);
    assert_eq!(poller.last().get(30001), None);
  }

  #[tokio::test]
  async fn holds_cop_rows_until_cycle_end() {
    let mut poller = poller(Some(roles()));
    let mut transport = device(450, true);
    let mut sink = MemorySink::default();

    let summary = poller.cycle(&mut transport, &mut sink).await.unwrap();

    let cop = summary.cop.and_then(|cop| cop.value()).unwrap();
    assert!((cop - 4.644).abs() < 1e-2);

    let names = sink
      .records
      .iter()
      .map(|record| record.name.as_str())
      .collect::<Vec<_>>();
    assert_eq!(
      names,
      vec![
        "Error Code",
        "Compressor",
        "Inlet Temperature",
        "Outlet Temperature",
        "Water Flow",
        "Electrical Power"
      ]
    );
    assert_eq!(sink.records[0].cop, None);
    assert!(sink.records[2..].iter().all(|record| record.cop == Some(cop)));
  }

  #[tokio::test]
  async fn repeated_cycles_differ_only_in_time_and_delta() {
    let mut poller = poller(None);
    let mut first_sink = MemorySink::default();
    let mut second_sink = MemorySink::default();

    poller
      .cycle(&mut device(450, false), &mut first_sink)
      .await
      .unwrap();
    poller
      .cycle(&mut device(452, true), &mut second_sink)
      .await
      .unwrap();

    assert!(first_sink
      .records
      .iter()
      .all(|record| record.delta.is_none() && record.previous.is_none()));

    for (first, second) in first_sink.records.iter().zip(&second_sink.records) {
      assert_eq!(first.name, second.name);
      assert_eq!(first.address0, second.address0);
      assert_eq!(first.table, second.table);
      assert_eq!(first.ok, second.ok);
    }

    let inlet = &second_sink.records[0];
    assert_eq!(inlet.delta, None);
    assert!((inlet.previous.unwrap() - 35.0).abs() < 1e-9);

    let outlet = &second_sink.records[1];
    assert_eq!(outlet.delta.as_deref(), Some("+0.200"));

    let compressor = &second_sink.records[5];
    assert_eq!(compressor.delta.as_deref(), Some("0→1"));
    assert_eq!(compressor.previous, Some(0.0));
  }

  #[test]
  fn formats_deltas() {
    assert_eq!(format_delta(false, 45.0, 44.5), "-0.500");
    assert_eq!(format_delta(false, 1.0, 3.0), "+2.000");
    assert_eq!(format_delta(true, 1.0, 0.0), "1→0");
  }

  #[tokio::test(start_paused = true)]
  async fn delays_between_requests_only() {
    let mut poller = Poller::new(
      registers(),
      modbus::Convention::Standard,
      std::time::Duration::from_millis(120),
      None,
    );
    let mut sink = MemorySink::default();

    let started = tokio::time::Instant::now();
    poller
      .cycle(&mut device(450, true), &mut sink)
      .await
      .unwrap();

    assert_eq!(started.elapsed(), std::time::Duration::from_millis(5 * 120));
  }
}
