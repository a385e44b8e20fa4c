use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::*;

use super::modbus::{ReadResult, Table};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Record {
  pub(crate) ts: chrono::DateTime<chrono::Utc>,
  pub(crate) name: String,
  pub(crate) reg: u32,
  pub(crate) address0: Option<u16>,
  pub(crate) table: Table,
  pub(crate) raw: Option<i16>,
  pub(crate) scaled: Option<f64>,
  pub(crate) unit: String,
  pub(crate) delta: Option<String>,
  pub(crate) previous: Option<f64>,
  pub(crate) ok: bool,
  pub(crate) error: Option<String>,
  pub(crate) supplementary: Option<String>,
  pub(crate) fallback: bool,
  pub(crate) cop: Option<f64>,
}

impl Record {
  pub(crate) fn new(result: &ReadResult, cop: Option<f64>) -> Self {
    Self {
      ts: result.timestamp,
      name: result.name.clone(),
      reg: result.number,
      address0: result.offset,
      table: result.table,
      raw: result.raw,
      scaled: result.scaled,
      unit: result.unit.clone(),
      delta: result.delta.clone(),
      previous: result.previous,
      ok: result.ok,
      error: result.error.clone(),
      supplementary: result.supplementary.clone(),
      fallback: result.fallback,
      cop,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SinkError {
  #[error("Failed opening output file {0}")]
  Open(PathBuf, #[source] std::io::Error),

  #[error("Failed writing record")]
  Write(#[from] csv::Error),

  #[error("Failed flushing output")]
  Flush(#[from] std::io::Error),
}

pub(crate) trait Sink {
  fn record(&mut self, record: &Record) -> Result<(), SinkError>;

  fn flush(&mut self) -> Result<(), SinkError>;
}

/// Appends records to a csv file, writing the header only into a new file.
#[derive(Debug)]
pub(crate) struct CsvSink {
  writer: csv::Writer<std::fs::File>,
}

impl CsvSink {
  pub(crate) fn open(path: &Path) -> Result<Self, SinkError> {
    let open_error = |error| SinkError::Open(path.to_path_buf(), error);

    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(open_error)?;
      }
    }

    let file = std::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .map_err(open_error)?;
    let needs_header = file.metadata().map_err(open_error)?.len() == 0;

    let writer = csv::WriterBuilder::new()
      .has_headers(needs_header)
      .from_writer(file);

    Ok(Self { writer })
  }
}

impl Sink for CsvSink {
  fn record(&mut self, record: &Record) -> Result<(), SinkError> {
    self.writer.serialize(record)?;
    Ok(())
  }

  fn flush(&mut self) -> Result<(), SinkError> {
    self.writer.flush()?;
    Ok(())
  }
}

#[derive(Clone, Debug)]
pub(crate) struct Service {
  out: PathBuf,
}

impl service::Service for Service {
  fn new(config: config::Values) -> Self {
    Self { out: config.out }
  }
}

impl Service {
  pub(crate) fn open(&self) -> Result<CsvSink, SinkError> {
    CsvSink::open(&self.out)
  }
}
