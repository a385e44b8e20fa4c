use crate::*;

use super::address::Convention;
use super::connection::{ConnectError, Connection, Params};
use super::register::RegisterSpec;

#[derive(Clone, Debug)]
pub(crate) struct Service {
  params: Params,
  convention: Convention,
  registers: Vec<RegisterSpec>,
}

impl service::Service for Service {
  fn new(config: config::Values) -> Self {
    Self {
      params: config.connection,
      convention: config.convention,
      registers: config.registers,
    }
  }
}

impl Service {
  pub(crate) async fn connect(&self) -> Result<Connection, ConnectError> {
    Connection::connect(&self.params).await
  }

  pub(crate) fn params(&self) -> &Params {
    &self.params
  }

  pub(crate) fn convention(&self) -> Convention {
    self.convention
  }

  pub(crate) fn registers(&self) -> &[RegisterSpec] {
    &self.registers
  }
}
