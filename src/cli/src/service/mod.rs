pub(crate) mod cop;
pub(crate) mod modbus;
pub(crate) mod sink;

use crate::*;

pub(crate) trait Service {
  fn new(config: config::Values) -> Self;
}

#[derive(Debug, Clone)]
pub(crate) struct Container {
  modbus: modbus::Service,
  sink: sink::Service,
}

impl Container {
  pub(crate) fn new(config: config::Values) -> Self {
    Self {
      modbus: modbus::Service::new(config.clone()),
      sink: sink::Service::new(config),
    }
  }

  pub(crate) fn modbus(&self) -> &modbus::Service {
    &self.modbus
  }

  pub(crate) fn sink(&self) -> &sink::Service {
    &self.sink
  }
}
