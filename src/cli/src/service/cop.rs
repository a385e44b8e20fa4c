use std::collections::HashMap;

use super::modbus::ReadResult;

/// Specific heat of water in kJ/(kg K).
pub(crate) const SPECIFIC_HEAT: f64 = 4.18;

/// Below this outlet-inlet difference in K there is no usable gradient.
pub(crate) const MIN_GRADIENT: f64 = 0.05;

pub(crate) const MIN_COP: f64 = 0.1;
pub(crate) const MAX_COP: f64 = 25.0;

pub(crate) const HEATING_MODE: i16 = 2;

/// Register numbers fulfilling each role in the calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Roles {
  /// Return water temperature in °C
  pub(crate) inlet: u32,
  /// Supply water temperature in °C
  pub(crate) outlet: u32,
  /// Water flow in l/min
  pub(crate) flow: u32,
  /// Electrical input in kW
  pub(crate) power: u32,
  pub(crate) compressor: Option<u32>,
  pub(crate) defrost: Option<u32>,
  pub(crate) mode: Option<u32>,
  pub(crate) heating_mode: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Performance {
  pub(crate) cop: f64,
  pub(crate) delta_t: f64,
  pub(crate) mass_flow: f64,
  pub(crate) thermal_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub(crate) enum Unavailable {
  #[error("Register {0} for {1} is missing")]
  Missing(u32, &'static str),

  #[error("Compressor is not running")]
  CompressorOff,

  #[error("Defrost is active")]
  Defrosting,

  #[error("Operating mode {0} is not heating")]
  NotHeating(i16),

  #[error("No water flow ({0} l/min)")]
  NoFlow(f64),

  #[error("No electrical power ({0} kW)")]
  NoPower(f64),

  #[error("Temperature difference {0:.3} K is too small")]
  NoGradient(f64),

  #[error("COP {0:.2} is outside of the plausible range")]
  OutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cop {
  Available(Performance),
  Unavailable(Unavailable),
}

impl Cop {
  pub(crate) fn value(&self) -> Option<f64> {
    match self {
      Cop::Available(performance) => Some(performance.cop),
      Cop::Unavailable(_) => None,
    }
  }
}

impl Roles {
  pub(crate) fn contains(&self, number: u32) -> bool {
    self.numbers().any(|role| role == number)
  }

  pub(crate) fn numbers(&self) -> impl Iterator<Item = u32> {
    [self.inlet, self.outlet, self.flow, self.power]
      .into_iter()
      .chain(self.compressor)
      .chain(self.defrost)
      .chain(self.mode)
  }
}

/// Successful readings of one cycle keyed by register number.
#[derive(Debug, Clone, Default)]
pub(crate) struct Sample<'a> {
  readings: HashMap<u32, &'a ReadResult>,
}

impl<'a> Sample<'a> {
  pub(crate) fn new<TIntoIterator>(results: TIntoIterator) -> Self
  where
    TIntoIterator: IntoIterator<Item = &'a ReadResult>,
  {
    Self {
      readings: results
        .into_iter()
        .filter(|result| result.ok)
        .map(|result| (result.number, result))
        .collect(),
    }
  }

  fn scaled(&self, number: u32) -> Option<f64> {
    self.readings.get(&number).and_then(|result| result.scaled)
  }

  fn raw(&self, number: Option<u32>) -> Option<i16> {
    number
      .and_then(|number| self.readings.get(&number))
      .and_then(|result| result.raw)
  }

  fn require(
    &self,
    number: u32,
    role: &'static str,
  ) -> Result<f64, Unavailable> {
    self
      .scaled(number)
      .ok_or(Unavailable::Missing(number, role))
  }
}

pub(crate) fn evaluate(roles: &Roles, sample: &Sample) -> Cop {
  match calculate(roles, sample) {
    Ok(performance) => {
      tracing::debug!(
        "COP {:.2} from {:.2} kW thermal at {:.3} kg/s over {:.2} K",
        performance.cop,
        performance.thermal_power,
        performance.mass_flow,
        performance.delta_t
      );
      Cop::Available(performance)
    }
    Err(reason) => {
      tracing::debug!(%reason, "COP unavailable");
      Cop::Unavailable(reason)
    }
  }
}

fn calculate(
  roles: &Roles,
  sample: &Sample,
) -> Result<Performance, Unavailable> {
  let inlet = sample.require(roles.inlet, "inlet temperature")?;
  let outlet = sample.require(roles.outlet, "outlet temperature")?;
  let flow = sample.require(roles.flow, "flow rate")?;
  let power = sample.require(roles.power, "electrical power")?;

  // NOTE: gating only applies when every gate was read, otherwise best effort
  if let (Some(compressor), Some(defrost), Some(mode)) = (
    sample.raw(roles.compressor),
    sample.raw(roles.defrost),
    sample.raw(roles.mode),
  ) {
    if compressor != 1 {
      return Err(Unavailable::CompressorOff);
    }
    if defrost != 0 {
      return Err(Unavailable::Defrosting);
    }
    if mode != roles.heating_mode {
      return Err(Unavailable::NotHeating(mode));
    }
  }

  if flow <= 0.0 {
    return Err(Unavailable::NoFlow(flow));
  }
  if power <= 0.0 {
    return Err(Unavailable::NoPower(power));
  }

  let delta_t = outlet - inlet;
  if delta_t.abs() < MIN_GRADIENT {
    return Err(Unavailable::NoGradient(delta_t));
  }

  // NOTE: water at roughly 1 kg/l
  let mass_flow = flow / 60.0;
  let thermal_power = mass_flow * SPECIFIC_HEAT * delta_t.abs();
  let cop = thermal_power / power;
  if !(MIN_COP..=MAX_COP).contains(&cop) {
    return Err(Unavailable::OutOfRange(cop));
  }

  Ok(Performance {
    cop,
    delta_t,
    mass_flow,
    thermal_power,
  })
}
