use serde::{Deserialize, Serialize};
use tokio_modbus::Address;

use super::register::Table;

// NOTE: 30xxx/40xxx assignment differs between device maps so it is global
// and set once from config - verify against the device before deploying

#[derive(
  Debug, Default, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Convention {
  /// 30xxx input registers, 40xxx holding registers
  #[default]
  Standard,

  /// 30xxx holding registers, 40xxx input registers
  Inverted,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub(crate) struct WireAddress {
  pub(crate) offset: Address,
  pub(crate) table: Table,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub(crate) enum AddressError {
  #[error("Register {0} is outside of every register range")]
  InvalidRegisterNumber(u32),
}

pub(crate) const COIL_RANGE: std::ops::RangeInclusive<u32> = 1..=9999;
pub(crate) const DISCRETE_RANGE: std::ops::RangeInclusive<u32> = 10001..=19999;
pub(crate) const THIRTY_RANGE: std::ops::RangeInclusive<u32> = 30001..=39999;
pub(crate) const FORTY_RANGE: std::ops::RangeInclusive<u32> = 40001..=49999;

impl Convention {
  pub(crate) fn translate(
    self,
    number: u32,
  ) -> Result<WireAddress, AddressError> {
    let (base, table) = if COIL_RANGE.contains(&number) {
      (*COIL_RANGE.start(), Table::Coil)
    } else if DISCRETE_RANGE.contains(&number) {
      (*DISCRETE_RANGE.start(), Table::Discrete)
    } else if THIRTY_RANGE.contains(&number) {
      (
        *THIRTY_RANGE.start(),
        match self {
          Convention::Standard => Table::Input,
          Convention::Inverted => Table::Holding,
        },
      )
    } else if FORTY_RANGE.contains(&number) {
      (
        *FORTY_RANGE.start(),
        match self {
          Convention::Standard => Table::Holding,
          Convention::Inverted => Table::Input,
        },
      )
    } else {
      return Err(AddressError::InvalidRegisterNumber(number));
    };

    Ok(WireAddress {
      // NOTE: every range spans less than u16::MAX
      offset: (number - base) as Address,
      table,
    })
  }
}
