// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./conditions_test.rs"]
mod tests;

use crate::config::UploadConfig;
use mockall::automock;

//
// Connectivity
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Connected,
  Disconnected,
}

//
// PowerSource
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
  Charging,
  Battery,
  Unknown,
}

//
// ConditionOracle
//

/// Read-only view of the device state, consulted before every upload attempt. Implementations
/// return cached values and must not block.
#[automock]
pub trait ConditionOracle: Send + Sync {
  fn current_connectivity(&self) -> Connectivity;

  fn current_power(&self) -> PowerSource;

  /// Battery charge in percent, if known.
  fn battery_level(&self) -> Option<u8> {
    None
  }

  fn power_save_mode(&self) -> bool {
    false
  }
}

//
// AlwaysUpload
//

/// Oracle for hosts that don't provide connectivity or power information.
pub struct AlwaysUpload;

impl ConditionOracle for AlwaysUpload {
  fn current_connectivity(&self) -> Connectivity {
    Connectivity::Connected
  }

  fn current_power(&self) -> PowerSource {
    PowerSource::Unknown
  }
}

//
// SkipReason
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Disconnected,
  LowBattery,
  PowerSaveMode,
}

impl SkipReason {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Disconnected => "disconnected",
      Self::LowBattery => "low_battery",
      Self::PowerSaveMode => "power_save_mode",
    }
  }
}

/// Decides whether the current conditions allow an upload. Charging or unknown power always
/// passes the power checks; they only apply while discharging.
pub fn check_conditions(
  oracle: &dyn ConditionOracle,
  config: &UploadConfig,
) -> Result<(), SkipReason> {
  if oracle.current_connectivity() == Connectivity::Disconnected {
    return Err(SkipReason::Disconnected);
  }

  if oracle.current_power() != PowerSource::Battery {
    return Ok(());
  }

  if let Some(threshold) = config.low_battery_threshold
    && let Some(level) = oracle.battery_level()
    && level < threshold
  {
    return Err(SkipReason::LowBattery);
  }

  if !config.upload_in_power_save_mode && oracle.power_save_mode() {
    return Err(SkipReason::PowerSaveMode);
  }

  Ok(())
}
