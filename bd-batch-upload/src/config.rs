// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod tests;

use bd_batch::config::millis_to_duration;
use bd_batch::{ConfigError, SerializedStoreConfig, StoreConfig};
use serde::Deserialize;
use std::path::Path;
use time::ext::NumericalDuration as _;

//
// UploadConfig
//

#[derive(Clone, Debug, PartialEq)]
pub struct UploadConfig {
  // Delay between ticks while uploads succeed (or there is nothing to upload).
  pub upload_interval: time::Duration,

  // Upper bound of the backed-off delay between ticks.
  pub max_retry_interval: time::Duration,

  // Growth factor of the delay after each consecutive retriable failure.
  pub retry_multiplier: f64,

  // Randomization applied to backed-off delays, in [0, 1).
  pub retry_jitter: f64,

  // An attempt that doesn't complete in time counts as a network failure.
  pub upload_timeout: time::Duration,

  // Battery percentage below which uploads are skipped while discharging. None disables the check.
  pub low_battery_threshold: Option<u8>,

  pub upload_in_power_save_mode: bool,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      upload_interval: 5.seconds(),
      max_retry_interval: 5.minutes(),
      retry_multiplier: 2.0,
      retry_jitter: 0.0,
      upload_timeout: 45.seconds(),
      low_battery_threshold: Some(10),
      upload_in_power_save_mode: false,
    }
  }
}

impl UploadConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.upload_interval.is_positive() {
      return Err(ConfigError::Zero("upload_interval"));
    }
    if !self.upload_timeout.is_positive() {
      return Err(ConfigError::Zero("upload_timeout"));
    }
    if self.max_retry_interval < self.upload_interval {
      return Err(ConfigError::OutOfRange("max_retry_interval"));
    }
    if !(self.retry_multiplier >= 1.0 && self.retry_multiplier.is_finite()) {
      return Err(ConfigError::OutOfRange("retry_multiplier"));
    }
    if !(0.0 .. 1.0).contains(&self.retry_jitter) {
      return Err(ConfigError::OutOfRange("retry_jitter"));
    }
    if self.low_battery_threshold.is_some_and(|t| t > 100) {
      return Err(ConfigError::OutOfRange("low_battery_threshold"));
    }
    Ok(())
  }

  pub fn merge(mut self, serialized: SerializedUploadConfig) -> Result<Self, ConfigError> {
    if let Some(value) = serialized.upload_interval_ms {
      self.upload_interval = millis_to_duration(value, "upload_interval_ms")?;
    }
    if let Some(value) = serialized.max_retry_interval_ms {
      self.max_retry_interval = millis_to_duration(value, "max_retry_interval_ms")?;
    }
    if let Some(value) = serialized.retry_multiplier {
      self.retry_multiplier = value;
    }
    if let Some(value) = serialized.retry_jitter {
      self.retry_jitter = value;
    }
    if let Some(value) = serialized.upload_timeout_ms {
      self.upload_timeout = millis_to_duration(value, "upload_timeout_ms")?;
    }
    if let Some(value) = serialized.low_battery_threshold {
      // 0 disables the battery check.
      self.low_battery_threshold = (value > 0).then_some(value);
    }
    if let Some(value) = serialized.upload_in_power_save_mode {
      self.upload_in_power_save_mode = value;
    }

    self.validate()?;
    Ok(self)
  }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SerializedUploadConfig {
  pub upload_interval_ms: Option<u64>,
  pub max_retry_interval_ms: Option<u64>,
  pub retry_multiplier: Option<f64>,
  pub retry_jitter: Option<f64>,
  pub upload_timeout_ms: Option<u64>,
  pub low_battery_threshold: Option<u8>,
  pub upload_in_power_save_mode: Option<bool>,
}

//
// PipelineConfig
//

/// Store and upload configuration of a feature pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineConfig {
  pub store: StoreConfig,
  pub upload: UploadConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SerializedPipelineConfig {
  #[serde(default)]
  store: SerializedStoreConfig,
  #[serde(default)]
  upload: SerializedUploadConfig,
}

impl PipelineConfig {
  /// Parses a YAML document of the form
  ///
  /// ```yaml
  /// store:
  ///   max_batch_size: 1048576
  ///   max_batch_age_ms: 10000
  /// upload:
  ///   upload_interval_ms: 2000
  /// ```
  ///
  /// Missing sections and fields keep their defaults.
  pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
    let serialized: SerializedPipelineConfig = if yaml.trim().is_empty() {
      SerializedPipelineConfig::default()
    } else {
      serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?
    };

    Ok(Self {
      store: StoreConfig::default().merge(serialized.store)?,
      upload: UploadConfig::default().merge(serialized.upload)?,
    })
  }

  pub fn from_file(path: &Path) -> crate::Result<Self> {
    let yaml = std::fs::read_to_string(path)?;
    log::debug!("loading pipeline config from {}", path.display());
    Ok(Self::from_yaml(&yaml)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.store.validate()?;
    self.upload.validate()
  }
}
