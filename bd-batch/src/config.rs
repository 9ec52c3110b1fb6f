// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod tests;

use serde::Deserialize;
use time::ext::NumericalDuration as _;

//
// ConfigError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("{0} must be greater than zero")]
  Zero(&'static str),
  #[error("max_record_size ({record}) exceeds max_batch_size ({batch})")]
  RecordLargerThanBatch { record: u64, batch: u64 },
  #[error("max_batch_size ({batch}) exceeds max_disk_space ({disk})")]
  BatchLargerThanDisk { batch: u64, disk: u64 },
  #[error("{0} is out of range")]
  OutOfRange(&'static str),
  #[error("failed to parse configuration: {0}")]
  Parse(String),
}

//
// StoreConfig
//

/// Limits applied to a single feature's batch store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
  // Upper bound of the payload bytes in one batch. Framing overhead is not counted.
  pub max_batch_size: u64,

  // Upper bound of the number of records in one batch.
  pub max_batch_events: u32,

  // Optional stricter bound for a single record. Never larger than max_batch_size.
  pub max_record_size: Option<u64>,

  // An OPEN batch is closed once its first record is older than this.
  pub max_batch_age: time::Duration,

  // Upper bound of the on-disk bytes of all batch files of the store.
  pub max_disk_space: u64,

  // CLOSED batches older than this are deleted without being uploaded.
  pub max_batch_retention: Option<time::Duration>,

  // Memory budget for records queued between producers and the writer task.
  pub writer_queue_memory: usize,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      max_batch_size: 4 * 1024 * 1024,
      max_batch_events: 500,
      max_record_size: Some(512 * 1024),
      max_batch_age: 5.seconds(),
      max_disk_space: 128 * 1024 * 1024,
      max_batch_retention: Some(18.hours()),
      writer_queue_memory: 4 * 1024 * 1024,
    }
  }
}

impl StoreConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_batch_size == 0 {
      return Err(ConfigError::Zero("max_batch_size"));
    }
    if self.max_batch_events == 0 {
      return Err(ConfigError::Zero("max_batch_events"));
    }
    if self.max_disk_space == 0 {
      return Err(ConfigError::Zero("max_disk_space"));
    }
    if self.writer_queue_memory == 0 {
      return Err(ConfigError::Zero("writer_queue_memory"));
    }
    if !self.max_batch_age.is_positive() {
      return Err(ConfigError::Zero("max_batch_age"));
    }
    if let Some(retention) = self.max_batch_retention
      && !retention.is_positive()
    {
      return Err(ConfigError::Zero("max_batch_retention"));
    }
    if let Some(record) = self.max_record_size {
      if record == 0 {
        return Err(ConfigError::Zero("max_record_size"));
      }
      if record > self.max_batch_size {
        return Err(ConfigError::RecordLargerThanBatch {
          record,
          batch: self.max_batch_size,
        });
      }
    }
    if self.max_batch_size > self.max_disk_space {
      return Err(ConfigError::BatchLargerThanDisk {
        batch: self.max_batch_size,
        disk: self.max_disk_space,
      });
    }

    Ok(())
  }

  /// The largest record a producer may submit.
  #[must_use]
  pub fn record_size_limit(&self) -> u64 {
    self
      .max_record_size
      .map_or(self.max_batch_size, |limit| limit.min(self.max_batch_size))
  }

  /// Applies the fields present in the serialized form on top of this config and validates the
  /// result.
  pub fn merge(mut self, serialized: SerializedStoreConfig) -> Result<Self, ConfigError> {
    if let Some(value) = serialized.max_batch_size {
      self.max_batch_size = value;
    }
    if let Some(value) = serialized.max_batch_events {
      self.max_batch_events = value;
    }
    if let Some(value) = serialized.max_record_size {
      // 0 disables the per record limit, leaving max_batch_size as the only bound.
      self.max_record_size = (value > 0).then_some(value);
    }
    if let Some(value) = serialized.max_batch_age_ms {
      self.max_batch_age = millis_to_duration(value, "max_batch_age_ms")?;
    }
    if let Some(value) = serialized.max_disk_space {
      self.max_disk_space = value;
    }
    if let Some(value) = serialized.max_batch_retention_ms {
      self.max_batch_retention = if value == 0 {
        None
      } else {
        Some(millis_to_duration(value, "max_batch_retention_ms")?)
      };
    }
    if let Some(value) = serialized.writer_queue_memory {
      self.writer_queue_memory = value;
    }

    self.validate()?;
    Ok(self)
  }
}

//
// SerializedStoreConfig
//

/// The on-disk (YAML) representation of [`StoreConfig`]. Every field is optional and overrides
/// the default when present. Sizes are bytes, durations are milliseconds.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SerializedStoreConfig {
  pub max_batch_size: Option<u64>,
  pub max_batch_events: Option<u32>,
  pub max_record_size: Option<u64>,
  pub max_batch_age_ms: Option<u64>,
  pub max_disk_space: Option<u64>,
  pub max_batch_retention_ms: Option<u64>,
  pub writer_queue_memory: Option<usize>,
}

impl TryFrom<SerializedStoreConfig> for StoreConfig {
  type Error = ConfigError;

  fn try_from(value: SerializedStoreConfig) -> Result<Self, Self::Error> {
    Self::default().merge(value)
  }
}

pub fn millis_to_duration(ms: u64, field: &'static str) -> Result<time::Duration, ConfigError> {
  let ms = i64::try_from(ms).map_err(|_| ConfigError::OutOfRange(field))?;
  Ok(time::Duration::milliseconds(ms))
}
