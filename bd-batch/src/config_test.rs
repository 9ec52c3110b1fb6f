// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use assert_matches::assert_matches;
use time::ext::NumericalDuration;

#[test]
fn defaults_are_valid() {
  let config = StoreConfig::default();
  config.validate().unwrap();
  assert_eq!(config.record_size_limit(), 512 * 1024);
  assert_eq!(config.max_batch_retention, Some(18.hours()));
}

#[test]
fn record_limit_falls_back_to_batch_size() {
  let config = StoreConfig {
    max_batch_size: 250,
    max_record_size: None,
    ..Default::default()
  };
  assert_eq!(config.record_size_limit(), 250);
}

#[test]
fn merge_overrides_only_present_fields() {
  let config = StoreConfig::default()
    .merge(SerializedStoreConfig {
      max_batch_events: Some(10),
      max_batch_age_ms: Some(1500),
      max_batch_retention_ms: Some(0),
      ..Default::default()
    })
    .unwrap();

  assert_eq!(config.max_batch_events, 10);
  assert_eq!(config.max_batch_age, 1500.milliseconds());
  assert_eq!(config.max_batch_retention, None);
  assert_eq!(config.max_batch_size, StoreConfig::default().max_batch_size);
}

#[test]
fn invalid_combinations_are_rejected() {
  assert_matches!(
    StoreConfig {
      max_batch_events: 0,
      ..Default::default()
    }
    .validate(),
    Err(ConfigError::Zero("max_batch_events"))
  );

  assert_matches!(
    StoreConfig {
      max_batch_size: 100,
      max_record_size: Some(200),
      ..Default::default()
    }
    .validate(),
    Err(ConfigError::RecordLargerThanBatch {
      record: 200,
      batch: 100
    })
  );

  assert_matches!(
    StoreConfig {
      max_batch_size: 1000,
      max_record_size: None,
      max_disk_space: 10,
      ..Default::default()
    }
    .validate(),
    Err(ConfigError::BatchLargerThanDisk { .. })
  );

  assert_matches!(
    StoreConfig::try_from(SerializedStoreConfig {
      max_batch_age_ms: Some(u64::MAX),
      ..Default::default()
    }),
    Err(ConfigError::OutOfRange("max_batch_age_ms"))
  );
}
