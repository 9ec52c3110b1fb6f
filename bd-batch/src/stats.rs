// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::diagnostics::DropReason;
use crate::store::CloseReason;
use prometheus::core::Collector;
use prometheus::{
  IntCounter,
  IntCounterVec,
  Opts,
  Registry,
  register_int_counter_vec_with_registry,
  register_int_counter_with_registry,
};

// All store metrics carry a constant `feature` label so that the stores of several features can
// share a single registry.
#[must_use]
pub fn feature_opts(name: &str, help: &str, feature: &str) -> Opts {
  Opts::new(name, help).const_label("feature", feature)
}

//
// StoreStats
//

// records_written
//  # of records appended to a batch.
// bytes_written
//  # of payload bytes appended to a batch.
// records_dropped
//  # of records that never made it to disk, labeled by reason.
// batches_closed
//  # of batches that transitioned from OPEN to CLOSED, labeled by trigger.
// batches_evicted
//  # of CLOSED batches deleted without upload to honor the disk quota.
// batches_expired
//  # of CLOSED batches deleted without upload after exceeding the retention period.
// batches_recovered
//  # of batches found on disk during startup.
// batches_discarded
//  # of batch files deleted because they were unreadable or empty.
// bytes_truncated
//  # of corrupt trailing bytes cut off during startup recovery.
#[derive(Clone)]
pub struct StoreStats {
  pub records_written: IntCounter,
  pub bytes_written: IntCounter,
  records_dropped: IntCounterVec,
  batches_closed: IntCounterVec,
  pub batches_evicted: IntCounter,
  pub batches_expired: IntCounter,
  pub batches_recovered: IntCounter,
  pub batches_discarded: IntCounter,
  pub bytes_truncated: IntCounter,
}

impl StoreStats {
  pub fn new(registry: &Registry, feature: &str) -> prometheus::Result<Self> {
    Ok(Self {
      records_written: register_int_counter_with_registry!(
        feature_opts("batch:records_written", "-", feature),
        registry
      )?,
      bytes_written: register_int_counter_with_registry!(
        feature_opts("batch:bytes_written", "-", feature),
        registry
      )?,
      records_dropped: register_int_counter_vec_with_registry!(
        feature_opts("batch:records_dropped", "-", feature),
        &["reason"],
        registry
      )?,
      batches_closed: register_int_counter_vec_with_registry!(
        feature_opts("batch:batches_closed", "-", feature),
        &["reason"],
        registry
      )?,
      batches_evicted: register_int_counter_with_registry!(
        feature_opts("batch:batches_evicted", "-", feature),
        registry
      )?,
      batches_expired: register_int_counter_with_registry!(
        feature_opts("batch:batches_expired", "-", feature),
        registry
      )?,
      batches_recovered: register_int_counter_with_registry!(
        feature_opts("batch:batches_recovered", "-", feature),
        registry
      )?,
      batches_discarded: register_int_counter_with_registry!(
        feature_opts("batch:batches_discarded", "-", feature),
        registry
      )?,
      bytes_truncated: register_int_counter_with_registry!(
        feature_opts("batch:bytes_truncated", "-", feature),
        registry
      )?,
    })
  }

  pub fn record_dropped(&self, reason: DropReason) {
    self
      .records_dropped
      .with_label_values(&[reason.as_str()])
      .inc();
  }

  pub fn batch_closed(&self, reason: CloseReason) {
    self
      .batches_closed
      .with_label_values(&[reason.as_str()])
      .inc();
  }

  /// Removes the counters from `registry` so the same feature can be registered again, e.g. when a
  /// pipeline is restarted.
  pub fn unregister(&self, registry: &Registry) {
    let collectors: [Box<dyn Collector>; 9] = [
      Box::new(self.records_written.clone()),
      Box::new(self.bytes_written.clone()),
      Box::new(self.records_dropped.clone()),
      Box::new(self.batches_closed.clone()),
      Box::new(self.batches_evicted.clone()),
      Box::new(self.batches_expired.clone()),
      Box::new(self.batches_recovered.clone()),
      Box::new(self.batches_discarded.clone()),
      Box::new(self.bytes_truncated.clone()),
    ];
    for collector in collectors {
      if let Err(e) = registry.unregister(collector) {
        log::debug!("failed to unregister store stats: {e}");
      }
    }
  }
}
