// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::conditions::SkipReason;
use crate::uploader::UploadStatus;
use bd_batch::stats::feature_opts;
use prometheus::core::Collector;
use prometheus::{
  IntCounter,
  IntCounterVec,
  Registry,
  register_int_counter_vec_with_registry,
  register_int_counter_with_registry,
};

//
// UploadStats
//

// attempts
//  # of batches handed to the uploader.
// delivered
//  # of batches deleted after a successful upload.
// rejected
//  # of batches deleted after a non-retriable response, labeled by status.
// retried
//  # of attempts that failed transiently and released their batch, labeled by status.
// ticks_skipped
//  # of ticks skipped because of device conditions, labeled by condition.
#[derive(Clone)]
pub struct UploadStats {
  pub attempts: IntCounter,
  pub delivered: IntCounter,
  rejected: IntCounterVec,
  retried: IntCounterVec,
  ticks_skipped: IntCounterVec,
}

impl UploadStats {
  pub fn new(registry: &Registry, feature: &str) -> prometheus::Result<Self> {
    Ok(Self {
      attempts: register_int_counter_with_registry!(
        feature_opts("upload:attempts", "-", feature),
        registry
      )?,
      delivered: register_int_counter_with_registry!(
        feature_opts("upload:delivered", "-", feature),
        registry
      )?,
      rejected: register_int_counter_vec_with_registry!(
        feature_opts("upload:rejected", "-", feature),
        &["reason"],
        registry
      )?,
      retried: register_int_counter_vec_with_registry!(
        feature_opts("upload:retried", "-", feature),
        &["reason"],
        registry
      )?,
      ticks_skipped: register_int_counter_vec_with_registry!(
        feature_opts("upload:ticks_skipped", "-", feature),
        &["reason"],
        registry
      )?,
    })
  }

  pub fn rejected(&self, status: UploadStatus) {
    self.rejected.with_label_values(&[status.reason()]).inc();
  }

  pub fn retried(&self, status: UploadStatus) {
    self.retried.with_label_values(&[status.reason()]).inc();
  }

  pub fn tick_skipped(&self, reason: SkipReason) {
    self.ticks_skipped.with_label_values(&[reason.as_str()]).inc();
  }

  pub fn unregister(&self, registry: &Registry) {
    let collectors: [Box<dyn Collector>; 5] = [
      Box::new(self.attempts.clone()),
      Box::new(self.delivered.clone()),
      Box::new(self.rejected.clone()),
      Box::new(self.retried.clone()),
      Box::new(self.ticks_skipped.clone()),
    ];
    for collector in collectors {
      if let Err(e) = registry.unregister(collector) {
        log::debug!("failed to unregister upload stats: {e}");
      }
    }
  }
}
