// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use prometheus::Registry;
use prometheus::proto::MetricFamily;
use std::collections::HashMap;

// Attempts to extract a counter with the specific name and labels from the provided metric
// families. Labels must match exactly, including constant labels.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn get_counter_value(
  metrics: &[MetricFamily],
  name: &str,
  labels: &[(&str, &str)],
) -> Option<u64> {
  let labels: HashMap<&str, &str> = labels.iter().copied().collect();
  metrics
    .iter()
    .find(|f| f.name() == name)?
    .get_metric()
    .iter()
    .find(|m| {
      m.get_label()
        .iter()
        .map(|label| (label.name(), label.value()))
        .collect::<HashMap<&str, &str>>()
        == labels
    })
    .map(|m| m.get_counter().value() as u64)
}

//
// StatsHelper
//

pub trait StatsHelper {
  // Returns the counter value, or 0 if the counter was never registered/incremented.
  fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64;

  fn assert_counter_eq(&self, value: u64, name: &str, labels: &[(&str, &str)]);
}

impl StatsHelper for Registry {
  fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
    get_counter_value(&self.gather(), name, labels).unwrap_or_default()
  }

  fn assert_counter_eq(&self, value: u64, name: &str, labels: &[(&str, &str)]) {
    assert_eq!(
      value,
      self.counter(name, labels),
      "counter {name} {labels:?} mismatch"
    );
  }
}
