// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./retry_test.rs"]
mod tests;

use crate::config::UploadConfig;
use backoff::backoff::Backoff;
use std::time::Duration;

/// Delay between upload ticks. Stays at the baseline interval while uploads succeed and grows
/// exponentially (`baseline * multiplier^n`, capped) with each consecutive retriable failure.
pub struct RetryBackoff {
  baseline: Duration,
  backoff: backoff::ExponentialBackoff,
  current: Duration,
}

impl RetryBackoff {
  #[must_use]
  pub fn new(config: &UploadConfig) -> Self {
    let baseline = config.upload_interval.unsigned_abs();
    let max_interval = config.max_retry_interval.unsigned_abs();
    // A product that overflows a Duration is well past the cap.
    let first_retry =
      Duration::try_from_secs_f64(baseline.as_secs_f64() * config.retry_multiplier)
        .map_or(max_interval, |interval| interval.min(max_interval));
    let backoff = backoff::ExponentialBackoffBuilder::new()
      .with_initial_interval(first_retry)
      .with_multiplier(config.retry_multiplier)
      .with_randomization_factor(config.retry_jitter)
      .with_max_interval(max_interval)
      .with_max_elapsed_time(None)
      .build();

    Self {
      baseline,
      backoff,
      current: baseline,
    }
  }

  #[must_use]
  pub const fn baseline(&self) -> Duration {
    self.baseline
  }

  /// The delay until the next tick.
  #[must_use]
  pub const fn current(&self) -> Duration {
    self.current
  }

  /// Records a retriable failure and returns the backed-off delay.
  pub fn on_failure(&mut self) -> Duration {
    // Without a max elapsed time the backoff never gives up.
    self.current = self
      .backoff
      .next_backoff()
      .unwrap_or_else(|| self.backoff.max_interval);
    self.current
  }

  /// Records a completed attempt (delivered or permanently rejected) and returns the baseline.
  pub fn on_success(&mut self) -> Duration {
    self.backoff.reset();
    self.current = self.baseline;
    self.current
  }
}
