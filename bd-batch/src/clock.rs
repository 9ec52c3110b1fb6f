// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;

//
// TimeProvider
//

/// Wall clock used for batch naming, batch age and retention. Scheduling delays use the tokio
/// clock instead so they can be paused in tests.
pub trait TimeProvider: Send + Sync {
  fn now(&self) -> OffsetDateTime;

  fn now_unix_ms(&self) -> u64 {
    let now = self.now();
    let ms = now.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(ms).unwrap_or_default()
  }
}

//
// SystemTimeProvider
//

pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
  fn now(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }
}

//
// TestTimeProvider
//

#[derive(Clone)]
pub struct TestTimeProvider {
  now: Arc<Mutex<OffsetDateTime>>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(now: OffsetDateTime) -> Self {
    Self {
      now: Arc::new(Mutex::new(now)),
    }
  }

  pub fn advance(&self, duration: time::Duration) {
    *self.now.lock() += duration;
  }

  pub fn set_time(&self, new_time: OffsetDateTime) {
    *self.now.lock() = new_time;
  }
}

impl TimeProvider for TestTimeProvider {
  fn now(&self) -> OffsetDateTime {
    *self.now.lock()
  }
}
