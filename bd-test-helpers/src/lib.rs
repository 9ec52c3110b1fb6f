// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub mod stats;

const DEFAULT_FILTER_RULES: &str = "info";

// Installs the test logger. Library crates log via the `log` facade, so the records are bridged
// into tracing before being written to stderr. Safe to call from multiple ctor functions.
pub fn test_global_init() {
  static INIT: Once = Once::new();

  INIT.call_once(|| {
    let stderr = tracing_subscriber::fmt::layer()
      .with_test_writer()
      .with_line_number(true)
      .compact();

    let filter = EnvFilter::new(
      std::env::var("RUST_LOG")
        .as_deref()
        .unwrap_or(DEFAULT_FILTER_RULES),
    );

    // try_init also installs the log -> tracing bridge via the tracing-log feature of
    // tracing-subscriber. Fall back to an explicit LogTracer in case another subscriber won.
    if Registry::default()
      .with(filter)
      .with(stderr)
      .try_init()
      .is_err()
    {
      let _ignored = tracing_log::LogTracer::init();
    }

    log::debug!("test logging initialized");
  });
}
