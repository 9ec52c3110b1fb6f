// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

//! Durable, file backed batching of serialized telemetry records.
//!
//! Records are appended to the single OPEN batch of a store. Batches close on age, size or an
//! explicit flush, at which point they become eligible for upload. The upload side claims at most
//! one batch at a time and either confirms delivery (deleting the file) or releases the claim so
//! the batch can be retried.

pub mod clock;
pub mod config;
pub mod diagnostics;
mod filename;
mod framing;
mod lock;
mod queue;
pub mod reader;
mod recovery;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod writer;

pub use clock::{SystemTimeProvider, TestTimeProvider, TimeProvider};
pub use config::{ConfigError, SerializedStoreConfig, StoreConfig};
pub use diagnostics::{DiagnosticEvent, Diagnostics, DropReason, LogDiagnostics, NoopDiagnostics};
pub use filename::BatchId;
pub use reader::{Batch, BatchClaim, BatchReader, PayloadFormat};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use stats::StoreStats;
pub use store::{AppendError, BatchHandle, BatchInfo, BatchState, BatchStore, CloseReason};
pub use writer::{BatchWriter, RecordAppender, WriterTask};

use std::path::PathBuf;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  bd_test_helpers::test_global_init();
}

//
// Error
//

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store directory {0:?} is locked: {1}")]
  DirectoryLocked(PathBuf, anyhow::Error),
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("failed to register stats: {0}")]
  Stats(#[from] prometheus::Error),
  #[error("corrupt batch file: {0}")]
  Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;
