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

//! Background upload of the batches produced by `bd-batch`.
//!
//! One [`scheduler::UploadScheduler`] runs per feature. Every tick it consults the condition
//! oracle, claims the oldest eligible batch, hands it to the [`uploader::Uploader`] and either
//! deletes the batch or releases it for a later retry with exponential backoff.

pub mod conditions;
pub mod config;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod uploader;

pub use conditions::{AlwaysUpload, ConditionOracle, Connectivity, PowerSource, SkipReason};
pub use config::{PipelineConfig, UploadConfig};
pub use pipeline::{Feature, FeatureHandle, FeaturePipeline, PipelineContext};
pub use scheduler::{SchedulerCommand, SchedulerHandle, TickOutcome, UploadScheduler};
pub use uploader::{Disposition, UploadMetadata, UploadStatus, Uploader};

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
  #[error("batch store error: {0}")]
  Batch(#[from] bd_batch::Error),
  #[error("invalid configuration: {0}")]
  Config(#[from] bd_batch::ConfigError),
  #[error("failed to register stats: {0}")]
  Stats(#[from] prometheus::Error),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
