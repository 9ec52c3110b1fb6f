// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::filename::BatchId;
use std::fmt::Display;

//
// DropReason
//

/// Why a record never made it into a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
  RecordTooLarge,
  QueueFull,
  WriterClosed,
  StorageFailure,
  BatchFull,
}

impl DropReason {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::RecordTooLarge => "record_too_large",
      Self::QueueFull => "queue_full",
      Self::WriterClosed => "writer_closed",
      Self::StorageFailure => "storage_failure",
      Self::BatchFull => "batch_full",
    }
  }
}

impl Display for DropReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

//
// DiagnosticEvent
//

/// Failures and data loss observed by the batching pipeline. None of these are surfaced to the
/// producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
  RecordDropped { reason: DropReason, size: usize },
  // Deleted without upload to satisfy the disk quota.
  BatchEvicted { id: BatchId, bytes: u64 },
  // Deleted without upload because it outlived the retention period.
  BatchExpired { id: BatchId },
  // A partially written tail was cut off during startup recovery.
  BatchRecovered { id: BatchId, truncated_bytes: u64 },
  // The batch file was unreadable or held no complete record and was deleted.
  BatchDiscarded { id: BatchId, error: String },
  // The collector permanently rejected the batch, which was deleted.
  UploadRejected { id: BatchId, status: String },
  StorageFailure { operation: &'static str, error: String },
}

impl Display for DiagnosticEvent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::RecordDropped { reason, size } => write!(f, "dropped record of {size} bytes: {reason}"),
      Self::BatchEvicted { id, bytes } => {
        write!(f, "evicted batch {id} ({bytes} bytes) to honor disk quota")
      },
      Self::BatchExpired { id } => write!(f, "batch {id} exceeded retention, deleting"),
      Self::BatchRecovered {
        id,
        truncated_bytes,
      } => write!(
        f,
        "recovered batch {id}, truncated {truncated_bytes} corrupt trailing bytes"
      ),
      Self::BatchDiscarded { id, error } => write!(f, "discarded batch {id}: {error}"),
      Self::UploadRejected { id, status } => {
        write!(f, "upload of batch {id} permanently rejected: {status}")
      },
      Self::StorageFailure { operation, error } => write!(f, "storage {operation} failed: {error}"),
    }
  }
}

//
// Diagnostics
//

/// The internal diagnostic channel. Implementations must be cheap and must never block, as they
/// are invoked from producer threads and while the store lock is held.
pub trait Diagnostics: Send + Sync {
  fn report(&self, event: &DiagnosticEvent);
}

//
// LogDiagnostics
//

/// Writes every diagnostic event to the log.
#[derive(Default)]
pub struct LogDiagnostics {
  name: String,
}

impl LogDiagnostics {
  #[must_use]
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

impl Diagnostics for LogDiagnostics {
  fn report(&self, event: &DiagnosticEvent) {
    match event {
      DiagnosticEvent::BatchRecovered { .. } | DiagnosticEvent::BatchExpired { .. } => {
        log::info!("({}) {event}", self.name);
      },
      _ => log::warn!("({}) {event}", self.name),
    }
  }
}

//
// NoopDiagnostics
//

pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
  fn report(&self, _event: &DiagnosticEvent) {}
}
