// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./scheduler_test.rs"]
mod tests;

use crate::conditions::{ConditionOracle, SkipReason, check_conditions};
use crate::config::UploadConfig;
use crate::retry::RetryBackoff;
use crate::stats::UploadStats;
use crate::uploader::{Disposition, UploadMetadata, UploadStatus, Uploader};
use bd_batch::{BatchId, BatchReader, BatchStore, DiagnosticEvent, PayloadFormat, Shutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

//
// SchedulerCommand
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
  // Run a tick right away instead of waiting for the current delay to elapse.
  UploadNow,
}

//
// SchedulerHandle
//

#[derive(Clone)]
pub struct SchedulerHandle {
  tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
  pub fn upload_now(&self) {
    // A full channel means a tick is already pending.
    if let Err(e) = self.tx.try_send(SchedulerCommand::UploadNow) {
      log::trace!("upload request not queued: {e}");
    }
  }
}

//
// TickOutcome
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  Skipped(SkipReason),
  NothingToUpload,
  Delivered(BatchId),
  Rejected(BatchId, UploadStatus),
  Retrying(BatchId, UploadStatus),
}

//
// UploadScheduler
//

/// Background upload worker of a single store. Ticks are strictly sequential, so at most one
/// upload is outstanding at any time.
pub struct UploadScheduler {
  store: Arc<BatchStore>,
  reader: BatchReader,
  content_type: &'static str,
  uploader: Arc<dyn Uploader>,
  conditions: Arc<dyn ConditionOracle>,
  config: UploadConfig,
  retry: RetryBackoff,
  stats: UploadStats,
  commands: mpsc::Receiver<SchedulerCommand>,
}

impl UploadScheduler {
  pub fn new(
    store: Arc<BatchStore>,
    format: PayloadFormat,
    content_type: &'static str,
    uploader: Arc<dyn Uploader>,
    conditions: Arc<dyn ConditionOracle>,
    config: UploadConfig,
    stats: UploadStats,
  ) -> (Self, SchedulerHandle) {
    let (tx, commands) = mpsc::channel(1);
    let scheduler = Self {
      reader: BatchReader::new(store.clone(), format),
      store,
      content_type,
      uploader,
      conditions,
      retry: RetryBackoff::new(&config),
      config,
      stats,
      commands,
    };
    (scheduler, SchedulerHandle { tx })
  }

  /// Runs ticks until shutdown. An attempt that is in progress when shutdown is requested runs to
  /// completion (bounded by the upload timeout) and its outcome is applied; no tick starts after
  /// that.
  pub async fn run(mut self, mut shutdown: Shutdown) {
    let mut delay = self.retry.current();
    loop {
      tokio::select! {
        biased;
        () = shutdown.cancelled() => break,
        Some(SchedulerCommand::UploadNow) = self.commands.recv() => {
          log::debug!("immediate upload requested");
        },
        () = tokio::time::sleep(delay) => {},
      }

      let (outcome, next_delay) = self.step().await;
      log::trace!("tick finished: {outcome:?}, next in {next_delay:?}");
      delay = next_delay;
    }

    log::debug!("upload scheduler shut down");
  }

  /// Runs a single tick and returns its outcome together with the delay until the next tick.
  pub async fn step(&mut self) -> (TickOutcome, Duration) {
    if let Err(reason) = check_conditions(self.conditions.as_ref(), &self.config) {
      log::debug!("skipping upload tick: {}", reason.as_str());
      self.stats.tick_skipped(reason);
      return (TickOutcome::Skipped(reason), self.retry.current());
    }

    let Some(batch) = self.reader.next_batch() else {
      return (TickOutcome::NothingToUpload, self.retry.current());
    };

    let id = batch.id();
    let metadata = UploadMetadata {
      content_type: self.content_type,
      batch_id: id,
      record_count: batch.info.record_count,
    };
    let payload = batch.payload();
    log::debug!(
      "uploading batch {id}: {} records, {} bytes",
      metadata.record_count,
      payload.len()
    );

    self.stats.attempts.inc();
    let status = tokio::time::timeout(
      self.config.upload_timeout.unsigned_abs(),
      self.uploader.send(payload, metadata),
    )
    .await
    .unwrap_or_else(|_| {
      log::debug!("upload of batch {id} timed out");
      UploadStatus::NetworkFailure
    });

    match status.disposition() {
      Disposition::Deliver => {
        batch.claim.confirm();
        self.stats.delivered.inc();
        (TickOutcome::Delivered(id), self.retry.on_success())
      },
      Disposition::Reject => {
        batch.claim.confirm();
        self.stats.rejected(status);
        self
          .store
          .diagnostics()
          .report(&DiagnosticEvent::UploadRejected {
            id,
            status: status.to_string(),
          });
        (TickOutcome::Rejected(id, status), self.retry.on_success())
      },
      Disposition::Retry => {
        batch.claim.release();
        self.stats.retried(status);
        let delay = self.retry.on_failure();
        log::debug!("upload of batch {id} failed ({status}), retrying in {delay:?}");
        (TickOutcome::Retrying(id, status), delay)
      },
    }
  }
}
