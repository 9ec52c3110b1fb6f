// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./writer_test.rs"]
mod tests;

use crate::diagnostics::{DiagnosticEvent, DropReason};
use crate::filename::BatchId;
use crate::queue::{self, TrySendError, WriterCommand};
use crate::shutdown::Shutdown;
use crate::store::{AppendError, BatchStore, CloseReason};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

//
// RecordAppender
//

/// Appends records to the OPEN batch, rolling over to a new batch when the current one is full.
/// Clones share one append lock, so concurrent producers never race each other between closing a
/// full batch and retrying on the next one.
#[derive(Clone)]
pub struct RecordAppender {
  store: Arc<BatchStore>,
  append_lock: Arc<Mutex<()>>,
}

impl RecordAppender {
  #[must_use]
  pub fn new(store: Arc<BatchStore>) -> Self {
    Self {
      store,
      append_lock: Arc::default(),
    }
  }

  /// Appends `record`, returning the batch it landed in. A record that cannot be stored is
  /// dropped, counted and reported to the diagnostics channel; the reason is returned for the
  /// caller's information only.
  pub fn append(&self, record: &[u8]) -> Result<BatchId, DropReason> {
    self
      .try_append(record)
      .map_err(|reason| self.dropped(reason, record.len()))
  }

  fn try_append(&self, record: &[u8]) -> Result<BatchId, DropReason> {
    let _guard = self.append_lock.lock();
    let handle = self
      .store
      .current_open_batch()
      .ok_or(DropReason::StorageFailure)?;

    match self.store.append(&handle, record) {
      Ok(()) => return Ok(handle.id()),
      Err(AppendError::BatchFull) => self.store.close_batch(&handle, CloseReason::Size),
      // Closed from outside of this appender in between. Retry on the new one.
      Err(AppendError::BatchNotOpen(_)) => {},
      Err(e) => return Err(append_error_reason(&e)),
    }

    let handle = self
      .store
      .current_open_batch()
      .ok_or(DropReason::StorageFailure)?;
    self
      .store
      .append(&handle, record)
      .map(|()| handle.id())
      .map_err(|e| append_error_reason(&e))
  }

  fn dropped(&self, reason: DropReason, size: usize) -> DropReason {
    log::trace!("dropping record of {size} bytes: {reason}");
    self.store.stats().record_dropped(reason);
    self
      .store
      .diagnostics()
      .report(&DiagnosticEvent::RecordDropped { reason, size });
    reason
  }
}

const fn append_error_reason(error: &AppendError) -> DropReason {
  match error {
    AppendError::RecordTooLarge { .. } => DropReason::RecordTooLarge,
    AppendError::BatchFull | AppendError::BatchNotOpen(_) => DropReason::BatchFull,
    AppendError::Io(_) => DropReason::StorageFailure,
  }
}

/// Creates the producer facing writer and the task that performs the appends. The task must be
/// spawned for queued records to reach the store.
#[must_use]
pub fn new(store: Arc<BatchStore>) -> (BatchWriter, WriterTask) {
  let (tx, rx) = queue::channel(store.config().writer_queue_memory);
  let appender = RecordAppender::new(store);
  (
    BatchWriter {
      tx,
      appender: appender.clone(),
    },
    WriterTask { rx, appender },
  )
}

//
// BatchWriter
//

/// Producer side of the writer. Never blocks and never fails visibly: records that cannot be
/// queued are dropped and reported.
#[derive(Clone)]
pub struct BatchWriter {
  tx: queue::Sender,
  appender: RecordAppender,
}

impl BatchWriter {
  pub fn write(&self, record: Vec<u8>) {
    let limit = self.appender.store.config().record_size_limit();
    if record.len() as u64 > limit {
      self
        .appender
        .dropped(DropReason::RecordTooLarge, record.len());
      return;
    }

    let size = record.len();
    match self.tx.try_send(WriterCommand::Record(record)) {
      Ok(()) => {},
      Err(TrySendError::Full(_)) => {
        self.appender.dropped(DropReason::QueueFull, size);
      },
      Err(TrySendError::Closed(_)) => {
        self.appender.dropped(DropReason::WriterClosed, size);
      },
    }
  }

  /// Requests the OPEN batch to be closed once every record written before this call has been
  /// appended.
  pub fn flush(&self) {
    if self.tx.try_send(WriterCommand::Flush(None)).is_err() {
      log::debug!("flush requested after writer shut down");
    }
  }

  /// Like [`Self::flush`], but waits until the flush has been processed by the writer task.
  pub async fn flush_and_wait(&self) {
    let (done_tx, done_rx) = oneshot::channel();
    if self
      .tx
      .try_send(WriterCommand::Flush(Some(done_tx)))
      .is_err()
    {
      log::debug!("flush requested after writer shut down");
      return;
    }
    let _ignored = done_rx.await;
  }
}

//
// WriterTask
//

pub struct WriterTask {
  rx: queue::Receiver,
  appender: RecordAppender,
}

impl WriterTask {
  /// Processes commands until shutdown. Commands queued before shutdown are still applied; any
  /// later write is dropped as `writer_closed`.
  pub async fn run(mut self, mut shutdown: Shutdown) {
    loop {
      tokio::select! {
        biased;
        () = shutdown.cancelled() => break,
        command = self.rx.recv() => match command {
          Some(command) => self.process(command),
          None => return,
        },
      }
    }

    self.rx.close();
    let mut drained = 0;
    while let Some(command) = self.rx.try_recv() {
      self.process(command);
      drained += 1;
    }
    log::debug!("writer task shut down, drained {drained} queued commands");
  }

  fn process(&self, command: WriterCommand) {
    match command {
      WriterCommand::Record(record) => {
        let _ignored = self.appender.append(&record);
      },
      WriterCommand::Flush(done) => {
        self.appender.store.flush();
        if let Some(done) = done {
          let _ignored = done.send(());
        }
      },
    }
  }
}
