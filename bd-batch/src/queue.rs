// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Command queue between producers and the writer task. Unbounded in length, but bounded by the
//! total size of the queued records.

#[cfg(test)]
#[path = "./queue_test.rs"]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub enum WriterCommand {
  Record(Vec<u8>),
  // Close the OPEN batch once every previously queued record has been appended.
  Flush(Option<oneshot::Sender<()>>),
}

impl WriterCommand {
  // Flushes don't count against the memory budget so they are never rejected as full.
  fn size(&self) -> u64 {
    match self {
      Self::Record(record) => record.len() as u64,
      Self::Flush(_) => 0,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum TrySendError {
  #[error("queue memory capacity exceeded")]
  Full(WriterCommand),
  #[error("queue closed")]
  Closed(WriterCommand),
}

#[must_use]
pub fn channel(memory_capacity: usize) -> (Sender, Receiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  let memory_usage = Arc::new(AtomicU64::new(0));

  (
    Sender {
      tx,
      memory_usage: memory_usage.clone(),
      memory_capacity: memory_capacity as u64,
    },
    Receiver { rx, memory_usage },
  )
}

//
// Sender
//

#[derive(Clone)]
pub struct Sender {
  tx: mpsc::UnboundedSender<WriterCommand>,
  memory_usage: Arc<AtomicU64>,
  memory_capacity: u64,
}

impl Sender {
  pub fn try_send(&self, command: WriterCommand) -> Result<(), TrySendError> {
    let size = command.size();
    if !self.try_reserve(size) {
      return Err(TrySendError::Full(command));
    }

    self.tx.send(command).map_err(|e| {
      self.release(size);
      TrySendError::Closed(e.0)
    })
  }

  fn try_reserve(&self, size: u64) -> bool {
    // Reserve optimistically and roll back if the reservation overshot the capacity.
    let previous = self.memory_usage.fetch_add(size, Ordering::SeqCst);
    if previous + size > self.memory_capacity {
      self.release(size);
      log::trace!(
        "queue holds {previous} bytes, cannot add {size} without exceeding {} bytes",
        self.memory_capacity
      );
      return false;
    }
    true
  }

  fn release(&self, size: u64) {
    self.memory_usage.fetch_sub(size, Ordering::SeqCst);
  }
}

//
// Receiver
//

pub struct Receiver {
  rx: mpsc::UnboundedReceiver<WriterCommand>,
  memory_usage: Arc<AtomicU64>,
}

impl Receiver {
  pub async fn recv(&mut self) -> Option<WriterCommand> {
    let command = self.rx.recv().await?;
    self.memory_usage.fetch_sub(command.size(), Ordering::SeqCst);
    Some(command)
  }

  /// Returns `None` when the queue is empty or closed.
  pub fn try_recv(&mut self) -> Option<WriterCommand> {
    match self.rx.try_recv() {
      Ok(command) => {
        self.memory_usage.fetch_sub(command.size(), Ordering::SeqCst);
        Some(command)
      },
      Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
    }
  }

  /// Stops accepting new commands. Already queued commands can still be received.
  pub fn close(&mut self) {
    self.rx.close();
  }

  #[cfg(test)]
  fn memory_usage(&self) -> u64 {
    self.memory_usage.load(Ordering::SeqCst)
  }
}
