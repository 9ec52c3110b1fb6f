// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./shutdown_test.rs"]
mod tests;

use tokio::sync::watch;

//
// ShutdownTrigger
//

/// Owned by whoever started a worker. Raising it asks every [`Shutdown`] made from it to stop.
#[derive(Debug)]
pub struct ShutdownTrigger {
  cancelled_tx: watch::Sender<bool>,
}

impl Default for ShutdownTrigger {
  fn default() -> Self {
    let (cancelled_tx, _) = watch::channel(false);
    Self { cancelled_tx }
  }
}

impl ShutdownTrigger {
  #[must_use]
  pub fn make_shutdown(&self) -> Shutdown {
    Shutdown {
      cancelled_rx: self.cancelled_tx.subscribe(),
    }
  }

  /// Raises the stop signal without waiting.
  pub fn cancel(&self) {
    self.cancelled_tx.send_replace(true);
  }

  /// Raises the stop signal and waits until every worker holding a [`Shutdown`] dropped it.
  pub async fn shutdown(self) {
    self.cancel();
    self.cancelled_tx.closed().await;
  }
}

//
// Shutdown
//

/// Cooperative stop signal handed to a worker. Workers poll it between units of work and drop it
/// when they exit.
#[derive(Clone, Debug)]
pub struct Shutdown {
  cancelled_rx: watch::Receiver<bool>,
}

impl Shutdown {
  /// Resolves once the stop signal has been raised, or the trigger was dropped.
  pub async fn cancelled(&mut self) {
    if *self.cancelled_rx.borrow_and_update() {
      return;
    }
    let _ignored = self.cancelled_rx.wait_for(|cancelled| *cancelled).await;
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    *self.cancelled_rx.borrow()
  }
}
