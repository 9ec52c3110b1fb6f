// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./reader_test.rs"]
mod tests;

use crate::diagnostics::DiagnosticEvent;
use crate::filename::BatchId;
use crate::store::{BatchInfo, BatchStore};
use std::sync::Arc;

//
// PayloadFormat
//

/// How the records of a batch are joined into a single upload body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadFormat {
  pub prefix: &'static [u8],
  pub separator: &'static [u8],
  pub suffix: &'static [u8],
}

impl PayloadFormat {
  #[must_use]
  pub const fn json_array() -> Self {
    Self {
      prefix: b"[",
      separator: b",",
      suffix: b"]",
    }
  }

  #[must_use]
  pub const fn newline_delimited() -> Self {
    Self {
      prefix: b"",
      separator: b"\n",
      suffix: b"",
    }
  }

  #[must_use]
  pub fn join(&self, records: &[Vec<u8>]) -> Vec<u8> {
    let records_len: usize = records.iter().map(Vec::len).sum();
    let mut payload = Vec::with_capacity(
      self.prefix.len()
        + records_len
        + self.separator.len() * records.len().saturating_sub(1)
        + self.suffix.len(),
    );
    payload.extend_from_slice(self.prefix);
    for (i, record) in records.iter().enumerate() {
      if i > 0 {
        payload.extend_from_slice(self.separator);
      }
      payload.extend_from_slice(record);
    }
    payload.extend_from_slice(self.suffix);
    payload
  }
}

//
// BatchClaim
//

/// The IN_FLIGHT claim on a batch. Must be resolved with [`Self::confirm`] or [`Self::release`];
/// a claim dropped without resolution is released, which makes the batch eligible again.
pub struct BatchClaim {
  store: Arc<BatchStore>,
  id: BatchId,
  resolved: bool,
}

impl BatchClaim {
  #[must_use]
  pub const fn id(&self) -> BatchId {
    self.id
  }

  /// The batch was delivered or permanently rejected. Deletes it.
  pub fn confirm(mut self) {
    self.resolved = true;
    self.store.confirm_delivered(self.id);
  }

  /// The attempt failed transiently. Returns the batch to the eligible pool.
  pub fn release(mut self) {
    self.resolved = true;
    self.store.release_in_flight(self.id);
  }
}

impl Drop for BatchClaim {
  fn drop(&mut self) {
    if !self.resolved {
      log::debug!("releasing unresolved claim on batch {}", self.id);
      self.store.release_in_flight(self.id);
    }
  }
}

//
// Batch
//

/// A claimed batch together with its records.
pub struct Batch {
  pub info: BatchInfo,
  pub records: Vec<Vec<u8>>,
  pub claim: BatchClaim,
  format: PayloadFormat,
}

impl Batch {
  #[must_use]
  pub const fn id(&self) -> BatchId {
    self.info.id
  }

  #[must_use]
  pub fn payload(&self) -> Vec<u8> {
    self.format.join(&self.records)
  }
}

//
// BatchReader
//

pub struct BatchReader {
  store: Arc<BatchStore>,
  format: PayloadFormat,
}

impl BatchReader {
  #[must_use]
  pub const fn new(store: Arc<BatchStore>, format: PayloadFormat) -> Self {
    Self { store, format }
  }

  #[must_use]
  pub fn eligible_batches(&self) -> Vec<BatchId> {
    self.store.list_eligible_batches()
  }

  /// Claims and reads the oldest eligible batch. An aged OPEN batch is closed first so that a
  /// quiet producer doesn't hold data back, and batches past their retention are purged.
  ///
  /// Returns `None` when nothing is eligible or another batch is already in flight. Batches that
  /// cannot be read are deleted and skipped.
  pub fn next_batch(&self) -> Option<Batch> {
    self.store.close_expired_batch();
    self.store.purge_expired_batches();

    for id in self.store.list_eligible_batches() {
      let Some(info) = self.store.mark_in_flight(id) else {
        if self.store.in_flight_batch_id().is_some() {
          return None;
        }
        // Removed since it was listed.
        continue;
      };
      let claim = BatchClaim {
        store: self.store.clone(),
        id,
        resolved: false,
      };

      match self.store.read_batch_records(id) {
        Ok(records) if !records.is_empty() => {
          return Some(Batch {
            info,
            records,
            claim,
            format: self.format,
          });
        },
        Ok(_) => self.discard(claim, "no records".to_string()),
        Err(e) => self.discard(claim, e.to_string()),
      }
    }

    None
  }

  fn discard(&self, claim: BatchClaim, error: String) {
    let id = claim.id();
    claim.confirm();
    self.store.stats().batches_discarded.inc();
    self
      .store
      .diagnostics()
      .report(&DiagnosticEvent::BatchDiscarded { id, error });
  }
}
