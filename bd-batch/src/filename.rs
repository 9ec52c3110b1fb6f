// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Batch file naming: `{created_at_ms}-{nonce:08x}.batch`.
//!
//! Ordering ids by `(created_at_ms, nonce)` gives creation order because the store never hands
//! out the same millisecond twice.

#[cfg(test)]
#[path = "./filename_test.rs"]
mod tests;

use std::fmt;

pub const BATCH_EXTENSION: &str = "batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId {
  pub created_at_ms: u64,
  pub nonce: u32,
}

impl BatchId {
  #[must_use]
  pub const fn new(created_at_ms: u64, nonce: u32) -> Self {
    Self {
      created_at_ms,
      nonce,
    }
  }

  #[must_use]
  pub fn file_name(&self) -> String {
    format!("{self}.{BATCH_EXTENSION}")
  }

  /// Parses a full file name. Anything that isn't a batch file yields `None`. Only the exact form
  /// produced by [`Self::file_name`] is accepted, so leading zeros and uppercase hex are rejected.
  #[must_use]
  pub fn parse(filename: &str) -> Option<Self> {
    let stem = filename
      .strip_suffix(BATCH_EXTENSION)
      .and_then(|s| s.strip_suffix('.'))?;
    let (created_at_ms, nonce) = stem.split_once('-')?;
    if created_at_ms.is_empty()
      || !created_at_ms.chars().all(|c| c.is_ascii_digit())
      || nonce.len() != 8
    {
      return None;
    }

    let id = Self {
      created_at_ms: created_at_ms.parse().ok()?,
      nonce: u32::from_str_radix(nonce, 16).ok()?,
    };
    (id.file_name() == filename).then_some(id)
  }
}

impl fmt::Display for BatchId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{:08x}", self.created_at_ms, self.nonce)
  }
}
