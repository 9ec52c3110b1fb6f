// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Startup scan of a store directory. The directory listing is the source of truth for which
//! batches exist; each file is validated frame by frame and cut back to its last complete record.

#[cfg(test)]
#[path = "./recovery_test.rs"]
mod tests;

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::filename::BatchId;
use crate::framing;
use crate::lock::LOCK_FILE_NAME;
use crate::stats::StoreStats;
use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;

#[derive(Debug, PartialEq, Eq)]
pub struct RecoveredBatch {
  pub id: BatchId,
  pub payload_bytes: u64,
  pub record_count: u32,
  pub file_len: u64,
}

enum FileOutcome {
  Intact(RecoveredBatch),
  Truncated(RecoveredBatch, u64),
  Discard(String),
}

/// Scans `directory`, repairing or deleting batch files as needed. Returns the surviving batches
/// ordered oldest first. Files that don't look like batch files are left alone.
pub fn recover(
  directory: &Path,
  stats: &StoreStats,
  diagnostics: &dyn Diagnostics,
) -> std::io::Result<Vec<RecoveredBatch>> {
  let mut recovered = Vec::new();

  for entry in std::fs::read_dir(directory)? {
    let entry = entry?;
    let file_name = entry.file_name();
    let Some(file_name) = file_name.to_str() else {
      continue;
    };
    if file_name == LOCK_FILE_NAME {
      continue;
    }
    let Some(id) = BatchId::parse(file_name) else {
      log::debug!("ignoring unknown file in batch directory: {file_name}");
      continue;
    };
    if !entry.file_type()?.is_file() {
      continue;
    }

    let path = entry.path();
    match recover_file(id, &path) {
      FileOutcome::Intact(batch) => recovered.push(batch),
      FileOutcome::Truncated(batch, truncated_bytes) => {
        stats.batches_recovered.inc();
        stats.bytes_truncated.inc_by(truncated_bytes);
        diagnostics.report(&DiagnosticEvent::BatchRecovered {
          id,
          truncated_bytes,
        });
        recovered.push(batch);
      },
      FileOutcome::Discard(error) => {
        if let Err(e) = std::fs::remove_file(&path)
          && e.kind() != std::io::ErrorKind::NotFound
        {
          log::warn!("failed to delete unusable batch file {}: {e}", path.display());
        }
        stats.batches_discarded.inc();
        diagnostics.report(&DiagnosticEvent::BatchDiscarded { id, error });
      },
    }
  }

  recovered.sort_by_key(|batch| batch.id);
  log::debug!(
    "recovered {} batches from {}",
    recovered.len(),
    directory.display()
  );
  Ok(recovered)
}

fn recover_file(id: BatchId, path: &Path) -> FileOutcome {
  let contents = match std::fs::read(path) {
    Ok(contents) => contents,
    Err(e) => return FileOutcome::Discard(format!("unreadable: {e}")),
  };
  let decoded = match framing::decode(&contents) {
    Ok(decoded) => decoded,
    Err(e) => return FileOutcome::Discard(e.to_string()),
  };
  if decoded.records.is_empty() {
    return FileOutcome::Discard("no complete records".to_string());
  }

  let batch = RecoveredBatch {
    id,
    payload_bytes: decoded.payload_bytes(),
    record_count: u32::try_from(decoded.records.len()).unwrap_or(u32::MAX),
    file_len: decoded.valid_len,
  };

  let file_len = contents.len() as u64;
  if decoded.valid_len == file_len {
    return FileOutcome::Intact(batch);
  }

  match truncate(path, decoded.valid_len) {
    Ok(()) => FileOutcome::Truncated(batch, file_len - decoded.valid_len),
    Err(e) => FileOutcome::Discard(format!("{e:#}")),
  }
}

fn truncate(path: &Path, len: u64) -> anyhow::Result<()> {
  let file = OpenOptions::new()
    .write(true)
    .open(path)
    .context("failed to open for truncation")?;
  file.set_len(len).context("failed to truncate")?;
  file.sync_all().context("failed to sync after truncation")?;
  Ok(())
}
