// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./store_test.rs"]
mod tests;

use crate::clock::TimeProvider;
use crate::config::StoreConfig;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::filename::BatchId;
use crate::lock::DirectoryLock;
use crate::stats::StoreStats;
use crate::{Error, Result, framing, recovery};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

//
// BatchState
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
  Open,
  Closed,
  InFlight,
}

//
// CloseReason
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
  Age,
  Size,
  Flush,
  WriteFailure,
}

impl CloseReason {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Age => "age",
      Self::Size => "size",
      Self::Flush => "flush",
      Self::WriteFailure => "write_failure",
    }
  }
}

//
// AppendError
//

#[derive(thiserror::Error, Debug)]
pub enum AppendError {
  #[error("record of {size} bytes exceeds the limit of {limit} bytes")]
  RecordTooLarge { size: usize, limit: u64 },
  #[error("batch is full")]
  BatchFull,
  #[error("batch {0} is no longer open")]
  BatchNotOpen(BatchId),
  #[error("failed to append to batch: {0}")]
  Io(#[from] std::io::Error),
}

//
// BatchHandle
//

/// Write capability for the OPEN batch it was handed out for. Appending through a handle whose
/// batch has since been closed fails with [`AppendError::BatchNotOpen`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchHandle {
  id: BatchId,
}

impl BatchHandle {
  #[must_use]
  pub const fn id(&self) -> BatchId {
    self.id
  }
}

//
// BatchInfo
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchInfo {
  pub id: BatchId,
  pub state: BatchState,
  // Payload bytes, excluding framing.
  pub size_bytes: u64,
  pub record_count: u32,
  // Actual length of the file on disk.
  pub file_len: u64,
  pub created_at: OffsetDateTime,
}

struct BatchEntry {
  state: BatchState,
  size_bytes: u64,
  record_count: u32,
  file_len: u64,
  created_at: OffsetDateTime,
  first_record_at: Option<OffsetDateTime>,
}

impl BatchEntry {
  fn info(&self, id: BatchId) -> BatchInfo {
    BatchInfo {
      id,
      state: self.state,
      size_bytes: self.size_bytes,
      record_count: self.record_count,
      file_len: self.file_len,
      created_at: self.created_at,
    }
  }
}

struct OpenBatch {
  id: BatchId,
  file: File,
}

#[derive(Default)]
struct StoreState {
  batches: BTreeMap<BatchId, BatchEntry>,
  open: Option<OpenBatch>,
  in_flight: Option<BatchId>,
  disk_bytes: u64,
  last_created_ms: u64,
}

//
// BatchStore
//

/// The on-disk batch store of a single feature.
///
/// All structural changes (create, close, claim, delete) happen under one internal lock. Appends
/// also take the lock so that the size and count bounds hold across concurrent writers; the lock
/// is only held for the duration of a single frame write. Reading a claimed batch happens outside
/// of the lock, which is safe because an IN_FLIGHT batch is immutable and never evicted.
pub struct BatchStore {
  directory: PathBuf,
  config: StoreConfig,
  time_provider: Arc<dyn TimeProvider>,
  stats: StoreStats,
  diagnostics: Arc<dyn Diagnostics>,
  state: Mutex<StoreState>,
  _lock: DirectoryLock,
}

impl BatchStore {
  /// Opens the store rooted at `directory`, creating it if needed. Takes the directory lock and
  /// recovers any batches left behind by a previous process. Every recovered batch is CLOSED.
  pub fn open(
    directory: impl Into<PathBuf>,
    config: StoreConfig,
    time_provider: Arc<dyn TimeProvider>,
    stats: StoreStats,
    diagnostics: Arc<dyn Diagnostics>,
  ) -> Result<Self> {
    let directory = directory.into();
    config.validate()?;

    let lock = DirectoryLock::try_acquire(&directory)
      .map_err(|e| Error::DirectoryLocked(directory.clone(), e))?;
    let recovered = recovery::recover(&directory, &stats, diagnostics.as_ref())?;

    let mut state = StoreState::default();
    for batch in recovered {
      let created_at = unix_ms_to_datetime(batch.id.created_at_ms)
        .unwrap_or_else(|| time_provider.now());
      state.disk_bytes += batch.file_len;
      state.last_created_ms = state.last_created_ms.max(batch.id.created_at_ms);
      state.batches.insert(
        batch.id,
        BatchEntry {
          state: BatchState::Closed,
          size_bytes: batch.payload_bytes,
          record_count: batch.record_count,
          file_len: batch.file_len,
          created_at,
          first_record_at: Some(created_at),
        },
      );
    }

    let store = Self {
      directory,
      config,
      time_provider,
      stats,
      diagnostics,
      state: Mutex::new(state),
      _lock: lock,
    };

    // The quota may have shrunk since the previous run.
    store.enforce_disk_quota();

    Ok(store)
  }

  #[must_use]
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  #[must_use]
  pub const fn config(&self) -> &StoreConfig {
    &self.config
  }

  #[must_use]
  pub const fn stats(&self) -> &StoreStats {
    &self.stats
  }

  #[must_use]
  pub fn diagnostics(&self) -> &dyn Diagnostics {
    self.diagnostics.as_ref()
  }

  /// Returns the OPEN batch, first closing it if it has aged out, and creating a new one when
  /// there is none. Returns `None` only if a new batch file could not be created.
  pub fn current_open_batch(&self) -> Option<BatchHandle> {
    let mut state = self.state.lock();
    let now = self.time_provider.now();

    if let Some(id) = state.open.as_ref().map(|open| open.id)
      && self.is_aged(&state, id, now)
    {
      self.close_open_locked(&mut state, CloseReason::Age);
    }

    if let Some(open) = &state.open {
      return Some(BatchHandle { id: open.id });
    }

    match self.create_batch_locked(&mut state, now) {
      Ok(id) => Some(BatchHandle { id }),
      Err(e) => {
        self.report_storage_failure("create", &e);
        None
      },
    }
  }

  /// Appends a single record to the OPEN batch identified by `handle`.
  ///
  /// The encoded frame is written with a single `write_all`. If the write fails, the file is cut
  /// back to the previous frame boundary and the batch is closed so later appends go to a fresh
  /// file.
  pub fn append(&self, handle: &BatchHandle, record: &[u8]) -> std::result::Result<(), AppendError> {
    let limit = self.config.record_size_limit();
    if record.len() as u64 > limit {
      return Err(AppendError::RecordTooLarge {
        size: record.len(),
        limit,
      });
    }

    let mut state = self.state.lock();
    if state.open.as_ref().map(|open| open.id) != Some(handle.id) {
      return Err(AppendError::BatchNotOpen(handle.id));
    }
    let Some(entry) = state.batches.get(&handle.id) else {
      return Err(AppendError::BatchNotOpen(handle.id));
    };
    if entry.record_count.saturating_add(1) > self.config.max_batch_events
      || entry.size_bytes + record.len() as u64 > self.config.max_batch_size
    {
      return Err(AppendError::BatchFull);
    }
    let previous_len = entry.file_len;

    let frame = framing::encode_frame(record);
    let frame_len = frame.len() as u64;
    self.evict_locked(
      &mut state,
      self.config.max_disk_space.saturating_sub(frame_len),
    );

    let write_result = match state.open.as_mut() {
      Some(open) => open.file.write_all(&frame),
      None => return Err(AppendError::BatchNotOpen(handle.id)),
    };
    if let Err(e) = write_result {
      if let Some(open) = &state.open
        && let Err(truncate_error) = open.file.set_len(previous_len)
      {
        log::warn!("failed to roll back partial append to {}: {truncate_error}", handle.id);
      }
      self.report_storage_failure("append", &e);
      self.close_open_locked(&mut state, CloseReason::WriteFailure);
      return Err(AppendError::Io(e));
    }

    let now = self.time_provider.now();
    if let Some(entry) = state.batches.get_mut(&handle.id) {
      entry.size_bytes += record.len() as u64;
      entry.record_count += 1;
      entry.file_len += frame_len;
      entry.first_record_at.get_or_insert(now);
    }
    state.disk_bytes += frame_len;
    self.stats.records_written.inc();
    self.stats.bytes_written.inc_by(record.len() as u64);

    self.evict_locked(&mut state, self.config.max_disk_space);
    Ok(())
  }

  /// Transitions the batch behind `handle` from OPEN to CLOSED. Closing a batch that is no longer
  /// OPEN does nothing. A batch without records is deleted instead.
  pub fn close_batch(&self, handle: &BatchHandle, reason: CloseReason) {
    let mut state = self.state.lock();
    if state.open.as_ref().map(|open| open.id) == Some(handle.id) {
      self.close_open_locked(&mut state, reason);
    }
  }

  /// Closes the OPEN batch, if any.
  pub fn flush(&self) {
    let mut state = self.state.lock();
    self.close_open_locked(&mut state, CloseReason::Flush);
  }

  /// Closes the OPEN batch if its first record is older than the maximum batch age. Returns
  /// whether a batch was closed.
  pub fn close_expired_batch(&self) -> bool {
    let mut state = self.state.lock();
    let now = self.time_provider.now();
    match state.open.as_ref().map(|open| open.id) {
      Some(id) if self.is_aged(&state, id, now) => {
        self.close_open_locked(&mut state, CloseReason::Age);
        true
      },
      _ => false,
    }
  }

  /// CLOSED batches ready for upload, oldest first.
  #[must_use]
  pub fn list_eligible_batches(&self) -> Vec<BatchId> {
    self
      .state
      .lock()
      .batches
      .iter()
      .filter(|(_, entry)| entry.state == BatchState::Closed)
      .map(|(id, _)| *id)
      .collect()
  }

  /// Claims a CLOSED batch for upload. Fails if another batch is already IN_FLIGHT or the batch
  /// is not CLOSED (including when it no longer exists).
  pub fn mark_in_flight(&self, id: BatchId) -> Option<BatchInfo> {
    let mut state = self.state.lock();
    if state.in_flight.is_some() {
      return None;
    }
    let entry = state.batches.get_mut(&id)?;
    if entry.state != BatchState::Closed {
      return None;
    }
    entry.state = BatchState::InFlight;
    let info = entry.info(id);
    state.in_flight = Some(id);
    Some(info)
  }

  /// Reads every record of a non-OPEN batch, in append order.
  pub fn read_batch_records(&self, id: BatchId) -> Result<Vec<Vec<u8>>> {
    let path = {
      let state = self.state.lock();
      match state.batches.get(&id) {
        Some(entry) if entry.state != BatchState::Open => self.path_for(id),
        Some(_) => return Err(Error::Corrupt(format!("batch {id} is still open"))),
        None => {
          return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("batch {id} does not exist"),
          )));
        },
      }
    };

    let contents = std::fs::read(path)?;
    let decoded = framing::decode(&contents).map_err(|e| Error::Corrupt(format!("{id}: {e}")))?;
    Ok(decoded.records)
  }

  /// Deletes a delivered (or permanently rejected) batch. Missing ids are ignored. The OPEN batch
  /// is never deleted through this path.
  pub fn confirm_delivered(&self, id: BatchId) {
    let mut state = self.state.lock();
    match state.batches.get(&id) {
      Some(entry) if entry.state != BatchState::Open => {},
      _ => return,
    }
    self.delete_locked(&mut state, id);
    self.evict_locked(&mut state, self.config.max_disk_space);
  }

  /// Returns an IN_FLIGHT batch to the eligible pool.
  pub fn release_in_flight(&self, id: BatchId) {
    let mut state = self.state.lock();
    if state.in_flight != Some(id) {
      return;
    }
    state.in_flight = None;
    if let Some(entry) = state.batches.get_mut(&id) {
      entry.state = BatchState::Closed;
    }
  }

  /// Deletes the oldest CLOSED batches until the store fits in the disk quota. Returns the number
  /// of evicted batches.
  pub fn enforce_disk_quota(&self) -> usize {
    let mut state = self.state.lock();
    self.evict_locked(&mut state, self.config.max_disk_space)
  }

  /// Deletes CLOSED batches that outlived the retention period without being uploaded. Returns
  /// the number of deleted batches.
  pub fn purge_expired_batches(&self) -> usize {
    let Some(retention) = self.config.max_batch_retention else {
      return 0;
    };
    let now = self.time_provider.now();
    let mut state = self.state.lock();
    let expired: Vec<_> = state
      .batches
      .iter()
      .filter(|(_, entry)| entry.state == BatchState::Closed && now - entry.created_at > retention)
      .map(|(id, _)| *id)
      .collect();

    for id in &expired {
      self.delete_locked(&mut state, *id);
      self.stats.batches_expired.inc();
      self.diagnostics.report(&DiagnosticEvent::BatchExpired { id: *id });
    }
    expired.len()
  }

  #[must_use]
  pub fn batch_info(&self, id: BatchId) -> Option<BatchInfo> {
    self.state.lock().batches.get(&id).map(|entry| entry.info(id))
  }

  #[must_use]
  pub fn open_batch_id(&self) -> Option<BatchId> {
    self.state.lock().open.as_ref().map(|open| open.id)
  }

  #[must_use]
  pub fn in_flight_batch_id(&self) -> Option<BatchId> {
    self.state.lock().in_flight
  }

  /// Bytes currently used on disk by batch files.
  #[must_use]
  pub fn disk_usage(&self) -> u64 {
    self.state.lock().disk_bytes
  }

  fn path_for(&self, id: BatchId) -> PathBuf {
    self.directory.join(id.file_name())
  }

  fn is_aged(&self, state: &StoreState, id: BatchId, now: OffsetDateTime) -> bool {
    state
      .batches
      .get(&id)
      .and_then(|entry| entry.first_record_at)
      .is_some_and(|first| now - first >= self.config.max_batch_age)
  }

  fn create_batch_locked(
    &self,
    state: &mut StoreState,
    now: OffsetDateTime,
  ) -> std::io::Result<BatchId> {
    // Strictly increasing creation times keep file name order equal to creation order.
    let created_at_ms = self
      .time_provider
      .now_unix_ms()
      .max(state.last_created_ms + 1);
    let id = BatchId::new(created_at_ms, rand::random());
    let path = self.path_for(id);

    let mut file = OpenOptions::new()
      .append(true)
      .create_new(true)
      .open(&path)?;
    let header = framing::header();
    if let Err(e) = file.write_all(&header) {
      drop(file);
      let _ignored = std::fs::remove_file(&path);
      return Err(e);
    }

    let file_len = header.len() as u64;
    state.last_created_ms = created_at_ms;
    state.disk_bytes += file_len;
    state.batches.insert(
      id,
      BatchEntry {
        state: BatchState::Open,
        size_bytes: 0,
        record_count: 0,
        file_len,
        created_at: now,
        first_record_at: None,
      },
    );
    state.open = Some(OpenBatch { id, file });
    log::debug!("opened batch {id} in {}", self.directory.display());
    Ok(id)
  }

  fn close_open_locked(&self, state: &mut StoreState, reason: CloseReason) {
    let Some(open) = state.open.take() else {
      return;
    };
    drop(open.file);

    let record_count = state
      .batches
      .get(&open.id)
      .map_or(0, |entry| entry.record_count);
    if record_count == 0 {
      log::trace!("deleting empty batch {}", open.id);
      self.delete_locked(state, open.id);
      return;
    }

    if let Some(entry) = state.batches.get_mut(&open.id) {
      entry.state = BatchState::Closed;
    }
    self.stats.batch_closed(reason);
    log::debug!(
      "closed batch {} ({}, {record_count} records)",
      open.id,
      reason.as_str()
    );
  }

  fn delete_locked(&self, state: &mut StoreState, id: BatchId) {
    let Some(entry) = state.batches.remove(&id) else {
      return;
    };
    state.disk_bytes = state.disk_bytes.saturating_sub(entry.file_len);
    if state.in_flight == Some(id) {
      state.in_flight = None;
    }
    if state.open.as_ref().is_some_and(|open| open.id == id) {
      state.open = None;
    }

    if let Err(e) = std::fs::remove_file(self.path_for(id))
      && e.kind() != std::io::ErrorKind::NotFound
    {
      self.report_storage_failure("delete", &e);
    }
  }

  fn evict_locked(&self, state: &mut StoreState, limit: u64) -> usize {
    let mut evicted = 0;
    while state.disk_bytes > limit {
      let Some((id, bytes)) = state
        .batches
        .iter()
        .find(|(_, entry)| entry.state == BatchState::Closed)
        .map(|(id, entry)| (*id, entry.file_len))
      else {
        break;
      };

      self.delete_locked(state, id);
      self.stats.batches_evicted.inc();
      self
        .diagnostics
        .report(&DiagnosticEvent::BatchEvicted { id, bytes });
      evicted += 1;
    }
    evicted
  }

  fn report_storage_failure(&self, operation: &'static str, error: &std::io::Error) {
    self.diagnostics.report(&DiagnosticEvent::StorageFailure {
      operation,
      error: error.to_string(),
    });
  }
}

fn unix_ms_to_datetime(ms: u64) -> Option<OffsetDateTime> {
  OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}
