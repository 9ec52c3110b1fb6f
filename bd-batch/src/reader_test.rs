// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use crate::config::StoreConfig;
use crate::test::TestStore;
use crate::writer::RecordAppender;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use time::ext::NumericalDuration;

struct Setup {
  directory: TempDir,
  test: TestStore,
  appender: RecordAppender,
  reader: BatchReader,
}

impl Setup {
  fn new(config: StoreConfig) -> Self {
    let directory = TempDir::new().unwrap();
    let test = TestStore::open(directory.path(), config).unwrap();
    Self {
      directory,
      appender: RecordAppender::new(test.store.clone()),
      reader: BatchReader::new(test.store.clone(), PayloadFormat::json_array()),
      test,
    }
  }

  fn closed_batch(&self, records: &[&[u8]]) -> BatchId {
    let mut id = None;
    for record in records {
      id = Some(self.appender.append(record).unwrap());
    }
    self.test.store.flush();
    id.unwrap()
  }
}

#[test]
fn payload_formats() {
  let records = vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()];
  assert_eq!(
    PayloadFormat::json_array().join(&records),
    b"[{\"a\":1},{\"b\":2}]".to_vec()
  );
  assert_eq!(
    PayloadFormat::newline_delimited().join(&records),
    b"{\"a\":1}\n{\"b\":2}".to_vec()
  );
  assert_eq!(PayloadFormat::json_array().join(&[]), b"[]".to_vec());
}

#[test]
fn batches_are_read_oldest_first() {
  let setup = Setup::new(StoreConfig::default());
  let first = setup.closed_batch(&[b"1", b"2"]);
  let second = setup.closed_batch(&[b"3"]);
  assert_eq!(setup.reader.eligible_batches(), vec![first, second]);

  let batch = setup.reader.next_batch().unwrap();
  assert_eq!(batch.id(), first);
  assert_eq!(batch.info.record_count, 2);
  assert_eq!(batch.records, vec![b"1".to_vec(), b"2".to_vec()]);
  assert_eq!(batch.payload(), b"[1,2]".to_vec());

  // Only one batch may be in flight.
  assert!(setup.reader.next_batch().is_none());

  batch.claim.confirm();
  let batch = setup.reader.next_batch().unwrap();
  assert_eq!(batch.id(), second);
  batch.claim.confirm();

  assert!(setup.reader.next_batch().is_none());
  assert!(setup.reader.eligible_batches().is_empty());
}

#[test]
fn release_makes_batch_available_again() {
  let setup = Setup::new(StoreConfig::default());
  let id = setup.closed_batch(&[b"record"]);

  setup.reader.next_batch().unwrap().claim.release();
  assert_eq!(setup.reader.eligible_batches(), vec![id]);
  assert_eq!(setup.reader.next_batch().unwrap().id(), id);
}

#[test]
fn dropped_claim_is_released() {
  let setup = Setup::new(StoreConfig::default());
  let id = setup.closed_batch(&[b"record"]);

  {
    let batch = setup.reader.next_batch().unwrap();
    assert_eq!(setup.test.store.in_flight_batch_id(), Some(id));
    drop(batch);
  }

  assert_eq!(setup.test.store.in_flight_batch_id(), None);
  assert_eq!(setup.reader.eligible_batches(), vec![id]);
}

#[test]
fn aged_open_batch_is_closed_before_reading() {
  let setup = Setup::new(StoreConfig::default());
  let id = setup.appender.append(b"record").unwrap();

  assert!(setup.reader.next_batch().is_none());
  setup.test.time.advance(5.seconds());

  let batch = setup.reader.next_batch().unwrap();
  assert_eq!(batch.id(), id);
}

#[test]
fn expired_batches_are_not_read() {
  let setup = Setup::new(StoreConfig {
    max_batch_retention: Some(1.hours()),
    ..Default::default()
  });
  setup.closed_batch(&[b"stale"]);
  setup.test.time.advance(2.hours());

  assert!(setup.reader.next_batch().is_none());
  assert!(setup.reader.eligible_batches().is_empty());
}

#[test]
fn unreadable_batch_is_discarded() {
  let setup = Setup::new(StoreConfig::default());
  let broken = setup.closed_batch(&[b"broken"]);
  let good = setup.closed_batch(&[b"good"]);
  std::fs::remove_file(setup.directory.path().join(broken.file_name())).unwrap();

  let batch = setup.reader.next_batch().unwrap();
  assert_eq!(batch.id(), good);

  let events = setup.test.diagnostics.events();
  assert_eq!(events.len(), 1);
  assert_matches!(&events[0], DiagnosticEvent::BatchDiscarded { id, .. } if *id == broken);
  assert_eq!(setup.test.store.batch_info(broken), None);
}
