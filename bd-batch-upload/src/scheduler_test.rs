// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use crate::conditions::Connectivity;
use crate::test::{TestConditions, TestUploader};
use crate::uploader::MockUploader;
use assert_matches::assert_matches;
use bd_batch::test::TestStore;
use bd_batch::{ShutdownTrigger, StoreConfig};
use bd_test_helpers::stats::StatsHelper;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use time::ext::NumericalDuration;

const FEATURE: (&str, &str) = ("feature", "test");

struct Setup {
  directory: TempDir,
  test: TestStore,
  uploader: Arc<TestUploader>,
  conditions: Arc<TestConditions>,
  scheduler: UploadScheduler,
  handle: SchedulerHandle,
}

impl Setup {
  fn new() -> Self {
    Self::with_config(UploadConfig {
      upload_interval: 1.seconds(),
      max_retry_interval: 1.minutes(),
      ..Default::default()
    })
  }

  fn with_config(config: UploadConfig) -> Self {
    let directory = TempDir::new().unwrap();
    let test = TestStore::open(directory.path(), StoreConfig::default()).unwrap();
    let uploader = Arc::new(TestUploader::default());
    let conditions = Arc::new(TestConditions::default());
    let (scheduler, handle) = UploadScheduler::new(
      test.store.clone(),
      PayloadFormat::json_array(),
      "application/json",
      uploader.clone(),
      conditions.clone(),
      config,
      UploadStats::new(&test.registry, "test").unwrap(),
    );

    Self {
      directory,
      test,
      uploader,
      conditions,
      scheduler,
      handle,
    }
  }

  fn closed_batch(&self, records: &[&[u8]]) -> BatchId {
    let store = &self.test.store;
    let handle = store.current_open_batch().unwrap();
    for record in records {
      store.append(&handle, record).unwrap();
    }
    store.flush();
    handle.id()
  }

  fn batch_exists(&self, id: BatchId) -> bool {
    self.directory.path().join(id.file_name()).exists()
  }

  fn counter(&self, name: &str, reason: &str) -> u64 {
    self
      .test
      .registry
      .counter(name, &[FEATURE, ("reason", reason)])
  }

  fn rejected_events(&self) -> usize {
    self
      .test
      .diagnostics
      .count(|e| matches!(e, DiagnosticEvent::UploadRejected { .. }))
  }
}

#[tokio::test(start_paused = true)]
async fn uploads_payload_with_metadata() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"{\"a\":1}", b"{\"b\":2}"]);

  assert_eq!(
    setup.scheduler.step().await,
    (TickOutcome::Delivered(id), Duration::from_secs(1))
  );

  let requests = setup.uploader.requests();
  assert_eq!(requests.len(), 1);
  assert_eq!(requests[0].payload, b"[{\"a\":1},{\"b\":2}]".to_vec());
  assert_eq!(
    requests[0].metadata,
    UploadMetadata {
      content_type: "application/json",
      batch_id: id,
      record_count: 2,
    }
  );
  assert!(!setup.batch_exists(id));
  setup
    .test
    .registry
    .assert_counter_eq(1, "upload:delivered", &[FEATURE]);
}

#[tokio::test(start_paused = true)]
async fn nothing_to_upload() {
  let mut setup = Setup::new();
  assert_eq!(
    setup.scheduler.step().await,
    (TickOutcome::NothingToUpload, Duration::from_secs(1))
  );
  assert_eq!(setup.uploader.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn throttled_backs_off_then_resets() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup.uploader.push_responses([UploadStatus::Throttled; 3]);

  for expected_delay in [2, 4, 8] {
    assert_eq!(
      setup.scheduler.step().await,
      (
        TickOutcome::Retrying(id, UploadStatus::Throttled),
        Duration::from_secs(expected_delay)
      )
    );
    assert_eq!(setup.test.store.list_eligible_batches(), vec![id]);
    assert!(setup.batch_exists(id));
  }

  assert_eq!(
    setup.scheduler.step().await,
    (TickOutcome::Delivered(id), Duration::from_secs(1))
  );
  assert!(!setup.batch_exists(id));
  assert_eq!(setup.uploader.request_count(), 4);
  assert_eq!(setup.counter("upload:retried", "throttled"), 3);
}

#[tokio::test(start_paused = true)]
async fn client_error_deletes_without_retry() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup
    .uploader
    .push_responses([UploadStatus::ClientError(400)]);

  assert_eq!(
    setup.scheduler.step().await,
    (
      TickOutcome::Rejected(id, UploadStatus::ClientError(400)),
      Duration::from_secs(1)
    )
  );
  assert!(!setup.batch_exists(id));
  assert!(setup.test.store.list_eligible_batches().is_empty());
  assert_eq!(setup.rejected_events(), 1);
  assert_eq!(setup.counter("upload:rejected", "client_error"), 1);

  assert_eq!(setup.scheduler.step().await.0, TickOutcome::NothingToUpload);
  assert_eq!(setup.uploader.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn payload_too_large_is_rejected() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup
    .uploader
    .push_responses([UploadStatus::from_http_status(413)]);

  assert_matches!(
    setup.scheduler.step().await.0,
    TickOutcome::Rejected(rejected, UploadStatus::ClientError(413)) if rejected == id
  );
  assert_eq!(setup.counter("upload:rejected", "payload_too_large"), 1);
  assert_eq!(setup.rejected_events(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejection_resets_backoff() {
  let mut setup = Setup::new();
  setup.closed_batch(&[b"first"]);
  setup.closed_batch(&[b"second"]);
  setup.uploader.push_responses([
    UploadStatus::ServerError(503),
    UploadStatus::ClientError(400),
  ]);

  assert_eq!(setup.scheduler.step().await.1, Duration::from_secs(2));
  assert_eq!(setup.scheduler.step().await.1, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_release_batch() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup.uploader.push_responses([
    UploadStatus::ServerError(500),
    UploadStatus::NetworkFailure,
  ]);

  setup.scheduler.step().await;
  setup.scheduler.step().await;

  assert_eq!(setup.test.store.list_eligible_batches(), vec![id]);
  assert_eq!(setup.test.store.in_flight_batch_id(), None);
  assert_eq!(setup.counter("upload:retried", "server_error"), 1);
  assert_eq!(setup.counter("upload:retried", "network_failure"), 1);
  assert_eq!(setup.rejected_events(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_network_failure() {
  let mut setup = Setup::with_config(UploadConfig {
    upload_interval: 1.seconds(),
    upload_timeout: 10.seconds(),
    ..Default::default()
  });
  let id = setup.closed_batch(&[b"record"]);
  setup.uploader.set_latency(Some(Duration::from_secs(60)));

  assert_eq!(
    setup.scheduler.step().await,
    (
      TickOutcome::Retrying(id, UploadStatus::NetworkFailure),
      Duration::from_secs(2)
    )
  );
  assert_eq!(setup.test.store.list_eligible_batches(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn skipped_while_disconnected() {
  let mut setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup.conditions.set_connectivity(Connectivity::Disconnected);

  assert_eq!(
    setup.scheduler.step().await,
    (
      TickOutcome::Skipped(SkipReason::Disconnected),
      Duration::from_secs(1)
    )
  );
  assert_eq!(setup.uploader.request_count(), 0);
  assert_eq!(setup.test.store.list_eligible_batches(), vec![id]);
  assert_eq!(setup.counter("upload:ticks_skipped", "disconnected"), 1);

  setup.conditions.set_connectivity(Connectivity::Connected);
  assert_eq!(setup.scheduler.step().await.0, TickOutcome::Delivered(id));
}

#[tokio::test(start_paused = true)]
async fn batches_uploaded_oldest_first() {
  let mut setup = Setup::new();
  let first = setup.closed_batch(&[b"1"]);
  let second = setup.closed_batch(&[b"2"]);
  let third = setup.closed_batch(&[b"3"]);

  for expected in [first, second, third] {
    assert_eq!(setup.scheduler.step().await.0, TickOutcome::Delivered(expected));
  }
}

#[tokio::test(start_paused = true)]
async fn run_ticks_periodically_and_on_demand() {
  let setup = Setup::new();
  let Setup {
    test,
    uploader,
    scheduler,
    handle,
    directory: _directory,
    ..
  } = setup;

  let trigger = ShutdownTrigger::default();
  tokio::spawn(scheduler.run(trigger.make_shutdown()));

  let store = test.store.clone();
  let handle_batch = |record: &[u8]| {
    let batch = store.current_open_batch().unwrap();
    store.append(&batch, record).unwrap();
    store.flush();
  };

  handle_batch(b"periodic");
  tokio::time::sleep(Duration::from_millis(1500)).await;
  assert_eq!(uploader.request_count(), 1);

  // The next periodic tick is still ~500ms away.
  handle_batch(b"on demand");
  handle.upload_now();
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(uploader.request_count(), 2);
  assert!(store.list_eligible_batches().is_empty());

  trigger.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_attempt_finish() {
  let setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup.uploader.set_latency(Some(Duration::from_secs(10)));

  let Setup {
    test,
    uploader,
    scheduler,
    directory,
    ..
  } = setup;

  let trigger = ShutdownTrigger::default();
  let task = tokio::spawn(scheduler.run(trigger.make_shutdown()));

  // First tick fires after one second; the upload is then in progress.
  tokio::time::sleep(Duration::from_secs(2)).await;
  assert_eq!(uploader.request_count(), 1);
  assert_eq!(test.store.in_flight_batch_id(), Some(id));

  trigger.shutdown().await;
  task.await.unwrap();

  assert_eq!(test.store.in_flight_batch_id(), None);
  assert!(!directory.path().join(id.file_name()).exists());
  assert_eq!(uploader.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn aborted_attempt_releases_claim() {
  let setup = Setup::new();
  let id = setup.closed_batch(&[b"record"]);
  setup.uploader.set_latency(Some(Duration::from_secs(10)));

  let Setup {
    test,
    scheduler,
    directory: _directory,
    ..
  } = setup;

  let trigger = ShutdownTrigger::default();
  let task = tokio::spawn(scheduler.run(trigger.make_shutdown()));
  tokio::time::sleep(Duration::from_secs(2)).await;
  assert_eq!(test.store.in_flight_batch_id(), Some(id));

  task.abort();
  let _ignored = task.await;

  assert_eq!(test.store.in_flight_batch_id(), None);
  assert_eq!(test.store.list_eligible_batches(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn uploader_called_once_per_claimed_batch() {
  let directory = TempDir::new().unwrap();
  let test = TestStore::open(directory.path(), StoreConfig::default()).unwrap();
  let batch = test.store.current_open_batch().unwrap();
  test.store.append(&batch, b"only").unwrap();
  test.store.flush();

  let mut uploader = MockUploader::new();
  uploader
    .expect_send()
    .withf(move |payload, metadata| {
      payload.as_slice() == b"only"
        && metadata.batch_id == batch.id()
        && metadata.content_type == "text/plain"
    })
    .times(1)
    .returning(|_, _| UploadStatus::Success);

  let (mut scheduler, _handle) = UploadScheduler::new(
    test.store.clone(),
    PayloadFormat::newline_delimited(),
    "text/plain",
    Arc::new(uploader),
    Arc::new(crate::conditions::AlwaysUpload),
    UploadConfig::default(),
    UploadStats::new(&test.registry, "test").unwrap(),
  );

  assert_eq!(scheduler.step().await.0, TickOutcome::Delivered(batch.id()));
  assert_eq!(scheduler.step().await.0, TickOutcome::NothingToUpload);
}
