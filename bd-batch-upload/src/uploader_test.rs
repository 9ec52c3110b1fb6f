// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;

#[test]
fn http_status_classification() {
  assert_eq!(UploadStatus::from_http_status(200), UploadStatus::Success);
  assert_eq!(UploadStatus::from_http_status(202), UploadStatus::Success);
  assert_eq!(UploadStatus::from_http_status(408), UploadStatus::Throttled);
  assert_eq!(UploadStatus::from_http_status(429), UploadStatus::Throttled);
  assert_eq!(
    UploadStatus::from_http_status(400),
    UploadStatus::ClientError(400)
  );
  assert_eq!(
    UploadStatus::from_http_status(413),
    UploadStatus::ClientError(413)
  );
  assert_eq!(
    UploadStatus::from_http_status(301),
    UploadStatus::ClientError(301)
  );
  assert_eq!(
    UploadStatus::from_http_status(503),
    UploadStatus::ServerError(503)
  );
  assert_eq!(
    UploadStatus::from_http_status(0),
    UploadStatus::NetworkFailure
  );
  assert_eq!(
    UploadStatus::from_http_status(600),
    UploadStatus::NetworkFailure
  );
}

#[test]
fn dispositions() {
  assert_eq!(UploadStatus::Success.disposition(), Disposition::Deliver);
  assert_eq!(
    UploadStatus::ClientError(400).disposition(),
    Disposition::Reject
  );
  assert_eq!(
    UploadStatus::ClientError(413).disposition(),
    Disposition::Reject
  );
  assert_eq!(UploadStatus::Throttled.disposition(), Disposition::Retry);
  assert_eq!(
    UploadStatus::ServerError(500).disposition(),
    Disposition::Retry
  );
  assert_eq!(UploadStatus::NetworkFailure.disposition(), Disposition::Retry);
}

#[test]
fn payload_too_large_has_own_reason() {
  assert_eq!(UploadStatus::ClientError(413).reason(), "payload_too_large");
  assert_eq!(UploadStatus::ClientError(400).reason(), "client_error");
  assert_eq!(
    UploadStatus::ClientError(413).to_string(),
    "payload_too_large (413)"
  );
  assert_eq!(UploadStatus::Throttled.to_string(), "throttled");
}
