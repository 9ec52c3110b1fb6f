// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./uploader_test.rs"]
mod tests;

use async_trait::async_trait;
use bd_batch::BatchId;
use mockall::automock;
use std::fmt::Display;

//
// UploadMetadata
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadMetadata {
  pub content_type: &'static str,
  pub batch_id: BatchId,
  pub record_count: u32,
}

//
// UploadStatus
//

/// Coarse classification of the result of a single upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
  Success,
  ClientError(u16),
  Throttled,
  ServerError(u16),
  NetworkFailure,
}

//
// Disposition
//

/// What happens to the batch after an upload attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
  // Delete, the collector has the data.
  Deliver,
  // Delete without retrying, the collector will never accept the data.
  Reject,
  // Keep and try again later.
  Retry,
}

impl UploadStatus {
  pub const PAYLOAD_TOO_LARGE: u16 = 413;

  #[must_use]
  pub const fn from_http_status(code: u16) -> Self {
    match code {
      200 ..= 299 => Self::Success,
      408 | 429 => Self::Throttled,
      300 ..= 499 => Self::ClientError(code),
      500 ..= 599 => Self::ServerError(code),
      _ => Self::NetworkFailure,
    }
  }

  #[must_use]
  pub const fn disposition(self) -> Disposition {
    match self {
      Self::Success => Disposition::Deliver,
      Self::ClientError(_) => Disposition::Reject,
      Self::Throttled | Self::ServerError(_) | Self::NetworkFailure => Disposition::Retry,
    }
  }

  /// Stats label for the status.
  #[must_use]
  pub const fn reason(self) -> &'static str {
    match self {
      Self::Success => "success",
      Self::ClientError(Self::PAYLOAD_TOO_LARGE) => "payload_too_large",
      Self::ClientError(_) => "client_error",
      Self::Throttled => "throttled",
      Self::ServerError(_) => "server_error",
      Self::NetworkFailure => "network_failure",
    }
  }
}

impl Display for UploadStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::ClientError(code) | Self::ServerError(code) => write!(f, "{} ({code})", self.reason()),
      _ => f.write_str(self.reason()),
    }
  }
}

//
// Uploader
//

/// The network transport. Implementations map whatever their protocol reports onto
/// [`UploadStatus`]; transport level failures (DNS, TLS, resets) are `NetworkFailure`.
#[automock]
#[async_trait]
pub trait Uploader: Send + Sync {
  async fn send(&self, payload: Vec<u8>, metadata: UploadMetadata) -> UploadStatus;
}
