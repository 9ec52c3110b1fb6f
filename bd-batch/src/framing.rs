// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! On-disk layout of a batch file.
//!
//! ```text
//! [magic: "BDBT"][version: u32 LE]
//! [length: u32 LE][crc32: u32 LE][payload: length bytes]
//! ...
//! ```
//!
//! The crc covers the payload only. A file is valid up to the last complete frame whose crc
//! matches; anything past that is a torn write.

#[cfg(test)]
#[path = "./framing_test.rs"]
mod tests;

const MAGIC: &[u8; 4] = b"BDBT";
const VERSION: u32 = 1;

pub const HEADER_LEN: usize = 8;
pub const FRAME_OVERHEAD: usize = 8;

#[must_use]
pub fn header() -> [u8; HEADER_LEN] {
  let mut header = [0; HEADER_LEN];
  header[.. 4].copy_from_slice(MAGIC);
  header[4 ..].copy_from_slice(&VERSION.to_le_bytes());
  header
}

pub fn check_header(buf: &[u8]) -> anyhow::Result<()> {
  if buf.len() < HEADER_LEN {
    anyhow::bail!("file too small for header: {} bytes", buf.len());
  }
  if &buf[.. 4] != MAGIC {
    anyhow::bail!("bad magic: {:02x?}", &buf[.. 4]);
  }
  let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
  if version != VERSION {
    anyhow::bail!("unsupported version: {version}");
  }
  Ok(())
}

/// Encodes a single record into a frame, ready to be written with one `write_all`.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
  let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
  // Record sizes are bounded well below 4GiB by config validation.
  #[allow(clippy::cast_possible_truncation)]
  frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
  frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
  frame.extend_from_slice(payload);
  frame
}

#[derive(Debug, PartialEq, Eq)]
pub struct Decoded {
  pub records: Vec<Vec<u8>>,
  /// Byte length of the valid prefix of the file, header included.
  pub valid_len: u64,
}

impl Decoded {
  #[must_use]
  pub fn payload_bytes(&self) -> u64 {
    self.records.iter().map(|r| r.len() as u64).sum()
  }
}

/// Decodes a whole file. The header must be valid; frames are read until the first incomplete
/// frame or crc mismatch.
pub fn decode(buf: &[u8]) -> anyhow::Result<Decoded> {
  check_header(buf)?;

  let mut records = Vec::new();
  let mut offset = HEADER_LEN;
  while buf.len() - offset >= FRAME_OVERHEAD {
    let len_bytes = &buf[offset .. offset + 4];
    let crc_bytes = &buf[offset + 4 .. offset + 8];
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    let crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let start = offset + FRAME_OVERHEAD;
    let Some(end) = usize::try_from(len)
      .ok()
      .and_then(|len| start.checked_add(len))
    else {
      break;
    };
    if end > buf.len() {
      break;
    }

    let payload = &buf[start .. end];
    if crc32fast::hash(payload) != crc {
      break;
    }

    records.push(payload.to_vec());
    offset = end;
  }

  Ok(Decoded {
    records,
    valid_len: offset as u64,
  })
}
