// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use pretty_assertions::assert_eq;

fn file_with(records: &[&[u8]]) -> Vec<u8> {
  let mut buf = header().to_vec();
  for record in records {
    buf.extend_from_slice(&encode_frame(record));
  }
  buf
}

#[test]
fn empty_file_has_no_records() {
  let decoded = decode(&header()).unwrap();
  assert!(decoded.records.is_empty());
  assert_eq!(decoded.valid_len, HEADER_LEN as u64);
}

#[test]
fn decodes_all_complete_frames() {
  let buf = file_with(&[b"first", b"", b"third record"]);
  let decoded = decode(&buf).unwrap();
  assert_eq!(
    decoded.records,
    vec![b"first".to_vec(), Vec::new(), b"third record".to_vec()]
  );
  assert_eq!(decoded.valid_len, buf.len() as u64);
  assert_eq!(decoded.payload_bytes(), 17);
}

#[test]
fn partial_trailing_frame_is_ignored() {
  let mut buf = file_with(&[b"kept"]);
  let valid = buf.len() as u64;
  let torn = encode_frame(b"this one was torn");
  buf.extend_from_slice(&torn[.. torn.len() - 3]);

  let decoded = decode(&buf).unwrap();
  assert_eq!(decoded.records, vec![b"kept".to_vec()]);
  assert_eq!(decoded.valid_len, valid);
}

#[test]
fn partial_frame_header_is_ignored() {
  let mut buf = file_with(&[b"kept"]);
  let valid = buf.len() as u64;
  buf.extend_from_slice(&[1, 2, 3]);

  let decoded = decode(&buf).unwrap();
  assert_eq!(decoded.records.len(), 1);
  assert_eq!(decoded.valid_len, valid);
}

#[test]
fn crc_mismatch_stops_decoding() {
  let mut buf = file_with(&[b"good", b"flipped", b"after"]);
  let second_payload = HEADER_LEN + FRAME_OVERHEAD + 4 + FRAME_OVERHEAD;
  buf[second_payload] ^= 0xff;

  let decoded = decode(&buf).unwrap();
  assert_eq!(decoded.records, vec![b"good".to_vec()]);
  assert_eq!(decoded.valid_len, (HEADER_LEN + FRAME_OVERHEAD + 4) as u64);
}

#[test]
fn bad_header_is_an_error() {
  assert!(decode(b"BDB").is_err());
  assert!(decode(b"XXXX\x01\x00\x00\x00").is_err());
  assert!(decode(b"BDBT\x02\x00\x00\x00").is_err());
}
