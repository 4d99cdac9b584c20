// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Length-prefixed, checksummed frames of the event log.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────┐
//! │ len: u32 LE  │ crc64: u64 LE│ payload (len B)  │
//! └──────────────┴──────────────┴──────────────────┘
//! ```
//!
//! The checksum covers the length bytes and the payload. A frame that is cut
//! short or fails its checksum ends the readable log.

use crc64fast::Digest;

pub const HEADER_LEN: usize = 4 + 8;

/// Frames larger than this are treated as garbage rather than allocated.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

fn checksum(len: u32, payload: &[u8]) -> u64 {
	let mut digest = Digest::new();
	digest.write(&len.to_le_bytes());
	digest.write(payload);
	digest.sum64()
}

/// Appends one encoded frame carrying `payload` to `out`.
pub fn encode(payload: &[u8], out: &mut Vec<u8>) {
	let len = payload.len() as u32;
	out.reserve(HEADER_LEN + payload.len());
	out.extend_from_slice(&len.to_le_bytes());
	out.extend_from_slice(&checksum(len, payload).to_le_bytes());
	out.extend_from_slice(payload);
}

/// Iterates the payloads of complete, valid frames in `buf`.
pub struct FrameReader<'a> {
	buf: &'a [u8],
	pos: usize,
	torn: bool,
}

impl<'a> FrameReader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self {
			buf,
			pos: 0,
			torn: false,
		}
	}

	/// Byte length of the valid prefix read so far.
	pub fn valid_len(&self) -> usize {
		self.pos
	}

	/// True if reading stopped at an incomplete or corrupt frame.
	pub fn is_torn(&self) -> bool {
		self.torn
	}
}

impl<'a> Iterator for FrameReader<'a> {
	type Item = &'a [u8];

	fn next(&mut self) -> Option<Self::Item> {
		if self.torn {
			return None;
		}

		let buf = self.buf;
		let rest = &buf[self.pos..];
		if rest.is_empty() {
			return None;
		}
		if rest.len() < HEADER_LEN {
			self.torn = true;
			return None;
		}

		let mut len_bytes = [0u8; 4];
		len_bytes.copy_from_slice(&rest[0..4]);
		let mut crc_bytes = [0u8; 8];
		crc_bytes.copy_from_slice(&rest[4..HEADER_LEN]);
		let len = u32::from_le_bytes(len_bytes);
		let expected = u64::from_le_bytes(crc_bytes);

		let payload_len = len as usize;
		if payload_len > MAX_PAYLOAD_LEN || rest.len() < HEADER_LEN + payload_len {
			self.torn = true;
			return None;
		}

		let payload = &rest[HEADER_LEN..HEADER_LEN + payload_len];
		if checksum(len, payload) != expected {
			self.torn = true;
			return None;
		}

		self.pos += HEADER_LEN + payload_len;
		Some(payload)
	}
}
