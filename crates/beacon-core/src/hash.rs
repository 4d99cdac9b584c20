// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One-way hashing for values the host marks as sensitive.
//!
//! Hashed values are the lowercase hex SHA-256 digest of the UTF-8 input,
//! suffixed with [`HASH_MARKER`] so downstream consumers can tell them apart
//! from plaintext at a glance.
//!
//! ```
//! use beacon_core::{hash, is_hashed};
//!
//! let scrubbed = hash("jane@example.com");
//! assert!(scrubbed.ends_with("##"));
//! assert!(is_hashed(&scrubbed));
//! ```

use sha2::{Digest, Sha256};

/// Suffix appended to every hashed value.
pub const HASH_MARKER: &str = "##";

/// Length of a hashed value: 64 hex characters plus the marker.
pub const HASHED_LEN: usize = 64 + HASH_MARKER.len();

/// Hashes `input` into its scrubbed representation.
pub fn hash(input: &str) -> String {
	let digest = Sha256::digest(input.as_bytes());
	let mut out = hex::encode(digest);
	out.push_str(HASH_MARKER);
	out
}

/// Returns true if `value` has the shape of a [`hash`] output.
pub fn is_hashed(value: &str) -> bool {
	value.len() == HASHED_LEN
		&& value.ends_with(HASH_MARKER)
		&& value[..64]
			.bytes()
			.all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
