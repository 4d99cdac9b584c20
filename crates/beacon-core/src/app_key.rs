// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application key identifying the host app to the backend.
//!
//! The key never appears in logs: `Debug` and `Display` are redacted and the
//! backing memory is zeroed on drop. Call [`AppKey::expose`] at the point the
//! raw value is actually needed.
//!
//! ```
//! use beacon_core::AppKey;
//!
//! let key = AppKey::parse("a1b2c3d4e5f6").unwrap();
//! assert_eq!(format!("{key}"), "[REDACTED]");
//! assert_eq!(key.expose(), "a1b2c3d4e5f6");
//! ```

use std::fmt;

use serde::Deserialize;
use zeroize::Zeroize;

use crate::error::CoreError;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

/// Maximum accepted key length.
pub const MAX_APP_KEY_LENGTH: usize = 256;

#[derive(Clone, Zeroize, Deserialize)]
#[zeroize(drop)]
#[serde(try_from = "String")]
pub struct AppKey {
	inner: String,
}

impl AppKey {
	/// Validates and wraps a key: 1 to [`MAX_APP_KEY_LENGTH`] visible ASCII
	/// characters with no whitespace. Surrounding whitespace is trimmed.
	pub fn parse(key: impl Into<String>) -> Result<Self, CoreError> {
		let mut raw = key.into();
		let trimmed = raw.trim();
		let valid = !trimmed.is_empty()
			&& trimmed.len() <= MAX_APP_KEY_LENGTH
			&& trimmed.bytes().all(|b| b.is_ascii_graphic());
		if !valid {
			raw.zeroize();
			return Err(CoreError::InvalidAppKey);
		}
		let inner = trimmed.to_string();
		raw.zeroize();
		Ok(Self { inner })
	}

	pub fn expose(&self) -> &str {
		&self.inner
	}
}

impl TryFrom<String> for AppKey {
	type Error = CoreError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl fmt::Debug for AppKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("AppKey").field(&REDACTED).finish()
	}
}

impl fmt::Display for AppKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl PartialEq for AppKey {
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl Eq for AppKey {}
