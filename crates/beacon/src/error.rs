// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Beacon SDK.
//!
//! Only client construction returns these to the host. Everything that
//! happens after construction (recording, persisting, transmitting) ends in a
//! retry, a counted drop or a throttled diagnostic.

use std::path::PathBuf;

use beacon_common_http::{is_retryable_status, RetryableError};
use beacon_core::BatchId;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum BeaconError {
	/// App key is missing or malformed.
	#[error("invalid app key")]
	InvalidAppKey,

	/// Base URL is missing or invalid.
	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Local event store could not be read or written.
	#[error("storage error at {path}: {source}")]
	Storage {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// HTTP request failed before a response arrived.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Backend returned an error response.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Backend asked us to slow down.
	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	/// Backend acknowledged a different batch than the one submitted.
	#[error("acknowledgment mismatch: sent {sent}, acknowledged {acknowledged}")]
	AckMismatch { sent: BatchId, acknowledged: String },

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// A tokio runtime is required to start the background worker.
	#[error("no tokio runtime available to run the background worker")]
	NoRuntime,
}

impl BeaconError {
	pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		BeaconError::Storage {
			path: path.into(),
			source,
		}
	}
}

impl RetryableError for BeaconError {
	fn is_retryable(&self) -> bool {
		match self {
			BeaconError::RequestFailed(e) => e.is_retryable(),
			BeaconError::ServerError { status, .. } => reqwest::StatusCode::from_u16(*status)
				.map(is_retryable_status)
				.unwrap_or(false),
			BeaconError::RateLimited { .. } => true,
			BeaconError::Storage { .. } => true,
			_ => false,
		}
	}
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, BeaconError>;
