// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the core data model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("invalid app key: must be 1-256 visible ASCII characters without whitespace")]
	InvalidAppKey,

	#[error("invalid log level: {0} (expected minimal, warnings, errors or all)")]
	InvalidLogLevel(String),
}

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
