// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Beacon.
//!
//! This crate provides:
//! - A pre-configured HTTP client builder with a consistent User-Agent header
//! - Exponential backoff with jitter for retrying transient failures
//! - Classification of errors and status codes as retryable or not

mod backoff;
mod client;

pub use backoff::{
	calculate_delay, is_retryable_status, Backoff, BackoffPolicy, RetryableError,
};
pub use client::{builder, new_client_with_timeout, user_agent};
