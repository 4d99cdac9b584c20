// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered SDK configuration.
//!
//! Sources are merged in precedence order, later layers overriding earlier
//! ones field by field:
//!
//! 1. built-in defaults
//! 2. TOML file (`$XDG_CONFIG_HOME/beacon/config.toml` or an explicit path)
//! 3. `BEACON_*` environment variables
//! 4. values set on [`BeaconClientBuilder`](crate::BeaconClientBuilder)
//!
//! ```toml
//! app_key = "a1b2c3d4e5f6"
//! base_url = "https://events.example.com"
//! log_level = "warnings"
//! max_batch_size = 100
//! flush_interval_secs = 15
//! ```

mod error;
mod sources;

use std::path::PathBuf;
use std::time::Duration;

use beacon_common_http::BackoffPolicy;
use beacon_core::{AppKey, LogLevel};
use serde::Deserialize;
use tracing::debug;

use crate::store::{StoreConfig, DEFAULT_COMPACTION_THRESHOLD, DEFAULT_RETENTION};

pub use error::ConfigError;
pub use sources::{
	ConfigSource, DefaultsSource, EnvSource, OverridesSource, Precedence, TomlSource,
};

/// One layer of configuration; every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfigLayer {
	pub app_key: Option<AppKey>,
	pub base_url: Option<String>,
	pub log_level: Option<LogLevel>,
	pub store_path: Option<PathBuf>,
	pub queue_capacity: Option<usize>,
	pub queue_high_watermark: Option<usize>,
	pub max_batch_size: Option<usize>,
	pub flush_interval_secs: Option<u64>,
	pub store_high_watermark: Option<usize>,
	pub retention_secs: Option<u64>,
	pub compaction_threshold: Option<usize>,
	pub max_attempts: Option<u32>,
	pub base_delay_ms: Option<u64>,
	pub max_delay_secs: Option<u64>,
	pub backoff_factor: Option<f64>,
	pub jitter: Option<f64>,
	pub request_timeout_secs: Option<u64>,
	pub shutdown_timeout_secs: Option<u64>,
}

macro_rules! merge_fields {
	($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
		$(
			if $other.$field.is_some() {
				$self.$field = $other.$field;
			}
		)+
	};
}

impl BeaconConfigLayer {
	pub fn merge(&mut self, other: Self) {
		merge_fields!(
			self,
			other,
			app_key,
			base_url,
			log_level,
			store_path,
			queue_capacity,
			queue_high_watermark,
			max_batch_size,
			flush_interval_secs,
			store_high_watermark,
			retention_secs,
			compaction_threshold,
			max_attempts,
			base_delay_ms,
			max_delay_secs,
			backoff_factor,
			jitter,
			request_timeout_secs,
			shutdown_timeout_secs,
		);
	}

	pub fn finalize(self) -> BeaconConfig {
		let defaults = BeaconConfig::default();
		let backoff = BackoffPolicy {
			max_attempts: self.max_attempts.unwrap_or(defaults.backoff.max_attempts),
			base_delay: self
				.base_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.backoff.base_delay),
			max_delay: self
				.max_delay_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.backoff.max_delay),
			backoff_factor: self.backoff_factor.unwrap_or(defaults.backoff.backoff_factor),
			jitter: self.jitter.unwrap_or(defaults.backoff.jitter),
		};

		BeaconConfig {
			app_key: self.app_key,
			base_url: self.base_url,
			log_level: self.log_level.unwrap_or(defaults.log_level),
			store_path: self.store_path.unwrap_or(defaults.store_path),
			queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
			queue_high_watermark: self
				.queue_high_watermark
				.unwrap_or(defaults.queue_high_watermark),
			max_batch_size: self.max_batch_size.unwrap_or(defaults.max_batch_size),
			flush_interval: self
				.flush_interval_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.flush_interval),
			store_high_watermark: self
				.store_high_watermark
				.unwrap_or(defaults.store_high_watermark),
			retention: self
				.retention_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.retention),
			compaction_threshold: self
				.compaction_threshold
				.unwrap_or(defaults.compaction_threshold),
			backoff,
			request_timeout: self
				.request_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.request_timeout),
			shutdown_timeout: self
				.shutdown_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.shutdown_timeout),
		}
	}
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconConfig {
	pub app_key: Option<AppKey>,
	pub base_url: Option<String>,
	pub log_level: LogLevel,
	/// Location of the durable event log.
	pub store_path: PathBuf,
	/// In-memory queue capacity; overflow drops the oldest event.
	pub queue_capacity: usize,
	/// Queue fill level that wakes the worker immediately.
	pub queue_high_watermark: usize,
	pub max_batch_size: usize,
	pub flush_interval: Duration,
	/// Stored-but-undelivered count that wakes the worker immediately.
	pub store_high_watermark: usize,
	/// Undelivered records older than this are purged.
	pub retention: Duration,
	pub compaction_threshold: usize,
	pub backoff: BackoffPolicy,
	pub request_timeout: Duration,
	/// Upper bound on the best-effort flush performed by shutdown.
	pub shutdown_timeout: Duration,
}

impl Default for BeaconConfig {
	fn default() -> Self {
		Self {
			app_key: None,
			base_url: None,
			log_level: LogLevel::Minimal,
			store_path: default_store_path(),
			queue_capacity: 250,
			queue_high_watermark: 200,
			max_batch_size: 50,
			flush_interval: Duration::from_secs(30),
			store_high_watermark: 500,
			retention: DEFAULT_RETENTION,
			compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
			backoff: BackoffPolicy::default(),
			request_timeout: Duration::from_secs(10),
			shutdown_timeout: Duration::from_secs(5),
		}
	}
}

impl BeaconConfig {
	/// Rejects settings the pipeline cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.queue_capacity == 0 {
			return Err(ConfigError::validation("queue_capacity must be greater than zero"));
		}
		if self.queue_high_watermark == 0 || self.queue_high_watermark > self.queue_capacity {
			return Err(ConfigError::validation(format!(
				"queue_high_watermark must be between 1 and queue_capacity ({})",
				self.queue_capacity
			)));
		}
		if self.max_batch_size == 0 {
			return Err(ConfigError::validation("max_batch_size must be greater than zero"));
		}
		if self.store_high_watermark == 0 {
			return Err(ConfigError::validation(
				"store_high_watermark must be greater than zero",
			));
		}
		if self.flush_interval.is_zero() {
			return Err(ConfigError::validation("flush_interval must be greater than zero"));
		}
		if self.retention.is_zero() {
			return Err(ConfigError::validation("retention must be greater than zero"));
		}
		if self.backoff.max_attempts == 0 {
			return Err(ConfigError::validation("max_attempts must be at least 1"));
		}
		if self.backoff.base_delay > self.backoff.max_delay {
			return Err(ConfigError::validation(
				"base_delay must not exceed max_delay",
			));
		}
		if !self.backoff.backoff_factor.is_finite() || self.backoff.backoff_factor < 1.0 {
			return Err(ConfigError::validation("backoff_factor must be at least 1.0"));
		}
		if !(0.0..=1.0).contains(&self.backoff.jitter) {
			return Err(ConfigError::validation("jitter must be between 0.0 and 1.0"));
		}
		if self.request_timeout.is_zero() {
			return Err(ConfigError::validation("request_timeout must be greater than zero"));
		}
		Ok(())
	}

	pub fn store_config(&self) -> StoreConfig {
		StoreConfig {
			path: self.store_path.clone(),
			retention: self.retention,
			compaction_threshold: self.compaction_threshold,
		}
	}
}

/// `$XDG_DATA_HOME/beacon/events.log`, or the temp dir if no data dir exists.
pub fn default_store_path() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("beacon")
		.join("events.log")
}

/// `$XDG_CONFIG_HOME/beacon/config.toml`.
pub fn default_config_file() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("beacon").join("config.toml"))
}

/// Collects sources and merges them by precedence.
#[derive(Default)]
pub struct ConfigRegistry {
	sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, source: Box<dyn ConfigSource>) {
		self.sources.push(source);
	}

	/// Merges all layers, then finalizes and validates the result.
	pub fn load(mut self) -> Result<BeaconConfig, ConfigError> {
		self.sources.sort_by_key(|s| s.precedence());

		let mut merged = BeaconConfigLayer::default();
		for source in &self.sources {
			debug!(source = source.name(), "loading config layer");
			merged.merge(source.load()?);
		}

		let config = merged.finalize();
		config.validate()?;
		Ok(config)
	}
}
