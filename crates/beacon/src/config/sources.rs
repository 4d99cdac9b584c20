// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files, environment and overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use beacon_core::{AppKey, LogLevel};
use tracing::{debug, trace};

use super::{BeaconConfigLayer, ConfigError};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	Overrides = 100,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<BeaconConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<BeaconConfigLayer, ConfigError> {
		Ok(BeaconConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// The per-user file, if the platform has a config directory.
	pub fn user() -> Option<Self> {
		super::default_config_file().map(Self::new)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<BeaconConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(BeaconConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: BeaconConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: `BEACON_<FIELD>`, e.g. `BEACON_MAX_BATCH_SIZE`. Empty values
/// are ignored.
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	pub fn new() -> Self {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Reads variables through `lookup` instead of the process environment.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.trim().is_empty())
	}

	fn parsed<T: FromStr>(&self, name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| {
				ConfigError::invalid_value(name, format!("invalid {kind} value '{v}'"))
			}),
			None => Ok(None),
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<BeaconConfigLayer, ConfigError> {
		debug!("loading environment variables");

		let app_key = match self.var("BEACON_APP_KEY") {
			Some(raw) => Some(
				AppKey::parse(raw)
					.map_err(|e| ConfigError::invalid_value("BEACON_APP_KEY", e.to_string()))?,
			),
			None => None,
		};

		let log_level = match self.var("BEACON_LOG_LEVEL") {
			Some(raw) => Some(
				raw.parse::<LogLevel>()
					.map_err(|e| ConfigError::invalid_value("BEACON_LOG_LEVEL", e.to_string()))?,
			),
			None => None,
		};

		Ok(BeaconConfigLayer {
			app_key,
			base_url: self.var("BEACON_BASE_URL"),
			log_level,
			store_path: self.var("BEACON_STORE_PATH").map(PathBuf::from),
			queue_capacity: self.parsed("BEACON_QUEUE_CAPACITY", "usize")?,
			queue_high_watermark: self.parsed("BEACON_QUEUE_HIGH_WATERMARK", "usize")?,
			max_batch_size: self.parsed("BEACON_MAX_BATCH_SIZE", "usize")?,
			flush_interval_secs: self.parsed("BEACON_FLUSH_INTERVAL_SECS", "u64")?,
			store_high_watermark: self.parsed("BEACON_STORE_HIGH_WATERMARK", "usize")?,
			retention_secs: self.parsed("BEACON_RETENTION_SECS", "u64")?,
			compaction_threshold: self.parsed("BEACON_COMPACTION_THRESHOLD", "usize")?,
			max_attempts: self.parsed("BEACON_MAX_ATTEMPTS", "u32")?,
			base_delay_ms: self.parsed("BEACON_BASE_DELAY_MS", "u64")?,
			max_delay_secs: self.parsed("BEACON_MAX_DELAY_SECS", "u64")?,
			backoff_factor: self.parsed("BEACON_BACKOFF_FACTOR", "f64")?,
			jitter: self.parsed("BEACON_JITTER", "f64")?,
			request_timeout_secs: self.parsed("BEACON_REQUEST_TIMEOUT_SECS", "u64")?,
			shutdown_timeout_secs: self.parsed("BEACON_SHUTDOWN_TIMEOUT_SECS", "u64")?,
		})
	}
}

/// Values set programmatically, e.g. on the client builder.
pub struct OverridesSource {
	layer: BeaconConfigLayer,
}

impl OverridesSource {
	pub fn new(layer: BeaconConfigLayer) -> Self {
		Self { layer }
	}
}

impl ConfigSource for OverridesSource {
	fn name(&self) -> &'static str {
		"overrides"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Overrides
	}

	fn load(&self) -> Result<BeaconConfigLayer, ConfigError> {
		Ok(self.layer.clone())
	}
}
