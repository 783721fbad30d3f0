//! Configuration module for the marketplace engine.
//!
//! This module provides structures and utilities for managing engine
//! configuration. It supports loading configuration from TOML files and
//! provides validation to ensure all required configuration values are
//! properly set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the marketplace engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration for the engine instance itself.
	pub market: MarketConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the engine instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
	/// Unique identifier for this engine instance.
	pub id: String,
	/// Platform fee in basis points, applied to the order subtotal once at
	/// creation. The default of 2500 bps reproduces the marketplace's
	/// 1.25x displayed pricing (the fee is 20% of the buyer's total).
	#[serde(default = "default_platform_fee_bps")]
	pub platform_fee_bps: u32,
	/// Days a buyer has to confirm a published order before the sweeper
	/// completes it automatically.
	#[serde(default = "default_confirmation_window_days")]
	pub confirmation_window_days: i64,
	/// Days after first publication during which a buyer may dispute.
	#[serde(default = "default_dispute_window_days")]
	pub dispute_window_days: i64,
	/// How many times a transition is retried on a stale-state conflict
	/// before surfacing the conflict to the caller.
	#[serde(default = "default_transition_retry_limit")]
	pub transition_retry_limit: u32,
	/// Interval in seconds between confirmation sweeper runs.
	#[serde(default = "default_sweep_interval_seconds")]
	pub sweep_interval_seconds: u64,
}

fn default_platform_fee_bps() -> u32 {
	2500
}

fn default_confirmation_window_days() -> i64 {
	3
}

fn default_dispute_window_days() -> i64 {
	90
}

fn default_transition_retry_limit() -> u32 {
	3
}

fn default_sweep_interval_seconds() -> u64 {
	300
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server should be started.
	#[serde(default = "default_api_enabled")]
	pub enabled: bool,
	/// Host address to bind to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to listen on.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_enabled() -> bool {
	true
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	8080
}

impl Config {
	/// Parses configuration from a TOML string and validates it.
	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		let config: Config = toml::from_str(raw)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads configuration from a TOML file and validates it.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path)?;
		Self::from_toml_str(&raw)
	}

	/// Validates cross-field constraints the type system cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.market.id.is_empty() {
			return Err(ConfigError::Validation("market.id must not be empty".into()));
		}
		if self.market.platform_fee_bps > 10_000 {
			return Err(ConfigError::Validation(
				"market.platform_fee_bps must not exceed 10000".into(),
			));
		}
		if self.market.confirmation_window_days <= 0 {
			return Err(ConfigError::Validation(
				"market.confirmation_window_days must be positive".into(),
			));
		}
		if self.market.dispute_window_days <= 0 {
			return Err(ConfigError::Validation(
				"market.dispute_window_days must be positive".into(),
			));
		}
		if self.market.sweep_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"market.sweep_interval_seconds must be positive".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"storage.primary '{}' has no matching implementations entry",
				self.storage.primary
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
		[market]
		id = "market-test"

		[storage]
		primary = "memory"

		[storage.implementations.memory]
	"#;

	#[test]
	fn test_minimal_config_gets_defaults() {
		let config = Config::from_toml_str(MINIMAL).unwrap();
		assert_eq!(config.market.platform_fee_bps, 2500);
		assert_eq!(config.market.confirmation_window_days, 3);
		assert_eq!(config.market.dispute_window_days, 90);
		assert_eq!(config.market.transition_retry_limit, 3);
		assert!(config.api.is_none());
	}

	#[test]
	fn test_explicit_values_override_defaults() {
		let raw = r#"
			[market]
			id = "market-test"
			platform_fee_bps = 2000
			confirmation_window_days = 5

			[storage]
			primary = "file"

			[storage.implementations.file]
			storage_path = "./data"

			[api]
			host = "0.0.0.0"
			port = 9090
		"#;
		let config = Config::from_toml_str(raw).unwrap();
		assert_eq!(config.market.platform_fee_bps, 2000);
		assert_eq!(config.market.confirmation_window_days, 5);
		let api = config.api.unwrap();
		assert!(api.enabled);
		assert_eq!(api.port, 9090);
	}

	#[test]
	fn test_fee_bps_bound() {
		let raw = MINIMAL.replace("id = \"market-test\"", "id = \"m\"\nplatform_fee_bps = 10001");
		assert!(matches!(
			Config::from_toml_str(&raw),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn test_primary_must_have_implementation() {
		let raw = r#"
			[market]
			id = "market-test"

			[storage]
			primary = "postgres"

			[storage.implementations.memory]
		"#;
		assert!(matches!(
			Config::from_toml_str(raw),
			Err(ConfigError::Validation(_))
		));
	}
}
