//! Builder for constructing a MarketEngine with pluggable storage.
//!
//! The builder resolves the configured storage backend through registered
//! factory functions, validates its configuration table against the
//! backend's schema, and wires up the ledger, order store and dispute
//! services around it.

use market_config::Config;
use market_dispute::DisputeService;
use market_ledger::LedgerService;
use market_order::OrderStore;
use market_storage::{StorageFactory, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::event_bus::EventBus;
use crate::engine::MarketEngine;

/// Errors that can occur while building an engine.
#[derive(Debug, Error)]
pub enum BuildError {
	/// A configured component has no registered factory.
	#[error("Unknown implementation '{0}'")]
	UnknownImplementation(String),
	/// A component's configuration failed validation or construction.
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Builder assembling a [`MarketEngine`] from configuration.
pub struct EngineBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	event_capacity: usize,
}

impl EngineBuilder {
	/// Creates a new builder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			event_capacity: 1000,
		}
	}

	/// Registers a storage backend factory under a name matching the
	/// configuration's `storage.implementations` table.
	pub fn with_storage_factory(mut self, name: &str, factory: StorageFactory) -> Self {
		self.storage_factories.insert(name.to_string(), factory);
		self
	}

	/// Registers every storage backend this workspace ships.
	pub fn with_default_storage_factories(mut self) -> Self {
		for (name, factory) in market_storage::get_all_implementations() {
			self.storage_factories.insert(name.to_string(), factory);
		}
		self
	}

	/// Overrides the event bus capacity.
	pub fn with_event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	/// Builds the engine, resolving and validating the storage backend.
	pub fn build(self) -> Result<MarketEngine, BuildError> {
		let backend_name = &self.config.storage.primary;
		let factory = self
			.storage_factories
			.get(backend_name)
			.ok_or_else(|| BuildError::UnknownImplementation(backend_name.clone()))?;

		let backend_config = self
			.config
			.storage
			.implementations
			.get(backend_name)
			.cloned()
			.unwrap_or(toml::Value::Table(Default::default()));

		let backend = factory(&backend_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %backend_name,
				error = %e,
				"Failed to create storage backend"
			);
			BuildError::Config(format!(
				"Failed to create storage backend '{}': {}",
				backend_name, e
			))
		})?;

		backend
			.config_schema()
			.validate(&backend_config)
			.map_err(|e| {
				BuildError::Config(format!(
					"Invalid configuration for storage backend '{}': {}",
					backend_name, e
				))
			})?;
		tracing::info!(component = "storage", implementation = %backend_name, "Loaded");

		let storage = Arc::new(StorageService::new(backend));
		let ledger = Arc::new(LedgerService::new(storage.clone()));
		let orders = Arc::new(OrderStore::new(storage.clone()));
		let disputes = Arc::new(DisputeService::new(storage.clone()));
		let event_bus = EventBus::new(self.event_capacity);

		Ok(MarketEngine::new(
			self.config.market,
			storage,
			ledger,
			orders,
			disputes,
			event_bus,
		))
	}
}
