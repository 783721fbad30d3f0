//! Common types module for the marketplace escrow engine.
//!
//! This module defines the core data types and structures shared across the
//! engine: orders and their lifecycle statuses, wallet and settlement math,
//! disputes, domain events, and the wire types for the HTTP API. It provides
//! a centralized location for shared types to ensure consistency across all
//! components.

/// Actor identity and role types.
pub mod actor;
/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Dispute records and resolution outcomes.
pub mod dispute;
/// Event types for inter-service communication.
pub mod events;
/// Integer minor-unit money arithmetic and settlement splits.
pub mod money;
/// Order records and lifecycle statuses.
pub mod order;
/// Storage namespace keys for persistent data.
pub mod storage;
/// Transition payloads accepted by the state machine.
pub mod transition;
/// Utility functions for formatting and display.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

// Re-export all types for convenient access
pub use actor::*;
pub use api::*;
pub use dispute::*;
pub use events::*;
pub use money::*;
pub use order::*;
pub use storage::*;
pub use transition::*;
pub use utils::{format_amount, truncate_id};
pub use validation::*;
