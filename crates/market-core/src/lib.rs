//! Core engine for the marketplace order lifecycle.
//!
//! This crate executes the state machine: it takes an authenticated actor's
//! requested action, validates it against the transition rules, performs the
//! resulting escrow movement and the conditional order update inside one
//! per-order critical section, and publishes a domain event for every
//! committed change. It also houses the confirmation sweeper that completes
//! published orders whose buyers never confirmed.

pub mod builder;
pub mod engine;
pub mod locks;
pub mod sweeper;

pub use crate::builder::EngineBuilder;
pub use crate::engine::event_bus::EventBus;
pub use crate::engine::{EngineError, MarketEngine};
pub use crate::sweeper::{ConfirmationSweeper, SweepReport};
