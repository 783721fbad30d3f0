//! Confirmation sweeper for published orders.
//!
//! Buyers get a fixed window to confirm a published placement; when it
//! lapses, the sweeper applies the same completion transition the buyer
//! would have, under the System actor. Sweeps are idempotent: an indexed
//! order that is no longer published (confirmed manually, rejected or
//! disputed in the meantime) is skipped and its index entry dropped.

use chrono::Utc;
use market_storage::StorageError;
use market_types::{truncate_id, Actor, StorageKey, TransitionAction};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::engine::{EngineError, MarketEngine, PendingConfirmation};

/// Outcome of one sweep pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Indexed orders inspected.
	pub scanned: usize,
	/// Orders auto-completed this pass.
	pub completed: usize,
	/// Indexed orders skipped (deadline not reached or no longer eligible).
	pub skipped: usize,
}

/// Periodic task completing published orders past their deadline.
pub struct ConfirmationSweeper {
	engine: Arc<MarketEngine>,
	interval: Duration,
}

impl ConfirmationSweeper {
	pub fn new(engine: Arc<MarketEngine>, interval: Duration) -> Self {
		Self { engine, interval }
	}

	/// Runs the sweeper until the process shuts down.
	pub async fn run(&self) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			match self.sweep_once().await {
				Ok(report) if report.completed > 0 => {
					tracing::info!(
						scanned = report.scanned,
						completed = report.completed,
						"Confirmation sweep completed orders"
					);
				}
				Ok(_) => {}
				Err(e) => {
					tracing::warn!(error = %e, "Confirmation sweep failed");
				}
			}
		}
	}

	/// Scans the deadline index once and auto-completes every published
	/// order whose confirmation deadline has passed.
	#[instrument(skip_all)]
	pub async fn sweep_once(&self) -> Result<SweepReport, EngineError> {
		let engine = &self.engine;
		let now = Utc::now();
		let order_ids = engine
			.storage()
			.list_ids(StorageKey::PendingConfirmations.as_str())
			.await?;

		let mut report = SweepReport::default();
		for order_id in order_ids {
			report.scanned += 1;

			let entry = match engine
				.storage()
				.retrieve::<PendingConfirmation>(
					StorageKey::PendingConfirmations.as_str(),
					&order_id,
				)
				.await
			{
				Ok(entry) => entry,
				// Raced with a concurrent transition that dropped the entry.
				Err(StorageError::NotFound) => {
					report.skipped += 1;
					continue;
				}
				Err(e) => return Err(e.into()),
			};

			if entry.deadline > now {
				report.skipped += 1;
				continue;
			}

			match engine
				.transition(&Actor::system(), &order_id, TransitionAction::AutoConfirm)
				.await
			{
				Ok(_) => {
					report.completed += 1;
				}
				// The order moved on while indexed: confirmed manually,
				// sent back for revision, disputed, or the deadline moved.
				// Reapplying must stay a no-op, not an error.
				Err(EngineError::Order(e)) => {
					tracing::debug!(
						order_id = %truncate_id(&order_id),
						reason = %e,
						"Skipping indexed order"
					);
					self.resync_entry(&order_id).await;
					report.skipped += 1;
				}
				Err(EngineError::Conflict(_)) => {
					// Lost a race this pass; the next sweep retries.
					report.skipped += 1;
				}
				Err(e) => return Err(e),
			}
		}
		Ok(report)
	}

	/// Brings an index entry back in line with its order: re-stored with
	/// the live deadline while the order is still published, dropped
	/// otherwise.
	async fn resync_entry(&self, order_id: &str) {
		let engine = &self.engine;
		let order = match engine
			.storage()
			.retrieve::<market_types::Order>(StorageKey::Orders.as_str(), order_id)
			.await
		{
			Ok(order) => order,
			Err(_) => {
				engine.remove_confirmation_entry(order_id).await;
				return;
			}
		};

		match (order.status, order.buyer_confirmation_deadline) {
			(market_types::OrderStatus::Published, Some(deadline)) => {
				if let Err(e) = engine
					.storage()
					.store(
						StorageKey::PendingConfirmations.as_str(),
						order_id,
						&PendingConfirmation { deadline },
					)
					.await
				{
					tracing::warn!(
						order_id = %truncate_id(order_id),
						error = %e,
						"Failed to resync confirmation index entry"
					);
				}
			}
			_ => {
				engine.remove_confirmation_entry(order_id).await;
			}
		}
	}
}
