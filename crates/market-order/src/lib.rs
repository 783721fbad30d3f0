//! Order persistence and lifecycle rules for the marketplace engine.
//!
//! This crate holds the two halves of the state machine's substrate: the
//! [`OrderStore`] persistence contract with its conditional status update
//! (optimistic concurrency), and the pure transition rules in
//! [`transitions`] that decide which actor may move an order where and what
//! ledger effect that move carries. Executing a transition (locks, ledger
//! calls, retries, events) is the engine's job in `market-core`.

use chrono::Utc;
use market_storage::{StorageError, StorageService};
use market_types::{Order, OrderStatus, StorageKey};
use std::sync::Arc;
use thiserror::Error;

pub mod transitions;

pub use crate::transitions::{plan_transition, LedgerEffect, TransitionPlan};

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
	/// The actor's role is not permitted for the attempted transition.
	/// Terminal client error, never retried.
	#[error("Forbidden: {0}")]
	Forbidden(String),
	/// The order's persisted status does not match the transition's
	/// required starting state. Terminal client error, never retried.
	#[error("Invalid transition: cannot {action} an order in {from} state")]
	InvalidTransition {
		action: &'static str,
		from: OrderStatus,
	},
	/// Missing or malformed payload fields. Terminal client error.
	#[error("Validation failed: {0}")]
	ValidationFailed(String),
	/// Optimistic concurrency conflict: the stored status changed between
	/// read and commit. Retried internally up to a cap by the engine.
	#[error("Stale order state: expected {expected}, found {actual}")]
	StaleOrderState {
		expected: OrderStatus,
		actual: OrderStatus,
	},
	/// The referenced order does not exist.
	#[error("Order not found: {0}")]
	NotFound(String),
	/// Error from the storage backend.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for OrderError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::NotFound => OrderError::NotFound("order".to_string()),
			other => OrderError::Storage(other.to_string()),
		}
	}
}

/// Persistence contract for orders.
///
/// The store knows nothing about lifecycle rules; it only guarantees that a
/// status update is conditional on the caller's expected current status, so
/// two racing transitions cannot both commit.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Persists a newly created order.
	pub async fn create(&self, order: &Order) -> Result<(), OrderError> {
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id, order)
			.await?;
		Ok(())
	}

	/// Fetches an order by id.
	pub async fn get(&self, order_id: &str) -> Result<Order, OrderError> {
		match self
			.storage
			.retrieve::<Order>(StorageKey::Orders.as_str(), order_id)
			.await
		{
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderError::NotFound(order_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Conditionally updates an order.
	///
	/// Re-reads the stored order and fails with `StaleOrderState` if its
	/// status no longer matches `expected_current_status`; otherwise applies
	/// the mutation, bumps `updated_at` and persists. The caller decides
	/// whether to reload and retry or surface the conflict.
	pub async fn update_status<F>(
		&self,
		order_id: &str,
		expected_current_status: OrderStatus,
		apply: F,
	) -> Result<Order, OrderError>
	where
		F: FnOnce(&mut Order),
	{
		let mut order = self.get(order_id).await?;

		if order.status != expected_current_status {
			return Err(OrderError::StaleOrderState {
				expected: expected_current_status,
				actual: order.status,
			});
		}

		apply(&mut order);
		order.updated_at = Utc::now();

		self.storage
			.update(StorageKey::Orders.as_str(), order_id, &order)
			.await?;
		Ok(order)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use market_storage::implementations::memory::MemoryStorage;
	use market_types::{ContentSource, OrderType, PaymentStatus};

	pub(crate) fn sample_order(status: OrderStatus) -> Order {
		let now = Utc::now();
		Order {
			id: uuid::Uuid::new_v4().to_string(),
			order_number: "PS-test1234".to_string(),
			buyer_id: "buyer-1".to_string(),
			publisher_id: "pub-1".to_string(),
			website_id: "site-1".to_string(),
			contributor_id: None,
			order_type: OrderType::GuestPost,
			status,
			payment_status: PaymentStatus::Paid,
			base_price: 12_000,
			writing_fee: None,
			platform_fee: 3_000,
			total_amount: 15_000,
			publisher_earnings: 12_000,
			contributor_earnings: None,
			title: Some("Ten link building myths".to_string()),
			content: None,
			anchor_text: Some("link building".to_string()),
			target_url: Some("https://buyer.example.com/services".to_string()),
			article_url: None,
			content_source: ContentSource::BuyerProvided,
			buyer_rating: None,
			buyer_review: None,
			buyer_rejection_reason: None,
			cancellation_reason: None,
			buyer_confirmation_deadline: None,
			dispute_protection_until: None,
			created_at: now,
			accepted_at: None,
			published_at: None,
			completed_at: None,
			cancelled_at: None,
			updated_at: now,
		}
	}

	fn store() -> OrderStore {
		OrderStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	#[tokio::test]
	async fn test_update_status_applies_when_expected_matches() {
		let store = store();
		let order = sample_order(OrderStatus::Pending);
		store.create(&order).await.unwrap();

		let updated = store
			.update_status(&order.id, OrderStatus::Pending, |o| {
				o.status = OrderStatus::Accepted;
				o.accepted_at = Some(Utc::now());
			})
			.await
			.unwrap();
		assert_eq!(updated.status, OrderStatus::Accepted);
		assert!(updated.accepted_at.is_some());
	}

	#[tokio::test]
	async fn test_update_status_detects_stale_state() {
		let store = store();
		let order = sample_order(OrderStatus::Accepted);
		store.create(&order).await.unwrap();

		let err = store
			.update_status(&order.id, OrderStatus::Pending, |o| {
				o.status = OrderStatus::Cancelled;
			})
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrderError::StaleOrderState {
				expected: OrderStatus::Pending,
				actual: OrderStatus::Accepted
			}
		));

		// Nothing was persisted
		let stored = store.get(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Accepted);
	}

	#[tokio::test]
	async fn test_get_missing_order() {
		let store = store();
		assert!(matches!(
			store.get("nope").await,
			Err(OrderError::NotFound(_))
		));
	}
}
