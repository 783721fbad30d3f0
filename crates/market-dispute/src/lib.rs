//! Dispute flow for the marketplace engine.
//!
//! Validates and persists dispute records: who may contest an order, from
//! which workflow positions, and the one-open-dispute-per-order invariant.
//! Applying a resolution's money movement and the order's terminal status is
//! the engine's job; this crate owns the dispute records themselves.

use chrono::{DateTime, Utc};
use market_storage::{StorageError, StorageService};
use market_types::{
	Actor, Dispute, DisputeId, DisputeReason, DisputeResolution, DisputeStatus, Order, OrderStatus,
	Role, StorageKey, MIN_DISPUTE_DESCRIPTION,
};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the dispute flow.
#[derive(Debug, Error)]
pub enum DisputeError {
	/// The actor is not a party to the order (or not an admin resolving).
	#[error("Forbidden: {0}")]
	Forbidden(String),
	/// An open dispute already exists for the order.
	#[error("An open dispute already exists for order {0}")]
	AlreadyOpen(String),
	/// The order is not in a state this actor may dispute.
	#[error("Order in {status} state cannot be disputed by the {role}")]
	NotEligible { status: OrderStatus, role: Role },
	/// The buyer's dispute protection window has expired.
	#[error("The dispute protection period for this order has expired")]
	ProtectionExpired,
	/// Missing or malformed dispute fields.
	#[error("Validation failed: {0}")]
	ValidationFailed(String),
	/// The dispute is not open (already resolved).
	#[error("Dispute {0} is not open")]
	NotOpen(String),
	/// The referenced dispute does not exist.
	#[error("Dispute not found: {0}")]
	NotFound(String),
	/// Error from the storage backend.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for DisputeError {
	fn from(err: StorageError) -> Self {
		DisputeError::Storage(err.to_string())
	}
}

/// Workflow positions a buyer may dispute from.
///
/// Settled funds are never clawed back: once an order completes, the
/// escrow is gone and a complaint becomes a support matter, not a dispute.
const BUYER_DISPUTABLE: &[OrderStatus] = &[OrderStatus::Published, OrderStatus::RevisionNeeded];

/// Workflow positions a publisher may dispute from (a buyer sitting on
/// endless revision requests).
const PUBLISHER_DISPUTABLE: &[OrderStatus] = &[OrderStatus::RevisionNeeded];

/// Service owning dispute records and their invariants.
pub struct DisputeService {
	storage: Arc<StorageService>,
}

impl DisputeService {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Validates and persists a new dispute for an order.
	///
	/// The caller (the engine) transitions the order to `Disputed` in the
	/// same critical section; this method only creates the record after
	/// checking eligibility and the one-open-dispute invariant.
	pub async fn open(
		&self,
		actor: &Actor,
		order: &Order,
		reason: DisputeReason,
		description: &str,
		evidence_urls: Vec<String>,
		now: DateTime<Utc>,
	) -> Result<Dispute, DisputeError> {
		let role = if actor.user_id == order.buyer_id && actor.role == Role::Buyer {
			Role::Buyer
		} else if actor.user_id == order.publisher_id && actor.role == Role::Publisher {
			Role::Publisher
		} else {
			return Err(DisputeError::Forbidden(
				"only the order's buyer or publisher may raise a dispute".to_string(),
			));
		};

		if description.trim().len() < MIN_DISPUTE_DESCRIPTION {
			return Err(DisputeError::ValidationFailed(format!(
				"description must be at least {} characters",
				MIN_DISPUTE_DESCRIPTION
			)));
		}

		let eligible = match role {
			Role::Buyer => BUYER_DISPUTABLE,
			_ => PUBLISHER_DISPUTABLE,
		};
		if !eligible.contains(&order.status) {
			return Err(DisputeError::NotEligible {
				status: order.status,
				role,
			});
		}

		if role == Role::Buyer {
			if let Some(protection_until) = order.dispute_protection_until {
				if protection_until < now {
					return Err(DisputeError::ProtectionExpired);
				}
			}
		}

		if let Some(existing) = self.for_order(&order.id).await? {
			if existing.status == DisputeStatus::Open {
				return Err(DisputeError::AlreadyOpen(order.id.clone()));
			}
		}

		let dispute = Dispute {
			id: Uuid::new_v4().to_string(),
			order_id: order.id.clone(),
			raised_by: actor.user_id.clone(),
			raised_by_role: role,
			reason,
			description: description.trim().to_string(),
			evidence_urls,
			status: DisputeStatus::Open,
			resolution: None,
			prior_status: order.status,
			created_at: now,
			resolved_at: None,
		};

		self.storage
			.store(StorageKey::Disputes.as_str(), &dispute.id, &dispute)
			.await?;
		self.storage
			.store(StorageKey::DisputeByOrder.as_str(), &order.id, &dispute.id)
			.await?;

		Ok(dispute)
	}

	/// Fetches a dispute by id.
	pub async fn get(&self, dispute_id: &str) -> Result<Dispute, DisputeError> {
		match self
			.storage
			.retrieve::<Dispute>(StorageKey::Disputes.as_str(), dispute_id)
			.await
		{
			Ok(dispute) => Ok(dispute),
			Err(StorageError::NotFound) => Err(DisputeError::NotFound(dispute_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Returns the latest dispute for an order, if any.
	pub async fn for_order(&self, order_id: &str) -> Result<Option<Dispute>, DisputeError> {
		let dispute_id = match self
			.storage
			.retrieve::<DisputeId>(StorageKey::DisputeByOrder.as_str(), order_id)
			.await
		{
			Ok(id) => id,
			Err(StorageError::NotFound) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		Ok(Some(self.get(&dispute_id).await?))
	}

	/// Marks an open dispute resolved.
	///
	/// Called by the engine after the resolution's ledger movement and the
	/// order's terminal status commit. Fails if the dispute is not open.
	pub async fn mark_resolved(
		&self,
		dispute_id: &str,
		resolution: DisputeResolution,
		now: DateTime<Utc>,
	) -> Result<Dispute, DisputeError> {
		let mut dispute = self.get(dispute_id).await?;
		if dispute.status != DisputeStatus::Open {
			return Err(DisputeError::NotOpen(dispute_id.to_string()));
		}
		dispute.status = DisputeStatus::Resolved;
		dispute.resolution = Some(resolution);
		dispute.resolved_at = Some(now);

		self.storage
			.update(StorageKey::Disputes.as_str(), dispute_id, &dispute)
			.await?;
		Ok(dispute)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use market_storage::implementations::memory::MemoryStorage;
	use market_types::{ContentSource, OrderType, PaymentStatus};

	fn service() -> DisputeService {
		DisputeService::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn published_order() -> Order {
		let now = Utc::now();
		Order {
			id: Uuid::new_v4().to_string(),
			order_number: "PS-d1sp0001".to_string(),
			buyer_id: "buyer-1".to_string(),
			publisher_id: "pub-1".to_string(),
			website_id: "site-1".to_string(),
			contributor_id: None,
			order_type: OrderType::GuestPost,
			status: OrderStatus::Published,
			payment_status: PaymentStatus::Paid,
			base_price: 12_000,
			writing_fee: None,
			platform_fee: 3_000,
			total_amount: 15_000,
			publisher_earnings: 12_000,
			contributor_earnings: None,
			title: None,
			content: None,
			anchor_text: None,
			target_url: None,
			article_url: Some("https://site.example.com/post".to_string()),
			content_source: ContentSource::BuyerProvided,
			buyer_rating: None,
			buyer_review: None,
			buyer_rejection_reason: None,
			cancellation_reason: None,
			buyer_confirmation_deadline: Some(now + Duration::days(3)),
			dispute_protection_until: Some(now + Duration::days(90)),
			created_at: now,
			accepted_at: Some(now),
			published_at: Some(now),
			completed_at: None,
			cancelled_at: None,
			updated_at: now,
		}
	}

	fn buyer() -> Actor {
		Actor::new("buyer-1", Role::Buyer)
	}

	const DESCRIPTION: &str = "The article was removed two days after publication.";

	#[tokio::test]
	async fn test_buyer_opens_dispute_on_published_order() {
		let service = service();
		let order = published_order();
		let dispute = service
			.open(
				&buyer(),
				&order,
				DisputeReason::LinkRemoved,
				DESCRIPTION,
				vec!["https://archive.example.org/snapshot".to_string()],
				Utc::now(),
			)
			.await
			.unwrap();
		assert_eq!(dispute.status, DisputeStatus::Open);
		assert_eq!(dispute.prior_status, OrderStatus::Published);
		assert_eq!(dispute.raised_by_role, Role::Buyer);
	}

	#[tokio::test]
	async fn test_second_open_dispute_is_rejected() {
		let service = service();
		let order = published_order();
		service
			.open(
				&buyer(),
				&order,
				DisputeReason::LinkRemoved,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap();
		let err = service
			.open(
				&buyer(),
				&order,
				DisputeReason::ContentQuality,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::AlreadyOpen(_)));
	}

	#[tokio::test]
	async fn test_short_description_rejected() {
		let service = service();
		let order = published_order();
		let err = service
			.open(
				&buyer(),
				&order,
				DisputeReason::Other,
				"too short",
				vec![],
				Utc::now(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::ValidationFailed(_)));
	}

	#[tokio::test]
	async fn test_non_party_rejected() {
		let service = service();
		let order = published_order();
		let stranger = Actor::new("someone-else", Role::Buyer);
		let err = service
			.open(
				&stranger,
				&order,
				DisputeReason::Other,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::Forbidden(_)));
	}

	#[tokio::test]
	async fn test_publisher_may_dispute_revision_needed_only() {
		let service = service();
		let publisher = Actor::new("pub-1", Role::Publisher);

		let mut order = published_order();
		order.status = OrderStatus::RevisionNeeded;
		assert!(service
			.open(
				&publisher,
				&order,
				DisputeReason::PaymentIssue,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.is_ok());

		let order = published_order();
		let err = service
			.open(
				&publisher,
				&order,
				DisputeReason::PaymentIssue,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::NotEligible { .. }));
	}

	#[tokio::test]
	async fn test_protection_window_enforced_for_buyers() {
		let service = service();
		let mut order = published_order();
		order.dispute_protection_until = Some(Utc::now() - Duration::days(1));
		let err = service
			.open(
				&buyer(),
				&order,
				DisputeReason::LinkRemoved,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::ProtectionExpired));
	}

	#[tokio::test]
	async fn test_resolution_round_trip() {
		let service = service();
		let order = published_order();
		let dispute = service
			.open(
				&buyer(),
				&order,
				DisputeReason::LinkRemoved,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.unwrap();

		let resolved = service
			.mark_resolved(&dispute.id, DisputeResolution::FavorsBuyer, Utc::now())
			.await
			.unwrap();
		assert_eq!(resolved.status, DisputeStatus::Resolved);
		assert_eq!(resolved.resolution, Some(DisputeResolution::FavorsBuyer));

		// Resolving twice fails
		let err = service
			.mark_resolved(&dispute.id, DisputeResolution::FavorsBuyer, Utc::now())
			.await
			.unwrap_err();
		assert!(matches!(err, DisputeError::NotOpen(_)));

		// A new dispute may now be opened for the same order
		assert!(service
			.open(
				&buyer(),
				&order,
				DisputeReason::ContentQuality,
				DESCRIPTION,
				vec![],
				Utc::now(),
			)
			.await
			.is_ok());
	}
}
