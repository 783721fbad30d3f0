//! Dispute records and resolution outcomes.
//!
//! A dispute suspends an order's workflow until an admin resolves it. At
//! most one open dispute may exist per order; resolution settles or refunds
//! the escrowed funds and moves the order to a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{Role, UserId};
use crate::order::{OrderId, OrderStatus};

/// Unique identifier for a dispute (uuid).
pub type DisputeId = String;

/// Minimum length of a dispute description, mirroring the checkout UI.
pub const MIN_DISPUTE_DESCRIPTION: usize = 20;

/// Why the dispute was raised. Closed set; free text goes in the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
	ContentQuality,
	NotPublished,
	LinkRemoved,
	WrongPlacement,
	NoDelivery,
	PaymentIssue,
	Other,
}

/// Whether the dispute is awaiting an admin decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
	Open,
	Resolved,
}

/// Admin decision applied to the escrowed funds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
	/// Full refund to the buyer; the order ends `Refunded`.
	FavorsBuyer,
	/// Full settlement to the publisher; the order ends `Completed`.
	FavorsPublisher,
	/// Split of the reserved amount. `publisher_bps` of the total goes to
	/// the publisher side (fee prorated), the remainder back to the buyer.
	Split { publisher_bps: u32 },
}

/// A contested order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
	/// Unique identifier, immutable.
	pub id: DisputeId,
	/// The order being contested. One open dispute per order.
	pub order_id: OrderId,
	/// The user who raised the dispute.
	pub raised_by: UserId,
	/// The side they were acting for (buyer or publisher).
	pub raised_by_role: Role,
	pub reason: DisputeReason,
	/// Free-text account of the problem, at least 20 characters.
	pub description: String,
	/// Supporting links (screenshots, archived pages).
	#[serde(default)]
	pub evidence_urls: Vec<String>,
	pub status: DisputeStatus,
	/// Set when an admin resolves the dispute.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolution: Option<DisputeResolution>,
	/// The workflow position the order held when the dispute was raised.
	pub prior_status: OrderStatus,
	pub created_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_resolution_wire_format() {
		let json = serde_json::to_string(&DisputeResolution::Split { publisher_bps: 6000 }).unwrap();
		assert_eq!(json, "{\"split\":{\"publisher_bps\":6000}}");
		let back: DisputeResolution = serde_json::from_str("\"favors_buyer\"").unwrap();
		assert_eq!(back, DisputeResolution::FavorsBuyer);
	}
}
