//! Order records and lifecycle statuses.
//!
//! An order represents one purchased placement on a publisher's website. It
//! is created when a buyer checks out (funds are reserved synchronously at
//! that moment) and is mutated exclusively through state machine transitions.
//! Orders are never deleted; cancelled and refunded orders are retained for
//! audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::UserId;
use crate::money::{Amount, ContributorCut, SettlementSplit};

/// Unique identifier for an order (uuid, assigned at creation).
pub type OrderId = String;

/// Kind of placement purchased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
	GuestPost,
	LinkInsertion,
}

/// Where the article content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
	BuyerProvided,
	PublisherWritten,
}

/// Movement state of the order's funds.
///
/// The amounts themselves are fixed at creation; only this flag and the
/// ledger reflect where they currently sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	Unpaid,
	Paid,
	Released,
	Refunded,
}

/// Lifecycle position of an order. Single source of truth.
///
/// `Completed`, `Cancelled` and `Refunded` are terminal. `Disputed` is a
/// first-class status: the order leaves its workflow position when a dispute
/// is raised, and the dispute record keeps the prior position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Created and paid for, awaiting publisher acceptance.
	Pending,
	/// Publisher has accepted the order.
	Accepted,
	/// Publisher is drafting the content.
	Writing,
	/// Content is ready for buyer review.
	ContentSubmitted,
	/// Buyer asked for changes (to the content or to a published article).
	RevisionNeeded,
	/// Buyer approved the content; awaiting publication.
	Approved,
	/// Article is live; buyer confirmation deadline is running.
	Published,
	/// Buyer confirmed (or the deadline passed) and funds settled.
	Completed,
	/// Terminated before delivery; reserved funds returned to the buyer.
	Cancelled,
	/// Terminated by dispute resolution with funds returned in part or full.
	Refunded,
	/// An open dispute suspends the workflow.
	Disputed,
}

impl OrderStatus {
	/// Whether no transition may ever leave this status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
		)
	}

	/// Returns the string representation used on the wire and in logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Accepted => "accepted",
			OrderStatus::Writing => "writing",
			OrderStatus::ContentSubmitted => "content_submitted",
			OrderStatus::RevisionNeeded => "revision_needed",
			OrderStatus::Approved => "approved",
			OrderStatus::Published => "published",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Refunded => "refunded",
			OrderStatus::Disputed => "disputed",
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One purchased placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier, immutable.
	pub id: OrderId,
	/// Human-readable order number shown to both parties.
	pub order_number: String,
	/// The buyer who paid for the placement. Immutable.
	pub buyer_id: UserId,
	/// The publisher who owns the website. Immutable.
	pub publisher_id: UserId,
	/// The website the placement goes on. Immutable.
	pub website_id: String,
	/// Optional content writer assigned at order time.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub contributor_id: Option<UserId>,
	/// Kind of placement purchased.
	pub order_type: OrderType,
	/// Current lifecycle position.
	pub status: OrderStatus,
	/// Movement state of the order's funds.
	pub payment_status: PaymentStatus,

	// Commercial terms, all minor units, fixed at creation.
	/// Listed placement price.
	pub base_price: Amount,
	/// Optional writing add-on.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub writing_fee: Option<Amount>,
	/// Platform fee, computed once at creation (round-half-up).
	pub platform_fee: Amount,
	/// Amount reserved from the buyer: subtotal + platform fee.
	pub total_amount: Amount,
	/// Publisher's cut at settlement.
	pub publisher_earnings: Amount,
	/// Contributor's cut at settlement, when a writer is assigned.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub contributor_earnings: Option<Amount>,

	// Content fields.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub anchor_text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub target_url: Option<String>,
	/// Live article location, set when the order is published.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub article_url: Option<String>,
	pub content_source: ContentSource,

	// Review fields.
	/// Buyer rating, 1-5, set at confirmation.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_rating: Option<u8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_review: Option<String>,
	/// Reason attached to the latest revision request.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_rejection_reason: Option<String>,
	/// Reason supplied when the order was declined or cancelled.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cancellation_reason: Option<String>,
	/// Deadline for buyer confirmation, running while `Published`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_confirmation_deadline: Option<DateTime<Utc>>,
	/// End of the buyer's dispute protection window.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dispute_protection_until: Option<DateTime<Utc>>,

	// Timestamps, each set exactly once and never rewound.
	pub created_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub accepted_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub published_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cancelled_at: Option<DateTime<Utc>>,
	/// Bumped on every persisted mutation.
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Builds the settlement split for completing this order.
	///
	/// All amounts were fixed at creation; this only assembles them. The
	/// ledger re-checks that the split sums to `total_amount` before moving
	/// any funds.
	pub fn settlement_split(&self) -> SettlementSplit {
		let contributor = match (&self.contributor_id, self.contributor_earnings) {
			(Some(user_id), Some(amount)) if amount > 0 => Some(ContributorCut {
				user_id: user_id.clone(),
				amount,
			}),
			_ => None,
		};
		SettlementSplit {
			publisher_id: self.publisher_id.clone(),
			publisher_amount: self.publisher_earnings,
			contributor,
			platform_fee: self.platform_fee,
		}
	}
}

/// Checks that an article URL is non-empty and syntactically plausible.
///
/// The engine requires a valid http(s) URL with a host before an order may
/// be published or confirmed. Full reachability checks belong to the link
/// verification collaborator, not here.
pub fn is_valid_article_url(url: &str) -> bool {
	let rest = match url
		.strip_prefix("https://")
		.or_else(|| url.strip_prefix("http://"))
	{
		Some(rest) => rest,
		None => return false,
	};
	let host = rest.split(['/', '?', '#']).next().unwrap_or("");
	!host.is_empty() && host.contains('.') && !host.contains(char::is_whitespace)
}
