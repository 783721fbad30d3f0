//! Event types for inter-service communication.
//!
//! The engine publishes an event for every committed lifecycle change.
//! External collaborators (notification service, email) subscribe through
//! the event bus; delivery and retry of notifications are out of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Role;
use crate::dispute::{DisputeId, DisputeReason, DisputeResolution};
use crate::money::{Amount, SettlementSplit};
use crate::order::OrderId;

/// Main event type encompassing all engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
	/// Events from the order lifecycle.
	Order(OrderEvent),
	/// Events from the dispute flow.
	Dispute(DisputeEvent),
}

/// Events emitted on committed order transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// An order was created and its funds reserved.
	Created {
		order_id: OrderId,
		total_amount: Amount,
		at: DateTime<Utc>,
	},
	/// The publisher accepted the order.
	Accepted { order_id: OrderId, at: DateTime<Utc> },
	/// Content was submitted for buyer review.
	ContentSubmitted { order_id: OrderId, at: DateTime<Utc> },
	/// A revision was requested on submitted or published content.
	RevisionRequested {
		order_id: OrderId,
		by: Role,
		reason: String,
		at: DateTime<Utc>,
	},
	/// The buyer approved the submitted content.
	Approved { order_id: OrderId, at: DateTime<Utc> },
	/// The article went live and the confirmation deadline started.
	Published {
		order_id: OrderId,
		article_url: String,
		confirmation_deadline: DateTime<Utc>,
		at: DateTime<Utc>,
	},
	/// Funds settled to the publisher side.
	Completed {
		order_id: OrderId,
		/// True when applied by the sweeper rather than the buyer.
		auto: bool,
		split: SettlementSplit,
		at: DateTime<Utc>,
	},
	/// The order was cancelled and reserved funds released.
	Cancelled {
		order_id: OrderId,
		by: Role,
		at: DateTime<Utc>,
	},
}

/// Events emitted by the dispute flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisputeEvent {
	/// A dispute was opened and the order suspended.
	Opened {
		dispute_id: DisputeId,
		order_id: OrderId,
		raised_by_role: Role,
		reason: DisputeReason,
		at: DateTime<Utc>,
	},
	/// An admin resolved the dispute and the order reached a terminal status.
	Resolved {
		dispute_id: DisputeId,
		order_id: OrderId,
		resolution: DisputeResolution,
		at: DateTime<Utc>,
	},
}

impl MarketEvent {
	/// The order this event concerns.
	pub fn order_id(&self) -> &OrderId {
		match self {
			MarketEvent::Order(e) => match e {
				OrderEvent::Created { order_id, .. }
				| OrderEvent::Accepted { order_id, .. }
				| OrderEvent::ContentSubmitted { order_id, .. }
				| OrderEvent::RevisionRequested { order_id, .. }
				| OrderEvent::Approved { order_id, .. }
				| OrderEvent::Published { order_id, .. }
				| OrderEvent::Completed { order_id, .. }
				| OrderEvent::Cancelled { order_id, .. } => order_id,
			},
			MarketEvent::Dispute(e) => match e {
				DisputeEvent::Opened { order_id, .. } | DisputeEvent::Resolved { order_id, .. } => {
					order_id
				}
			},
		}
	}
}
