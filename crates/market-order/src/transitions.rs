//! Transition rules for the order lifecycle.
//!
//! Validates who may move an order from where to where, and what each move
//! does to the escrowed funds. The rules are pure: they take the actor, the
//! order as currently persisted and the requested action, and either return
//! a [`TransitionPlan`] or the error the caller must surface. Nothing here
//! touches storage or the ledger.
//!
//! Validation order is fixed: role authorization first (`Forbidden`), then
//! the from-state check (`InvalidTransition`), then payload validation
//! (`ValidationFailed`). A caller learns about permission problems before
//! state problems, and about state problems before field problems.

use chrono::{DateTime, Duration, Utc};
use market_types::{is_valid_article_url, Actor, Order, OrderStatus, Role, TransitionAction};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::OrderError;

/// Minimum length of a revision-request reason.
pub const MIN_REVISION_REASON: usize = 10;

/// Deadline windows applied when an order is published.
#[derive(Debug, Clone, Copy)]
pub struct TransitionWindows {
	/// How long the buyer has to confirm a published order before the
	/// sweeper completes it automatically.
	pub confirmation: Duration,
	/// How long after first publication the buyer retains dispute
	/// protection.
	pub dispute_protection: Duration,
}

/// What a committed transition does to the escrowed funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
	/// No balance movement.
	None,
	/// Return the full reserved amount to the buyer.
	Release,
	/// Convert the reserved amount into publisher/contributor earnings.
	Settle,
}

/// A validated transition, ready for the engine to execute.
#[derive(Debug, Clone, Copy)]
pub struct TransitionPlan {
	/// The status the order must still hold at commit time.
	pub from: OrderStatus,
	/// The status the order moves to.
	pub to: OrderStatus,
	/// Balance movement the engine performs inside the same commit.
	pub effect: LedgerEffect,
	/// True when this is the sweeper's deadline-driven completion.
	pub auto: bool,
}

/// Which side of the order an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
	Buyer,
	Publisher,
	System,
}

/// Static transition table: action name -> (side, allowed from-states, target).
static TRANSITIONS: Lazy<HashMap<&'static str, (Side, &'static [OrderStatus], OrderStatus)>> =
	Lazy::new(|| {
		use OrderStatus::*;
		HashMap::from([
			("accept", (Side::Publisher, &[Pending][..], Accepted)),
			("decline", (Side::Publisher, &[Pending][..], Cancelled)),
			("cancel", (Side::Buyer, &[Pending, Accepted][..], Cancelled)),
			("start_writing", (Side::Publisher, &[Accepted][..], Writing)),
			(
				"submit_content",
				(
					Side::Publisher,
					&[Accepted, Writing, RevisionNeeded][..],
					ContentSubmitted,
				),
			),
			("approve", (Side::Buyer, &[ContentSubmitted][..], Approved)),
			(
				"request_revision",
				(
					Side::Buyer,
					&[ContentSubmitted, Published][..],
					RevisionNeeded,
				),
			),
			(
				"publish",
				(Side::Publisher, &[Approved, RevisionNeeded][..], Published),
			),
			("confirm", (Side::Buyer, &[Published][..], Completed)),
			("auto_confirm", (Side::System, &[Published][..], Completed)),
		])
	});

/// Validates a requested action against the actor and the order's current
/// state, returning the plan the engine should execute.
pub fn plan_transition(
	actor: &Actor,
	order: &Order,
	action: &TransitionAction,
	now: DateTime<Utc>,
) -> Result<TransitionPlan, OrderError> {
	let (side, allowed_from, to) = *TRANSITIONS
		.get(action.name())
		.ok_or_else(|| OrderError::ValidationFailed(format!("unknown action {}", action.name())))?;

	authorize(actor, order, side, action)?;

	if !allowed_from.contains(&order.status) {
		return Err(OrderError::InvalidTransition {
			action: action.name(),
			from: order.status,
		});
	}

	validate_payload(order, action, now)?;

	let effect = match action {
		TransitionAction::Decline { .. } | TransitionAction::Cancel { .. } => LedgerEffect::Release,
		TransitionAction::Confirm { .. } | TransitionAction::AutoConfirm => LedgerEffect::Settle,
		_ => LedgerEffect::None,
	};

	Ok(TransitionPlan {
		from: order.status,
		to,
		effect,
		auto: matches!(action, TransitionAction::AutoConfirm),
	})
}

/// Checks the actor is the right party in the right role for this action.
fn authorize(
	actor: &Actor,
	order: &Order,
	side: Side,
	action: &TransitionAction,
) -> Result<(), OrderError> {
	let permitted = match side {
		Side::Buyer => actor.role == Role::Buyer && actor.user_id == order.buyer_id,
		Side::Publisher => actor.role == Role::Publisher && actor.user_id == order.publisher_id,
		Side::System => actor.role == Role::System,
	};
	if !permitted {
		return Err(OrderError::Forbidden(format!(
			"{} may not {} this order",
			actor.role,
			action.name()
		)));
	}
	Ok(())
}

/// Validates the action's payload against the order.
fn validate_payload(
	order: &Order,
	action: &TransitionAction,
	now: DateTime<Utc>,
) -> Result<(), OrderError> {
	match action {
		TransitionAction::RequestRevision { reason } => {
			if reason.trim().len() < MIN_REVISION_REASON {
				return Err(OrderError::ValidationFailed(format!(
					"revision reason must be at least {} characters",
					MIN_REVISION_REASON
				)));
			}
		}
		TransitionAction::Publish { article_url } => {
			if !is_valid_article_url(article_url) {
				return Err(OrderError::ValidationFailed(
					"article_url must be a valid http(s) URL".to_string(),
				));
			}
		}
		TransitionAction::Confirm { rating, .. } => {
			// URL-confirm requires a live article on record.
			match order.article_url.as_deref() {
				Some(url) if is_valid_article_url(url) => {}
				_ => {
					return Err(OrderError::ValidationFailed(
						"order has no valid article_url to confirm".to_string(),
					))
				}
			}
			if let Some(rating) = rating {
				if !(1..=5).contains(rating) {
					return Err(OrderError::ValidationFailed(
						"rating must be between 1 and 5".to_string(),
					));
				}
			}
		}
		TransitionAction::AutoConfirm => {
			match order.buyer_confirmation_deadline {
				Some(deadline) if deadline <= now => {}
				_ => {
					return Err(OrderError::ValidationFailed(
						"confirmation deadline has not passed".to_string(),
					))
				}
			}
		}
		_ => {}
	}
	Ok(())
}

/// Applies a planned transition's field changes to an order.
///
/// Called by the engine inside the conditional status update: the order
/// passed here is the freshly re-read record whose status matched
/// `plan.from`. Timestamps are set exactly once and never rewound.
pub fn apply_transition(
	order: &mut Order,
	action: &TransitionAction,
	plan: &TransitionPlan,
	windows: &TransitionWindows,
	now: DateTime<Utc>,
) {
	use market_types::PaymentStatus;

	order.status = plan.to;

	match action {
		TransitionAction::Accept => {
			order.accepted_at.get_or_insert(now);
		}
		TransitionAction::Decline { reason } | TransitionAction::Cancel { reason } => {
			order.cancelled_at.get_or_insert(now);
			order.payment_status = PaymentStatus::Refunded;
			if let Some(reason) = reason {
				order.cancellation_reason = Some(reason.clone());
			}
		}
		TransitionAction::SubmitContent { title, body } => {
			if let Some(title) = title {
				order.title = Some(title.clone());
			}
			if let Some(body) = body {
				order.content = Some(body.clone());
			}
		}
		TransitionAction::RequestRevision { reason } => {
			order.buyer_rejection_reason = Some(reason.clone());
			// A rejected publication stops the auto-complete clock.
			order.buyer_confirmation_deadline = None;
		}
		TransitionAction::Publish { article_url } => {
			order.article_url = Some(article_url.clone());
			order.published_at.get_or_insert(now);
			order.buyer_confirmation_deadline = Some(now + windows.confirmation);
			if order.dispute_protection_until.is_none() {
				order.dispute_protection_until = Some(now + windows.dispute_protection);
			}
		}
		TransitionAction::Confirm { rating, review } => {
			order.completed_at.get_or_insert(now);
			order.payment_status = PaymentStatus::Released;
			order.buyer_confirmation_deadline = None;
			if rating.is_some() {
				order.buyer_rating = *rating;
			}
			if review.is_some() {
				order.buyer_review = review.clone();
			}
		}
		TransitionAction::AutoConfirm => {
			order.completed_at.get_or_insert(now);
			order.payment_status = PaymentStatus::Released;
			order.buyer_confirmation_deadline = None;
		}
		TransitionAction::Approve | TransitionAction::StartWriting => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::sample_order;

	fn windows() -> TransitionWindows {
		TransitionWindows {
			confirmation: Duration::days(3),
			dispute_protection: Duration::days(90),
		}
	}

	fn buyer() -> Actor {
		Actor::new("buyer-1", Role::Buyer)
	}

	fn publisher() -> Actor {
		Actor::new("pub-1", Role::Publisher)
	}

	#[test]
	fn test_publisher_accepts_pending_order() {
		let order = sample_order(OrderStatus::Pending);
		let plan =
			plan_transition(&publisher(), &order, &TransitionAction::Accept, Utc::now()).unwrap();
		assert_eq!(plan.to, OrderStatus::Accepted);
		assert_eq!(plan.effect, LedgerEffect::None);
	}

	#[test]
	fn test_wrong_role_is_forbidden() {
		let order = sample_order(OrderStatus::Pending);
		let err =
			plan_transition(&buyer(), &order, &TransitionAction::Accept, Utc::now()).unwrap_err();
		assert!(matches!(err, OrderError::Forbidden(_)));
	}

	#[test]
	fn test_wrong_party_is_forbidden() {
		// Right role, but a different publisher's session
		let order = sample_order(OrderStatus::Pending);
		let other = Actor::new("pub-2", Role::Publisher);
		let err = plan_transition(&other, &order, &TransitionAction::Accept, Utc::now()).unwrap_err();
		assert!(matches!(err, OrderError::Forbidden(_)));
	}

	#[test]
	fn test_accept_from_wrong_state_is_invalid_transition() {
		let order = sample_order(OrderStatus::Published);
		let err = plan_transition(&publisher(), &order, &TransitionAction::Accept, Utc::now())
			.unwrap_err();
		assert!(matches!(
			err,
			OrderError::InvalidTransition {
				action: "accept",
				from: OrderStatus::Published
			}
		));
	}

	#[test]
	fn test_buyer_may_cancel_pending_and_accepted_only() {
		let action = TransitionAction::Cancel { reason: None };
		for status in [OrderStatus::Pending, OrderStatus::Accepted] {
			let order = sample_order(status);
			let plan = plan_transition(&buyer(), &order, &action, Utc::now()).unwrap();
			assert_eq!(plan.to, OrderStatus::Cancelled);
			assert_eq!(plan.effect, LedgerEffect::Release);
		}
		for status in [
			OrderStatus::Writing,
			OrderStatus::ContentSubmitted,
			OrderStatus::Published,
			OrderStatus::Completed,
		] {
			let order = sample_order(status);
			let err = plan_transition(&buyer(), &order, &action, Utc::now()).unwrap_err();
			assert!(matches!(err, OrderError::InvalidTransition { .. }));
		}
	}

	#[test]
	fn test_decline_releases_funds() {
		let order = sample_order(OrderStatus::Pending);
		let plan = plan_transition(
			&publisher(),
			&order,
			&TransitionAction::Decline {
				reason: Some("fully booked this month".to_string()),
			},
			Utc::now(),
		)
		.unwrap();
		assert_eq!(plan.effect, LedgerEffect::Release);
	}

	#[test]
	fn test_submit_content_from_revision_needed() {
		let order = sample_order(OrderStatus::RevisionNeeded);
		let plan = plan_transition(
			&publisher(),
			&order,
			&TransitionAction::SubmitContent {
				title: None,
				body: Some("updated draft".to_string()),
			},
			Utc::now(),
		)
		.unwrap();
		assert_eq!(plan.to, OrderStatus::ContentSubmitted);
	}

	#[test]
	fn test_revision_reason_too_short() {
		let order = sample_order(OrderStatus::ContentSubmitted);
		let err = plan_transition(
			&buyer(),
			&order,
			&TransitionAction::RequestRevision {
				reason: "bad".to_string(),
			},
			Utc::now(),
		)
		.unwrap_err();
		assert!(matches!(err, OrderError::ValidationFailed(_)));
	}

	#[test]
	fn test_publish_requires_valid_url() {
		let order = sample_order(OrderStatus::Approved);
		let err = plan_transition(
			&publisher(),
			&order,
			&TransitionAction::Publish {
				article_url: "not a url".to_string(),
			},
			Utc::now(),
		)
		.unwrap_err();
		assert!(matches!(err, OrderError::ValidationFailed(_)));

		let plan = plan_transition(
			&publisher(),
			&order,
			&TransitionAction::Publish {
				article_url: "https://site.example.com/guest-post".to_string(),
			},
			Utc::now(),
		)
		.unwrap();
		assert_eq!(plan.to, OrderStatus::Published);
	}

	#[test]
	fn test_confirm_requires_article_url_on_order() {
		let mut order = sample_order(OrderStatus::Published);
		order.article_url = None;
		let err = plan_transition(
			&buyer(),
			&order,
			&TransitionAction::Confirm {
				rating: None,
				review: None,
			},
			Utc::now(),
		)
		.unwrap_err();
		assert!(matches!(err, OrderError::ValidationFailed(_)));
	}

	#[test]
	fn test_confirm_settles() {
		let mut order = sample_order(OrderStatus::Published);
		order.article_url = Some("https://site.example.com/guest-post".to_string());
		let plan = plan_transition(
			&buyer(),
			&order,
			&TransitionAction::Confirm {
				rating: Some(5),
				review: None,
			},
			Utc::now(),
		)
		.unwrap();
		assert_eq!(plan.to, OrderStatus::Completed);
		assert_eq!(plan.effect, LedgerEffect::Settle);
	}

	#[test]
	fn test_confirm_rejects_out_of_range_rating() {
		let mut order = sample_order(OrderStatus::Published);
		order.article_url = Some("https://site.example.com/guest-post".to_string());
		let err = plan_transition(
			&buyer(),
			&order,
			&TransitionAction::Confirm {
				rating: Some(6),
				review: None,
			},
			Utc::now(),
		)
		.unwrap_err();
		assert!(matches!(err, OrderError::ValidationFailed(_)));
	}

	#[test]
	fn test_auto_confirm_requires_system_role_and_passed_deadline() {
		let now = Utc::now();
		let mut order = sample_order(OrderStatus::Published);
		order.article_url = Some("https://site.example.com/guest-post".to_string());
		order.buyer_confirmation_deadline = Some(now - Duration::hours(1));

		// Buyer may not invoke the sweeper's action
		let err =
			plan_transition(&buyer(), &order, &TransitionAction::AutoConfirm, now).unwrap_err();
		assert!(matches!(err, OrderError::Forbidden(_)));

		let plan =
			plan_transition(&Actor::system(), &order, &TransitionAction::AutoConfirm, now).unwrap();
		assert!(plan.auto);
		assert_eq!(plan.effect, LedgerEffect::Settle);

		// Not yet due
		order.buyer_confirmation_deadline = Some(now + Duration::hours(1));
		let err = plan_transition(&Actor::system(), &order, &TransitionAction::AutoConfirm, now)
			.unwrap_err();
		assert!(matches!(err, OrderError::ValidationFailed(_)));
	}

	#[test]
	fn test_apply_publish_sets_deadlines() {
		let now = Utc::now();
		let mut order = sample_order(OrderStatus::Approved);
		let action = TransitionAction::Publish {
			article_url: "https://site.example.com/guest-post".to_string(),
		};
		let plan = plan_transition(&publisher(), &order, &action, now).unwrap();
		apply_transition(&mut order, &action, &plan, &windows(), now);

		assert_eq!(order.status, OrderStatus::Published);
		assert_eq!(order.published_at, Some(now));
		assert_eq!(order.buyer_confirmation_deadline, Some(now + Duration::days(3)));
		assert_eq!(order.dispute_protection_until, Some(now + Duration::days(90)));
	}

	#[test]
	fn test_apply_republish_resets_deadline_but_not_first_timestamps() {
		let first = Utc::now();
		let mut order = sample_order(OrderStatus::Approved);
		let action = TransitionAction::Publish {
			article_url: "https://site.example.com/guest-post".to_string(),
		};
		let plan = plan_transition(&publisher(), &order, &action, first).unwrap();
		apply_transition(&mut order, &action, &plan, &windows(), first);

		// Buyer rejects the published article
		order.status = OrderStatus::RevisionNeeded;
		order.buyer_confirmation_deadline = None;

		let second = first + Duration::days(2);
		let action = TransitionAction::Publish {
			article_url: "https://site.example.com/guest-post-v2".to_string(),
		};
		let plan = plan_transition(&publisher(), &order, &action, second).unwrap();
		apply_transition(&mut order, &action, &plan, &windows(), second);

		assert_eq!(order.published_at, Some(first));
		assert_eq!(order.dispute_protection_until, Some(first + Duration::days(90)));
		assert_eq!(
			order.buyer_confirmation_deadline,
			Some(second + Duration::days(3))
		);
		assert_eq!(
			order.article_url.as_deref(),
			Some("https://site.example.com/guest-post-v2")
		);
	}

	#[test]
	fn test_apply_revision_on_published_clears_deadline() {
		let now = Utc::now();
		let mut order = sample_order(OrderStatus::Published);
		order.article_url = Some("https://site.example.com/guest-post".to_string());
		order.buyer_confirmation_deadline = Some(now + Duration::days(1));

		let action = TransitionAction::RequestRevision {
			reason: "anchor text points at the wrong page".to_string(),
		};
		let plan = plan_transition(&buyer(), &order, &action, now).unwrap();
		apply_transition(&mut order, &action, &plan, &windows(), now);

		assert_eq!(order.status, OrderStatus::RevisionNeeded);
		assert!(order.buyer_confirmation_deadline.is_none());
		assert_eq!(
			order.buyer_rejection_reason.as_deref(),
			Some("anchor text points at the wrong page")
		);
	}

	#[test]
	fn test_terminal_states_admit_no_actions() {
		let actions = [
			TransitionAction::Accept,
			TransitionAction::Cancel { reason: None },
			TransitionAction::Approve,
			TransitionAction::Publish {
				article_url: "https://site.example.com/x".to_string(),
			},
		];
		for status in [
			OrderStatus::Completed,
			OrderStatus::Cancelled,
			OrderStatus::Refunded,
		] {
			for action in &actions {
				let order = sample_order(status);
				let buyer_err = plan_transition(&buyer(), &order, action, Utc::now());
				let publisher_err = plan_transition(&publisher(), &order, action, Utc::now());
				assert!(buyer_err.is_err() && publisher_err.is_err());
			}
		}
	}
}
