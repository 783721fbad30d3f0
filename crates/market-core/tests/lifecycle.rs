//! End-to-end lifecycle tests against the in-memory backend.
//!
//! Exercises the full order flow the way the HTTP layer drives it: funded
//! buyer, creation with escrow, publisher workflow, confirmation (manual
//! and sweeper-driven), cancellations, disputes and resolutions, checking
//! wallet balances at every settlement boundary.

use chrono::{Duration, Utc};
use market_config::Config;
use market_core::{ConfirmationSweeper, EngineBuilder, MarketEngine};
use market_ledger::TransactionKind;
use market_types::{
	Actor, CreateOrderRequest, DisputeReason, DisputeResolution, DisputeStatus, Order, OrderStatus,
	OrderType, PaymentStatus, Role, StorageKey, TransitionAction,
};
use std::sync::Arc;

const BUYER: &str = "buyer-1";
const PUBLISHER: &str = "pub-1";

fn engine() -> Arc<MarketEngine> {
	let config = Config::from_toml_str(
		r#"
		[market]
		id = "market-test"

		[storage]
		primary = "memory"

		[storage.implementations.memory]
		"#,
	)
	.unwrap();
	Arc::new(
		EngineBuilder::new(config)
			.with_default_storage_factories()
			.build()
			.unwrap(),
	)
}

fn buyer() -> Actor {
	Actor::new(BUYER, Role::Buyer)
}

fn publisher() -> Actor {
	Actor::new(PUBLISHER, Role::Publisher)
}

fn order_request() -> CreateOrderRequest {
	CreateOrderRequest {
		website_id: "site-1".to_string(),
		publisher_id: PUBLISHER.to_string(),
		order_type: OrderType::GuestPost,
		// 12_000 base + 2500 bps fee = 15_000 total reserved
		base_price: 12_000,
		writing_fee: None,
		contributor_id: None,
		title: Some("Ten link building myths".to_string()),
		content: Some("Draft body".to_string()),
		anchor_text: Some("link building".to_string()),
		target_url: Some("https://buyer.example.com/services".to_string()),
		content_source: None,
	}
}

async fn fund_buyer(engine: &MarketEngine, amount: i64) {
	engine
		.ledger()
		.credit(
			&BUYER.to_string(),
			Role::Buyer,
			amount,
			TransactionKind::Deposit,
			"test deposit",
		)
		.await
		.unwrap();
}

async fn create_funded_order(engine: &MarketEngine) -> Order {
	fund_buyer(engine, 20_000).await;
	engine.create_order(&buyer(), order_request()).await.unwrap()
}

/// Walks an order from pending to published.
async fn publish_order(engine: &MarketEngine, order_id: &str) -> Order {
	engine
		.transition(&publisher(), order_id, TransitionAction::Accept)
		.await
		.unwrap();
	engine
		.transition(
			&publisher(),
			order_id,
			TransitionAction::SubmitContent {
				title: None,
				body: Some("Final draft".to_string()),
			},
		)
		.await
		.unwrap();
	engine
		.transition(&buyer(), order_id, TransitionAction::Approve)
		.await
		.unwrap();
	engine
		.transition(
			&publisher(),
			order_id,
			TransitionAction::Publish {
				article_url: "https://site.example.com/guest-post".to_string(),
			},
		)
		.await
		.unwrap()
}

/// Rewrites a published order's confirmation deadline into the past, as if
/// the window had lapsed, keeping the sweeper index in step.
async fn expire_confirmation_deadline(engine: &MarketEngine, order_id: &str) {
	let past = Utc::now() - Duration::hours(1);
	let mut order: Order = engine
		.storage()
		.retrieve(StorageKey::Orders.as_str(), order_id)
		.await
		.unwrap();
	order.buyer_confirmation_deadline = Some(past);
	engine
		.storage()
		.store(StorageKey::Orders.as_str(), order_id, &order)
		.await
		.unwrap();
	engine
		.storage()
		.store(
			StorageKey::PendingConfirmations.as_str(),
			order_id,
			&serde_json::json!({ "deadline": past }),
		)
		.await
		.unwrap();
}

async fn available(engine: &MarketEngine, user: &str, role: Role) -> i64 {
	engine
		.ledger()
		.balance(&user.to_string(), role)
		.await
		.unwrap()
		.available
}

async fn reserved(engine: &MarketEngine, user: &str, role: Role) -> i64 {
	engine
		.ledger()
		.balance(&user.to_string(), role)
		.await
		.unwrap()
		.reserved
}

#[tokio::test]
async fn test_create_reserves_exactly_the_total() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	assert_eq!(order.status, OrderStatus::Pending);
	assert_eq!(order.payment_status, PaymentStatus::Paid);
	assert_eq!(order.platform_fee, 3_000);
	assert_eq!(order.total_amount, 15_000);
	assert_eq!(order.publisher_earnings, 12_000);

	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 5_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);
}

#[tokio::test]
async fn test_create_with_insufficient_funds_fails_cleanly() {
	let engine = engine();
	fund_buyer(&engine, 10_000).await;

	let err = engine.create_order(&buyer(), order_request()).await;
	assert!(err.is_err());
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 10_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
}

#[tokio::test]
async fn test_full_lifecycle_with_manual_confirmation() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	let published = publish_order(&engine, &order.id).await;
	assert_eq!(published.status, OrderStatus::Published);
	assert!(published.buyer_confirmation_deadline.is_some());
	assert!(published.dispute_protection_until.is_some());

	// Funds are still in escrow while published
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 0);

	let completed = engine
		.transition(
			&buyer(),
			&order.id,
			TransitionAction::Confirm {
				rating: Some(5),
				review: Some("Live and indexed.".to_string()),
			},
		)
		.await
		.unwrap();

	assert_eq!(completed.status, OrderStatus::Completed);
	assert_eq!(completed.payment_status, PaymentStatus::Released);
	assert!(completed.completed_at.is_some());
	assert!(completed.buyer_confirmation_deadline.is_none());
	assert_eq!(completed.buyer_rating, Some(5));

	// Settlement: publisher credited total minus fee, escrow emptied
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 5_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 12_000);
}

#[tokio::test]
async fn test_sweeper_completes_after_deadline_like_a_confirmation() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;
	expire_confirmation_deadline(&engine, &order.id).await;

	let sweeper = ConfirmationSweeper::new(engine.clone(), std::time::Duration::from_secs(300));
	let report = sweeper.sweep_once().await.unwrap();
	assert_eq!(report.completed, 1);

	let completed = engine
		.get_order(&Actor::new(BUYER, Role::Buyer), &order.id)
		.await
		.unwrap();
	assert_eq!(completed.status, OrderStatus::Completed);
	assert_eq!(completed.payment_status, PaymentStatus::Released);

	// Same end state as the manual confirmation path
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 5_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 12_000);
}

#[tokio::test]
async fn test_sweeping_twice_is_a_no_op() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;
	expire_confirmation_deadline(&engine, &order.id).await;

	let sweeper = ConfirmationSweeper::new(engine.clone(), std::time::Duration::from_secs(300));
	let first = sweeper.sweep_once().await.unwrap();
	assert_eq!(first.completed, 1);

	let second = sweeper.sweep_once().await.unwrap();
	assert_eq!(second.completed, 0);

	// Balances unchanged by the second pass
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 12_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
}

#[tokio::test]
async fn test_revision_on_published_keeps_escrow_and_resets_deadline_on_republish() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	let first_published_at = publish_order(&engine, &order.id).await.published_at;

	let revised = engine
		.transition(
			&buyer(),
			&order.id,
			TransitionAction::RequestRevision {
				reason: "The anchor text points at the wrong page".to_string(),
			},
		)
		.await
		.unwrap();
	assert_eq!(revised.status, OrderStatus::RevisionNeeded);
	assert!(revised.buyer_confirmation_deadline.is_none());
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);

	let republished = engine
		.transition(
			&publisher(),
			&order.id,
			TransitionAction::Publish {
				article_url: "https://site.example.com/guest-post-v2".to_string(),
			},
		)
		.await
		.unwrap();
	assert_eq!(republished.status, OrderStatus::Published);
	let deadline = republished.buyer_confirmation_deadline.unwrap();
	assert!(deadline > Utc::now() + Duration::days(2));
	// First-publication timestamp is not rewound
	assert_eq!(republished.published_at, first_published_at);
}

#[tokio::test]
async fn test_publisher_decline_releases_escrow() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	let cancelled = engine
		.transition(
			&publisher(),
			&order.id,
			TransitionAction::Decline {
				reason: Some("fully booked this month".to_string()),
			},
		)
		.await
		.unwrap();

	assert_eq!(cancelled.status, OrderStatus::Cancelled);
	assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 20_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
	// No publisher ledger change
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 0);
}

#[tokio::test]
async fn test_buyer_cancel_allowed_until_acceptance_window_closes() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	engine
		.transition(&publisher(), &order.id, TransitionAction::Accept)
		.await
		.unwrap();

	let cancelled = engine
		.transition(&buyer(), &order.id, TransitionAction::Cancel { reason: None })
		.await
		.unwrap();
	assert_eq!(cancelled.status, OrderStatus::Cancelled);
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 20_000);
}

#[tokio::test]
async fn test_wrong_role_leaves_order_and_wallets_unchanged() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	// Buyer tries the publisher's accept
	let err = engine
		.transition(&buyer(), &order.id, TransitionAction::Accept)
		.await
		.unwrap_err();
	assert!(err.to_string().contains("Forbidden"));

	let stored = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(stored.status, OrderStatus::Pending);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 5_000);
}

#[tokio::test]
async fn test_invalid_from_state_leaves_order_and_wallets_unchanged() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	// Confirm requires a published order
	let err = engine
		.transition(
			&buyer(),
			&order.id,
			TransitionAction::Confirm {
				rating: None,
				review: None,
			},
		)
		.await
		.unwrap_err();
	assert!(err.to_string().contains("Invalid transition"));

	let stored = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(stored.status, OrderStatus::Pending);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);
}

#[tokio::test]
async fn test_money_is_conserved_until_settlement() {
	let engine = engine();
	let order = create_funded_order(&engine).await;

	let total_in_play = |buyer_available: i64, buyer_reserved: i64, publisher_available: i64| {
		buyer_available + buyer_reserved + publisher_available
	};

	// Across every non-settling transition the two parties' funds sum to
	// the original deposit.
	for action in [
		TransitionAction::Accept,
		TransitionAction::SubmitContent {
			title: None,
			body: Some("Final draft".to_string()),
		},
	] {
		engine
			.transition(&publisher(), &order.id, action)
			.await
			.unwrap();
		assert_eq!(
			total_in_play(
				available(&engine, BUYER, Role::Buyer).await,
				reserved(&engine, BUYER, Role::Buyer).await,
				available(&engine, PUBLISHER, Role::Publisher).await,
			),
			20_000
		);
	}

	engine
		.transition(&buyer(), &order.id, TransitionAction::Approve)
		.await
		.unwrap();
	engine
		.transition(
			&publisher(),
			&order.id,
			TransitionAction::Publish {
				article_url: "https://site.example.com/guest-post".to_string(),
			},
		)
		.await
		.unwrap();
	engine
		.transition(
			&buyer(),
			&order.id,
			TransitionAction::Confirm {
				rating: None,
				review: None,
			},
		)
		.await
		.unwrap();

	// After settlement the platform fee has left the two-party system.
	assert_eq!(
		total_in_play(
			available(&engine, BUYER, Role::Buyer).await,
			reserved(&engine, BUYER, Role::Buyer).await,
			available(&engine, PUBLISHER, Role::Publisher).await,
		),
		20_000 - 3_000
	);
}

#[tokio::test]
async fn test_dispute_split_resolution() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;

	let dispute = engine
		.open_dispute(
			&buyer(),
			&order.id,
			DisputeReason::LinkRemoved,
			"The article was removed two days after publication.",
			vec![],
		)
		.await
		.unwrap();
	assert_eq!(dispute.status, DisputeStatus::Open);

	let disputed = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(disputed.status, OrderStatus::Disputed);
	// Escrow untouched while the dispute is open
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);

	// Admin splits 60/40 in the publisher's favor
	let resolved = engine
		.resolve_dispute(
			&Actor::new("admin-1", Role::Admin),
			&dispute.id,
			DisputeResolution::Split { publisher_bps: 6_000 },
		)
		.await
		.unwrap();
	assert_eq!(resolved.status, DisputeStatus::Resolved);

	let terminal = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(terminal.status, OrderStatus::Refunded);
	assert_eq!(terminal.payment_status, PaymentStatus::Refunded);

	// 60% of 15_000 gross to the publisher minus 60% of the 3_000 fee;
	// 40% back to the buyer.
	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 5_000 + 6_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 9_000 - 1_800);
}

#[tokio::test]
async fn test_dispute_favors_buyer_refunds_everything() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;

	let dispute = engine
		.open_dispute(
			&buyer(),
			&order.id,
			DisputeReason::NotPublished,
			"The linked article 404s and never resolved for me.",
			vec![],
		)
		.await
		.unwrap();

	engine
		.resolve_dispute(
			&Actor::new("admin-1", Role::Admin),
			&dispute.id,
			DisputeResolution::FavorsBuyer,
		)
		.await
		.unwrap();

	assert_eq!(available(&engine, BUYER, Role::Buyer).await, 20_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 0);

	let terminal = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(terminal.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn test_dispute_favors_publisher_settles_in_full() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;

	let dispute = engine
		.open_dispute(
			&buyer(),
			&order.id,
			DisputeReason::ContentQuality,
			"The published article rewrote my draft beyond recognition.",
			vec![],
		)
		.await
		.unwrap();

	engine
		.resolve_dispute(
			&Actor::new("admin-1", Role::Admin),
			&dispute.id,
			DisputeResolution::FavorsPublisher,
		)
		.await
		.unwrap();

	let terminal = engine.get_order(&buyer(), &order.id).await.unwrap();
	assert_eq!(terminal.status, OrderStatus::Completed);
	assert_eq!(terminal.payment_status, PaymentStatus::Released);
	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 12_000);
}

#[tokio::test]
async fn test_second_open_dispute_rejected_and_admin_required() {
	let engine = engine();
	let order = create_funded_order(&engine).await;
	publish_order(&engine, &order.id).await;

	let dispute = engine
		.open_dispute(
			&buyer(),
			&order.id,
			DisputeReason::LinkRemoved,
			"The article was removed two days after publication.",
			vec![],
		)
		.await
		.unwrap();

	// The order is now Disputed, so even an otherwise eligible dispute
	// fails eligibility; the open-dispute invariant holds either way.
	let err = engine
		.open_dispute(
			&publisher(),
			&order.id,
			DisputeReason::PaymentIssue,
			"Buyer keeps rejecting a perfectly good article.",
			vec![],
		)
		.await;
	assert!(err.is_err());

	// Non-admin cannot resolve
	let err = engine
		.resolve_dispute(&buyer(), &dispute.id, DisputeResolution::FavorsBuyer)
		.await;
	assert!(err.is_err());
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 15_000);
}

#[tokio::test]
async fn test_contributor_receives_writing_fee_at_settlement() {
	let engine = engine();
	fund_buyer(&engine, 25_000).await;

	let mut request = order_request();
	request.writing_fee = Some(3_000);
	request.contributor_id = Some("writer-1".to_string());
	// subtotal 15_000, fee 3_750, total 18_750
	let order = engine.create_order(&buyer(), request).await.unwrap();
	assert_eq!(order.total_amount, 18_750);
	assert_eq!(order.publisher_earnings, 12_000);
	assert_eq!(order.contributor_earnings, Some(3_000));

	publish_order(&engine, &order.id).await;
	engine
		.transition(
			&buyer(),
			&order.id,
			TransitionAction::Confirm {
				rating: None,
				review: None,
			},
		)
		.await
		.unwrap();

	assert_eq!(available(&engine, PUBLISHER, Role::Publisher).await, 12_000);
	assert_eq!(available(&engine, "writer-1", Role::Contributor).await, 3_000);
	assert_eq!(reserved(&engine, BUYER, Role::Buyer).await, 0);
}
