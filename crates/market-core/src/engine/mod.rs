//! Marketplace engine orchestrating orders, escrow and disputes.
//!
//! Every operation takes an explicit actor and runs inside a per-order
//! critical section: transition rules are evaluated against the freshly
//! loaded order, the ledger effect is applied, and the order is committed
//! with a conditional status update. A stale commit is compensated on the
//! ledger and retried up to the configured cap. Committed changes publish
//! domain events for external collaborators.

pub mod event_bus;

use self::event_bus::EventBus;
use chrono::{DateTime, Duration, Utc};
use market_config::MarketConfig;
use market_dispute::{DisputeError, DisputeService};
use market_ledger::{LedgerError, LedgerService};
use market_order::{
	plan_transition,
	transitions::{apply_transition, TransitionWindows},
	LedgerEffect, OrderError, OrderStore, TransitionPlan,
};
use market_storage::{StorageError, StorageService};
use market_types::{
	apply_bps_half_up, truncate_id, Actor, ContentSource, CreateOrderRequest, Dispute,
	DisputeEvent, DisputeReason, DisputeResolution, DisputeStatus, MarketEvent, Order, OrderEvent,
	OrderStatus, PaymentStatus, Role, SettlementSplit, StorageKey, TransitionAction,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::locks::LockManager;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Order-level failures: authorization, invalid transitions, payload
	/// validation, missing orders.
	#[error(transparent)]
	Order(#[from] OrderError),
	/// Ledger failures: insufficient funds or fatal settlement invariants.
	#[error(transparent)]
	Ledger(#[from] LedgerError),
	/// Dispute-flow failures.
	#[error(transparent)]
	Dispute(#[from] DisputeError),
	/// A transition kept losing the stale-state race and exhausted its
	/// retries; the caller should refresh and try again.
	#[error("Conflict: {0}")]
	Conflict(String),
	/// Error from the storage backend.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for EngineError {
	fn from(err: StorageError) -> Self {
		EngineError::Storage(err.to_string())
	}
}

/// Deadline entry kept in the sweeper's index while an order is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingConfirmation {
	pub deadline: DateTime<Utc>,
}

/// The marketplace engine.
///
/// Holds the services the state machine drives and the per-order lock
/// registry that linearizes transitions.
pub struct MarketEngine {
	config: MarketConfig,
	storage: Arc<StorageService>,
	ledger: Arc<LedgerService>,
	orders: Arc<OrderStore>,
	disputes: Arc<DisputeService>,
	event_bus: EventBus,
	order_locks: LockManager,
}

impl std::fmt::Debug for MarketEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MarketEngine").finish_non_exhaustive()
	}
}

impl MarketEngine {
	/// Creates an engine from its services. Use [`crate::EngineBuilder`]
	/// to construct one from configuration.
	pub fn new(
		config: MarketConfig,
		storage: Arc<StorageService>,
		ledger: Arc<LedgerService>,
		orders: Arc<OrderStore>,
		disputes: Arc<DisputeService>,
		event_bus: EventBus,
	) -> Self {
		Self {
			config,
			storage,
			ledger,
			orders,
			disputes,
			event_bus,
			order_locks: LockManager::new(),
		}
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Returns a reference to the ledger service.
	pub fn ledger(&self) -> &Arc<LedgerService> {
		&self.ledger
	}

	/// Returns a reference to the dispute service.
	pub fn disputes(&self) -> &Arc<DisputeService> {
		&self.disputes
	}

	/// Returns the engine configuration.
	pub fn config(&self) -> &MarketConfig {
		&self.config
	}

	fn windows(&self) -> TransitionWindows {
		TransitionWindows {
			confirmation: Duration::days(self.config.confirmation_window_days),
			dispute_protection: Duration::days(self.config.dispute_window_days),
		}
	}

	/// Creates an order and reserves its full amount from the buyer's
	/// wallet, synchronously and atomically with the order record.
	///
	/// The platform fee is computed here, once, with round-half-up on the
	/// configured basis points; settlement later only moves these fixed
	/// amounts.
	#[instrument(skip_all, fields(buyer_id = %truncate_id(&actor.user_id)))]
	pub async fn create_order(
		&self,
		actor: &Actor,
		request: CreateOrderRequest,
	) -> Result<Order, EngineError> {
		if actor.role != Role::Buyer {
			return Err(OrderError::Forbidden("only buyers may place orders".to_string()).into());
		}
		validate_create_request(actor, &request)?;

		let now = Utc::now();
		let order_id = Uuid::new_v4().to_string();
		let order_number = format!("PS-{}", &Uuid::new_v4().simple().to_string()[..8]);

		let writing_fee = request.writing_fee.unwrap_or(0);
		let subtotal = request.base_price + writing_fee;
		let platform_fee = apply_bps_half_up(subtotal, self.config.platform_fee_bps);
		let total_amount = subtotal + platform_fee;
		let contributor_earnings = match &request.contributor_id {
			Some(_) => writing_fee,
			None => 0,
		};
		let publisher_earnings = subtotal - contributor_earnings;

		// Reserve first: an order record must never exist without its escrow.
		self.ledger
			.reserve(
				&actor.user_id,
				total_amount,
				&order_id,
				&format!("Wallet payment for order {}", order_number),
			)
			.await?;

		let order = Order {
			id: order_id.clone(),
			order_number,
			buyer_id: actor.user_id.clone(),
			publisher_id: request.publisher_id,
			website_id: request.website_id,
			contributor_id: request.contributor_id,
			order_type: request.order_type,
			status: OrderStatus::Pending,
			payment_status: PaymentStatus::Paid,
			base_price: request.base_price,
			writing_fee: request.writing_fee,
			platform_fee,
			total_amount,
			publisher_earnings,
			contributor_earnings: (contributor_earnings > 0).then_some(contributor_earnings),
			title: request.title,
			content: request.content,
			anchor_text: request.anchor_text,
			target_url: request.target_url,
			article_url: None,
			content_source: request.content_source.unwrap_or(ContentSource::BuyerProvided),
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
		};

		if let Err(e) = self.orders.create(&order).await {
			// Undo the reservation so the buyer's funds are not stranded.
			if let Err(release_err) = self
				.ledger
				.release(&actor.user_id, total_amount, &order_id, "Order creation failed")
				.await
			{
				tracing::error!(
					order_id = %truncate_id(&order_id),
					error = %release_err,
					"Failed to release reservation after aborted order creation"
				);
			}
			return Err(e.into());
		}

		tracing::info!(
			order_id = %truncate_id(&order.id),
			total = order.total_amount,
			"Order created"
		);
		self.event_bus
			.publish(MarketEvent::Order(OrderEvent::Created {
				order_id: order.id.clone(),
				total_amount: order.total_amount,
				at: now,
			}))
			.ok();

		Ok(order)
	}

	/// Fetches an order, scoped to its parties (buyer, publisher,
	/// contributor) and admins.
	pub async fn get_order(&self, actor: &Actor, order_id: &str) -> Result<Order, EngineError> {
		let order = self.orders.get(order_id).await?;
		let permitted = actor.role == Role::Admin
			|| actor.user_id == order.buyer_id
			|| actor.user_id == order.publisher_id
			|| order.contributor_id.as_deref() == Some(actor.user_id.as_str());
		if !permitted {
			return Err(OrderError::Forbidden("not a party to this order".to_string()).into());
		}
		Ok(order)
	}

	/// Applies a lifecycle action to an order.
	///
	/// Validation, ledger effect and the conditional order commit run under
	/// the order's lock. On a stale-state conflict the ledger effect is
	/// compensated and the whole transition re-evaluated against the
	/// reloaded order, up to the configured retry cap.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), action = %action.name()))]
	pub async fn transition(
		&self,
		actor: &Actor,
		order_id: &str,
		action: TransitionAction,
	) -> Result<Order, EngineError> {
		let _guard = self.order_locks.acquire(order_id).await;

		let mut attempts = 0u32;
		loop {
			attempts += 1;
			let order = self.orders.get(order_id).await?;
			let now = Utc::now();
			let plan = plan_transition(actor, &order, &action, now)?;

			// Move the money first; the order commit below is conditional
			// on the status the plan was built from.
			self.apply_ledger_effect(&order, &plan).await?;

			let windows = self.windows();
			let result = self
				.orders
				.update_status(order_id, plan.from, |o| {
					apply_transition(o, &action, &plan, &windows, now)
				})
				.await;

			match result {
				Ok(updated) => {
					self.update_confirmation_index(&updated, &plan).await;
					self.publish_transition_event(&updated, &action, &plan, now);
					tracing::info!(
						from = %plan.from,
						to = %updated.status,
						"Transition committed"
					);
					return Ok(updated);
				}
				Err(OrderError::StaleOrderState { expected, actual }) => {
					self.compensate_ledger_effect(&order, &plan).await;
					if attempts > self.config.transition_retry_limit {
						tracing::warn!(
							expected = %expected,
							actual = %actual,
							attempts,
							"Transition exhausted retries"
						);
						return Err(EngineError::Conflict(format!(
							"order changed concurrently (now {})",
							actual
						)));
					}
					tracing::debug!(
						expected = %expected,
						actual = %actual,
						attempt = attempts,
						"Stale order state, retrying transition"
					);
					continue;
				}
				Err(e) => {
					self.compensate_ledger_effect(&order, &plan).await;
					return Err(e.into());
				}
			}
		}
	}

	/// Raises a dispute on an order, suspending its workflow.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn open_dispute(
		&self,
		actor: &Actor,
		order_id: &str,
		reason: DisputeReason,
		description: &str,
		evidence_urls: Vec<String>,
	) -> Result<Dispute, EngineError> {
		let _guard = self.order_locks.acquire(order_id).await;

		let order = self.orders.get(order_id).await?;
		let now = Utc::now();
		let dispute = self
			.disputes
			.open(actor, &order, reason, description, evidence_urls, now)
			.await?;

		let commit = self
			.orders
			.update_status(order_id, dispute.prior_status, |o| {
				o.status = OrderStatus::Disputed;
			})
			.await;

		let updated = match commit {
			Ok(updated) => updated,
			Err(e) => {
				// The dispute record must not outlive a failed suspension.
				if let Err(cleanup_err) = self.remove_dispute_record(&dispute).await {
					tracing::error!(
						dispute_id = %truncate_id(&dispute.id),
						error = %cleanup_err,
						"Failed to remove dispute record after aborted open"
					);
				}
				return Err(e.into());
			}
		};

		// A disputed order is no longer awaiting buyer confirmation.
		if dispute.prior_status == OrderStatus::Published {
			self.remove_confirmation_entry(order_id).await;
		}

		tracing::info!(
			dispute_id = %truncate_id(&dispute.id),
			prior_status = %dispute.prior_status,
			"Dispute opened"
		);
		self.event_bus
			.publish(MarketEvent::Dispute(DisputeEvent::Opened {
				dispute_id: dispute.id.clone(),
				order_id: updated.id,
				raised_by_role: dispute.raised_by_role,
				reason,
				at: now,
			}))
			.ok();

		Ok(dispute)
	}

	/// Applies an admin's resolution to an open dispute.
	///
	/// Moves the escrowed funds per the resolution, transitions the order
	/// to its terminal status and marks the dispute resolved, all inside
	/// the order's critical section.
	#[instrument(skip_all, fields(dispute_id = %truncate_id(dispute_id)))]
	pub async fn resolve_dispute(
		&self,
		actor: &Actor,
		dispute_id: &str,
		resolution: DisputeResolution,
	) -> Result<Dispute, EngineError> {
		if actor.role != Role::Admin {
			return Err(
				OrderError::Forbidden("only admins may resolve disputes".to_string()).into(),
			);
		}

		let dispute = self.disputes.get(dispute_id).await?;
		if dispute.status != DisputeStatus::Open {
			return Err(DisputeError::NotOpen(dispute_id.to_string()).into());
		}

		let _guard = self.order_locks.acquire(&dispute.order_id).await;

		let order = self.orders.get(&dispute.order_id).await?;
		if order.status != OrderStatus::Disputed {
			return Err(OrderError::InvalidTransition {
				action: "resolve_dispute",
				from: order.status,
			}
			.into());
		}

		let now = Utc::now();
		let outcome = self.apply_resolution_ledger(&order, resolution).await?;

		let commit = self
			.orders
			.update_status(&order.id, OrderStatus::Disputed, |o| {
				o.status = outcome.terminal_status;
				o.payment_status = outcome.payment_status;
				match outcome.terminal_status {
					OrderStatus::Completed => {
						o.completed_at.get_or_insert(now);
					}
					_ => {
						o.cancelled_at.get_or_insert(now);
					}
				}
			})
			.await;

		if let Err(e) = commit {
			self.compensate_resolution_ledger(&order, resolution, &outcome)
				.await;
			return Err(e.into());
		}

		let resolved = self.disputes.mark_resolved(dispute_id, resolution, now).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			terminal = %outcome.terminal_status,
			"Dispute resolved"
		);
		self.event_bus
			.publish(MarketEvent::Dispute(DisputeEvent::Resolved {
				dispute_id: resolved.id.clone(),
				order_id: order.id.clone(),
				resolution,
				at: now,
			}))
			.ok();

		Ok(resolved)
	}

	/// Applies the ledger side of a transition plan.
	async fn apply_ledger_effect(
		&self,
		order: &Order,
		plan: &TransitionPlan,
	) -> Result<(), EngineError> {
		match plan.effect {
			LedgerEffect::None => Ok(()),
			LedgerEffect::Release => {
				self.ledger
					.release(
						&order.buyer_id,
						order.total_amount,
						&order.id,
						&format!("Refund for order {}", order.order_number),
					)
					.await?;
				Ok(())
			}
			LedgerEffect::Settle => {
				let split = order.settlement_split();
				match self
					.ledger
					.settle(&order.buyer_id, &split, order.total_amount, &order.id)
					.await
				{
					Ok(()) => Ok(()),
					Err(e) if e.is_fatal() => {
						tracing::error!(
							order_id = %truncate_id(&order.id),
							error = %e,
							"Settlement invariant violation; order terms are inconsistent with the ledger"
						);
						Err(e.into())
					}
					Err(e) => Err(e.into()),
				}
			}
		}
	}

	/// Undoes a transition's ledger effect after a failed order commit.
	async fn compensate_ledger_effect(&self, order: &Order, plan: &TransitionPlan) {
		let result = match plan.effect {
			LedgerEffect::None => return,
			LedgerEffect::Release => self
				.ledger
				.reserve(
					&order.buyer_id,
					order.total_amount,
					&order.id,
					"Escrow restored after aborted cancellation",
				)
				.await
				.map(|_| ()),
			LedgerEffect::Settle => {
				let split = order.settlement_split();
				self.ledger
					.reverse_settle(&order.buyer_id, &split, order.total_amount, &order.id)
					.await
			}
		};
		if let Err(e) = result {
			tracing::error!(
				order_id = %truncate_id(&order.id),
				error = %e,
				"Failed to compensate ledger effect after aborted transition; balances need operator attention"
			);
		}
	}

	/// Performs the money movement for a dispute resolution.
	async fn apply_resolution_ledger(
		&self,
		order: &Order,
		resolution: DisputeResolution,
	) -> Result<ResolutionOutcome, EngineError> {
		match resolution {
			DisputeResolution::FavorsPublisher => {
				let split = order.settlement_split();
				self.ledger
					.settle(&order.buyer_id, &split, order.total_amount, &order.id)
					.await?;
				Ok(ResolutionOutcome {
					terminal_status: OrderStatus::Completed,
					payment_status: PaymentStatus::Released,
				})
			}
			DisputeResolution::FavorsBuyer => {
				self.ledger
					.release(
						&order.buyer_id,
						order.total_amount,
						&order.id,
						&format!("Dispute refund for order {}", order.order_number),
					)
					.await?;
				Ok(ResolutionOutcome {
					terminal_status: OrderStatus::Refunded,
					payment_status: PaymentStatus::Refunded,
				})
			}
			DisputeResolution::Split { publisher_bps } => {
				if publisher_bps > 10_000 {
					return Err(OrderError::ValidationFailed(
						"publisher_bps must not exceed 10000".to_string(),
					)
					.into());
				}
				// The publisher's gross share of the reserved total; the
				// buyer share is the remainder so the sum is exact by
				// construction. The creation-time fee is prorated with the
				// same rounding rule.
				let to_publisher = apply_bps_half_up(order.total_amount, publisher_bps);
				let to_buyer = order.total_amount - to_publisher;
				let fee_on_publisher =
					apply_bps_half_up(order.platform_fee, publisher_bps).min(to_publisher);
				self.ledger
					.refund_partial(
						&order.buyer_id,
						&order.publisher_id,
						to_buyer,
						to_publisher,
						fee_on_publisher,
						order.total_amount,
						&order.id,
					)
					.await?;
				Ok(ResolutionOutcome {
					terminal_status: OrderStatus::Refunded,
					payment_status: PaymentStatus::Refunded,
				})
			}
		}
	}

	/// Undoes a resolution's money movement after a failed order commit.
	async fn compensate_resolution_ledger(
		&self,
		order: &Order,
		resolution: DisputeResolution,
		outcome: &ResolutionOutcome,
	) {
		let result = match resolution {
			DisputeResolution::FavorsPublisher => {
				let split = order.settlement_split();
				self.ledger
					.reverse_settle(&order.buyer_id, &split, order.total_amount, &order.id)
					.await
			}
			DisputeResolution::FavorsBuyer => self
				.ledger
				.reserve(
					&order.buyer_id,
					order.total_amount,
					&order.id,
					"Escrow restored after aborted dispute refund",
				)
				.await
				.map(|_| ()),
			DisputeResolution::Split { publisher_bps } => {
				let to_publisher = apply_bps_half_up(order.total_amount, publisher_bps);
				let fee_on_publisher =
					apply_bps_half_up(order.platform_fee, publisher_bps).min(to_publisher);
				let split = SettlementSplit {
					publisher_id: order.publisher_id.clone(),
					publisher_amount: to_publisher - fee_on_publisher,
					contributor: None,
					platform_fee: 0,
				};
				// Take back the publisher's net credit, then re-reserve the
				// buyer's returned share on top of the publisher portion.
				match self
					.ledger
					.reverse_settle(&order.buyer_id, &split, to_publisher, &order.id)
					.await
				{
					Ok(()) => {
						let to_buyer = order.total_amount - to_publisher;
						if to_buyer > 0 {
							self.ledger
								.reserve(
									&order.buyer_id,
									to_buyer,
									&order.id,
									"Escrow restored after aborted dispute split",
								)
								.await
								.map(|_| ())
						} else {
							Ok(())
						}
					}
					Err(e) => Err(e),
				}
			}
		};
		if let Err(e) = result {
			tracing::error!(
				order_id = %truncate_id(&order.id),
				terminal = %outcome.terminal_status,
				error = %e,
				"Failed to compensate dispute resolution; balances need operator attention"
			);
		}
	}

	/// Keeps the sweeper's deadline index in step with the order.
	async fn update_confirmation_index(&self, order: &Order, plan: &TransitionPlan) {
		match order.status {
			OrderStatus::Published => {
				if let Some(deadline) = order.buyer_confirmation_deadline {
					if let Err(e) = self
						.storage
						.store(
							StorageKey::PendingConfirmations.as_str(),
							&order.id,
							&PendingConfirmation { deadline },
						)
						.await
					{
						tracing::warn!(
							order_id = %truncate_id(&order.id),
							error = %e,
							"Failed to index confirmation deadline; sweeper will miss this order"
						);
					}
				}
			}
			_ if plan.from == OrderStatus::Published => {
				self.remove_confirmation_entry(&order.id).await;
			}
			_ => {}
		}
	}

	pub(crate) async fn remove_confirmation_entry(&self, order_id: &str) {
		if let Err(e) = self
			.storage
			.remove(StorageKey::PendingConfirmations.as_str(), order_id)
			.await
		{
			tracing::warn!(
				order_id = %truncate_id(order_id),
				error = %e,
				"Failed to remove confirmation index entry"
			);
		}
	}

	/// Removes a dispute record and its order mapping (compensation path).
	async fn remove_dispute_record(&self, dispute: &Dispute) -> Result<(), StorageError> {
		self.storage
			.remove(StorageKey::Disputes.as_str(), &dispute.id)
			.await?;
		self.storage
			.remove(StorageKey::DisputeByOrder.as_str(), &dispute.order_id)
			.await
	}

	/// Publishes the domain event for a committed transition.
	fn publish_transition_event(
		&self,
		order: &Order,
		action: &TransitionAction,
		plan: &TransitionPlan,
		at: DateTime<Utc>,
	) {
		let event = match action {
			TransitionAction::Accept => Some(OrderEvent::Accepted {
				order_id: order.id.clone(),
				at,
			}),
			TransitionAction::Decline { .. } => Some(OrderEvent::Cancelled {
				order_id: order.id.clone(),
				by: Role::Publisher,
				at,
			}),
			TransitionAction::Cancel { .. } => Some(OrderEvent::Cancelled {
				order_id: order.id.clone(),
				by: Role::Buyer,
				at,
			}),
			TransitionAction::SubmitContent { .. } => Some(OrderEvent::ContentSubmitted {
				order_id: order.id.clone(),
				at,
			}),
			TransitionAction::Approve => Some(OrderEvent::Approved {
				order_id: order.id.clone(),
				at,
			}),
			TransitionAction::RequestRevision { reason } => Some(OrderEvent::RevisionRequested {
				order_id: order.id.clone(),
				by: Role::Buyer,
				reason: reason.clone(),
				at,
			}),
			TransitionAction::Publish { article_url } => {
				order
					.buyer_confirmation_deadline
					.map(|confirmation_deadline| OrderEvent::Published {
						order_id: order.id.clone(),
						article_url: article_url.clone(),
						confirmation_deadline,
						at,
					})
			}
			TransitionAction::Confirm { .. } | TransitionAction::AutoConfirm => {
				Some(OrderEvent::Completed {
					order_id: order.id.clone(),
					auto: plan.auto,
					split: order.settlement_split(),
					at,
				})
			}
			TransitionAction::StartWriting => None,
		};
		if let Some(event) = event {
			self.event_bus.publish(MarketEvent::Order(event)).ok();
		}
	}
}

/// Terminal order state a dispute resolution produces.
struct ResolutionOutcome {
	terminal_status: OrderStatus,
	payment_status: PaymentStatus,
}

/// Validates the create-order request fields the type system cannot.
fn validate_create_request(
	actor: &Actor,
	request: &CreateOrderRequest,
) -> Result<(), OrderError> {
	if request.base_price <= 0 {
		return Err(OrderError::ValidationFailed(
			"base_price must be positive".to_string(),
		));
	}
	if request.writing_fee.is_some_and(|fee| fee <= 0) {
		return Err(OrderError::ValidationFailed(
			"writing_fee must be positive when present".to_string(),
		));
	}
	if request.contributor_id.is_some() && request.writing_fee.is_none() {
		return Err(OrderError::ValidationFailed(
			"a contributor requires a writing_fee".to_string(),
		));
	}
	if request.publisher_id.is_empty() || request.website_id.is_empty() {
		return Err(OrderError::ValidationFailed(
			"publisher_id and website_id are required".to_string(),
		));
	}
	if request.publisher_id == actor.user_id {
		return Err(OrderError::ValidationFailed(
			"buyers cannot order from their own account".to_string(),
		));
	}
	Ok(())
}
