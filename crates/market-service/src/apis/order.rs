//! Order API handlers.
//!
//! Creation (checkout from wallet funds), retrieval and lifecycle
//! transitions. The transition endpoint takes the closed tagged payload
//! directly; unknown fields never reach the engine.

use axum::response::Json;
use market_core::MarketEngine;
use market_types::{Actor, ApiError, CreateOrderRequest, OrderResponse, TransitionAction};
use tracing::instrument;

use super::map_engine_error;

/// Creates an order, reserving its total from the buyer's wallet.
#[instrument(skip_all, fields(actor = %actor.user_id))]
pub async fn create_order(
	engine: &MarketEngine,
	actor: Actor,
	request: CreateOrderRequest,
) -> Result<Json<OrderResponse>, ApiError> {
	let order = engine
		.create_order(&actor, request)
		.await
		.map_err(map_engine_error)?;
	Ok(Json(OrderResponse::from(&order)))
}

/// Fetches an order, scoped to its parties.
pub async fn get_order(
	engine: &MarketEngine,
	actor: Actor,
	order_id: &str,
) -> Result<Json<OrderResponse>, ApiError> {
	let order = engine
		.get_order(&actor, order_id)
		.await
		.map_err(map_engine_error)?;
	Ok(Json(OrderResponse::from(&order)))
}

/// Applies a lifecycle action to an order.
#[instrument(skip_all, fields(order_id = %order_id, action = %action.name()))]
pub async fn transition(
	engine: &MarketEngine,
	actor: Actor,
	order_id: &str,
	action: TransitionAction,
) -> Result<Json<OrderResponse>, ApiError> {
	let order = engine
		.transition(&actor, order_id, action)
		.await
		.map_err(map_engine_error)?;
	Ok(Json(OrderResponse::from(&order)))
}
