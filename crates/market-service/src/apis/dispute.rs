//! Dispute API handlers.
//!
//! Raising disputes (buyer or publisher) and the admin resolution
//! endpoint. The engine enforces eligibility, the one-open-dispute
//! invariant and the admin role; handlers only translate errors.

use axum::response::Json;
use market_core::MarketEngine;
use market_types::{Actor, ApiError, Dispute, OpenDisputeRequest, ResolveDisputeRequest};
use tracing::instrument;

use super::map_engine_error;

/// Opens a dispute on an order, suspending its workflow.
#[instrument(skip_all, fields(order_id = %order_id))]
pub async fn open_dispute(
	engine: &MarketEngine,
	actor: Actor,
	order_id: &str,
	request: OpenDisputeRequest,
) -> Result<Json<Dispute>, ApiError> {
	let dispute = engine
		.open_dispute(
			&actor,
			order_id,
			request.reason,
			&request.description,
			request.evidence_urls,
		)
		.await
		.map_err(map_engine_error)?;
	Ok(Json(dispute))
}

/// Returns the latest dispute for an order, scoped to its parties.
pub async fn get_dispute(
	engine: &MarketEngine,
	actor: Actor,
	order_id: &str,
) -> Result<Json<Dispute>, ApiError> {
	// Party check rides on the order fetch.
	engine
		.get_order(&actor, order_id)
		.await
		.map_err(map_engine_error)?;

	let dispute = engine
		.disputes()
		.for_order(order_id)
		.await
		.map_err(|e| map_engine_error(e.into()))?
		.ok_or_else(|| ApiError::NotFound {
			message: "no dispute for this order".to_string(),
		})?;
	Ok(Json(dispute))
}

/// Applies an admin resolution to an open dispute.
#[instrument(skip_all, fields(dispute_id = %dispute_id))]
pub async fn resolve_dispute(
	engine: &MarketEngine,
	actor: Actor,
	dispute_id: &str,
	request: ResolveDisputeRequest,
) -> Result<Json<Dispute>, ApiError> {
	let dispute = engine
		.resolve_dispute(&actor, dispute_id, request.resolution)
		.await
		.map_err(map_engine_error)?;
	Ok(Json(dispute))
}
