//! HTTP server for the marketplace API.
//!
//! Exposes the order lifecycle, dispute flow and wallet inspection over an
//! axum router. Authentication is an upstream concern: the server trusts
//! the `x-actor-id` / `x-actor-role` headers an authenticating proxy sets,
//! and only enforces domain-level authorization.

use axum::{
	extract::{Path, State},
	response::Json,
	routing::{get, patch, post},
	Router,
};
use market_config::ApiConfig;
use market_core::MarketEngine;
use market_ledger::TransactionRecord;
use market_types::{
	ApiError, CreateOrderRequest, Dispute, OpenDisputeRequest, OrderResponse,
	ResolveDisputeRequest, TransitionAction, WalletResponse,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::apis::{self, dispute, order, wallet, ActorHeaders};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the engine for processing requests.
	pub engine: Arc<MarketEngine>,
}

/// Starts the HTTP server for the API.
///
/// This function creates and configures the HTTP server with routing,
/// middleware, and error handling for the endpoints.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<MarketEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app_state = AppState { engine };

	// Build the router with /api base path
	let app = Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order))
				.route("/orders/{id}", get(handle_get_order))
				.route("/orders/{id}/status", patch(handle_transition))
				.route(
					"/orders/{id}/dispute",
					post(handle_open_dispute).get(handle_get_dispute),
				)
				.route(
					"/admin/disputes/{id}/resolve",
					post(handle_resolve_dispute),
				)
				.route("/wallets/{user_id}/{role}", get(handle_get_wallet))
				.route(
					"/wallets/{user_id}/{role}/transactions",
					get(handle_get_transactions),
				)
				.route("/wallets/{user_id}/{role}/deposit", post(handle_deposit)),
		)
		.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
		.with_state(app_state);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Marketplace API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Handles POST /api/orders requests.
async fn handle_create_order(
	State(state): State<AppState>,
	headers: ActorHeaders,
	Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
	order::create_order(&state.engine, headers.actor()?, request).await
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: ActorHeaders,
) -> Result<Json<OrderResponse>, ApiError> {
	order::get_order(&state.engine, headers.actor()?, &id).await
}

/// Handles PATCH /api/orders/{id}/status requests.
async fn handle_transition(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: ActorHeaders,
	Json(action): Json<TransitionAction>,
) -> Result<Json<OrderResponse>, ApiError> {
	order::transition(&state.engine, headers.actor()?, &id, action).await
}

/// Handles POST /api/orders/{id}/dispute requests.
async fn handle_open_dispute(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: ActorHeaders,
	Json(request): Json<OpenDisputeRequest>,
) -> Result<Json<Dispute>, ApiError> {
	dispute::open_dispute(&state.engine, headers.actor()?, &id, request).await
}

/// Handles GET /api/orders/{id}/dispute requests.
async fn handle_get_dispute(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: ActorHeaders,
) -> Result<Json<Dispute>, ApiError> {
	dispute::get_dispute(&state.engine, headers.actor()?, &id).await
}

/// Handles POST /api/admin/disputes/{id}/resolve requests.
async fn handle_resolve_dispute(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: ActorHeaders,
	Json(request): Json<ResolveDisputeRequest>,
) -> Result<Json<Dispute>, ApiError> {
	dispute::resolve_dispute(&state.engine, headers.actor()?, &id, request).await
}

/// Handles GET /api/wallets/{user_id}/{role} requests.
async fn handle_get_wallet(
	Path((user_id, role)): Path<(String, String)>,
	State(state): State<AppState>,
	headers: ActorHeaders,
) -> Result<Json<WalletResponse>, ApiError> {
	wallet::get_wallet(&state.engine, headers.actor()?, &user_id, &role).await
}

/// Handles GET /api/wallets/{user_id}/{role}/transactions requests.
async fn handle_get_transactions(
	Path((user_id, role)): Path<(String, String)>,
	State(state): State<AppState>,
	headers: ActorHeaders,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
	wallet::get_transactions(&state.engine, headers.actor()?, &user_id, &role).await
}

/// Handles POST /api/wallets/{user_id}/{role}/deposit requests.
async fn handle_deposit(
	Path((user_id, role)): Path<(String, String)>,
	State(state): State<AppState>,
	headers: ActorHeaders,
	Json(request): Json<apis::wallet::DepositRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
	wallet::deposit(&state.engine, headers.actor()?, &user_id, &role, request).await
}
