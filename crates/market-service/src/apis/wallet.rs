//! Wallet API handlers.
//!
//! Balance inspection, the transaction audit trail and the deposit hook
//! the payment-intake collaborator calls after a provider (Stripe, PayPal,
//! Razorpay) confirms a charge. Provider client flows themselves live
//! outside this service.

use axum::response::Json;
use market_core::MarketEngine;
use market_ledger::{TransactionKind, TransactionRecord};
use market_types::{format_amount, Actor, Amount, ApiError, Role, WalletResponse};
use serde::{Deserialize, Serialize};

use super::map_engine_error;

/// Request body for crediting a wallet after a verified payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DepositRequest {
	/// Amount in minor units.
	pub amount: Amount,
	/// Provider reference shown in the audit trail.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

fn parse_role(raw: &str) -> Result<Role, ApiError> {
	raw.parse::<Role>().map_err(|_| ApiError::BadRequest {
		error_type: "INVALID_ROLE".to_string(),
		message: "role must be buyer, publisher or contributor".to_string(),
	})
}

/// Only the wallet owner and admins may inspect a wallet.
fn authorize_wallet_access(actor: &Actor, user_id: &str) -> Result<(), ApiError> {
	if actor.role != Role::Admin && actor.user_id != user_id {
		return Err(ApiError::Forbidden {
			message: "not your wallet".to_string(),
		});
	}
	Ok(())
}

/// Returns the balances for a user/role wallet.
pub async fn get_wallet(
	engine: &MarketEngine,
	actor: Actor,
	user_id: &str,
	role: &str,
) -> Result<Json<WalletResponse>, ApiError> {
	authorize_wallet_access(&actor, user_id)?;
	let role = parse_role(role)?;

	let wallet = engine
		.ledger()
		.balance(&user_id.to_string(), role)
		.await
		.map_err(|e| map_engine_error(e.into()))?;

	Ok(Json(WalletResponse {
		user_id: wallet.user_id,
		role: wallet.role,
		available: wallet.available,
		reserved: wallet.reserved,
		bonus: wallet.bonus,
		available_formatted: format_amount(wallet.available),
	}))
}

/// Returns the audit trail for a user's wallets.
pub async fn get_transactions(
	engine: &MarketEngine,
	actor: Actor,
	user_id: &str,
	role: &str,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
	authorize_wallet_access(&actor, user_id)?;
	let role = parse_role(role)?;

	let records = engine
		.ledger()
		.transactions(&user_id.to_string())
		.await
		.map_err(|e| map_engine_error(e.into()))?;

	Ok(Json(
		records.into_iter().filter(|r| r.role == role).collect(),
	))
}

/// Credits a wallet after an upstream payment was verified.
pub async fn deposit(
	engine: &MarketEngine,
	actor: Actor,
	user_id: &str,
	role: &str,
	request: DepositRequest,
) -> Result<Json<WalletResponse>, ApiError> {
	authorize_wallet_access(&actor, user_id)?;
	let role = parse_role(role)?;

	let wallet = engine
		.ledger()
		.credit(
			&user_id.to_string(),
			role,
			request.amount,
			TransactionKind::Deposit,
			request.description.as_deref().unwrap_or("Wallet recharge"),
		)
		.await
		.map_err(|e| map_engine_error(e.into()))?;

	Ok(Json(WalletResponse {
		user_id: wallet.user_id,
		role: wallet.role,
		available: wallet.available,
		reserved: wallet.reserved,
		bonus: wallet.bonus,
		available_formatted: format_amount(wallet.available),
	}))
}
