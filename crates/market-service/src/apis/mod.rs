//! API handler implementations.
//!
//! Each submodule owns one resource's handlers: orders (lifecycle
//! transitions), disputes, and wallets. This module holds the shared actor
//! extraction and the mapping from engine errors to HTTP errors.

pub mod dispute;
pub mod order;
pub mod wallet;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use market_core::EngineError;
use market_dispute::DisputeError;
use market_ledger::LedgerError;
use market_order::OrderError;
use market_types::{Actor, ApiError, Role};
use std::convert::Infallible;

/// Actor identity taken from the `x-actor-id` / `x-actor-role` headers.
///
/// Session authentication happens upstream; by the time a request reaches
/// this service, a trusted proxy has resolved the session into these
/// headers. The service only performs domain authorization.
pub struct ActorHeaders {
	user_id: Option<String>,
	role: Option<String>,
}

impl<S> FromRequestParts<S> for ActorHeaders
where
	S: Send + Sync,
{
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let header = |name: &str| {
			parts
				.headers
				.get(name)
				.and_then(|v| v.to_str().ok())
				.map(str::to_string)
		};
		Ok(Self {
			user_id: header("x-actor-id"),
			role: header("x-actor-role"),
		})
	}
}

impl ActorHeaders {
	/// Resolves the headers into an actor, rejecting absent or malformed
	/// identities and roles reserved for internal use.
	pub fn actor(&self) -> Result<Actor, ApiError> {
		let user_id = self
			.user_id
			.clone()
			.filter(|id| !id.is_empty())
			.ok_or_else(|| ApiError::Unauthorized {
				message: "missing x-actor-id header".to_string(),
			})?;
		let role = self
			.role
			.as_deref()
			.ok_or_else(|| ApiError::Unauthorized {
				message: "missing x-actor-role header".to_string(),
			})?
			.parse::<Role>()
			.map_err(|_| ApiError::BadRequest {
				error_type: "INVALID_ROLE".to_string(),
				message: "x-actor-role must be buyer, publisher, contributor or admin".to_string(),
			})?;
		if role == Role::System {
			return Err(ApiError::Forbidden {
				message: "the system role cannot be assumed through the API".to_string(),
			});
		}
		Ok(Actor::new(user_id, role))
	}
}

/// Maps engine failures onto the API error taxonomy.
///
/// Fatal ledger invariants are logged before being flattened into a 500;
/// they indicate bugs, not user errors, and must never look retryable.
pub fn map_engine_error(err: EngineError) -> ApiError {
	match err {
		EngineError::Order(e) => map_order_error(e),
		EngineError::Ledger(e) => map_ledger_error(e),
		EngineError::Dispute(e) => map_dispute_error(e),
		EngineError::Conflict(message) => ApiError::Conflict {
			error_type: "STALE_ORDER_STATE".to_string(),
			message,
		},
		EngineError::Storage(message) => {
			tracing::error!(error = %message, "Storage failure");
			ApiError::InternalServerError {
				message: "storage failure".to_string(),
			}
		}
	}
}

fn map_order_error(err: OrderError) -> ApiError {
	match err {
		OrderError::Forbidden(message) => ApiError::Forbidden { message },
		OrderError::InvalidTransition { .. } => ApiError::Conflict {
			error_type: "INVALID_TRANSITION".to_string(),
			message: err.to_string(),
		},
		OrderError::StaleOrderState { .. } => ApiError::Conflict {
			error_type: "STALE_ORDER_STATE".to_string(),
			message: err.to_string(),
		},
		OrderError::ValidationFailed(message) => ApiError::UnprocessableEntity {
			error_type: "VALIDATION_FAILED".to_string(),
			message,
			details: None,
		},
		OrderError::NotFound(_) => ApiError::NotFound {
			message: "order not found".to_string(),
		},
		OrderError::Storage(message) => {
			tracing::error!(error = %message, "Order storage failure");
			ApiError::InternalServerError {
				message: "storage failure".to_string(),
			}
		}
	}
}

fn map_ledger_error(err: LedgerError) -> ApiError {
	match err {
		LedgerError::InsufficientFunds { required, available } => ApiError::UnprocessableEntity {
			error_type: "INSUFFICIENT_FUNDS".to_string(),
			message: "insufficient wallet balance; add funds and retry".to_string(),
			details: Some(serde_json::json!({
				"required": required,
				"available": available,
			})),
		},
		LedgerError::InvalidAmount(_) => ApiError::UnprocessableEntity {
			error_type: "VALIDATION_FAILED".to_string(),
			message: err.to_string(),
			details: None,
		},
		e if e.is_fatal() => {
			tracing::error!(error = %e, "Ledger invariant violation");
			ApiError::InternalServerError {
				message: "internal settlement error".to_string(),
			}
		}
		e => {
			tracing::error!(error = %e, "Ledger storage failure");
			ApiError::InternalServerError {
				message: "storage failure".to_string(),
			}
		}
	}
}

fn map_dispute_error(err: DisputeError) -> ApiError {
	match err {
		DisputeError::Forbidden(message) => ApiError::Forbidden { message },
		DisputeError::AlreadyOpen(_) => ApiError::Conflict {
			error_type: "DISPUTE_ALREADY_OPEN".to_string(),
			message: err.to_string(),
		},
		DisputeError::NotEligible { .. } | DisputeError::NotOpen(_) => ApiError::Conflict {
			error_type: "INVALID_TRANSITION".to_string(),
			message: err.to_string(),
		},
		DisputeError::ProtectionExpired | DisputeError::ValidationFailed(_) => {
			ApiError::UnprocessableEntity {
				error_type: "VALIDATION_FAILED".to_string(),
				message: err.to_string(),
				details: None,
			}
		}
		DisputeError::NotFound(_) => ApiError::NotFound {
			message: "dispute not found".to_string(),
		},
		DisputeError::Storage(message) => {
			tracing::error!(error = %message, "Dispute storage failure");
			ApiError::InternalServerError {
				message: "storage failure".to_string(),
			}
		}
	}
}
