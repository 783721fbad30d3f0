//! API types for the marketplace HTTP API.
//!
//! This module defines the request and response types for the HTTP endpoints
//! exposed by the service crate, plus the structured error type mapping
//! domain failures to HTTP status codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::UserId;
use crate::dispute::{DisputeReason, DisputeResolution};
use crate::money::Amount;
use crate::order::{ContentSource, Order, OrderStatus, OrderType, PaymentStatus};
use crate::utils::format_amount;

/// Request body for creating (and paying for) an order from wallet funds.
///
/// Pricing terms arrive resolved: the marketplace catalog that looks up a
/// website's listed prices is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateOrderRequest {
	pub website_id: String,
	pub publisher_id: UserId,
	pub order_type: OrderType,
	/// Listed placement price in minor units.
	pub base_price: Amount,
	/// Optional writing add-on in minor units.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub writing_fee: Option<Amount>,
	/// Content writer taking the writing fee, when assigned.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub contributor_id: Option<UserId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub anchor_text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_source: Option<ContentSource>,
}

/// Order representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
	pub id: String,
	pub order_number: String,
	pub status: OrderStatus,
	pub payment_status: PaymentStatus,
	pub order_type: OrderType,
	pub buyer_id: UserId,
	pub publisher_id: UserId,
	pub website_id: String,
	pub total_amount: Amount,
	pub total_formatted: String,
	pub publisher_earnings: Amount,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub article_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_rejection_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub buyer_confirmation_deadline: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderResponse {
	fn from(order: &Order) -> Self {
		Self {
			id: order.id.clone(),
			order_number: order.order_number.clone(),
			status: order.status,
			payment_status: order.payment_status,
			order_type: order.order_type,
			buyer_id: order.buyer_id.clone(),
			publisher_id: order.publisher_id.clone(),
			website_id: order.website_id.clone(),
			total_amount: order.total_amount,
			total_formatted: format_amount(order.total_amount),
			publisher_earnings: order.publisher_earnings,
			article_url: order.article_url.clone(),
			buyer_rejection_reason: order.buyer_rejection_reason.clone(),
			buyer_confirmation_deadline: order.buyer_confirmation_deadline,
			created_at: order.created_at,
			updated_at: order.updated_at,
			completed_at: order.completed_at,
		}
	}
}

/// Request body for raising a dispute on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenDisputeRequest {
	pub reason: DisputeReason,
	pub description: String,
	#[serde(default)]
	pub evidence_urls: Vec<String>,
}

/// Request body for the admin dispute-resolution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolveDisputeRequest {
	pub resolution: DisputeResolution,
}

/// Wallet balances returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
	pub user_id: UserId,
	pub role: crate::actor::Role,
	pub available: Amount,
	pub reserved: Amount,
	pub bonus: Amount,
	pub available_formatted: String,
}

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum ApiError {
	/// Malformed request (400)
	BadRequest { error_type: String, message: String },
	/// Missing or malformed actor identity (401)
	Unauthorized { message: String },
	/// Actor role not permitted for the attempted operation (403)
	Forbidden { message: String },
	/// Referenced entity does not exist (404)
	NotFound { message: String },
	/// Transition conflict: wrong current state or lost race (409)
	Conflict { error_type: String, message: String },
	/// Validation or funds failure (422)
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Internal invariant violation (500)
	InternalServerError { message: String },
}

impl ApiError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			ApiError::BadRequest { .. } => 400,
			ApiError::Unauthorized { .. } => 401,
			ApiError::Forbidden { .. } => 403,
			ApiError::NotFound { .. } => 404,
			ApiError::Conflict { .. } => 409,
			ApiError::UnprocessableEntity { .. } => 422,
			ApiError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		match self {
			ApiError::BadRequest { error_type, message } => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
			},
			ApiError::Unauthorized { message } => ErrorResponse {
				error: "UNAUTHORIZED".to_string(),
				message: message.clone(),
				details: None,
			},
			ApiError::Forbidden { message } => ErrorResponse {
				error: "FORBIDDEN".to_string(),
				message: message.clone(),
				details: None,
			},
			ApiError::NotFound { message } => ErrorResponse {
				error: "NOT_FOUND".to_string(),
				message: message.clone(),
				details: None,
			},
			ApiError::Conflict { error_type, message } => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
			},
			ApiError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: details.clone(),
			},
			ApiError::InternalServerError { message } => ErrorResponse {
				error: "INTERNAL_ERROR".to_string(),
				message: message.clone(),
				details: None,
			},
		}
	}
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApiError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			ApiError::Unauthorized { message } => write!(f, "Unauthorized: {}", message),
			ApiError::Forbidden { message } => write!(f, "Forbidden: {}", message),
			ApiError::NotFound { message } => write!(f, "Not Found: {}", message),
			ApiError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			ApiError::UnprocessableEntity { message, .. } => {
				write!(f, "Unprocessable Entity: {}", message)
			}
			ApiError::InternalServerError { message } => {
				write!(f, "Internal Server Error: {}", message)
			}
		}
	}
}

impl std::error::Error for ApiError {}

impl axum::response::IntoResponse for ApiError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		let error_response = self.to_error_response();
		(status, Json(error_response)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_create_order_rejects_unknown_fields() {
		let result: Result<CreateOrderRequest, _> = serde_json::from_str(
			r#"{"websiteId": "w1", "publisherId": "p1", "orderType": "guest_post",
			    "basePrice": 1000, "surprise": true}"#,
		);
		assert!(result.is_err());
	}

	#[test]
	fn test_status_codes() {
		assert_eq!(
			ApiError::Forbidden {
				message: "x".into()
			}
			.status_code(),
			403
		);
		assert_eq!(
			ApiError::Conflict {
				error_type: "INVALID_TRANSITION".into(),
				message: "x".into()
			}
			.status_code(),
			409
		);
	}
}
