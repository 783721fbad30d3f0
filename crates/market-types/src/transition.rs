//! Transition payloads accepted by the state machine.
//!
//! Each lifecycle action carries a closed payload variant validated at the
//! API boundary; unknown or missing fields are rejected before anything
//! reaches the state machine. The wire format is externally tagged, e.g.
//! `{"publish": {"articleUrl": "https://..."}}` or `"accept"`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A lifecycle action requested by an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum TransitionAction {
	/// Publisher takes the order on.
	Accept,
	/// Publisher turns the order down before starting work.
	Decline {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		reason: Option<String>,
	},
	/// Buyer withdraws the order in the pre-acceptance window.
	Cancel {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		reason: Option<String>,
	},
	/// Publisher starts drafting.
	StartWriting,
	/// Publisher submits (or resubmits) content for review.
	SubmitContent {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		body: Option<String>,
	},
	/// Buyer approves the submitted content.
	Approve,
	/// Buyer asks for changes, to submitted content or a published article.
	RequestRevision { reason: String },
	/// Publisher publishes the article at the given URL.
	Publish {
		#[serde(rename = "articleUrl")]
		article_url: String,
	},
	/// Buyer confirms the published placement, settling funds.
	Confirm {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		rating: Option<u8>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		review: Option<String>,
	},
	/// Deadline-driven confirmation applied by the sweeper.
	AutoConfirm,
}

impl TransitionAction {
	/// Short name used in logs and error messages.
	pub fn name(&self) -> &'static str {
		match self {
			TransitionAction::Accept => "accept",
			TransitionAction::Decline { .. } => "decline",
			TransitionAction::Cancel { .. } => "cancel",
			TransitionAction::StartWriting => "start_writing",
			TransitionAction::SubmitContent { .. } => "submit_content",
			TransitionAction::Approve => "approve",
			TransitionAction::RequestRevision { .. } => "request_revision",
			TransitionAction::Publish { .. } => "publish",
			TransitionAction::Confirm { .. } => "confirm",
			TransitionAction::AutoConfirm => "auto_confirm",
		}
	}
}

impl fmt::Display for TransitionAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unit_action_wire_format() {
		let action: TransitionAction = serde_json::from_str("\"accept\"").unwrap();
		assert_eq!(action, TransitionAction::Accept);
	}

	#[test]
	fn test_publish_payload_wire_format() {
		let action: TransitionAction =
			serde_json::from_str(r#"{"publish": {"articleUrl": "https://example.com/a"}}"#).unwrap();
		assert_eq!(
			action,
			TransitionAction::Publish {
				article_url: "https://example.com/a".to_string()
			}
		);
	}

	#[test]
	fn test_unknown_fields_rejected() {
		let result: Result<TransitionAction, _> =
			serde_json::from_str(r#"{"publish": {"articleUrl": "https://x.com/a", "extra": 1}}"#);
		assert!(result.is_err());
	}
}
