//! Actor identity and role types.
//!
//! Every engine operation is invoked on behalf of an already-authenticated
//! actor. Authentication itself is an external concern; the engine only
//! performs role authorization against the transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for a user account. Opaque to the engine.
pub type UserId = String;

/// Role an actor holds when invoking an operation.
///
/// `Buyer`, `Publisher` and `Contributor` are also the balance buckets a user
/// can hold funds under. `Admin` mediates disputes and `System` is the
/// identity of the confirmation sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Buyer,
	Publisher,
	Contributor,
	Admin,
	System,
}

impl Role {
	/// Returns the string representation used in storage keys and logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Buyer => "buyer",
			Role::Publisher => "publisher",
			Role::Contributor => "contributor",
			Role::Admin => "admin",
			Role::System => "system",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"buyer" => Ok(Role::Buyer),
			"publisher" => Ok(Role::Publisher),
			"contributor" => Ok(Role::Contributor),
			"admin" => Ok(Role::Admin),
			"system" => Ok(Role::System),
			_ => Err(()),
		}
	}
}

/// An authenticated actor invoking an engine operation.
///
/// Passed explicitly into every transition call; the engine never reads
/// identity from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	/// The acting user's id. Empty for the system sweeper.
	pub user_id: UserId,
	/// The role the actor is acting under.
	pub role: Role,
}

impl Actor {
	/// Creates an actor for the given user and role.
	pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
		Self {
			user_id: user_id.into(),
			role,
		}
	}

	/// The sweeper identity used for deadline-driven auto-completion.
	pub fn system() -> Self {
		Self {
			user_id: UserId::new(),
			role: Role::System,
		}
	}
}
