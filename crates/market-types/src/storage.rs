//! Storage-related types for the marketplace engine.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Key for storing order records
	Orders,
	/// Key for storing wallet balances, one per (user, role)
	Wallets,
	/// Key for storing dispute records
	Disputes,
	/// Key for mapping order ids to their open dispute
	DisputeByOrder,
	/// Key for the ledger's transaction audit log
	Transactions,
	/// Key for the confirmation-deadline index scanned by the sweeper
	PendingConfirmations,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Wallets => "wallets",
			StorageKey::Disputes => "disputes",
			StorageKey::DisputeByOrder => "dispute_by_order",
			StorageKey::Transactions => "transactions",
			StorageKey::PendingConfirmations => "pending_confirmations",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Wallets,
			Self::Disputes,
			Self::DisputeByOrder,
			Self::Transactions,
			Self::PendingConfirmations,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"wallets" => Ok(Self::Wallets),
			"disputes" => Ok(Self::Disputes),
			"dispute_by_order" => Ok(Self::DisputeByOrder),
			"transactions" => Ok(Self::Transactions),
			"pending_confirmations" => Ok(Self::PendingConfirmations),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
