//! Money arithmetic for order pricing and settlement.
//!
//! All amounts are integer minor-currency units (cents). Settlement math
//! never touches floating point: percentage cuts are expressed in basis
//! points and rounded half-up exactly once, at order creation. Settlement
//! time only moves the amounts fixed back then.

use crate::actor::UserId;
use serde::{Deserialize, Serialize};

/// An amount in integer minor-currency units (cents).
pub type Amount = i64;

/// Basis points denominator: 10_000 bps == 100%.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Applies a basis-point rate to an amount, rounding half-up.
///
/// This is the single rounding rule for all fee math. Callers apply it once
/// when an order is priced and persist the result; nothing recomputes fees
/// later.
pub fn apply_bps_half_up(amount: Amount, bps: u32) -> Amount {
	debug_assert!(amount >= 0, "negative amount in fee math");
	(amount * bps as i64 + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR
}

/// Payout destined for a content contributor as part of a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorCut {
	/// The contributor's user id.
	pub user_id: UserId,
	/// Amount credited to the contributor's wallet, minor units.
	pub amount: Amount,
}

/// How an order's reserved total is distributed at settlement.
///
/// The amounts here were fixed when the order was created; the ledger checks
/// that they still sum to the reserved total before any balance moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSplit {
	/// The publisher receiving the earnings.
	pub publisher_id: UserId,
	/// Amount credited to the publisher's wallet, minor units.
	pub publisher_amount: Amount,
	/// Optional contributor payout (assigned content writer).
	pub contributor: Option<ContributorCut>,
	/// Fee retained by the platform.
	pub platform_fee: Amount,
}

impl SettlementSplit {
	/// Total amount this split consumes from the buyer's reserved balance.
	pub fn total(&self) -> Amount {
		self.publisher_amount
			+ self.contributor.as_ref().map_or(0, |c| c.amount)
			+ self.platform_fee
	}
}
