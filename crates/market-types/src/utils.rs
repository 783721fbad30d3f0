//! String formatting utilities.
//!
//! Provides functions for formatting ids and money amounts for display in
//! logs and API responses.

use crate::money::Amount;

/// Utility function to truncate an id string for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Formats a minor-unit amount as a dollar string for display.
///
/// Display only; all arithmetic stays in integer minor units.
///
/// # Arguments
///
/// * `amount` - The amount in minor units (cents)
///
/// # Returns
///
/// A formatted string like "$1.50" or "-$0.05"
pub fn format_amount(amount: Amount) -> String {
	let sign = if amount < 0 { "-" } else { "" };
	let abs = amount.unsigned_abs();
	format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}
