pub mod cart;
pub mod catalog;
pub mod coupons;
pub mod gateway;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod settings;
pub mod webhooks;

use rust_decimal::Decimal;
use validator::ValidationError;

/// Money fields never go below zero.
pub(crate) fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

/// Converts a 1-based page request into a zero-based page index and a page
/// size clamped to 1..=100.
pub(crate) fn page_bounds(page: u64, per_page: u64) -> (u64, u64) {
    (page.saturating_sub(1), per_page.clamp(1, 100))
}
