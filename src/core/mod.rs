//! Core business logic - the allocation and reconciliation engine.
//!
//! Nothing in here knows about Discord. Public entry points take a
//! `&DatabaseConnection` and run as one database transaction; the `*_in`
//! variants take any `ConnectionTrait` so several steps can share a
//! transaction opened by the caller.

pub mod allocation;
pub mod dashboard;
pub mod envelope;
pub mod ledger;
pub mod pay_cycle;
pub mod provision;
pub mod recurring;
pub mod reserve;
pub mod schedule;
pub mod shortcut;
pub mod transfer;

/// Amounts closer than this are treated as equal.
pub const EPSILON: f64 = 0.005;

/// Rounds an amount to whole cents.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Whether `value` is above `limit` by more than rounding noise.
#[must_use]
pub fn exceeds(value: f64, limit: f64) -> bool {
    value - limit > EPSILON
}

/// Rejects zero, negative and non-finite amounts.
pub(crate) fn require_positive(amount: f64) -> crate::errors::Result<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(crate::errors::Error::InvalidAmount { amount })
    }
}
