//! Discord command implementations organized by category.

#![allow(clippy::too_long_first_doc_paragraph)]

/// Envelope budgeting commands (allocate, transfer, dashboard, setup)
pub mod envelope;

/// General utility commands
pub mod general;

/// Pay period commands
pub mod pay;

/// Cookie jar (overflow reserve) commands
pub mod reserve;

/// Ledger commands (spend, income, quick)
pub mod transaction;

// Export commands
pub use envelope::*;
pub use general::*;
pub use pay::*;
pub use reserve::*;
pub use transaction::*;
