//! Unified error type for the budgeting engine and its Discord surface.
//!
//! Engine failures carry the numbers a caller needs to offer a fix (the cap,
//! the spend, the deficit) instead of a pre-rendered message.

use chrono::NaiveDate;
use thiserror::Error;

/// Every failure the crate can report.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Envelope not found: {envelope_id}")]
    EnvelopeNotFound { envelope_id: i64 },

    #[error("Pay cycle not found: {pay_cycle_id}")]
    PayCycleNotFound { pay_cycle_id: i64 },

    #[error("Pay period not found: {instance_id}")]
    InstanceNotFound { instance_id: i64 },

    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: i64 },

    #[error("Envelope {envelope_id} has no allocation in pay period {instance_id}")]
    AllocationNotFound { instance_id: i64, envelope_id: i64 },

    #[error("No pay period covers {date}")]
    NoActivePeriod { date: NaiveDate },

    #[error("Allocations total {requested_total:.2} but the period only brings in {base:.2}")]
    OverAllocated { base: f64, requested_total: f64 },

    #[error(
        "Expense of {attempted:.2} would take envelope {envelope_id} to {projected:.2} against a cap of {cap:.2} (short by {deficit:.2})"
    )]
    OverspendBlocked {
        envelope_id: i64,
        cap: f64,
        spent: f64,
        attempted: f64,
        projected: f64,
        deficit: f64,
    },

    #[error("Insufficient reserve balance: available {available:.2}, requested {requested:.2}")]
    InsufficientBalance { available: f64, requested: f64 },

    #[error(
        "Envelope {envelope_id} only has {available:.2} left to give, requested {requested:.2}"
    )]
    InsufficientSourceBudget {
        envelope_id: i64,
        available: f64,
        requested: f64,
    },

    #[error("Pay period {instance_id} is already confirmed")]
    AlreadyConfirmed { instance_id: i64 },

    #[error("Pay period {instance_id} needs manual re-confirmation first")]
    OrphanedInstance { instance_id: i64 },

    #[error(
        "Pay period {instance_id} income of {actual:.2} is {deficit:.2} short of {allocated:.2} allocated"
    )]
    ShortfallUnresolved {
        instance_id: i64,
        allocated: f64,
        actual: f64,
        deficit: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    #[error("Serenity/Poise framework error: {0}")]
    #[allow(clippy::enum_variant_names)]
    FrameworkError(Box<poise::serenity_prelude::Error>),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<poise::serenity_prelude::Error> for Error {
    fn from(value: poise::serenity_prelude::Error) -> Self {
        Self::FrameworkError(Box::new(value))
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
