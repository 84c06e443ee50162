//! Envelope entity - a named spending bucket owned by one user.
//!
//! Envelopes are soft-deactivated rather than deleted while allocations still
//! reference them. Rollover-enabled envelopes hand their unspent balance to the
//! overflow reserve (or keep it in `overflow_balance`) when a period closes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where an envelope's unspent balance goes when its period closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum RolloverPolicy {
    /// Deposit the remainder into the user's overflow reserve (cookie jar)
    #[sea_orm(string_value = "sweep_to_reserve")]
    SweepToReserve,
    /// Keep the remainder in the envelope and carry it into the next allocation
    #[sea_orm(string_value = "carry_in_envelope")]
    CarryInEnvelope,
}

/// Envelope database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "envelopes")]
pub struct Model {
    /// Unique identifier for the envelope
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the envelope
    pub user_id: String,
    /// Human-readable name (e.g., "Food", "Bills")
    pub name: String,
    /// Cosmetic emoji shown next to the name
    pub emoji: String,
    /// Cosmetic hex color
    pub color: String,
    /// Optional budget ceiling the user is aiming for
    pub target_amount: Option<f64>,
    /// Whether unspent funds are kept (true) or reset (false) at period end
    pub is_rollover: bool,
    /// Destination of unspent funds for rollover envelopes
    pub rollover_policy: RolloverPolicy,
    /// Funds carried inside this envelope, waiting for the next allocation
    pub overflow_balance: f64,
    /// Soft delete flag - inactive envelopes are hidden but keep their history
    pub is_active: bool,
    /// Display position, lowest first
    pub sort_order: i32,
    /// When the envelope was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Envelope and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One envelope has one allocation per pay period
    #[sea_orm(has_many = "super::allocation::Entity")]
    Allocations,
    /// Ledger rows tagged with this envelope
    #[sea_orm(has_many = "super::ledger_transaction::Entity")]
    Transactions,
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl Related<super::ledger_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
