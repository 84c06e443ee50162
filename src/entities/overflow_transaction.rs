//! Overflow transaction entity - append-only log of reserve movements.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a reserve movement
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum ReserveMovement {
    /// Money into the reserve
    #[sea_orm(string_value = "deposit")]
    Deposit,
    /// Money out of the reserve
    #[sea_orm(string_value = "withdrawal")]
    Withdrawal,
}

/// Why the reserve moved
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum ReserveSource {
    /// Unspent envelope balance swept at period end
    #[sea_orm(string_value = "envelope_rollover")]
    EnvelopeRollover,
    /// Confirmed income above the period's allocations
    #[sea_orm(string_value = "income_surplus")]
    IncomeSurplus,
    /// User-initiated movement
    #[sea_orm(string_value = "manual")]
    Manual,
    /// Funds credited to an envelope so an expense can go through
    #[sea_orm(string_value = "overspend_cover")]
    OverspendCover,
    /// Funds covering confirmed income below the period's allocations
    #[sea_orm(string_value = "shortfall_cover")]
    ShortfallCover,
}

/// Overflow transaction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "overflow_transactions")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the reserve
    pub user_id: String,
    /// Positive magnitude
    pub amount: f64,
    /// Deposit or withdrawal
    pub transaction_type: ReserveMovement,
    /// Reason for the movement
    pub source: ReserveSource,
    /// Envelope that triggered the movement, if any
    pub envelope_id: Option<i64>,
    /// Period that triggered the movement, if any
    pub pay_cycle_instance_id: Option<i64>,
    /// When the movement happened
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Effect of this row on the reserve balance.
    #[must_use]
    pub fn signed_amount(&self) -> f64 {
        match self.transaction_type {
            ReserveMovement::Deposit => self.amount,
            ReserveMovement::Withdrawal => -self.amount,
        }
    }
}

/// Log rows keep plain ids so history survives envelope changes
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
