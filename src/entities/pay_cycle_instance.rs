//! Pay cycle instance entity - one concrete pay period.
//!
//! An instance starts out assumed (income expected but not seen), becomes
//! confirmed when real income is recorded, and drops back to assumed with
//! `requires_manual_reconfirm` set when its linked income row disappears.
//! `(pay_cycle_id, period_start)` is unique.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sub-period tag used by bimonthly allocation rules
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum PaydayType {
    /// The only payday of a monthly, weekly or daily period
    #[sea_orm(string_value = "single")]
    Single,
    /// First-half-of-month payday
    #[sea_orm(string_value = "kinsenas")]
    Kinsenas,
    /// Second-half-of-month payday
    #[sea_orm(string_value = "katapusan")]
    Katapusan,
}

/// Pay cycle instance database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pay_cycle_instances")]
pub struct Model {
    /// Unique identifier for the instance
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the instance
    pub user_id: String,
    /// Template this period was materialized from
    pub pay_cycle_id: i64,
    /// First day of the period (inclusive)
    pub period_start: Date,
    /// Last day of the period (inclusive)
    pub period_end: Date,
    /// Day the income is expected to land
    pub expected_pay_date: Date,
    /// Income expected, copied from the template at materialization
    pub expected_amount: f64,
    /// Income actually received, set on confirmation
    pub actual_amount: Option<f64>,
    /// Sub-period tag
    pub payday_type: PaydayType,
    /// True until real income is confirmed
    pub is_assumed: bool,
    /// When income was confirmed
    pub confirmed_at: Option<DateTimeUtc>,
    /// When the system forced confirmation after the grace deadline
    pub auto_confirmed_at: Option<DateTimeUtc>,
    /// Set when the linked income row was deleted or terms changed
    pub requires_manual_reconfirm: bool,
    /// Ledger row holding the confirmed income
    pub linked_transaction_id: Option<i64>,
    /// Surplus already deposited into the reserve for this period
    pub surplus_routed: f64,
    /// Shortfall the user chose to cover from the reserve
    pub shortfall_covered: f64,
    /// Whether rollover envelopes of this period were settled
    pub rollover_processed: bool,
    /// When the instance was materialized
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Whether the period contains `date`.
    #[must_use]
    pub fn contains(&self, date: Date) -> bool {
        self.period_start <= date && date <= self.period_end
    }

    /// Confirmed and not flagged for reconfirmation.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        !self.is_assumed && !self.requires_manual_reconfirm
    }
}

/// Defines relationships between `PayCycleInstance` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each instance belongs to one pay cycle
    #[sea_orm(
        belongs_to = "super::pay_cycle::Entity",
        from = "Column::PayCycleId",
        to = "super::pay_cycle::Column::Id",
        on_delete = "Cascade"
    )]
    PayCycle,
    /// One instance has one allocation per envelope
    #[sea_orm(has_many = "super::allocation::Entity")]
    Allocations,
}

impl Related<super::pay_cycle::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PayCycle.def()
    }
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
