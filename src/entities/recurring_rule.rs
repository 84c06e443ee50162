//! Recurring rule entity - a ledger row that repeats on a schedule.

use super::{ledger_transaction::TransactionType, pay_cycle::Frequency};
use crate::core::schedule::Schedule;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Recurring rule database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recurring_rules")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the rule
    pub user_id: String,
    /// Description copied onto each generated row
    pub description: String,
    /// Positive magnitude of each generated row
    pub amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id for generated rows
    pub category: String,
    /// Envelope generated rows are charged to, if any
    pub envelope_id: Option<i64>,
    /// Schedule kind
    pub frequency: Frequency,
    /// First day-of-month anchor (monthly, bimonthly)
    pub day_1: Option<i32>,
    /// Second day-of-month anchor (bimonthly only)
    pub day_2: Option<i32>,
    /// ISO weekday, Monday = 1 (weekly only)
    pub day_of_week: Option<i32>,
    /// Next date a row is due
    pub next_run_date: Date,
    /// Paused rules generate nothing
    pub is_active: bool,
}

impl Model {
    /// Rebuilds the tagged schedule from the stored columns.
    pub fn schedule(&self) -> crate::errors::Result<Schedule> {
        Schedule::from_parts(self.frequency, self.day_1, self.day_2, self.day_of_week)
    }
}

/// Defines relationships between `RecurringRule` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Optional envelope routing
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id",
        on_delete = "SetNull"
    )]
    Envelope,
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
