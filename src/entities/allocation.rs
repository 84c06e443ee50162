//! Allocation entity - the budget of one envelope within one pay period.
//!
//! `cached_spent` is derived from the ledger and is rewritten by
//! `core::allocation::recompute_spent`; it is never the source of truth.
//! `(pay_cycle_instance_id, envelope_id)` is unique.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Allocation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    /// Unique identifier for the allocation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the allocation
    pub user_id: String,
    /// Period this budget applies to
    pub pay_cycle_instance_id: i64,
    /// Envelope this budget funds
    pub envelope_id: i64,
    /// Percentage of the period income, when the rule was percentage based
    pub target_percentage: Option<f64>,
    /// Planned amount for the period
    pub allocated_amount: f64,
    /// Sum of expense rows for the envelope within the period
    pub cached_spent: f64,
    /// Extra budget carried in or credited from the reserve
    pub rollover_amount: f64,
    /// Whether the unspent remainder was already handed off
    pub rollover_settled: bool,
}

impl Model {
    /// Spending ceiling for the period.
    #[must_use]
    pub fn cap(&self) -> f64 {
        self.allocated_amount + self.rollover_amount
    }

    /// Budget still available to spend or transfer away.
    #[must_use]
    pub fn available(&self) -> f64 {
        self.cap() - self.cached_spent
    }
}

/// Defines relationships between Allocation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each allocation belongs to one period instance
    #[sea_orm(
        belongs_to = "super::pay_cycle_instance::Entity",
        from = "Column::PayCycleInstanceId",
        to = "super::pay_cycle_instance::Column::Id",
        on_delete = "Cascade"
    )]
    Instance,
    /// Each allocation belongs to one envelope
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id",
        on_delete = "Cascade"
    )]
    Envelope,
}

impl Related<super::pay_cycle_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instance.def()
    }
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
