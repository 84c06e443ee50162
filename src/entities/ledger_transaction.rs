//! Ledger transaction entity - one income or expense row.
//!
//! `amount` is always stored as a positive magnitude; `transaction_type`
//! carries the sign. Rows may be tagged with an envelope (spend tracking) and
//! with a pay cycle instance (salary link).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of money for a ledger row
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum TransactionType {
    /// Money coming in
    #[sea_orm(string_value = "income")]
    Income,
    /// Money going out
    #[sea_orm(string_value = "expense")]
    Expense,
}

/// Which producer wrote a ledger row
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum TransactionSource {
    /// Typed in by the user
    #[sea_orm(string_value = "manual")]
    Manual,
    /// Generated by a recurring rule
    #[sea_orm(string_value = "recurring")]
    Recurring,
    /// Generated by a quick-add shortcut
    #[sea_orm(string_value = "quick_add")]
    QuickAdd,
    /// Written while confirming a pay period's income
    #[sea_orm(string_value = "salary_confirmation")]
    SalaryConfirmation,
}

/// Ledger transaction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the transaction
    pub user_id: String,
    /// Positive magnitude
    pub amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id owned by the category collaborator
    pub category: String,
    /// Envelope the row is charged to, if any
    pub envelope_id: Option<i64>,
    /// Pay period whose income this row confirms, if any
    pub pay_cycle_instance_id: Option<i64>,
    /// Producer of the row
    pub source: TransactionSource,
    /// Business date of the transaction
    pub transaction_date: Date,
    /// Free-text description
    pub description: Option<String>,
    /// When the row was written
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Amount with the sign implied by the transaction type.
    #[must_use]
    pub fn signed_amount(&self) -> f64 {
        match self.transaction_type {
            TransactionType::Income => self.amount,
            TransactionType::Expense => -self.amount,
        }
    }
}

/// Defines relationships between `LedgerTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Optional envelope tag
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id",
        on_delete = "SetNull"
    )]
    Envelope,
    /// Optional salary link
    #[sea_orm(
        belongs_to = "super::pay_cycle_instance::Entity",
        from = "Column::PayCycleInstanceId",
        to = "super::pay_cycle_instance::Column::Id",
        on_delete = "SetNull"
    )]
    Instance,
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl Related<super::pay_cycle_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instance.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
