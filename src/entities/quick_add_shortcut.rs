//! Quick-add shortcut entity - a one-tap template that writes a ledger row.
//!
//! Shortcuts are provisioned from system templates at onboarding or created by
//! the user. When used, they feed the regular ledger write path.

use super::ledger_transaction::TransactionType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Quick-add shortcut database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quick_add_shortcuts")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the shortcut
    pub user_id: String,
    /// Button label, e.g. "Jeep fare"
    pub label: String,
    /// Cosmetic emoji
    pub emoji: String,
    /// Amount used when the caller does not override it
    pub default_amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id the row is filed under
    pub category: String,
    /// Envelope the row is charged to, if routed
    pub envelope_id: Option<i64>,
    /// Whether the shortcut came from a system template
    pub is_system_default: bool,
    /// Times the shortcut was used
    pub usage_count: i32,
    /// When the shortcut was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `QuickAddShortcut` and other entities
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
