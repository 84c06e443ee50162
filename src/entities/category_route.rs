//! Category route entity - maps an external category id to a default envelope.
//!
//! `(user_id, category)` is unique. Shortcut and recurring executors use the
//! route to pre-fill `envelope_id` when their own template leaves it empty.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Category route database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "category_routes")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the route
    pub user_id: String,
    /// Category id owned by the category collaborator
    pub category: String,
    /// Envelope rows in this category default to
    pub envelope_id: i64,
}

/// Defines relationships between `CategoryRoute` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each route points at one envelope
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id",
        on_delete = "Cascade"
    )]
    Envelope,
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
