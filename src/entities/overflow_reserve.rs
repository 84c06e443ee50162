//! Overflow reserve entity - the per-user cookie jar balance.
//!
//! One row per user. `current_balance` only moves together with a row in
//! `overflow_transactions` and never goes below zero.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Overflow reserve database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "overflow_reserves")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner, unique
    #[sea_orm(unique)]
    pub user_id: String,
    /// Deposits minus withdrawals
    pub current_balance: f64,
    /// Optional savings goal
    pub goal_amount: Option<f64>,
    /// Optional name for the savings goal
    pub goal_name: Option<String>,
    /// When the balance or goal last changed
    pub updated_at: DateTimeUtc,
}

/// `OverflowReserve` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
