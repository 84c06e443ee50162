//! Envelope transfer entity - append-only log of budget moved between envelopes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why budget was moved
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum TransferReason {
    /// Requested by the user
    #[sea_orm(string_value = "manual_transfer")]
    ManualTransfer,
    /// Made so an expense could pass the overspend block
    #[sea_orm(string_value = "overspend_cover")]
    OverspendCover,
    /// Budget reshuffle
    #[sea_orm(string_value = "rebalance")]
    Rebalance,
}

/// Envelope transfer database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "envelope_transfers")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of both envelopes
    pub user_id: String,
    /// Donor envelope
    pub from_envelope_id: i64,
    /// Receiving envelope, never equal to the donor
    pub to_envelope_id: i64,
    /// Positive amount moved
    pub amount: f64,
    /// Reason for the move
    pub reason: TransferReason,
    /// Period whose allocations were adjusted
    pub pay_cycle_instance_id: Option<i64>,
    /// When the transfer happened
    pub created_at: DateTimeUtc,
}

/// Log rows keep plain ids so history survives envelope changes
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
