//! Pay cycle entity - a recurring income schedule template.
//!
//! The schedule is persisted as a frequency plus the anchor columns that
//! frequency needs. Code never reads those columns directly; it goes through
//! [`Model::schedule`], which rebuilds the tagged [`Schedule`] and rejects rows
//! whose columns do not match their frequency.

use crate::core::schedule::Schedule;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How often a pay cycle pays out
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum Frequency {
    /// Once per calendar month
    #[sea_orm(string_value = "monthly")]
    Monthly,
    /// Twice per calendar month (kinsenas and katapusan)
    #[sea_orm(string_value = "bimonthly")]
    Bimonthly,
    /// Once per week
    #[sea_orm(string_value = "weekly")]
    Weekly,
    /// Every day
    #[sea_orm(string_value = "daily")]
    Daily,
}

/// Pay cycle database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pay_cycles")]
pub struct Model {
    /// Unique identifier for the pay cycle
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the pay cycle
    pub user_id: String,
    /// Human label, e.g. "My Salary"
    pub label: String,
    /// Income expected per period
    pub expected_amount: f64,
    /// Schedule kind
    pub frequency: Frequency,
    /// First day-of-month anchor (monthly, bimonthly)
    pub pay_day_1: Option<i32>,
    /// Second day-of-month anchor (bimonthly only)
    pub pay_day_2: Option<i32>,
    /// ISO weekday, Monday = 1 (weekly only)
    pub pay_day_of_week: Option<i32>,
    /// Paused cycles keep their history but stop materializing periods
    pub is_active: bool,
    /// When the cycle was created
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Rebuilds the tagged schedule from the stored columns.
    pub fn schedule(&self) -> crate::errors::Result<Schedule> {
        Schedule::from_parts(
            self.frequency,
            self.pay_day_1,
            self.pay_day_2,
            self.pay_day_of_week,
        )
    }
}

/// Defines relationships between `PayCycle` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One cycle materializes many period instances
    #[sea_orm(has_many = "super::pay_cycle_instance::Entity")]
    Instances,
}

impl Related<super::pay_cycle_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Instances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        errors::{Error, Result},
        test_utils::*,
    };
    use sea_orm::{ActiveModelTrait, Set};

    #[tokio::test]
    async fn test_schedule_survives_storage() -> Result<()> {
        let db = setup_test_db().await?;
        let created = create_custom_pay_cycle(&db, 15000.0, Schedule::bimonthly(15, 30)?).await?;

        let stored = Entity::find_by_id(created.id).one(&db).await?.unwrap();
        assert_eq!(stored.frequency, Frequency::Bimonthly);
        assert_eq!(stored.schedule()?, Schedule::bimonthly(15, 30)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_mismatched_columns_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let created = create_test_pay_cycle(&db, 20000.0).await?;

        let mut active: ActiveModel = created.into();
        active.pay_day_of_week = Set(Some(3));
        let broken = active.update(&db).await?;
        assert!(matches!(broken.schedule().unwrap_err(), Error::Validation { .. }));
        Ok(())
    }
}
