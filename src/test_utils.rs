//! Shared test utilities.
//!
//! Every helper works against an in-memory `SQLite` database created by
//! [`setup_test_db`], and all fixtures belong to [`TEST_USER`] unless stated.

use crate::{
    core::{
        allocation,
        envelope::{self, NewEnvelope},
        ledger::{self, NewTransaction},
        pay_cycle::{self, ConfirmOutcome, IncomeLink},
        schedule::Schedule,
    },
    entities,
    errors::Result,
};
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;

/// Owner of every fixture.
pub const TEST_USER: &str = "test_user";

/// Shorthand for a calendar date.
///
/// # Panics
/// Panics on an impossible date; only ever called with literals.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a plain, non-rollover envelope.
pub async fn create_test_envelope(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::envelope::Model> {
    envelope::create_envelope(db, TEST_USER, NewEnvelope::named(name)).await
}

/// Creates a monthly pay cycle paid on the 15th.
pub async fn create_test_pay_cycle(
    db: &DatabaseConnection,
    expected_amount: f64,
) -> Result<entities::pay_cycle::Model> {
    create_custom_pay_cycle(db, expected_amount, Schedule::Monthly { day: 15 }).await
}

/// Creates a pay cycle with any schedule.
pub async fn create_custom_pay_cycle(
    db: &DatabaseConnection,
    expected_amount: f64,
    schedule: Schedule,
) -> Result<entities::pay_cycle::Model> {
    pay_cycle::create_pay_cycle(db, TEST_USER, "Salary", expected_amount, schedule).await
}

/// Sets up a monthly pay cycle and materializes January 2025.
/// Returns (db, instance) with the instance still assumed.
pub async fn setup_with_period(
    expected_amount: f64,
) -> Result<(DatabaseConnection, entities::pay_cycle_instance::Model)> {
    let db = setup_test_db().await?;
    let cycle = create_test_pay_cycle(&db, expected_amount).await?;
    let instance = pay_cycle::materialize_instance(&db, cycle.id, date(2025, 1, 10)).await?;
    Ok((db, instance))
}

/// Records a manual expense against an envelope, without any overspend cover.
pub async fn spend(
    db: &DatabaseConnection,
    envelope_id: i64,
    amount: f64,
    on: NaiveDate,
) -> Result<entities::ledger_transaction::Model> {
    let appended = ledger::append_transaction(
        db,
        NewTransaction::expense(TEST_USER, amount, "test", on).envelope(envelope_id),
        None,
    )
    .await?;
    Ok(appended.transaction)
}

/// Confirms a period's salary on its expected pay date with a new ledger row.
pub async fn confirm_test_income(
    db: &DatabaseConnection,
    instance_id: i64,
    amount: f64,
) -> Result<ConfirmOutcome> {
    pay_cycle::confirm_income(
        db,
        instance_id,
        Some(amount),
        IncomeLink::Create,
        date(2025, 1, 15),
    )
    .await
}

/// Asserts every allocation's spent cache equals the ledger sum for its period.
///
/// # Panics
/// Panics when a cache has drifted.
pub async fn assert_spent_matches_ledger(db: &DatabaseConnection, instance_id: i64) -> Result<()> {
    let Some(instance) = pay_cycle::get_instance(db, instance_id).await? else {
        return Ok(());
    };
    for alloc in allocation::allocations_for_instance(db, instance_id).await? {
        let from_ledger = allocation::spent_in_period(
            db,
            &instance.user_id,
            alloc.envelope_id,
            instance.period_start,
            instance.period_end,
        )
        .await?;
        assert!(
            (alloc.cached_spent - from_ledger).abs() < crate::core::EPSILON,
            "envelope {} cached {} but ledger says {}",
            alloc.envelope_id,
            alloc.cached_spent,
            from_ledger
        );
    }
    Ok(())
}
