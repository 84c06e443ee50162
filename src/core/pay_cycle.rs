//! Pay cycle engine - income templates, period instances, and confirmation.
//!
//! Instances are materialized on demand: nothing here runs on a clock. The
//! auto-confirm sweep is an entry point for whatever scheduler the host runs.

use crate::{
    core::{
        EPSILON, allocation,
        ledger::{self, NewTransaction},
        require_positive, reserve, round_cents,
        schedule::{Schedule, shift},
    },
    entities::{
        LedgerTransaction, PayCycle, PayCycleInstance, TransactionSource, TransactionType,
        allocation as allocation_entity, ledger_transaction, pay_cycle, pay_cycle_instance,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{
    Condition, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, info, instrument, warn};

/// Days either side of the expected pay date a salary row may land on.
pub const SALARY_MATCH_DAYS: i64 = 2;

/// Relative difference tolerated between a salary row and the expected amount.
pub const SALARY_MATCH_TOLERANCE: f64 = 0.10;

/// Field changes for [`update_pay_cycle`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayCycleUpdate {
    /// New label
    pub label: Option<String>,
    /// New expected income
    pub expected_amount: Option<f64>,
    /// New schedule
    pub schedule: Option<Schedule>,
    /// Pause or resume
    pub is_active: Option<bool>,
}

/// Income falling short of the period's allocations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    /// Sum of the period's allocations
    pub allocated: f64,
    /// Income actually received
    pub actual: f64,
    /// What is still uncovered
    pub deficit: f64,
}

/// What confirming a period's income did.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    /// The confirmed instance
    pub instance: pay_cycle_instance::Model,
    /// Its allocations, with fresh spent caches
    pub allocations: Vec<allocation_entity::Model>,
    /// Surplus deposited into the reserve by this confirmation
    pub surplus_routed: f64,
    /// Set when income is below the allocations; never resolved automatically
    pub shortfall: Option<Shortfall>,
}

impl ConfirmOutcome {
    /// Turns an unresolved shortfall into an error for callers that cannot
    /// present a choice.
    pub fn into_balanced(self) -> Result<Self> {
        match self.shortfall {
            Some(shortfall) => Err(Error::ShortfallUnresolved {
                instance_id: self.instance.id,
                allocated: shortfall.allocated,
                actual: shortfall.actual,
                deficit: shortfall.deficit,
            }),
            None => Ok(self),
        }
    }
}

/// Where the confirmed income is recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomeLink {
    /// Write a new salary-confirmation income row
    Create,
    /// Link an income row that already exists
    Existing(i64),
}

/// Which instances a reconfirmation sweep touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfirmScope {
    /// Every instance in the system
    All,
    /// One user's instances
    User(String),
}

/// Creates a pay cycle template.
#[instrument(skip(db))]
pub async fn create_pay_cycle(
    db: &DatabaseConnection,
    user_id: &str,
    label: &str,
    expected_amount: f64,
    schedule: Schedule,
) -> Result<pay_cycle::Model> {
    require_positive(expected_amount)?;
    let label = validated_label(label)?;
    let (frequency, day_1, day_2, day_of_week) = schedule.to_parts();

    let created = pay_cycle::ActiveModel {
        user_id: Set(user_id.to_string()),
        label: Set(label),
        expected_amount: Set(round_cents(expected_amount)),
        frequency: Set(frequency),
        pay_day_1: Set(day_1),
        pay_day_2: Set(day_2),
        pay_day_of_week: Set(day_of_week),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(pay_cycle_id = created.id, user_id, ?schedule, "Pay cycle created");
    Ok(created)
}

/// Edits a pay cycle template.
///
/// Existing instances keep the amount they were materialized with; assumed
/// instances whose bounds no longer fit the schedule are rebuilt the next
/// time they are materialized.
#[instrument(skip(db, update))]
pub async fn update_pay_cycle(
    db: &DatabaseConnection,
    user_id: &str,
    pay_cycle_id: i64,
    update: PayCycleUpdate,
) -> Result<pay_cycle::Model> {
    let current = require_pay_cycle(db, user_id, pay_cycle_id).await?;
    let mut active: pay_cycle::ActiveModel = current.into();

    if let Some(label) = update.label {
        active.label = Set(validated_label(&label)?);
    }
    if let Some(amount) = update.expected_amount {
        require_positive(amount)?;
        active.expected_amount = Set(round_cents(amount));
    }
    if let Some(schedule) = update.schedule {
        let (frequency, day_1, day_2, day_of_week) = schedule.to_parts();
        active.frequency = Set(frequency);
        active.pay_day_1 = Set(day_1);
        active.pay_day_2 = Set(day_2);
        active.pay_day_of_week = Set(day_of_week);
    }
    if let Some(is_active) = update.is_active {
        active.is_active = Set(is_active);
    }

    active.update(db).await.map_err(Into::into)
}

/// Pauses a pay cycle without deleting its history.
pub async fn deactivate_pay_cycle(
    db: &DatabaseConnection,
    user_id: &str,
    pay_cycle_id: i64,
) -> Result<pay_cycle::Model> {
    update_pay_cycle(
        db,
        user_id,
        pay_cycle_id,
        PayCycleUpdate {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await
}

/// All of a user's pay cycles, active ones first.
pub async fn get_pay_cycles(db: &DatabaseConnection, user_id: &str) -> Result<Vec<pay_cycle::Model>> {
    PayCycle::find()
        .filter(pay_cycle::Column::UserId.eq(user_id))
        .order_by_desc(pay_cycle::Column::IsActive)
        .order_by_asc(pay_cycle::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The user's primary active pay cycle (the oldest active one).
pub async fn active_pay_cycle<C>(conn: &C, user_id: &str) -> Result<Option<pay_cycle::Model>>
where
    C: ConnectionTrait,
{
    PayCycle::find()
        .filter(pay_cycle::Column::UserId.eq(user_id))
        .filter(pay_cycle::Column::IsActive.eq(true))
        .order_by_asc(pay_cycle::Column::Id)
        .one(conn)
        .await
        .map_err(Into::into)
}

pub(crate) async fn require_pay_cycle<C>(
    conn: &C,
    user_id: &str,
    pay_cycle_id: i64,
) -> Result<pay_cycle::Model>
where
    C: ConnectionTrait,
{
    PayCycle::find_by_id(pay_cycle_id)
        .one(conn)
        .await?
        .filter(|cycle| cycle.user_id == user_id)
        .ok_or(Error::PayCycleNotFound { pay_cycle_id })
}

/// Finds an instance by id.
pub async fn get_instance(
    db: &DatabaseConnection,
    instance_id: i64,
) -> Result<Option<pay_cycle_instance::Model>> {
    PayCycleInstance::find_by_id(instance_id)
        .one(db)
        .await
        .map_err(Into::into)
}

pub(crate) async fn require_instance<C>(conn: &C, instance_id: i64) -> Result<pay_cycle_instance::Model>
where
    C: ConnectionTrait,
{
    PayCycleInstance::find_by_id(instance_id)
        .one(conn)
        .await?
        .ok_or(Error::InstanceNotFound { instance_id })
}

/// The user's instance containing `date`.
///
/// Periods of one cycle never overlap, but two cycles can; the one with the
/// latest `period_start` wins.
pub async fn instance_for_date<C>(
    conn: &C,
    user_id: &str,
    date: NaiveDate,
) -> Result<Option<pay_cycle_instance::Model>>
where
    C: ConnectionTrait,
{
    PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::UserId.eq(user_id))
        .filter(pay_cycle_instance::Column::PeriodStart.lte(date))
        .filter(pay_cycle_instance::Column::PeriodEnd.gte(date))
        .order_by_desc(pay_cycle_instance::Column::PeriodStart)
        .order_by_desc(pay_cycle_instance::Column::Id)
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Produces (or fetches) the instance of a pay cycle covering `for_date`.
///
/// Idempotent for any date inside an already materialized period.
#[instrument(skip(db))]
pub async fn materialize_instance(
    db: &DatabaseConnection,
    pay_cycle_id: i64,
    for_date: NaiveDate,
) -> Result<pay_cycle_instance::Model> {
    let txn = db.begin().await?;
    let cycle = PayCycle::find_by_id(pay_cycle_id)
        .one(&txn)
        .await?
        .ok_or(Error::PayCycleNotFound { pay_cycle_id })?;
    let instance = materialize_in(&txn, &cycle, for_date).await?;
    txn.commit().await?;
    Ok(instance)
}

/// Materializes the user's current period from their active pay cycle.
pub async fn current_instance(
    db: &DatabaseConnection,
    user_id: &str,
    today: NaiveDate,
) -> Result<Option<pay_cycle_instance::Model>> {
    let txn = db.begin().await?;
    let Some(cycle) = active_pay_cycle(&txn, user_id).await? else {
        return Ok(None);
    };
    let instance = materialize_in(&txn, &cycle, today).await?;
    txn.commit().await?;
    Ok(Some(instance))
}

pub(crate) async fn materialize_in<C>(
    conn: &C,
    cycle: &pay_cycle::Model,
    for_date: NaiveDate,
) -> Result<pay_cycle_instance::Model>
where
    C: ConnectionTrait,
{
    let period = cycle.schedule()?.period_for(for_date)?;

    let covering = PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::PayCycleId.eq(cycle.id))
        .filter(pay_cycle_instance::Column::PeriodStart.lte(for_date))
        .filter(pay_cycle_instance::Column::PeriodEnd.gte(for_date))
        .order_by_desc(pay_cycle_instance::Column::PeriodStart)
        .one(conn)
        .await?;

    if let Some(existing) = covering {
        if existing.period_start == period.start && existing.period_end == period.end {
            return Ok(existing);
        }
        if !is_untouched(&existing) {
            // Confirmed history is never rewritten by a template edit.
            return Ok(existing);
        }
        info!(
            instance_id = existing.id,
            pay_cycle_id = cycle.id,
            "Replacing assumed instance after schedule change"
        );
        allocation_entity::Entity::delete_many()
            .filter(allocation_entity::Column::PayCycleInstanceId.eq(existing.id))
            .exec(conn)
            .await?;
        existing.delete(conn).await?;
    }

    reserve::settle_previous_period(conn, cycle.id, period.start).await?;

    PayCycleInstance::insert(pay_cycle_instance::ActiveModel {
        user_id: Set(cycle.user_id.clone()),
        pay_cycle_id: Set(cycle.id),
        period_start: Set(period.start),
        period_end: Set(period.end),
        expected_pay_date: Set(period.expected_pay_date),
        expected_amount: Set(cycle.expected_amount),
        actual_amount: Set(None),
        payday_type: Set(period.payday_type),
        is_assumed: Set(true),
        confirmed_at: Set(None),
        auto_confirmed_at: Set(None),
        requires_manual_reconfirm: Set(false),
        linked_transaction_id: Set(None),
        surplus_routed: Set(0.0),
        shortfall_covered: Set(0.0),
        rollover_processed: Set(false),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([
            pay_cycle_instance::Column::PayCycleId,
            pay_cycle_instance::Column::PeriodStart,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    let instance = PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::PayCycleId.eq(cycle.id))
        .filter(pay_cycle_instance::Column::PeriodStart.eq(period.start))
        .one(conn)
        .await?
        .ok_or(Error::NoActivePeriod { date: for_date })?;

    debug!(
        instance_id = instance.id,
        start = %instance.period_start,
        end = %instance.period_end,
        "Pay period materialized"
    );
    Ok(instance)
}

/// Never confirmed, never linked, never flagged.
fn is_untouched(instance: &pay_cycle_instance::Model) -> bool {
    instance.is_assumed
        && instance.confirmed_at.is_none()
        && instance.linked_transaction_id.is_none()
        && !instance.requires_manual_reconfirm
}

/// Instances waiting on the user: still assumed, or flagged for reconfirmation.
pub async fn pending_instances(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<pay_cycle_instance::Model>> {
    pending_in(db, user_id).await
}

pub(crate) async fn pending_in<C>(conn: &C, user_id: &str) -> Result<Vec<pay_cycle_instance::Model>>
where
    C: ConnectionTrait,
{
    PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::UserId.eq(user_id))
        .filter(
            Condition::any()
                .add(pay_cycle_instance::Column::IsAssumed.eq(true))
                .add(pay_cycle_instance::Column::RequiresManualReconfirm.eq(true)),
        )
        .order_by_asc(pay_cycle_instance::Column::PeriodStart)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// The user's most recent instances, newest first.
pub async fn instance_history(
    db: &DatabaseConnection,
    user_id: &str,
    limit: u64,
) -> Result<Vec<pay_cycle_instance::Model>> {
    PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::UserId.eq(user_id))
        .order_by_desc(pay_cycle_instance::Column::PeriodStart)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Confirms the income of a period.
///
/// `actual_amount` defaults to the linked row's amount, or to the expected
/// amount when a new row is written. Surplus over the allocations goes to the
/// reserve in the same transaction; a shortfall is returned, not fixed.
#[instrument(skip(db))]
pub async fn confirm_income(
    db: &DatabaseConnection,
    instance_id: i64,
    actual_amount: Option<f64>,
    link: IncomeLink,
    today: NaiveDate,
) -> Result<ConfirmOutcome> {
    let txn = db.begin().await?;
    let instance = require_instance(&txn, instance_id).await?;
    ensure_confirmable(&instance)?;

    let outcome = match link {
        IncomeLink::Create => {
            let actual = actual_amount.unwrap_or(instance.expected_amount);
            require_positive(actual)?;
            let actual = round_cents(actual);

            if let Some(tx_id) = instance.linked_transaction_id {
                // Still linked after a forced reconfirmation: correct the row in place.
                LedgerTransaction::update_many()
                    .col_expr(ledger_transaction::Column::Amount, Expr::value(actual))
                    .filter(ledger_transaction::Column::Id.eq(tx_id))
                    .exec(&txn)
                    .await?;
                confirm_linked(&txn, instance, actual, Some(tx_id), false).await?
            } else {
                let on_date = if instance.contains(today) {
                    today
                } else {
                    instance.expected_pay_date
                };
                let appended = ledger::append_in(
                    &txn,
                    NewTransaction::income(&instance.user_id, actual, "salary", on_date)
                        .salary_for(instance.id)
                        .source(TransactionSource::SalaryConfirmation),
                    None,
                )
                .await?;
                appended
                    .confirmation
                    .ok_or(Error::InstanceNotFound { instance_id })?
            }
        }
        IncomeLink::Existing(tx_id) => {
            let row = LedgerTransaction::find_by_id(tx_id)
                .one(&txn)
                .await?
                .filter(|row| row.user_id == instance.user_id)
                .ok_or(Error::TransactionNotFound {
                    transaction_id: tx_id,
                })?;
            if row.transaction_type != TransactionType::Income {
                return Err(Error::validation("only income can confirm a pay period"));
            }
            if row.pay_cycle_instance_id.is_some_and(|id| id != instance.id) {
                return Err(Error::validation(format!(
                    "transaction {tx_id} already confirms another pay period"
                )));
            }

            let mut active: ledger_transaction::ActiveModel = row.clone().into();
            active.pay_cycle_instance_id = Set(Some(instance.id));
            active.update(&txn).await?;

            let actual = round_cents(actual_amount.unwrap_or(row.amount));
            require_positive(actual)?;
            confirm_linked(&txn, instance, actual, Some(tx_id), false).await?
        }
    };

    txn.commit().await?;
    Ok(outcome)
}

fn ensure_confirmable(instance: &pay_cycle_instance::Model) -> Result<()> {
    // A system-forced confirmation can be replaced once by the real figure.
    if instance.is_confirmed() && instance.auto_confirmed_at.is_none() {
        return Err(Error::AlreadyConfirmed {
            instance_id: instance.id,
        });
    }
    Ok(())
}

/// Marks an instance confirmed against a ledger row and reconciles it.
pub(crate) async fn confirm_linked<C>(
    conn: &C,
    instance: pay_cycle_instance::Model,
    actual: f64,
    linked_transaction_id: Option<i64>,
    auto: bool,
) -> Result<ConfirmOutcome>
where
    C: ConnectionTrait,
{
    ensure_confirmable(&instance)?;
    let instance_id = instance.id;
    let now = chrono::Utc::now();

    let mut active: pay_cycle_instance::ActiveModel = instance.into();
    active.is_assumed = Set(false);
    active.actual_amount = Set(Some(actual));
    active.confirmed_at = Set(Some(now));
    active.auto_confirmed_at = Set(auto.then_some(now));
    active.requires_manual_reconfirm = Set(false);
    active.linked_transaction_id = Set(linked_transaction_id);
    let instance = active.update(conn).await?;

    let allocations = allocation::refresh_instance(conn, &instance).await?;
    let (instance, surplus_routed) = reserve::route_surplus_in(conn, instance).await?;

    let allocated = round_cents(allocations.iter().map(|a| a.allocated_amount).sum());
    let deficit = round_cents(allocated - actual - instance.shortfall_covered);
    let shortfall = (deficit > EPSILON).then_some(Shortfall {
        allocated,
        actual,
        deficit,
    });

    if let Some(short) = shortfall {
        warn!(
            instance_id,
            allocated = short.allocated,
            actual = short.actual,
            deficit = short.deficit,
            "Income below allocations"
        );
    }
    info!(instance_id, actual, surplus_routed, auto, "Pay period confirmed");

    Ok(ConfirmOutcome {
        instance,
        allocations,
        surplus_routed,
        shortfall,
    })
}

/// Looks for an unlinked income row that is probably this period's salary.
///
/// The row must land within [`SALARY_MATCH_DAYS`] of the expected pay date
/// and within [`SALARY_MATCH_TOLERANCE`] of `amount`. The closest amount wins.
pub async fn find_salary_candidate(
    db: &DatabaseConnection,
    instance_id: i64,
    amount: f64,
) -> Result<Option<ledger_transaction::Model>> {
    let instance = require_instance(db, instance_id).await?;
    let from = shift(instance.expected_pay_date, -SALARY_MATCH_DAYS)?;
    let to = shift(instance.expected_pay_date, SALARY_MATCH_DAYS)?;

    let candidates = LedgerTransaction::find()
        .filter(ledger_transaction::Column::UserId.eq(instance.user_id.as_str()))
        .filter(ledger_transaction::Column::TransactionType.eq(TransactionType::Income))
        .filter(ledger_transaction::Column::PayCycleInstanceId.is_null())
        .filter(ledger_transaction::Column::TransactionDate.between(from, to))
        .all(db)
        .await?;

    let tolerance = amount.abs() * SALARY_MATCH_TOLERANCE;
    Ok(candidates
        .into_iter()
        .filter(|row| (row.amount - amount).abs() <= tolerance)
        .min_by(|a, b| (a.amount - amount).abs().total_cmp(&(b.amount - amount).abs())))
}

/// Drops an instance back to assumed after its salary row disappeared.
///
/// Allocations and the reserve are left alone; the instance is flagged so
/// surplus and shortfall figures are not trusted until it is reconfirmed.
pub(crate) async fn handle_orphaned_link<C>(
    conn: &C,
    instance: pay_cycle_instance::Model,
) -> Result<pay_cycle_instance::Model>
where
    C: ConnectionTrait,
{
    let instance_id = instance.id;
    let mut active: pay_cycle_instance::ActiveModel = instance.into();
    active.is_assumed = Set(true);
    active.confirmed_at = Set(None);
    active.auto_confirmed_at = Set(None);
    active.actual_amount = Set(None);
    active.linked_transaction_id = Set(None);
    active.requires_manual_reconfirm = Set(true);
    let orphaned = active.update(conn).await?;

    warn!(instance_id, "Salary link removed; pay period needs reconfirmation");
    Ok(orphaned)
}

/// Confirms overdue assumed periods at their expected amount.
///
/// A period is overdue once `expected_pay_date + grace_days` is before
/// `today`. Periods flagged for manual reconfirmation are skipped. Each
/// period is confirmed in its own transaction.
#[instrument(skip(db))]
pub async fn auto_confirm_due(
    db: &DatabaseConnection,
    user_id: Option<&str>,
    today: NaiveDate,
    grace_days: i64,
) -> Result<Vec<ConfirmOutcome>> {
    let deadline = shift(today, -grace_days)?;
    let mut query = PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::IsAssumed.eq(true))
        .filter(pay_cycle_instance::Column::RequiresManualReconfirm.eq(false))
        .filter(pay_cycle_instance::Column::ExpectedPayDate.lt(deadline))
        .order_by_asc(pay_cycle_instance::Column::ExpectedPayDate);
    if let Some(user_id) = user_id {
        query = query.filter(pay_cycle_instance::Column::UserId.eq(user_id));
    }
    let due = query.all(db).await?;

    let mut confirmed = Vec::with_capacity(due.len());
    for instance in due {
        let txn = db.begin().await?;
        let expected = instance.expected_amount;
        let outcome = confirm_linked(&txn, instance, expected, None, true).await?;
        txn.commit().await?;
        confirmed.push(outcome);
    }

    if !confirmed.is_empty() {
        info!(count = confirmed.len(), "Auto-confirmed overdue pay periods");
    }
    Ok(confirmed)
}

/// Flags instances for manual reconfirmation after upstream terms changed.
///
/// Only the flag moves; balances and links are untouched. Returns how many
/// instances were flagged.
#[instrument(skip(db))]
pub async fn force_reconfirmation(db: &DatabaseConnection, scope: ReconfirmScope) -> Result<u64> {
    let mut update = PayCycleInstance::update_many()
        .col_expr(
            pay_cycle_instance::Column::RequiresManualReconfirm,
            Expr::value(true),
        )
        .filter(pay_cycle_instance::Column::RequiresManualReconfirm.eq(false));
    if let ReconfirmScope::User(user_id) = &scope {
        update = update.filter(pay_cycle_instance::Column::UserId.eq(user_id.as_str()));
    }
    let flagged = update.exec(db).await?.rows_affected;
    warn!(?scope, flagged, "Forced reconfirmation");
    Ok(flagged)
}

fn validated_label(label: &str) -> Result<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("pay cycle label cannot be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{
        core::{allocation::AllocationRule, ledger::append_transaction},
        entities::{Frequency, OverflowTransaction, PaydayType, ReserveSource},
        test_utils::*,
    };

    #[tokio::test]
    async fn test_create_pay_cycle_validation() -> Result<()> {
        let db = setup_test_db().await?;

        let result =
            create_pay_cycle(&db, TEST_USER, "Salary", 0.0, Schedule::monthly(15).unwrap()).await;
        assert!(matches!(result.unwrap_err(), Error::InvalidAmount { .. }));

        let result =
            create_pay_cycle(&db, TEST_USER, " ", 100.0, Schedule::monthly(15).unwrap()).await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        let cycle = create_pay_cycle(
            &db,
            TEST_USER,
            "Salary",
            30000.0,
            Schedule::bimonthly(15, 30).unwrap(),
        )
        .await?;
        assert_eq!(cycle.frequency, Frequency::Bimonthly);
        assert_eq!(cycle.pay_day_1, Some(15));
        assert_eq!(cycle.pay_day_2, Some(30));
        assert_eq!(cycle.pay_day_of_week, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let cycle = create_test_pay_cycle(&db, 20000.0).await?;
        let food = create_test_envelope(&db, "Food").await?;

        let first = materialize_instance(&db, cycle.id, date(2025, 1, 3)).await?;
        allocation::allocate(&db, first.id, food.id, AllocationRule::fixed(1000.0)).await?;
        let again = materialize_instance(&db, cycle.id, date(2025, 1, 28)).await?;

        assert_eq!(first.id, again.id);
        assert_eq!(first.period_start, date(2025, 1, 1));
        assert_eq!(first.period_end, date(2025, 1, 31));
        assert_eq!(first.expected_pay_date, date(2025, 1, 15));
        assert!(first.is_assumed);
        assert_eq!(PayCycleInstance::find().count(&db).await?, 1);
        assert_eq!(
            allocation::allocations_for_instance(&db, first.id).await?.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_assumed_instance_rebuilt_after_schedule_change() -> Result<()> {
        let db = setup_test_db().await?;
        let cycle = create_test_pay_cycle(&db, 20000.0).await?;
        let monthly = materialize_instance(&db, cycle.id, date(2025, 1, 20)).await?;

        update_pay_cycle(
            &db,
            TEST_USER,
            cycle.id,
            PayCycleUpdate {
                schedule: Some(Schedule::bimonthly(15, 30).unwrap()),
                ..Default::default()
            },
        )
        .await?;

        let rebuilt = materialize_instance(&db, cycle.id, date(2025, 1, 20)).await?;
        assert_eq!(monthly.period_end, date(2025, 1, 31));
        assert_eq!(rebuilt.payday_type, PaydayType::Kinsenas);
        assert_eq!(rebuilt.period_end, date(2025, 1, 29));
        assert_eq!(PayCycleInstance::find().count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_confirmed_instance_survives_schedule_change() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        confirm_test_income(&db, instance.id, 20000.0).await?;

        update_pay_cycle(
            &db,
            TEST_USER,
            instance.pay_cycle_id,
            PayCycleUpdate {
                schedule: Some(Schedule::weekly(1).unwrap()),
                ..Default::default()
            },
        )
        .await?;

        let kept = materialize_instance(&db, instance.pay_cycle_id, date(2025, 1, 20)).await?;
        assert_eq!(kept.id, instance.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_surplus_routed_on_confirmation() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = create_test_envelope(&db, "Food").await?;
        let rent = create_test_envelope(&db, "Rent").await?;
        allocation::allocate(&db, instance.id, food.id, AllocationRule::fixed(8000.0)).await?;
        allocation::allocate(&db, instance.id, rent.id, AllocationRule::fixed(10000.0)).await?;

        let outcome = confirm_income(
            &db,
            instance.id,
            Some(21000.0),
            IncomeLink::Create,
            date(2025, 1, 15),
        )
        .await?;

        assert_eq!(outcome.surplus_routed, 3000.0);
        assert!(outcome.shortfall.is_none());
        assert!(outcome.instance.is_confirmed());
        assert_eq!(outcome.instance.actual_amount, Some(21000.0));
        assert!(outcome.instance.linked_transaction_id.is_some());
        let allocated: Vec<f64> = outcome
            .allocations
            .iter()
            .map(|a| a.allocated_amount)
            .collect();
        assert_eq!(allocated, vec![8000.0, 10000.0]);

        let log = OverflowTransaction::find().all(&db).await?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].amount, 3000.0);
        assert_eq!(log[0].source, ReserveSource::IncomeSurplus);
        assert_eq!(reserve::balance(&db, TEST_USER).await?, 3000.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_double_confirmation_rejected() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        confirm_test_income(&db, instance.id, 20000.0).await?;

        let result = confirm_test_income(&db, instance.id, 20000.0).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::AlreadyConfirmed { .. }
        ));
        // The failed attempt wrote nothing
        assert_eq!(LedgerTransaction::find().count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_shortfall_surfaced_not_resolved() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = create_test_envelope(&db, "Food").await?;
        allocation::allocate(&db, instance.id, food.id, AllocationRule::fixed(18000.0)).await?;

        let outcome = confirm_test_income(&db, instance.id, 15000.0).await?;
        let shortfall = outcome.shortfall.unwrap();
        assert_eq!(shortfall.deficit, 3000.0);
        assert_eq!(outcome.surplus_routed, 0.0);
        assert_eq!(reserve::balance(&db, TEST_USER).await?, 0.0);
        assert!(matches!(
            outcome.into_balanced().unwrap_err(),
            Error::ShortfallUnresolved { deficit, .. } if deficit == 3000.0
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_orphaned_salary_then_reconfirm() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let outcome = confirm_test_income(&db, instance.id, 20000.0).await?;
        let salary_id = outcome.instance.linked_transaction_id.unwrap();

        ledger::delete_transaction(&db, TEST_USER, salary_id).await?;
        let orphaned = get_instance(&db, instance.id).await?.unwrap();
        assert!(orphaned.is_assumed);
        assert!(orphaned.confirmed_at.is_none());
        assert!(orphaned.actual_amount.is_none());
        assert!(orphaned.requires_manual_reconfirm);

        // Orphans are left for the user, never auto-confirmed
        let swept = auto_confirm_due(&db, Some(TEST_USER), date(2025, 3, 1), 3).await?;
        assert!(swept.is_empty());

        let reconfirmed = confirm_test_income(&db, instance.id, 20000.0).await?;
        assert!(reconfirmed.instance.is_confirmed());
        assert!(!reconfirmed.instance.requires_manual_reconfirm);
        Ok(())
    }

    #[tokio::test]
    async fn test_salary_link_through_ledger_confirms() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let appended = append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 20500.0, "salary", date(2025, 1, 15))
                .salary_for(instance.id),
            None,
        )
        .await?;

        let confirmed = get_instance(&db, instance.id).await?.unwrap();
        assert!(confirmed.is_confirmed());
        assert_eq!(confirmed.linked_transaction_id, Some(appended.transaction.id));
        assert_eq!(confirmed.surplus_routed, 20500.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_and_link_salary_candidate() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let near = append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 19500.0, "salary", date(2025, 1, 16)),
            None,
        )
        .await?;
        // Too far from the pay date
        append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 20000.0, "salary", date(2025, 1, 20)),
            None,
        )
        .await?;
        // Amount too different
        append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 12000.0, "salary", date(2025, 1, 15)),
            None,
        )
        .await?;

        let candidate = find_salary_candidate(&db, instance.id, 20000.0)
            .await?
            .unwrap();
        assert_eq!(candidate.id, near.transaction.id);

        let outcome = confirm_income(
            &db,
            instance.id,
            None,
            IncomeLink::Existing(candidate.id),
            date(2025, 1, 16),
        )
        .await?;
        assert_eq!(outcome.instance.actual_amount, Some(19500.0));
        assert_eq!(outcome.instance.linked_transaction_id, Some(candidate.id));

        // Linked rows are no longer candidates
        assert!(find_salary_candidate(&db, instance.id, 19500.0)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_auto_confirm_after_grace() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;

        // Pay date 2025-01-15 plus 3 grace days is not yet past on the 18th
        let none = auto_confirm_due(&db, None, date(2025, 1, 18), 3).await?;
        assert!(none.is_empty());

        let done = auto_confirm_due(&db, None, date(2025, 1, 19), 3).await?;
        assert_eq!(done.len(), 1);
        let confirmed = &done[0].instance;
        assert_eq!(confirmed.id, instance.id);
        assert!(confirmed.auto_confirmed_at.is_some());
        assert_eq!(confirmed.actual_amount, Some(20000.0));

        // The real figure can still replace a forced confirmation once
        let manual = confirm_test_income(&db, instance.id, 20000.0).await?;
        assert!(manual.instance.auto_confirmed_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_force_reconfirmation_scopes() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        confirm_test_income(&db, instance.id, 20000.0).await?;
        let other = create_pay_cycle(
            &db,
            "other_user",
            "Salary",
            5000.0,
            Schedule::Daily,
        )
        .await?;
        materialize_instance(&db, other.id, date(2025, 1, 5)).await?;

        assert_eq!(
            force_reconfirmation(&db, ReconfirmScope::User(TEST_USER.to_string())).await?,
            1
        );
        let flagged = get_instance(&db, instance.id).await?.unwrap();
        assert!(flagged.requires_manual_reconfirm);
        assert_eq!(flagged.actual_amount, Some(20000.0));
        // Nothing allocated, so the whole first confirmation was surplus
        assert_eq!(reserve::balance(&db, TEST_USER).await?, 20000.0);

        assert_eq!(force_reconfirmation(&db, ReconfirmScope::All).await?, 1);

        // Reconfirming corrects the still-linked salary row instead of adding one
        let outcome = confirm_test_income(&db, instance.id, 21000.0).await?;
        assert_eq!(outcome.surplus_routed, 1000.0);
        assert_eq!(reserve::balance(&db, TEST_USER).await?, 21000.0);
        let rows = LedgerTransaction::find().all(&db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 21000.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_and_history() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let february =
            materialize_instance(&db, instance.pay_cycle_id, date(2025, 2, 10)).await?;
        confirm_test_income(&db, instance.id, 20000.0).await?;

        let pending = pending_instances(&db, TEST_USER).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, february.id);

        let history = instance_history(&db, TEST_USER, 10).await?;
        assert_eq!(history[0].id, february.id);
        assert_eq!(history[1].id, instance.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_current_instance_uses_active_cycle() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(current_instance(&db, TEST_USER, date(2025, 1, 5)).await?.is_none());

        let cycle = create_test_pay_cycle(&db, 20000.0).await?;
        let current = current_instance(&db, TEST_USER, date(2025, 1, 5))
            .await?
            .unwrap();
        assert_eq!(current.pay_cycle_id, cycle.id);

        deactivate_pay_cycle(&db, TEST_USER, cycle.id).await?;
        assert!(current_instance(&db, TEST_USER, date(2025, 1, 5)).await?.is_none());
        Ok(())
    }
}
