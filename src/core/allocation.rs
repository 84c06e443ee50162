//! Allocation engine - per-period envelope budgets and the spent cache.
//!
//! `cached_spent` is a materialized sum over the ledger. Every write path that
//! touches an envelope-tagged expense calls [`recompute_spent`] inside its own
//! database transaction, so the cache converges as soon as the write commits.

use crate::{
    core::{EPSILON, envelope::require_envelope, exceeds, pay_cycle, round_cents},
    entities::{
        Allocation, Envelope, LedgerTransaction, PaydayType, RolloverPolicy, TransactionType,
        allocation, envelope, ledger_transaction, pay_cycle_instance,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// A single budget figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Share {
    /// Fixed amount
    Fixed(f64),
    /// Percentage (0-100) of the period's expected income
    Percentage(f64),
}

/// How an envelope's budget is derived for a period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AllocationRule {
    /// Same share for every period
    Flat(Share),
    /// Different shares for the two halves of a bimonthly month
    PerPayday {
        /// Share for the first-half period
        kinsenas: Share,
        /// Share for the second-half period
        katapusan: Share,
    },
}

impl AllocationRule {
    /// Fixed amount for every period.
    #[must_use]
    pub const fn fixed(amount: f64) -> Self {
        Self::Flat(Share::Fixed(amount))
    }

    /// Percentage of expected income for every period.
    #[must_use]
    pub const fn percentage(percent: f64) -> Self {
        Self::Flat(Share::Percentage(percent))
    }

    /// Resolves the rule against a period, returning the amount and the
    /// percentage it came from, if any.
    pub fn resolve(&self, instance: &pay_cycle_instance::Model) -> Result<(f64, Option<f64>)> {
        let share = match (self, instance.payday_type) {
            (Self::Flat(share), _) => *share,
            (Self::PerPayday { kinsenas, .. }, PaydayType::Kinsenas) => *kinsenas,
            (Self::PerPayday { katapusan, .. }, PaydayType::Katapusan) => *katapusan,
            (Self::PerPayday { .. }, PaydayType::Single) => {
                return Err(Error::validation(
                    "per-payday shares only apply to bimonthly pay periods",
                ));
            }
        };

        match share {
            Share::Fixed(amount) => {
                if !amount.is_finite() || amount < 0.0 {
                    return Err(Error::InvalidAmount { amount });
                }
                Ok((round_cents(amount), None))
            }
            Share::Percentage(percent) => {
                if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
                    return Err(Error::validation(format!(
                        "percentage must be between 0 and 100, got {percent}"
                    )));
                }
                Ok((
                    round_cents(instance.expected_amount * percent / 100.0),
                    Some(percent),
                ))
            }
        }
    }
}

/// Whether spending has gone past the envelope's cap for the period.
#[must_use]
pub fn check_overspend(alloc: &allocation::Model) -> bool {
    exceeds(alloc.cached_spent, alloc.cap())
}

/// Sets (or replaces) the budget of one envelope in one period.
///
/// The sum of all allocations in the period may not exceed its expected
/// income. A carry-over envelope's stored overflow is moved into the new
/// allocation's rollover when the row is first created.
#[instrument(skip(db, rule))]
pub async fn allocate(
    db: &DatabaseConnection,
    instance_id: i64,
    envelope_id: i64,
    rule: AllocationRule,
) -> Result<allocation::Model> {
    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    let (amount, percent) = rule.resolve(&instance)?;
    let alloc = allocate_in(&txn, &instance, envelope_id, amount, percent).await?;
    txn.commit().await?;
    Ok(alloc)
}

/// Replaces every allocation of a period in one go.
///
/// Envelopes with an allocation that are missing from `rules` keep their row
/// (so spending stays tracked) but drop to zero. Only periods that are not
/// yet confirmed can be re-planned this way.
#[instrument(skip(db, rules))]
pub async fn fill_allocations(
    db: &DatabaseConnection,
    instance_id: i64,
    rules: &[(i64, AllocationRule)],
) -> Result<Vec<allocation::Model>> {
    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    if instance.is_confirmed() {
        return Err(Error::AlreadyConfirmed { instance_id });
    }

    let mut resolved = Vec::with_capacity(rules.len());
    for (envelope_id, rule) in rules {
        if resolved.iter().any(|(id, _, _)| id == envelope_id) {
            return Err(Error::validation(format!(
                "envelope {envelope_id} appears twice"
            )));
        }
        let (amount, percent) = rule.resolve(&instance)?;
        resolved.push((*envelope_id, amount, percent));
    }

    let requested_total: f64 = resolved.iter().map(|(_, amount, _)| amount).sum();
    if exceeds(requested_total, instance.expected_amount) {
        return Err(Error::OverAllocated {
            base: instance.expected_amount,
            requested_total,
        });
    }

    Allocation::update_many()
        .col_expr(allocation::Column::AllocatedAmount, Expr::value(0.0))
        .col_expr(
            allocation::Column::TargetPercentage,
            Expr::value(Option::<f64>::None),
        )
        .filter(allocation::Column::PayCycleInstanceId.eq(instance_id))
        .exec(&txn)
        .await?;

    for (envelope_id, amount, percent) in resolved {
        allocate_in(&txn, &instance, envelope_id, amount, percent).await?;
    }

    let allocations = allocations_in(&txn, instance_id).await?;
    txn.commit().await?;
    info!(instance_id, count = allocations.len(), "Allocations filled");
    Ok(allocations)
}

/// Changes the fixed amount of an existing allocation.
///
/// Once a period is confirmed its budgets can shrink only down to what has
/// already been spent.
#[instrument(skip(db))]
pub async fn update_allocation(
    db: &DatabaseConnection,
    instance_id: i64,
    envelope_id: i64,
    new_amount: f64,
) -> Result<allocation::Model> {
    if !new_amount.is_finite() || new_amount < 0.0 {
        return Err(Error::InvalidAmount { amount: new_amount });
    }
    let new_amount = round_cents(new_amount);

    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    let current = find_allocation(&txn, instance_id, envelope_id)
        .await?
        .ok_or(Error::AllocationNotFound {
            instance_id,
            envelope_id,
        })?;
    let current = refresh_allocation(&txn, &instance, current).await?;

    let others = others_total(&txn, instance_id, envelope_id).await?;
    if exceeds(others + new_amount, instance.expected_amount) {
        return Err(Error::OverAllocated {
            base: instance.expected_amount,
            requested_total: others + new_amount,
        });
    }
    if instance.is_confirmed() && exceeds(current.cached_spent, new_amount + current.rollover_amount)
    {
        return Err(Error::validation(format!(
            "cannot lower the budget below the {:.2} already spent",
            current.cached_spent
        )));
    }

    let mut active: allocation::ActiveModel = current.into();
    active.allocated_amount = Set(new_amount);
    active.target_percentage = Set(None);
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// All allocations of a period, in envelope display order.
pub async fn allocations_for_instance(
    db: &DatabaseConnection,
    instance_id: i64,
) -> Result<Vec<allocation::Model>> {
    allocations_in(db, instance_id).await
}

/// One envelope's allocation in a period.
pub async fn get_allocation(
    db: &DatabaseConnection,
    instance_id: i64,
    envelope_id: i64,
) -> Result<Option<allocation::Model>> {
    find_allocation(db, instance_id, envelope_id).await
}

/// Recomputes the spent cache of the allocation covering `transaction_date`.
///
/// The covering period is the user's instance containing the date with the
/// latest start. Returns `None` when there is no such period or the envelope
/// has no allocation in it.
pub async fn recompute_spent<C>(
    conn: &C,
    user_id: &str,
    envelope_id: i64,
    transaction_date: NaiveDate,
) -> Result<Option<allocation::Model>>
where
    C: ConnectionTrait,
{
    Ok(allocation_for_date(conn, user_id, envelope_id, transaction_date)
        .await?
        .map(|(_, alloc)| alloc))
}

/// Finds the period covering `date` and the envelope's allocation in it,
/// with the spent cache freshly recomputed.
pub(crate) async fn allocation_for_date<C>(
    conn: &C,
    user_id: &str,
    envelope_id: i64,
    date: NaiveDate,
) -> Result<Option<(pay_cycle_instance::Model, allocation::Model)>>
where
    C: ConnectionTrait,
{
    let Some(instance) = pay_cycle::instance_for_date(conn, user_id, date).await? else {
        return Ok(None);
    };
    let Some(alloc) = find_allocation(conn, instance.id, envelope_id).await? else {
        return Ok(None);
    };
    let alloc = refresh_allocation(conn, &instance, alloc).await?;
    Ok(Some((instance, alloc)))
}

/// Rewrites one allocation's spent cache from the ledger.
pub(crate) async fn refresh_allocation<C>(
    conn: &C,
    instance: &pay_cycle_instance::Model,
    alloc: allocation::Model,
) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    let spent = spent_in_period(
        conn,
        &instance.user_id,
        alloc.envelope_id,
        instance.period_start,
        instance.period_end,
    )
    .await?;
    if (spent - alloc.cached_spent).abs() < f64::EPSILON {
        return Ok(alloc);
    }

    debug!(
        allocation_id = alloc.id,
        old = alloc.cached_spent,
        new = spent,
        "Spent cache refreshed"
    );
    let mut active: allocation::ActiveModel = alloc.into();
    active.cached_spent = Set(spent);
    active.update(conn).await.map_err(Into::into)
}

/// Refreshes every allocation of a period.
pub(crate) async fn refresh_instance<C>(
    conn: &C,
    instance: &pay_cycle_instance::Model,
) -> Result<Vec<allocation::Model>>
where
    C: ConnectionTrait,
{
    let mut refreshed = Vec::new();
    for alloc in allocations_in(conn, instance.id).await? {
        refreshed.push(refresh_allocation(conn, instance, alloc).await?);
    }
    Ok(refreshed)
}

/// Sum of the user's expenses in an envelope between two dates, inclusive.
pub async fn spent_in_period<C>(
    conn: &C,
    user_id: &str,
    envelope_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<f64>
where
    C: ConnectionTrait,
{
    let amounts: Vec<f64> = LedgerTransaction::find()
        .select_only()
        .column(ledger_transaction::Column::Amount)
        .filter(ledger_transaction::Column::UserId.eq(user_id))
        .filter(ledger_transaction::Column::EnvelopeId.eq(envelope_id))
        .filter(ledger_transaction::Column::TransactionType.eq(TransactionType::Expense))
        .filter(ledger_transaction::Column::TransactionDate.between(start, end))
        .into_tuple::<f64>()
        .all(conn)
        .await?;
    Ok(round_cents(amounts.iter().sum()))
}

pub(crate) async fn allocations_in<C>(conn: &C, instance_id: i64) -> Result<Vec<allocation::Model>>
where
    C: ConnectionTrait,
{
    let rows = Allocation::find()
        .find_also_related(Envelope)
        .filter(allocation::Column::PayCycleInstanceId.eq(instance_id))
        .order_by_asc(envelope::Column::SortOrder)
        .order_by_asc(allocation::Column::Id)
        .all(conn)
        .await?;
    Ok(rows.into_iter().map(|(alloc, _)| alloc).collect())
}

pub(crate) async fn find_allocation<C>(
    conn: &C,
    instance_id: i64,
    envelope_id: i64,
) -> Result<Option<allocation::Model>>
where
    C: ConnectionTrait,
{
    Allocation::find()
        .filter(allocation::Column::PayCycleInstanceId.eq(instance_id))
        .filter(allocation::Column::EnvelopeId.eq(envelope_id))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Upserts an allocation with an already resolved amount.
pub(crate) async fn allocate_in<C>(
    conn: &C,
    instance: &pay_cycle_instance::Model,
    envelope_id: i64,
    amount: f64,
    percent: Option<f64>,
) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    let envelope = require_envelope(conn, &instance.user_id, envelope_id).await?;

    let others = others_total(conn, instance.id, envelope_id).await?;
    if exceeds(others + amount, instance.expected_amount) {
        return Err(Error::OverAllocated {
            base: instance.expected_amount,
            requested_total: others + amount,
        });
    }

    if let Some(existing) = find_allocation(conn, instance.id, envelope_id).await? {
        let mut active: allocation::ActiveModel = existing.into();
        active.allocated_amount = Set(amount);
        active.target_percentage = Set(percent);
        return active.update(conn).await.map_err(Into::into);
    }

    insert_allocation(conn, instance, &envelope, amount, percent).await
}

/// Creates a fresh allocation row, draining the envelope's carried overflow.
pub(crate) async fn insert_allocation<C>(
    conn: &C,
    instance: &pay_cycle_instance::Model,
    envelope: &envelope::Model,
    amount: f64,
    percent: Option<f64>,
) -> Result<allocation::Model>
where
    C: ConnectionTrait,
{
    let carried = if envelope.is_rollover
        && envelope.rollover_policy == RolloverPolicy::CarryInEnvelope
        && envelope.overflow_balance > EPSILON
    {
        Envelope::update_many()
            .col_expr(envelope::Column::OverflowBalance, Expr::value(0.0))
            .filter(envelope::Column::Id.eq(envelope.id))
            .exec(conn)
            .await?;
        envelope.overflow_balance
    } else {
        0.0
    };

    let spent = spent_in_period(
        conn,
        &instance.user_id,
        envelope.id,
        instance.period_start,
        instance.period_end,
    )
    .await?;

    let created = allocation::ActiveModel {
        user_id: Set(instance.user_id.clone()),
        pay_cycle_instance_id: Set(instance.id),
        envelope_id: Set(envelope.id),
        target_percentage: Set(percent),
        allocated_amount: Set(amount),
        cached_spent: Set(spent),
        rollover_amount: Set(carried),
        rollover_settled: Set(false),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    if carried > 0.0 {
        info!(
            envelope_id = envelope.id,
            instance_id = instance.id,
            carried,
            "Carried overflow into new allocation"
        );
    }
    Ok(created)
}

/// Sum of allocated amounts in a period, ignoring one envelope.
async fn others_total<C>(conn: &C, instance_id: i64, except_envelope_id: i64) -> Result<f64>
where
    C: ConnectionTrait,
{
    sum_allocated(conn, instance_id, Some(except_envelope_id)).await
}

/// Total allocated across a period.
pub(crate) async fn allocated_total<C>(conn: &C, instance_id: i64) -> Result<f64>
where
    C: ConnectionTrait,
{
    sum_allocated(conn, instance_id, None).await
}

async fn sum_allocated<C>(conn: &C, instance_id: i64, except_envelope_id: Option<i64>) -> Result<f64>
where
    C: ConnectionTrait,
{
    let mut query = Allocation::find()
        .select_only()
        .column(allocation::Column::AllocatedAmount)
        .filter(allocation::Column::PayCycleInstanceId.eq(instance_id));
    if let Some(envelope_id) = except_envelope_id {
        query = query.filter(allocation::Column::EnvelopeId.ne(envelope_id));
    }
    let amounts: Vec<f64> = query.into_tuple::<f64>().all(conn).await?;
    Ok(round_cents(amounts.iter().sum()))
}
