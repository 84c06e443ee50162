//! Overflow reserve (the cookie jar) - per-user buffer with its own log.
//!
//! The balance is only ever moved together with a log row in the same
//! transaction, so it always equals deposits minus withdrawals. Withdrawals
//! are a single conditional `UPDATE`; a concurrent withdrawal that would take
//! the balance below zero affects no row and is rejected.

use crate::{
    core::{
        EPSILON, allocation, envelope::require_envelope, pay_cycle, require_positive, round_cents,
    },
    entities::{
        Allocation, Envelope, OverflowReserve, OverflowTransaction, PayCycleInstance,
        ReserveMovement, ReserveSource, RolloverPolicy, allocation as allocation_entity, envelope,
        overflow_reserve, overflow_transaction, pay_cycle_instance,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{
    QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, info, instrument};

/// Optional links from a reserve movement to what caused it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReserveRefs {
    /// Envelope involved
    pub envelope_id: Option<i64>,
    /// Period involved
    pub instance_id: Option<i64>,
}

impl ReserveRefs {
    /// No links.
    pub const NONE: Self = Self {
        envelope_id: None,
        instance_id: None,
    };

    /// Links to a period only.
    #[must_use]
    pub const fn instance(instance_id: i64) -> Self {
        Self {
            envelope_id: None,
            instance_id: Some(instance_id),
        }
    }

    /// Links to an envelope within a period.
    #[must_use]
    pub const fn envelope_in(envelope_id: i64, instance_id: i64) -> Self {
        Self {
            envelope_id: Some(envelope_id),
            instance_id: Some(instance_id),
        }
    }
}

/// The user's reserve, created empty on first use.
pub async fn get_reserve(db: &DatabaseConnection, user_id: &str) -> Result<overflow_reserve::Model> {
    get_or_create_in(db, user_id).await
}

/// Current reserve balance; zero for users who never touched it.
pub async fn balance(db: &DatabaseConnection, user_id: &str) -> Result<f64> {
    Ok(OverflowReserve::find()
        .filter(overflow_reserve::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .map_or(0.0, |reserve| reserve.current_balance))
}

pub(crate) async fn get_or_create_in<C>(conn: &C, user_id: &str) -> Result<overflow_reserve::Model>
where
    C: ConnectionTrait,
{
    OverflowReserve::insert(overflow_reserve::ActiveModel {
        user_id: Set(user_id.to_string()),
        current_balance: Set(0.0),
        goal_amount: Set(None),
        goal_name: Set(None),
        updated_at: Set(chrono::Utc::now()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(overflow_reserve::Column::UserId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    OverflowReserve::find()
        .filter(overflow_reserve::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| Error::Config {
            message: format!("reserve row for {user_id} missing after insert"),
        })
}

/// Adds money to the reserve and logs it.
#[instrument(skip(db))]
pub async fn deposit(
    db: &DatabaseConnection,
    user_id: &str,
    amount: f64,
    source: ReserveSource,
    refs: ReserveRefs,
) -> Result<overflow_transaction::Model> {
    let txn = db.begin().await?;
    let logged = deposit_in(&txn, user_id, amount, source, refs).await?;
    txn.commit().await?;
    Ok(logged)
}

pub(crate) async fn deposit_in<C>(
    conn: &C,
    user_id: &str,
    amount: f64,
    source: ReserveSource,
    refs: ReserveRefs,
) -> Result<overflow_transaction::Model>
where
    C: ConnectionTrait,
{
    require_positive(amount)?;
    let amount = round_cents(amount);
    get_or_create_in(conn, user_id).await?;

    OverflowReserve::update_many()
        .col_expr(
            overflow_reserve::Column::CurrentBalance,
            Expr::col(overflow_reserve::Column::CurrentBalance).add(amount),
        )
        .col_expr(
            overflow_reserve::Column::UpdatedAt,
            Expr::value(chrono::Utc::now()),
        )
        .filter(overflow_reserve::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;

    let logged = log_movement(conn, user_id, amount, ReserveMovement::Deposit, source, refs).await?;
    info!(user_id, amount, ?source, "Reserve deposit");
    Ok(logged)
}

/// Takes money out of the reserve and logs it.
#[instrument(skip(db))]
pub async fn withdraw(
    db: &DatabaseConnection,
    user_id: &str,
    amount: f64,
    source: ReserveSource,
    refs: ReserveRefs,
) -> Result<overflow_transaction::Model> {
    let txn = db.begin().await?;
    let logged = withdraw_in(&txn, user_id, amount, source, refs).await?;
    txn.commit().await?;
    Ok(logged)
}

pub(crate) async fn withdraw_in<C>(
    conn: &C,
    user_id: &str,
    amount: f64,
    source: ReserveSource,
    refs: ReserveRefs,
) -> Result<overflow_transaction::Model>
where
    C: ConnectionTrait,
{
    require_positive(amount)?;
    let amount = round_cents(amount);
    let reserve = get_or_create_in(conn, user_id).await?;

    let updated = OverflowReserve::update_many()
        .col_expr(
            overflow_reserve::Column::CurrentBalance,
            Expr::col(overflow_reserve::Column::CurrentBalance).sub(amount),
        )
        .col_expr(
            overflow_reserve::Column::UpdatedAt,
            Expr::value(chrono::Utc::now()),
        )
        .filter(overflow_reserve::Column::UserId.eq(user_id))
        .filter(overflow_reserve::Column::CurrentBalance.gte(amount))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::InsufficientBalance {
            available: reserve.current_balance,
            requested: amount,
        });
    }

    let logged =
        log_movement(conn, user_id, amount, ReserveMovement::Withdrawal, source, refs).await?;
    info!(user_id, amount, ?source, "Reserve withdrawal");
    Ok(logged)
}

async fn log_movement<C>(
    conn: &C,
    user_id: &str,
    amount: f64,
    movement: ReserveMovement,
    source: ReserveSource,
    refs: ReserveRefs,
) -> Result<overflow_transaction::Model>
where
    C: ConnectionTrait,
{
    overflow_transaction::ActiveModel {
        user_id: Set(user_id.to_string()),
        amount: Set(amount),
        transaction_type: Set(movement),
        source: Set(source),
        envelope_id: Set(refs.envelope_id),
        pay_cycle_instance_id: Set(refs.instance_id),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(Into::into)
}

/// The user's reserve log, newest first.
pub async fn history(
    db: &DatabaseConnection,
    user_id: &str,
    limit: u64,
) -> Result<Vec<overflow_transaction::Model>> {
    OverflowTransaction::find()
        .filter(overflow_transaction::Column::UserId.eq(user_id))
        .order_by_desc(overflow_transaction::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sets or clears the savings goal shown next to the balance.
pub async fn set_goal(
    db: &DatabaseConnection,
    user_id: &str,
    goal_amount: Option<f64>,
    goal_name: Option<String>,
) -> Result<overflow_reserve::Model> {
    if let Some(amount) = goal_amount {
        require_positive(amount)?;
    }
    let txn = db.begin().await?;
    let reserve = get_or_create_in(&txn, user_id).await?;
    let mut active: overflow_reserve::ActiveModel = reserve.into();
    active.goal_amount = Set(goal_amount.map(round_cents));
    active.goal_name = Set(goal_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty()));
    active.updated_at = Set(chrono::Utc::now());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Deposits any not-yet-routed surplus of a confirmed period.
///
/// Confirmation already does this; calling it again is a no-op unless the
/// allocations shrank since.
#[instrument(skip(db))]
pub async fn settle_period_surplus(db: &DatabaseConnection, instance_id: i64) -> Result<f64> {
    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    require_confirmed(&instance)?;
    let (_, routed) = route_surplus_in(&txn, instance).await?;
    txn.commit().await?;
    Ok(routed)
}

/// Routes `actual - allocated - already routed` to the reserve.
pub(crate) async fn route_surplus_in<C>(
    conn: &C,
    instance: pay_cycle_instance::Model,
) -> Result<(pay_cycle_instance::Model, f64)>
where
    C: ConnectionTrait,
{
    let Some(actual) = instance.actual_amount else {
        return Ok((instance, 0.0));
    };
    let allocated = allocation::allocated_total(conn, instance.id).await?;
    let surplus = round_cents(actual - allocated - instance.surplus_routed);
    if surplus <= EPSILON {
        return Ok((instance, 0.0));
    }

    deposit_in(
        conn,
        &instance.user_id,
        surplus,
        ReserveSource::IncomeSurplus,
        ReserveRefs::instance(instance.id),
    )
    .await?;

    let routed_total = round_cents(instance.surplus_routed + surplus);
    let mut active: pay_cycle_instance::ActiveModel = instance.into();
    active.surplus_routed = Set(routed_total);
    let instance = active.update(conn).await?;
    info!(instance_id = instance.id, surplus, "Income surplus routed to reserve");
    Ok((instance, surplus))
}

/// Covers part of a period's income shortfall from the reserve.
///
/// This is the manual decision a shortfall asks for; nothing calls it on its
/// own.
#[instrument(skip(db))]
pub async fn cover_shortfall(
    db: &DatabaseConnection,
    instance_id: i64,
    amount: f64,
) -> Result<pay_cycle_instance::Model> {
    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    require_confirmed(&instance)?;
    withdraw_in(
        &txn,
        &instance.user_id,
        amount,
        ReserveSource::ShortfallCover,
        ReserveRefs::instance(instance_id),
    )
    .await?;

    let covered = round_cents(instance.shortfall_covered + amount);
    let mut active: pay_cycle_instance::ActiveModel = instance.into();
    active.shortfall_covered = Set(covered);
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Withdraws from the reserve to raise an envelope's cap in the period
/// containing `on_date`.
#[instrument(skip(db))]
pub async fn cover_overspend(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
    amount: f64,
    on_date: NaiveDate,
) -> Result<allocation_entity::Model> {
    let txn = db.begin().await?;
    require_envelope(&txn, user_id, envelope_id).await?;
    let (_, alloc) = allocation::allocation_for_date(&txn, user_id, envelope_id, on_date)
        .await?
        .ok_or(Error::NoActivePeriod { date: on_date })?;
    let covered = cover_overspend_in(&txn, alloc, amount).await?;
    txn.commit().await?;
    Ok(covered)
}

/// Withdraws `amount` and credits it to the allocation's rollover.
pub(crate) async fn cover_overspend_in<C>(
    conn: &C,
    alloc: allocation_entity::Model,
    amount: f64,
) -> Result<allocation_entity::Model>
where
    C: ConnectionTrait,
{
    withdraw_in(
        conn,
        &alloc.user_id,
        amount,
        ReserveSource::OverspendCover,
        ReserveRefs::envelope_in(alloc.envelope_id, alloc.pay_cycle_instance_id),
    )
    .await?;

    let allocation_id = alloc.id;
    Allocation::update_many()
        .col_expr(
            allocation_entity::Column::RolloverAmount,
            Expr::col(allocation_entity::Column::RolloverAmount).add(round_cents(amount)),
        )
        .filter(allocation_entity::Column::Id.eq(allocation_id))
        .exec(conn)
        .await?;

    debug!(allocation_id, amount, "Overspend covered from reserve");
    Allocation::find_by_id(allocation_id)
        .one(conn)
        .await?
        .ok_or(Error::AllocationNotFound {
            instance_id: alloc.pay_cycle_instance_id,
            envelope_id: alloc.envelope_id,
        })
}

/// Hands an allocation's unspent remainder over at period end.
///
/// Sweep envelopes deposit it to the reserve; carry envelopes keep it in
/// their own overflow balance for the next allocation. Non-rollover
/// envelopes simply reset. Marks the allocation settled either way.
pub(crate) async fn settle_envelope_rollover<C>(
    conn: &C,
    alloc: allocation_entity::Model,
    envelope: &envelope::Model,
) -> Result<f64>
where
    C: ConnectionTrait,
{
    if alloc.rollover_settled {
        return Ok(0.0);
    }

    let remaining = round_cents(alloc.available());
    let moved = if envelope.is_rollover && remaining > EPSILON {
        match envelope.rollover_policy {
            RolloverPolicy::SweepToReserve => {
                deposit_in(
                    conn,
                    &alloc.user_id,
                    remaining,
                    ReserveSource::EnvelopeRollover,
                    ReserveRefs::envelope_in(envelope.id, alloc.pay_cycle_instance_id),
                )
                .await?;
            }
            RolloverPolicy::CarryInEnvelope => {
                Envelope::update_many()
                    .col_expr(
                        envelope::Column::OverflowBalance,
                        Expr::col(envelope::Column::OverflowBalance).add(remaining),
                    )
                    .filter(envelope::Column::Id.eq(envelope.id))
                    .exec(conn)
                    .await?;
            }
        }
        info!(
            envelope_id = envelope.id,
            remaining,
            policy = ?envelope.rollover_policy,
            "Envelope rollover settled"
        );
        remaining
    } else {
        0.0
    };

    let mut active: allocation_entity::ActiveModel = alloc.into();
    active.rollover_settled = Set(true);
    active.update(conn).await?;
    Ok(moved)
}

/// Settles every allocation of a finished period, once.
pub(crate) async fn settle_completed_in<C>(
    conn: &C,
    instance: pay_cycle_instance::Model,
) -> Result<f64>
where
    C: ConnectionTrait,
{
    if instance.rollover_processed {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for alloc in allocation::refresh_instance(conn, &instance).await? {
        let Some(envelope) = Envelope::find_by_id(alloc.envelope_id).one(conn).await? else {
            continue;
        };
        total += settle_envelope_rollover(conn, alloc, &envelope).await?;
    }

    let instance_id = instance.id;
    let mut active: pay_cycle_instance::ActiveModel = instance.into();
    active.rollover_processed = Set(true);
    active.update(conn).await?;
    info!(instance_id, total, "Period rollover processed");
    Ok(round_cents(total))
}

/// Settles every finished, confirmed, unprocessed period of a cycle that
/// ended before `next_start`, oldest first.
///
/// A period confirmed late, after its successor was already opened, is
/// picked up by the next materialization.
pub(crate) async fn settle_previous_period<C>(
    conn: &C,
    pay_cycle_id: i64,
    next_start: NaiveDate,
) -> Result<f64>
where
    C: ConnectionTrait,
{
    let pending = PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::PayCycleId.eq(pay_cycle_id))
        .filter(pay_cycle_instance::Column::PeriodEnd.lt(next_start))
        .filter(pay_cycle_instance::Column::RolloverProcessed.eq(false))
        .filter(pay_cycle_instance::Column::IsAssumed.eq(false))
        .filter(pay_cycle_instance::Column::RequiresManualReconfirm.eq(false))
        .order_by_asc(pay_cycle_instance::Column::PeriodStart)
        .all(conn)
        .await?;

    let mut total = 0.0;
    for instance in pending {
        total += settle_completed_in(conn, instance).await?;
    }
    Ok(round_cents(total))
}

/// Settles a finished period's rollover explicitly.
///
/// Safe to call repeatedly; a processed period settles to zero.
#[instrument(skip(db))]
pub async fn settle_period_rollover(
    db: &DatabaseConnection,
    instance_id: i64,
    today: NaiveDate,
) -> Result<f64> {
    let txn = db.begin().await?;
    let instance = pay_cycle::require_instance(&txn, instance_id).await?;
    require_confirmed(&instance)?;
    if instance.period_end >= today {
        return Err(Error::validation(format!(
            "pay period {instance_id} runs until {}",
            instance.period_end
        )));
    }
    let total = settle_completed_in(&txn, instance).await?;
    txn.commit().await?;
    Ok(total)
}

fn require_confirmed(instance: &pay_cycle_instance::Model) -> Result<()> {
    if instance.requires_manual_reconfirm {
        return Err(Error::OrphanedInstance {
            instance_id: instance.id,
        });
    }
    if instance.is_assumed {
        return Err(Error::validation(format!(
            "pay period {} has no confirmed income yet",
            instance.id
        )));
    }
    Ok(())
}
