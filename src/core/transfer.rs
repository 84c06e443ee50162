//! Budget transfers between envelopes within one pay period.

use crate::{
    core::{
        EPSILON, allocation, envelope::require_envelope, exceeds, pay_cycle, require_positive,
        round_cents,
    },
    entities::{
        Allocation, EnvelopeTransfer, TransferReason, allocation as allocation_entity,
        envelope_transfer,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

/// Moves `amount` of allocated budget from one envelope to another.
///
/// Both allocations belong to the period covering `on_date`. The donor can
/// give at most what it has not spent; the receiver's allocation is created
/// when it has none yet. Either both sides change or neither does.
#[instrument(skip(db))]
pub async fn transfer(
    db: &DatabaseConnection,
    user_id: &str,
    from_envelope_id: i64,
    to_envelope_id: i64,
    amount: f64,
    reason: TransferReason,
    on_date: NaiveDate,
) -> Result<envelope_transfer::Model> {
    let txn = db.begin().await?;
    let logged = transfer_in(
        &txn,
        user_id,
        from_envelope_id,
        to_envelope_id,
        amount,
        reason,
        on_date,
    )
    .await?;
    txn.commit().await?;
    Ok(logged)
}

pub(crate) async fn transfer_in<C>(
    conn: &C,
    user_id: &str,
    from_envelope_id: i64,
    to_envelope_id: i64,
    amount: f64,
    reason: TransferReason,
    on_date: NaiveDate,
) -> Result<envelope_transfer::Model>
where
    C: ConnectionTrait,
{
    require_positive(amount)?;
    if from_envelope_id == to_envelope_id {
        return Err(Error::validation("cannot transfer an envelope to itself"));
    }
    let amount = round_cents(amount);
    require_envelope(conn, user_id, from_envelope_id).await?;
    let receiver = require_envelope(conn, user_id, to_envelope_id).await?;

    let Some((instance, donor)) =
        allocation::allocation_for_date(conn, user_id, from_envelope_id, on_date).await?
    else {
        return match pay_cycle::instance_for_date(conn, user_id, on_date).await? {
            Some(instance) => Err(Error::AllocationNotFound {
                instance_id: instance.id,
                envelope_id: from_envelope_id,
            }),
            None => Err(Error::NoActivePeriod { date: on_date }),
        };
    };

    let available = round_cents(donor.available());
    if exceeds(amount, available) {
        return Err(Error::InsufficientSourceBudget {
            envelope_id: from_envelope_id,
            available: available.max(0.0),
            requested: amount,
        });
    }

    // Carried-in and covered budget goes first.
    let from_rollover = round_cents(amount.min(donor.rollover_amount.max(0.0)));
    let from_allocated = round_cents(amount - from_rollover);
    shift_column(
        conn,
        donor.id,
        allocation_entity::Column::RolloverAmount,
        -from_rollover,
    )
    .await?;
    shift_column(
        conn,
        donor.id,
        allocation_entity::Column::AllocatedAmount,
        -from_allocated,
    )
    .await?;

    let target = match allocation::find_allocation(conn, instance.id, to_envelope_id).await? {
        Some(existing) => existing,
        None => allocation::insert_allocation(conn, &instance, &receiver, 0.0, None).await?,
    };
    shift_column(
        conn,
        target.id,
        allocation_entity::Column::AllocatedAmount,
        amount,
    )
    .await?;

    let logged = envelope_transfer::ActiveModel {
        user_id: Set(user_id.to_string()),
        from_envelope_id: Set(from_envelope_id),
        to_envelope_id: Set(to_envelope_id),
        amount: Set(amount),
        reason: Set(reason),
        pay_cycle_instance_id: Set(Some(instance.id)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    info!(
        from_envelope_id,
        to_envelope_id,
        amount,
        instance_id = instance.id,
        ?reason,
        "Budget transferred"
    );
    Ok(logged)
}

async fn shift_column<C>(
    conn: &C,
    allocation_id: i64,
    column: allocation_entity::Column,
    delta: f64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    if delta.abs() < EPSILON {
        return Ok(());
    }
    Allocation::update_many()
        .col_expr(column, Expr::col(column).add(delta))
        .filter(allocation_entity::Column::Id.eq(allocation_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// The user's transfer log, newest first.
pub async fn transfers_for_user(
    db: &DatabaseConnection,
    user_id: &str,
    limit: u64,
) -> Result<Vec<envelope_transfer::Model>> {
    EnvelopeTransfer::find()
        .filter(envelope_transfer::Column::UserId.eq(user_id))
        .order_by_desc(envelope_transfer::Column::CreatedAt)
        .order_by_desc(envelope_transfer::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}
