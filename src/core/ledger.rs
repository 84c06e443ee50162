//! Ledger store - the append-only income/expense log and its write pipeline.
//!
//! Every write runs the same steps inside one database transaction: validate,
//! apply the caller's overspend resolution, check the envelope cap, write the
//! row, recompute the affected spent caches, re-check the cap, and finally
//! confirm a linked pay period. Any failure rolls the whole call back.

use crate::{
    core::{
        allocation,
        envelope::{normalize_category, require_envelope},
        exceeds,
        pay_cycle::{self, ConfirmOutcome},
        require_positive, reserve, round_cents, transfer,
    },
    entities::{
        LedgerTransaction, PayCycleInstance, TransactionSource, TransactionType, TransferReason,
        allocation as allocation_entity, ledger_transaction, pay_cycle_instance,
    },
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument, warn};

/// A ledger row waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// Owner
    pub user_id: String,
    /// Positive amount
    pub amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id
    pub category: String,
    /// Envelope the row is budgeted against
    pub envelope_id: Option<i64>,
    /// Pay period this income confirms
    pub pay_cycle_instance_id: Option<i64>,
    /// Where the row came from
    pub source: TransactionSource,
    /// Day the money moved
    pub transaction_date: NaiveDate,
    /// Free text
    pub description: Option<String>,
}

impl NewTransaction {
    fn new(
        user_id: &str,
        amount: f64,
        transaction_type: TransactionType,
        category: &str,
        transaction_date: NaiveDate,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            amount,
            transaction_type,
            category: category.to_string(),
            envelope_id: None,
            pay_cycle_instance_id: None,
            source: TransactionSource::Manual,
            transaction_date,
            description: None,
        }
    }

    /// A manual expense.
    #[must_use]
    pub fn expense(user_id: &str, amount: f64, category: &str, on: NaiveDate) -> Self {
        Self::new(user_id, amount, TransactionType::Expense, category, on)
    }

    /// A manual income.
    #[must_use]
    pub fn income(user_id: &str, amount: f64, category: &str, on: NaiveDate) -> Self {
        Self::new(user_id, amount, TransactionType::Income, category, on)
    }

    /// Budgets the row against an envelope.
    #[must_use]
    pub const fn envelope(mut self, envelope_id: i64) -> Self {
        self.envelope_id = Some(envelope_id);
        self
    }

    /// Marks the income as the salary of a pay period.
    #[must_use]
    pub const fn salary_for(mut self, instance_id: i64) -> Self {
        self.pay_cycle_instance_id = Some(instance_id);
        self
    }

    /// Overrides the provenance.
    #[must_use]
    pub const fn source(mut self, source: TransactionSource) -> Self {
        self.source = source;
        self
    }

    /// Attaches a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// How an expense that would break its envelope's cap gets funded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Move budget from another envelope in the same period first
    Transfer {
        /// Donor envelope
        from_envelope_id: i64,
        /// Amount to move
        amount: f64,
    },
    /// Withdraw from the reserve into this envelope first
    ReserveCover {
        /// Amount to withdraw
        amount: f64,
    },
}

/// Result of a ledger write.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    /// The row written
    pub transaction: ledger_transaction::Model,
    /// The envelope's allocation after the write, when it has one
    pub allocation: Option<allocation_entity::Model>,
    /// Set when the row confirmed a pay period
    pub confirmation: Option<ConfirmOutcome>,
}

/// Corrections to an existing row; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionUpdate {
    /// New amount
    pub amount: Option<f64>,
    /// New category
    pub category: Option<String>,
    /// New envelope; `Some(None)` removes it
    pub envelope_id: Option<Option<i64>>,
    /// New date
    pub transaction_date: Option<NaiveDate>,
    /// New description; `Some(None)` removes it
    pub description: Option<Option<String>>,
}

/// Writes a ledger row.
///
/// An expense against an envelope is hard-blocked when it would take the
/// envelope past its cap for the period, unless `resolution` funds the gap.
/// The resolution is applied before the row is written, in the same
/// transaction.
#[instrument(skip(db, new), fields(user_id = %new.user_id, amount = new.amount))]
pub async fn append_transaction(
    db: &DatabaseConnection,
    new: NewTransaction,
    resolution: Option<Resolution>,
) -> Result<Appended> {
    let txn = db.begin().await?;
    let appended = append_in(&txn, new, resolution).await?;
    txn.commit().await?;
    Ok(appended)
}

pub(crate) async fn append_in<C>(
    conn: &C,
    new: NewTransaction,
    resolution: Option<Resolution>,
) -> Result<Appended>
where
    C: ConnectionTrait,
{
    require_positive(new.amount)?;
    let amount = round_cents(new.amount);
    let category = normalize_category(&new.category)?;
    let is_expense = new.transaction_type == TransactionType::Expense;

    if let Some(envelope_id) = new.envelope_id {
        require_envelope(conn, &new.user_id, envelope_id).await?;
    }
    let salary_instance = match new.pay_cycle_instance_id {
        Some(_) if is_expense => {
            return Err(Error::validation("only income can confirm a pay period"));
        }
        Some(instance_id) => {
            let instance = pay_cycle::require_instance(conn, instance_id).await?;
            if instance.user_id != new.user_id {
                return Err(Error::InstanceNotFound { instance_id });
            }
            Some(instance)
        }
        None => None,
    };

    let budgeted = match new.envelope_id {
        Some(envelope_id) if is_expense => {
            allocation::allocation_for_date(conn, &new.user_id, envelope_id, new.transaction_date)
                .await?
        }
        _ => None,
    };

    let budgeted = match (resolution, budgeted) {
        (None, budgeted) => budgeted,
        (Some(_), None) => {
            return Err(Error::validation(
                "overspend cover needs an expense against a budgeted envelope",
            ));
        }
        (Some(resolution), Some((instance, alloc))) => {
            let alloc = apply_resolution(conn, &instance, alloc, resolution, new.transaction_date)
                .await?;
            Some((instance, alloc))
        }
    };

    if let Some((_, alloc)) = &budgeted {
        ensure_within_cap(alloc, amount, alloc.cached_spent + amount)?;
    }

    let written = ledger_transaction::ActiveModel {
        user_id: Set(new.user_id.clone()),
        amount: Set(amount),
        transaction_type: Set(new.transaction_type),
        category: Set(category),
        envelope_id: Set(new.envelope_id),
        pay_cycle_instance_id: Set(new.pay_cycle_instance_id),
        source: Set(new.source),
        transaction_date: Set(new.transaction_date),
        description: Set(new.description.filter(|text| !text.trim().is_empty())),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let allocation = match new.envelope_id {
        Some(envelope_id) => {
            allocation::recompute_spent(conn, &new.user_id, envelope_id, new.transaction_date)
                .await?
        }
        None => None,
    };
    if budgeted.is_some() {
        if let Some(alloc) = &allocation {
            // A concurrent writer may have spent in between.
            ensure_within_cap(alloc, amount, alloc.cached_spent)?;
        }
    }

    let confirmation = match salary_instance {
        Some(instance) => Some(
            pay_cycle::confirm_linked(conn, instance, amount, Some(written.id), false).await?,
        ),
        None => None,
    };

    debug!(
        transaction_id = written.id,
        envelope_id = ?written.envelope_id,
        source = ?written.source,
        "Ledger row written"
    );
    Ok(Appended {
        transaction: written,
        allocation,
        confirmation,
    })
}

async fn apply_resolution<C>(
    conn: &C,
    instance: &pay_cycle_instance::Model,
    alloc: allocation_entity::Model,
    resolution: Resolution,
    on_date: NaiveDate,
) -> Result<allocation_entity::Model>
where
    C: ConnectionTrait,
{
    match resolution {
        Resolution::Transfer {
            from_envelope_id,
            amount,
        } => {
            transfer::transfer_in(
                conn,
                &alloc.user_id,
                from_envelope_id,
                alloc.envelope_id,
                amount,
                TransferReason::OverspendCover,
                on_date,
            )
            .await?;
            let refreshed = allocation::find_allocation(conn, instance.id, alloc.envelope_id)
                .await?
                .ok_or(Error::AllocationNotFound {
                    instance_id: instance.id,
                    envelope_id: alloc.envelope_id,
                })?;
            allocation::refresh_allocation(conn, instance, refreshed).await
        }
        Resolution::ReserveCover { amount } => {
            reserve::cover_overspend_in(conn, alloc, amount).await
        }
    }
}

fn ensure_within_cap(
    alloc: &allocation_entity::Model,
    attempted: f64,
    projected: f64,
) -> Result<()> {
    let cap = alloc.cap();
    if !exceeds(projected, cap) {
        return Ok(());
    }
    let deficit = round_cents(projected - cap);
    warn!(
        envelope_id = alloc.envelope_id,
        cap,
        projected,
        deficit,
        "Overspend blocked"
    );
    Err(Error::OverspendBlocked {
        envelope_id: alloc.envelope_id,
        cap,
        spent: round_cents(projected - attempted),
        attempted,
        projected,
        deficit,
    })
}

/// Corrects a ledger row and recomputes both the old and new envelope/period.
///
/// The correction is blocked when it would push the new envelope over its
/// cap. The amount of a row confirming a pay period cannot change here;
/// reconfirm the period instead.
#[instrument(skip(db, update))]
pub async fn update_transaction(
    db: &DatabaseConnection,
    user_id: &str,
    transaction_id: i64,
    update: TransactionUpdate,
) -> Result<ledger_transaction::Model> {
    let txn = db.begin().await?;
    let current = require_transaction(&txn, user_id, transaction_id).await?;

    if let Some(amount) = update.amount {
        require_positive(amount)?;
        let changed = exceeds((amount - current.amount).abs(), 0.0);
        if changed && confirms_instance(&txn, transaction_id).await?.is_some() {
            return Err(Error::validation(
                "this income confirms a pay period; reconfirm the period to change it",
            ));
        }
    }
    if let Some(Some(envelope_id)) = update.envelope_id {
        require_envelope(&txn, user_id, envelope_id).await?;
    }

    let old_pair = current.envelope_id.map(|id| (id, current.transaction_date));
    let old_amount = current.amount;
    let is_expense = current.transaction_type == TransactionType::Expense;
    let new_envelope = update.envelope_id.unwrap_or(current.envelope_id);
    let new_date = update.transaction_date.unwrap_or(current.transaction_date);

    let spent_before = match new_envelope {
        Some(envelope_id) if is_expense => {
            allocation::allocation_for_date(&txn, user_id, envelope_id, new_date)
                .await?
                .map(|(_, alloc)| alloc.cached_spent)
        }
        _ => None,
    };

    let mut active: ledger_transaction::ActiveModel = current.into();
    if let Some(amount) = update.amount {
        active.amount = Set(round_cents(amount));
    }
    if let Some(category) = update.category {
        active.category = Set(normalize_category(&category)?);
    }
    active.envelope_id = Set(new_envelope);
    active.transaction_date = Set(new_date);
    if let Some(description) = update.description {
        active.description = Set(description);
    }
    let updated = active.update(&txn).await?;
    let new_pair = updated.envelope_id.map(|id| (id, updated.transaction_date));

    if let Some((envelope_id, date)) = old_pair {
        allocation::recompute_spent(&txn, user_id, envelope_id, date).await?;
    }
    if let Some((envelope_id, date)) = new_pair {
        let refreshed = allocation::recompute_spent(&txn, user_id, envelope_id, date).await?;
        if let (Some(alloc), Some(before)) = (refreshed, spent_before) {
            if exceeds(alloc.cached_spent, before) {
                ensure_within_cap(&alloc, updated.amount, alloc.cached_spent)?;
            }
        }
    }

    txn.commit().await?;
    info!(transaction_id, old_amount, new_amount = updated.amount, "Ledger row corrected");
    Ok(updated)
}

/// Deletes a ledger row.
///
/// The envelope's spent cache is recomputed. When the row was the salary of
/// a confirmed pay period, that period is flagged for reconfirmation rather
/// than silently reverted.
#[instrument(skip(db))]
pub async fn delete_transaction(
    db: &DatabaseConnection,
    user_id: &str,
    transaction_id: i64,
) -> Result<()> {
    let txn = db.begin().await?;
    let current = require_transaction(&txn, user_id, transaction_id).await?;
    let pair = current.envelope_id.map(|id| (id, current.transaction_date));

    let linked = confirms_instance(&txn, transaction_id).await?;
    if let Some(instance) = linked {
        pay_cycle::handle_orphaned_link(&txn, instance).await?;
    }

    current.delete(&txn).await?;
    if let Some((envelope_id, date)) = pair {
        allocation::recompute_spent(&txn, user_id, envelope_id, date).await?;
    }

    txn.commit().await?;
    info!(transaction_id, user_id, "Ledger row deleted");
    Ok(())
}

/// Finds a row by id.
pub async fn get_transaction(
    db: &DatabaseConnection,
    transaction_id: i64,
) -> Result<Option<ledger_transaction::Model>> {
    LedgerTransaction::find_by_id(transaction_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// The user's most recent rows, newest first.
pub async fn recent_transactions(
    db: &DatabaseConnection,
    user_id: &str,
    limit: u64,
) -> Result<Vec<ledger_transaction::Model>> {
    LedgerTransaction::find()
        .filter(ledger_transaction::Column::UserId.eq(user_id))
        .order_by_desc(ledger_transaction::Column::TransactionDate)
        .order_by_desc(ledger_transaction::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// An envelope's rows between two dates, inclusive, newest first.
pub async fn transactions_for_envelope(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ledger_transaction::Model>> {
    LedgerTransaction::find()
        .filter(ledger_transaction::Column::UserId.eq(user_id))
        .filter(ledger_transaction::Column::EnvelopeId.eq(envelope_id))
        .filter(ledger_transaction::Column::TransactionDate.between(start, end))
        .order_by_desc(ledger_transaction::Column::TransactionDate)
        .order_by_desc(ledger_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn require_transaction<C>(
    conn: &C,
    user_id: &str,
    transaction_id: i64,
) -> Result<ledger_transaction::Model>
where
    C: ConnectionTrait,
{
    LedgerTransaction::find_by_id(transaction_id)
        .one(conn)
        .await?
        .filter(|row| row.user_id == user_id)
        .ok_or(Error::TransactionNotFound { transaction_id })
}

async fn confirms_instance<C>(
    conn: &C,
    transaction_id: i64,
) -> Result<Option<pay_cycle_instance::Model>>
where
    C: ConnectionTrait,
{
    PayCycleInstance::find()
        .filter(pay_cycle_instance::Column::LinkedTransactionId.eq(transaction_id))
        .one(conn)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{
        core::{
            allocation::AllocationRule,
            reserve::{ReserveRefs, balance, deposit},
        },
        entities::{EnvelopeTransfer, ReserveSource},
        test_utils::*,
    };

    async fn budgeted_envelope(
        db: &DatabaseConnection,
        instance: &pay_cycle_instance::Model,
        name: &str,
        amount: f64,
    ) -> Result<i64> {
        let envelope = create_test_envelope(db, name).await?;
        allocation::allocate(db, instance.id, envelope.id, AllocationRule::fixed(amount)).await?;
        Ok(envelope.id)
    }

    #[tokio::test]
    async fn test_append_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let envelope = create_test_envelope(&db, "Food").await?;

        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 0.0, "food", date(2025, 1, 1)),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::InvalidAmount { .. }));

        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, f64::NAN, "food", date(2025, 1, 1)),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::InvalidAmount { .. }));

        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 5.0, "  ", date(2025, 1, 1)),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        // Someone else's envelope is invisible
        let result = append_transaction(
            &db,
            NewTransaction::expense("intruder", 5.0, "food", date(2025, 1, 1))
                .envelope(envelope.id),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::EnvelopeNotFound { .. }));

        assert!(recent_transactions(&db, TEST_USER, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_hard_block_then_reserve_cover() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 1000.0).await?;
        spend(&db, food, 950.0, date(2025, 1, 5)).await?;
        deposit(&db, TEST_USER, 200.0, ReserveSource::Manual, ReserveRefs::NONE).await?;

        let blocked = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 100.0, "food", date(2025, 1, 6)).envelope(food),
            None,
        )
        .await;
        match blocked.unwrap_err() {
            Error::OverspendBlocked {
                cap,
                spent,
                attempted,
                deficit,
                ..
            } => {
                assert_eq!(cap, 1000.0);
                assert_eq!(spent, 950.0);
                assert_eq!(attempted, 100.0);
                assert_eq!(deficit, 50.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let appended = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 100.0, "food", date(2025, 1, 6)).envelope(food),
            Some(Resolution::ReserveCover { amount: 50.0 }),
        )
        .await?;
        let alloc = appended.allocation.unwrap();
        assert_eq!(alloc.cached_spent, 1050.0);
        assert_eq!(alloc.allocated_amount, 1000.0);
        assert_eq!(balance(&db, TEST_USER).await?, 150.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_prior_cover_lets_expense_through() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 1000.0).await?;
        spend(&db, food, 950.0, date(2025, 1, 5)).await?;
        deposit(&db, TEST_USER, 50.0, ReserveSource::Manual, ReserveRefs::NONE).await?;

        reserve::cover_overspend(&db, TEST_USER, food, 50.0, date(2025, 1, 6)).await?;
        let appended = spend(&db, food, 100.0, date(2025, 1, 6)).await?;
        assert_eq!(
            allocation::get_allocation(&db, instance.id, food)
                .await?
                .unwrap()
                .cached_spent,
            1050.0
        );
        assert_eq!(appended.amount, 100.0);
        assert_eq!(balance(&db, TEST_USER).await?, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_cover_rolls_back_everything() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 1000.0).await?;
        spend(&db, food, 950.0, date(2025, 1, 5)).await?;
        deposit(&db, TEST_USER, 80.0, ReserveSource::Manual, ReserveRefs::NONE).await?;

        // Cover succeeds but is too small: the withdrawal must not stick
        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 100.0, "food", date(2025, 1, 6)).envelope(food),
            Some(Resolution::ReserveCover { amount: 20.0 }),
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::OverspendBlocked { deficit, .. } if deficit == 30.0
        ));
        assert_eq!(balance(&db, TEST_USER).await?, 80.0);
        let alloc = allocation::get_allocation(&db, instance.id, food)
            .await?
            .unwrap();
        assert_eq!(alloc.rollover_amount, 0.0);
        assert_eq!(alloc.cached_spent, 950.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_resolution() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 1000.0).await?;
        let fun = budgeted_envelope(&db, &instance, "Fun", 500.0).await?;
        spend(&db, food, 950.0, date(2025, 1, 5)).await?;

        let appended = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 100.0, "food", date(2025, 1, 6)).envelope(food),
            Some(Resolution::Transfer {
                from_envelope_id: fun,
                amount: 50.0,
            }),
        )
        .await?;
        let alloc = appended.allocation.unwrap();
        assert_eq!(alloc.allocated_amount, 1050.0);
        assert_eq!(alloc.cached_spent, 1050.0);

        let donor = allocation::get_allocation(&db, instance.id, fun).await?.unwrap();
        assert_eq!(donor.allocated_amount, 450.0);
        let log = EnvelopeTransfer::find().all(&db).await?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, TransferReason::OverspendCover);
        Ok(())
    }

    #[tokio::test]
    async fn test_resolution_needs_budgeted_expense() -> Result<()> {
        let db = setup_test_db().await?;
        let food = create_test_envelope(&db, "Food").await?;
        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 10.0, "food", date(2025, 1, 6)).envelope(food.id),
            Some(Resolution::ReserveCover { amount: 10.0 }),
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_income_and_unbudgeted_rows_are_not_capped() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 10.0).await?;

        append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 5000.0, "refund", date(2025, 1, 6)).envelope(food),
            None,
        )
        .await?;
        append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 5000.0, "misc", date(2025, 1, 6)),
            None,
        )
        .await?;
        // Outside any materialized period there is no cap either
        spend(&db, food, 5000.0, date(2025, 6, 1)).await?;
        assert_eq!(recent_transactions(&db, TEST_USER, 10).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_blocked_when_it_overspends() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 100.0).await?;
        let row = spend(&db, food, 60.0, date(2025, 1, 5)).await?;

        let result = update_transaction(
            &db,
            TEST_USER,
            row.id,
            TransactionUpdate {
                amount: Some(120.0),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            Error::OverspendBlocked { .. }
        ));
        assert_eq!(get_transaction(&db, row.id).await?.unwrap().amount, 60.0);

        // Shrinking is always fine
        let updated = update_transaction(
            &db,
            TEST_USER,
            row.id,
            TransactionUpdate {
                amount: Some(40.0),
                description: Some(Some("lunch".into())),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.amount, 40.0);
        assert_eq!(
            allocation::get_allocation(&db, instance.id, food)
                .await?
                .unwrap()
                .cached_spent,
            40.0
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_moving_row_out_of_period_recomputes_old_pair() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = budgeted_envelope(&db, &instance, "Food", 100.0).await?;
        let row = spend(&db, food, 60.0, date(2025, 1, 5)).await?;

        update_transaction(
            &db,
            TEST_USER,
            row.id,
            TransactionUpdate {
                transaction_date: Some(date(2025, 2, 5)),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(
            allocation::get_allocation(&db, instance.id, food)
                .await?
                .unwrap()
                .cached_spent,
            0.0
        );
        assert_spent_matches_ledger(&db, instance.id).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_salary_amount_locked() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let outcome = confirm_test_income(&db, instance.id, 20000.0).await?;
        let salary = outcome.instance.linked_transaction_id.unwrap();

        let result = update_transaction(
            &db,
            TEST_USER,
            salary,
            TransactionUpdate {
                amount: Some(25000.0),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        // Other fields may still be corrected
        let renamed = update_transaction(
            &db,
            TEST_USER,
            salary,
            TransactionUpdate {
                description: Some(Some("January pay".into())),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(renamed.description.as_deref(), Some("January pay"));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_other_users_row_not_found() -> Result<()> {
        let db = setup_test_db().await?;
        let row = append_transaction(
            &db,
            NewTransaction::income(TEST_USER, 10.0, "gift", date(2025, 1, 1)),
            None,
        )
        .await?;
        let result = delete_transaction(&db, "intruder", row.transaction.id).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::TransactionNotFound { .. }
        ));
        assert!(get_transaction(&db, row.transaction.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_salary_link_rejected_for_expense() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let result = append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 10.0, "salary", date(2025, 1, 1))
                .salary_for(instance.id),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        let result = append_transaction(
            &db,
            NewTransaction::income("intruder", 10.0, "salary", date(2025, 1, 1))
                .salary_for(instance.id),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::InstanceNotFound { .. }));
        Ok(())
    }
}
