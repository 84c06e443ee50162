//! Envelope registry - creating, looking up, and retiring spending buckets.
//!
//! Also owns the category routing hints that shortcut and recurring executors
//! use to pre-fill an envelope when their template leaves it empty.

use crate::{
    core::allocation,
    entities::{CategoryRoute, Envelope, RolloverPolicy, category_route, envelope},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::OnConflict};
use tracing::{debug, info, instrument};

/// Parameters for a new envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnvelope {
    /// Display name, unique per user ignoring case
    pub name: String,
    /// Cosmetic emoji
    pub emoji: String,
    /// Cosmetic hex color
    pub color: String,
    /// Optional per-period budget ceiling
    pub target_amount: Option<f64>,
    /// Whether unspent funds roll over at period end
    pub is_rollover: bool,
    /// Where rolled-over funds go
    pub rollover_policy: RolloverPolicy,
}

impl NewEnvelope {
    /// A plain envelope with default cosmetics and no rollover.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emoji: "✉️".to_string(),
            color: "#6b7280".to_string(),
            target_amount: None,
            is_rollover: false,
            rollover_policy: RolloverPolicy::SweepToReserve,
        }
    }

    /// Enables rollover with the given policy.
    #[must_use]
    pub const fn rollover(mut self, policy: RolloverPolicy) -> Self {
        self.is_rollover = true;
        self.rollover_policy = policy;
        self
    }
}

/// Field changes for [`update_envelope`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeUpdate {
    /// New name
    pub name: Option<String>,
    /// New emoji
    pub emoji: Option<String>,
    /// New color
    pub color: Option<String>,
    /// New target; `Some(None)` clears it
    pub target_amount: Option<Option<f64>>,
}

/// Creates a new envelope for `user_id` at the end of the user's sort order.
#[instrument(skip(db, new), fields(name = %new.name))]
pub async fn create_envelope(
    db: &DatabaseConnection,
    user_id: &str,
    new: NewEnvelope,
) -> Result<envelope::Model> {
    let name = validated_name(&new.name)?;
    if let Some(target) = new.target_amount {
        validate_target(target)?;
    }

    let txn = db.begin().await?;
    if find_by_name_in(&txn, user_id, &name).await?.is_some() {
        return Err(Error::validation(format!(
            "an envelope named '{name}' already exists"
        )));
    }

    let next_order = Envelope::find()
        .filter(envelope::Column::UserId.eq(user_id))
        .order_by_desc(envelope::Column::SortOrder)
        .one(&txn)
        .await?
        .map_or(0, |last| last.sort_order + 1);

    let created = envelope::ActiveModel {
        user_id: Set(user_id.to_string()),
        name: Set(name),
        emoji: Set(new.emoji),
        color: Set(new.color),
        target_amount: Set(new.target_amount),
        is_rollover: Set(new.is_rollover),
        rollover_policy: Set(new.rollover_policy),
        overflow_balance: Set(0.0),
        is_active: Set(true),
        sort_order: Set(next_order),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(envelope_id = created.id, user_id, "Envelope created");
    Ok(created)
}

/// Finds an envelope by its id, active or not.
pub async fn get_envelope_by_id(
    db: &DatabaseConnection,
    envelope_id: i64,
) -> Result<Option<envelope::Model>> {
    Envelope::find_by_id(envelope_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds one of the user's active envelopes by name, ignoring case.
pub async fn get_envelope_by_name(
    db: &DatabaseConnection,
    user_id: &str,
    name: &str,
) -> Result<Option<envelope::Model>> {
    find_by_name_in(db, user_id, name).await
}

/// Lists the user's active envelopes in display order.
pub async fn get_active_envelopes(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<envelope::Model>> {
    active_envelopes_in(db, user_id).await
}

pub(crate) async fn active_envelopes_in<C>(conn: &C, user_id: &str) -> Result<Vec<envelope::Model>>
where
    C: ConnectionTrait,
{
    Envelope::find()
        .filter(envelope::Column::UserId.eq(user_id))
        .filter(envelope::Column::IsActive.eq(true))
        .order_by_asc(envelope::Column::SortOrder)
        .order_by_asc(envelope::Column::Name)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// Loads an active envelope and checks it belongs to `user_id`.
///
/// Envelopes owned by someone else are reported as not found.
pub(crate) async fn require_envelope<C>(
    conn: &C,
    user_id: &str,
    envelope_id: i64,
) -> Result<envelope::Model>
where
    C: ConnectionTrait,
{
    Envelope::find_by_id(envelope_id)
        .one(conn)
        .await?
        .filter(|found| found.user_id == user_id && found.is_active)
        .ok_or(Error::EnvelopeNotFound { envelope_id })
}

/// Renames or restyles an envelope.
#[instrument(skip(db, update))]
pub async fn update_envelope(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
    update: EnvelopeUpdate,
) -> Result<envelope::Model> {
    let txn = db.begin().await?;
    let current = require_envelope(&txn, user_id, envelope_id).await?;
    let mut active: envelope::ActiveModel = current.into();

    if let Some(name) = update.name {
        let name = validated_name(&name)?;
        let clash = find_by_name_in(&txn, user_id, &name).await?;
        if clash.is_some_and(|other| other.id != envelope_id) {
            return Err(Error::validation(format!(
                "an envelope named '{name}' already exists"
            )));
        }
        active.name = Set(name);
    }
    if let Some(emoji) = update.emoji {
        active.emoji = Set(emoji);
    }
    if let Some(color) = update.color {
        active.color = Set(color);
    }
    if let Some(target) = update.target_amount {
        if let Some(amount) = target {
            validate_target(amount)?;
        }
        active.target_amount = Set(target);
    }

    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Rewrites sort order so envelopes appear in the given order.
///
/// Every id must be one of the user's active envelopes. Envelopes left out
/// keep their relative order after the listed ones.
#[instrument(skip(db, ordered_ids))]
pub async fn reorder_envelopes(
    db: &DatabaseConnection,
    user_id: &str,
    ordered_ids: &[i64],
) -> Result<Vec<envelope::Model>> {
    let txn = db.begin().await?;
    let existing = active_envelopes_in(&txn, user_id).await?;

    for id in ordered_ids {
        if !existing.iter().any(|env| env.id == *id) {
            return Err(Error::EnvelopeNotFound { envelope_id: *id });
        }
    }

    let rest = existing
        .iter()
        .map(|env| env.id)
        .filter(|id| !ordered_ids.contains(id));
    for (position, id) in ordered_ids.iter().copied().chain(rest).enumerate() {
        Envelope::update_many()
            .col_expr(
                envelope::Column::SortOrder,
                Expr::value(i32::try_from(position)?),
            )
            .filter(envelope::Column::Id.eq(id))
            .exec(&txn)
            .await?;
    }

    let reordered = active_envelopes_in(&txn, user_id).await?;
    txn.commit().await?;
    Ok(reordered)
}

/// Flips the envelope's rollover flag.
pub async fn toggle_rollover(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
) -> Result<envelope::Model> {
    let current = require_envelope(db, user_id, envelope_id).await?;
    let enabled = !current.is_rollover;
    let mut active: envelope::ActiveModel = current.into();
    active.is_rollover = Set(enabled);
    let updated = active.update(db).await?;
    debug!(envelope_id, enabled, "Rollover toggled");
    Ok(updated)
}

/// Chooses where the envelope's unspent funds go at period end.
pub async fn set_rollover_policy(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
    policy: RolloverPolicy,
) -> Result<envelope::Model> {
    let current = require_envelope(db, user_id, envelope_id).await?;
    let mut active: envelope::ActiveModel = current.into();
    active.rollover_policy = Set(policy);
    active.update(db).await.map_err(Into::into)
}

/// Soft-deletes an envelope.
///
/// Refused while the envelope still holds money or spending in the period
/// containing `today`; move the funds out first.
#[instrument(skip(db))]
pub async fn deactivate_envelope(
    db: &DatabaseConnection,
    user_id: &str,
    envelope_id: i64,
    today: NaiveDate,
) -> Result<envelope::Model> {
    let txn = db.begin().await?;
    let current = require_envelope(&txn, user_id, envelope_id).await?;

    let funded = allocation::allocation_for_date(&txn, user_id, envelope_id, today)
        .await?
        .map(|(_, alloc)| alloc)
        .filter(|alloc| alloc.cached_spent > 0.0 || alloc.cap() > 0.0);
    if let Some(alloc) = funded {
        return Err(Error::validation(format!(
            "'{}' still has {:.2} allocated and {:.2} spent this period",
            current.name,
            alloc.cap(),
            alloc.cached_spent
        )));
    }
    if current.overflow_balance > 0.0 {
        return Err(Error::validation(format!(
            "'{}' still carries {:.2} of rolled-over funds",
            current.name, current.overflow_balance
        )));
    }

    let mut active: envelope::ActiveModel = current.into();
    active.is_active = Set(false);
    let retired = active.update(&txn).await?;
    txn.commit().await?;

    info!(envelope_id, user_id, "Envelope deactivated");
    Ok(retired)
}

/// Routes a category to one of the user's envelopes, replacing any earlier route.
pub async fn set_category_route(
    db: &DatabaseConnection,
    user_id: &str,
    category: &str,
    envelope_id: i64,
) -> Result<category_route::Model> {
    let category = normalize_category(category)?;
    let txn = db.begin().await?;
    require_envelope(&txn, user_id, envelope_id).await?;

    CategoryRoute::insert(category_route::ActiveModel {
        user_id: Set(user_id.to_string()),
        category: Set(category.clone()),
        envelope_id: Set(envelope_id),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([
            category_route::Column::UserId,
            category_route::Column::Category,
        ])
        .update_column(category_route::Column::EnvelopeId)
        .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    let route = CategoryRoute::find()
        .filter(category_route::Column::UserId.eq(user_id))
        .filter(category_route::Column::Category.eq(category.as_str()))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::Config {
            message: format!("category route for '{category}' vanished after upsert"),
        })?;
    txn.commit().await?;
    Ok(route)
}

/// Envelope a category routes to, if the route points at an active envelope.
pub async fn default_envelope_for<C>(conn: &C, user_id: &str, category: &str) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let Ok(category) = normalize_category(category) else {
        return Ok(None);
    };
    let Some(route) = CategoryRoute::find()
        .filter(category_route::Column::UserId.eq(user_id))
        .filter(category_route::Column::Category.eq(category))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    Ok(Envelope::find_by_id(route.envelope_id)
        .one(conn)
        .await?
        .filter(|env| env.is_active)
        .map(|env| env.id))
}

/// Lowercased, trimmed category id; empty categories are rejected.
pub(crate) fn normalize_category(category: &str) -> Result<String> {
    let trimmed = category.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("category cannot be empty"));
    }
    Ok(trimmed.to_lowercase())
}

async fn find_by_name_in<C>(conn: &C, user_id: &str, name: &str) -> Result<Option<envelope::Model>>
where
    C: ConnectionTrait,
{
    let wanted = name.trim();
    Ok(active_envelopes_in(conn, user_id)
        .await?
        .into_iter()
        .find(|env| env.name.eq_ignore_ascii_case(wanted)))
}

fn validated_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("envelope name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_target(target: f64) -> Result<()> {
    if target.is_finite() && target >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidAmount { amount: target })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{
        core::{allocation::AllocationRule, ledger::NewTransaction},
        test_utils::*,
    };

    #[tokio::test]
    async fn test_create_envelope_validation() -> Result<()> {
        let db = setup_test_db().await?;

        let result = create_envelope(&db, TEST_USER, NewEnvelope::named("   ")).await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        let mut negative = NewEnvelope::named("Food");
        negative.target_amount = Some(-50.0);
        let result = create_envelope(&db, TEST_USER, negative).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidAmount { amount: -50.0 }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_per_user() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_envelope(&db, "Food").await?;

        let result = create_envelope(&db, TEST_USER, NewEnvelope::named("food")).await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        // Another user may reuse the name
        let other = create_envelope(&db, "other_user", NewEnvelope::named("Food")).await?;
        assert_eq!(other.user_id, "other_user");
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_by_name_ignores_case_and_owner() -> Result<()> {
        let db = setup_test_db().await?;
        let created = create_test_envelope(&db, "Groceries").await?;

        let found = get_envelope_by_name(&db, TEST_USER, "groceries").await?;
        assert_eq!(found.unwrap().id, created.id);

        assert!(get_envelope_by_name(&db, "someone_else", "Groceries")
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_sort_order_and_reorder() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_envelope(&db, "A").await?;
        let b = create_test_envelope(&db, "B").await?;
        let c = create_test_envelope(&db, "C").await?;
        assert_eq!((a.sort_order, b.sort_order, c.sort_order), (0, 1, 2));

        let reordered = reorder_envelopes(&db, TEST_USER, &[c.id, a.id]).await?;
        let names: Vec<_> = reordered.iter().map(|env| env.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);

        let result = reorder_envelopes(&db, TEST_USER, &[999]).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::EnvelopeNotFound { envelope_id: 999 }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_toggle_rollover() -> Result<()> {
        let db = setup_test_db().await?;
        let envelope = create_test_envelope(&db, "Fun").await?;

        let updated = update_envelope(
            &db,
            TEST_USER,
            envelope.id,
            EnvelopeUpdate {
                name: Some("Fun Money".to_string()),
                target_amount: Some(Some(1500.0)),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.name, "Fun Money");
        assert_eq!(updated.target_amount, Some(1500.0));

        let toggled = toggle_rollover(&db, TEST_USER, envelope.id).await?;
        assert!(toggled.is_rollover);
        let toggled = toggle_rollover(&db, TEST_USER, envelope.id).await?;
        assert!(!toggled.is_rollover);
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivate_refused_while_funded() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let envelope = create_test_envelope(&db, "Food").await?;
        allocation::allocate(&db, instance.id, envelope.id, AllocationRule::fixed(500.0)).await?;

        let result = deactivate_envelope(&db, TEST_USER, envelope.id, date(2025, 1, 10)).await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        allocation::update_allocation(&db, instance.id, envelope.id, 0.0).await?;
        let retired = deactivate_envelope(&db, TEST_USER, envelope.id, date(2025, 1, 10)).await?;
        assert!(!retired.is_active);
        assert!(get_active_envelopes(&db, TEST_USER).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_category_routes() -> Result<()> {
        let db = setup_test_db().await?;
        let food = create_test_envelope(&db, "Food").await?;
        let fun = create_test_envelope(&db, "Fun").await?;

        set_category_route(&db, TEST_USER, " Dining ", food.id).await?;
        assert_eq!(
            default_envelope_for(&db, TEST_USER, "dining").await?,
            Some(food.id)
        );

        // Re-routing replaces the earlier route
        set_category_route(&db, TEST_USER, "dining", fun.id).await?;
        assert_eq!(
            default_envelope_for(&db, TEST_USER, "DINING").await?,
            Some(fun.id)
        );

        assert_eq!(default_envelope_for(&db, TEST_USER, "unknown").await?, None);
        assert_eq!(default_envelope_for(&db, "other_user", "dining").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_route_to_retired_envelope_is_ignored() -> Result<()> {
        let db = setup_test_db().await?;
        let food = create_test_envelope(&db, "Food").await?;
        set_category_route(&db, TEST_USER, "dining", food.id).await?;
        deactivate_envelope(&db, TEST_USER, food.id, date(2025, 1, 10)).await?;

        assert_eq!(default_envelope_for(&db, TEST_USER, "dining").await?, None);

        // Retired envelopes cannot take new spending
        let result = crate::core::ledger::append_transaction(
            &db,
            NewTransaction::expense(TEST_USER, 10.0, "dining", date(2025, 1, 10)).envelope(food.id),
            None,
        )
        .await;
        assert!(matches!(result.unwrap_err(), Error::EnvelopeNotFound { .. }));
        Ok(())
    }
}
