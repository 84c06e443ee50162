//! Quick-add shortcuts - one-tap ledger rows with a preset amount.

use crate::{
    core::{
        envelope::{default_envelope_for, normalize_category, require_envelope},
        ledger::{self, Appended, NewTransaction, Resolution},
        require_positive, round_cents,
    },
    entities::{QuickAddShortcut, TransactionSource, TransactionType, quick_add_shortcut},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

/// A shortcut waiting to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShortcut {
    /// Button label
    pub label: String,
    /// Cosmetic emoji
    pub emoji: String,
    /// Amount used unless overridden
    pub default_amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id
    pub category: String,
    /// Envelope to charge; falls back to the category route when unset
    pub envelope_id: Option<i64>,
    /// Created from a system template
    pub is_system_default: bool,
}

impl NewShortcut {
    /// An expense shortcut.
    #[must_use]
    pub fn expense(label: &str, default_amount: f64, category: &str) -> Self {
        Self {
            label: label.to_string(),
            emoji: "⚡".to_string(),
            default_amount,
            transaction_type: TransactionType::Expense,
            category: category.to_string(),
            envelope_id: None,
            is_system_default: false,
        }
    }
}

/// Creates a shortcut for `user_id`.
#[instrument(skip(db, new), fields(label = %new.label))]
pub async fn create_shortcut(
    db: &DatabaseConnection,
    user_id: &str,
    new: NewShortcut,
) -> Result<quick_add_shortcut::Model> {
    let label = new.label.trim();
    if label.is_empty() {
        return Err(Error::validation("shortcut label cannot be empty"));
    }
    require_positive(new.default_amount)?;
    let category = normalize_category(&new.category)?;
    if let Some(envelope_id) = new.envelope_id {
        require_envelope(db, user_id, envelope_id).await?;
    }

    let created = quick_add_shortcut::ActiveModel {
        user_id: Set(user_id.to_string()),
        label: Set(label.to_string()),
        emoji: Set(new.emoji),
        default_amount: Set(round_cents(new.default_amount)),
        transaction_type: Set(new.transaction_type),
        category: Set(category),
        envelope_id: Set(new.envelope_id),
        is_system_default: Set(new.is_system_default),
        usage_count: Set(0),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(shortcut_id = created.id, user_id, "Shortcut created");
    Ok(created)
}

/// The user's shortcuts, most used first.
pub async fn list_shortcuts(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<quick_add_shortcut::Model>> {
    QuickAddShortcut::find()
        .filter(quick_add_shortcut::Column::UserId.eq(user_id))
        .order_by_desc(quick_add_shortcut::Column::UsageCount)
        .order_by_asc(quick_add_shortcut::Column::Label)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds a shortcut by label, ignoring case.
pub async fn find_shortcut_by_label(
    db: &DatabaseConnection,
    user_id: &str,
    label: &str,
) -> Result<Option<quick_add_shortcut::Model>> {
    let wanted = label.trim().to_lowercase();
    Ok(list_shortcuts(db, user_id)
        .await?
        .into_iter()
        .find(|shortcut| shortcut.label.to_lowercase() == wanted))
}

/// Deletes a shortcut.
pub async fn delete_shortcut(
    db: &DatabaseConnection,
    user_id: &str,
    shortcut_id: i64,
) -> Result<()> {
    let result = QuickAddShortcut::delete_many()
        .filter(quick_add_shortcut::Column::Id.eq(shortcut_id))
        .filter(quick_add_shortcut::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::validation(format!("shortcut {shortcut_id} not found")));
    }
    Ok(())
}

/// Records a ledger row from a shortcut and bumps its usage count.
///
/// The row goes through the regular ledger write path with source
/// `quick_add`, so the overspend block applies. The envelope comes from the
/// shortcut itself, else from the category route.
#[instrument(skip(db))]
pub async fn use_shortcut(
    db: &DatabaseConnection,
    user_id: &str,
    shortcut_id: i64,
    amount_override: Option<f64>,
    today: NaiveDate,
    resolution: Option<Resolution>,
) -> Result<Appended> {
    let txn = db.begin().await?;
    let shortcut = QuickAddShortcut::find_by_id(shortcut_id)
        .one(&txn)
        .await?
        .filter(|found| found.user_id == user_id)
        .ok_or_else(|| Error::validation(format!("shortcut {shortcut_id} not found")))?;

    let envelope_id = match shortcut.envelope_id {
        Some(id) => Some(id),
        None => default_envelope_for(&txn, user_id, &shortcut.category).await?,
    };
    let amount = amount_override.unwrap_or(shortcut.default_amount);

    let mut new = NewTransaction {
        user_id: user_id.to_string(),
        amount,
        transaction_type: shortcut.transaction_type,
        category: shortcut.category.clone(),
        envelope_id: None,
        pay_cycle_instance_id: None,
        source: TransactionSource::QuickAdd,
        transaction_date: today,
        description: Some(shortcut.label.clone()),
    };
    if let Some(id) = envelope_id {
        new = new.envelope(id);
    }
    let appended = ledger::append_in(&txn, new, resolution).await?;

    QuickAddShortcut::update_many()
        .col_expr(
            quick_add_shortcut::Column::UsageCount,
            Expr::col(quick_add_shortcut::Column::UsageCount).add(1),
        )
        .filter(quick_add_shortcut::Column::Id.eq(shortcut.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    info!(shortcut_id, amount, envelope_id = ?envelope_id, "Shortcut used");
    Ok(appended)
}
