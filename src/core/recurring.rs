//! Recurring rules - scheduled ledger rows such as rent or subscriptions.
//!
//! A rule stores its schedule in the same shape as a pay cycle and the date
//! of its next occurrence. Running the due rules writes one row per missed
//! occurrence and moves `next_run_date` forward in the same transaction.

use crate::{
    core::{
        envelope::{self, normalize_category, require_envelope},
        ledger::{self, NewTransaction},
        require_positive, round_cents,
        schedule::Schedule,
    },
    entities::{RecurringRule, TransactionSource, TransactionType, recurring_rule},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Upper bound on occurrences written for one rule in one run.
const MAX_CATCH_UP: usize = 366;

/// A rule waiting to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    /// Copied onto each generated row
    pub description: String,
    /// Positive amount of each row
    pub amount: f64,
    /// Income or expense
    pub transaction_type: TransactionType,
    /// Category id
    pub category: String,
    /// Envelope charged, if any
    pub envelope_id: Option<i64>,
    /// When the rule fires
    pub schedule: Schedule,
    /// Date of the first occurrence
    pub first_run: NaiveDate,
}

/// Occurrences written by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Ledger row ids written, in order
    pub written: Vec<i64>,
    /// Rules stopped early because an occurrence was refused
    pub stalled_rules: Vec<i64>,
}

/// Creates a recurring rule.
#[instrument(skip(db, new), fields(description = %new.description))]
pub async fn create_rule(
    db: &DatabaseConnection,
    user_id: &str,
    new: NewRule,
) -> Result<recurring_rule::Model> {
    require_positive(new.amount)?;
    let description = new.description.trim();
    if description.is_empty() {
        return Err(Error::validation("rule description cannot be empty"));
    }
    let category = normalize_category(&new.category)?;
    if let Some(envelope_id) = new.envelope_id {
        require_envelope(db, user_id, envelope_id).await?;
    }

    let (frequency, day_1, day_2, day_of_week) = new.schedule.to_parts();
    let created = recurring_rule::ActiveModel {
        user_id: Set(user_id.to_string()),
        description: Set(description.to_string()),
        amount: Set(round_cents(new.amount)),
        transaction_type: Set(new.transaction_type),
        category: Set(category),
        envelope_id: Set(new.envelope_id),
        frequency: Set(frequency),
        day_1: Set(day_1),
        day_2: Set(day_2),
        day_of_week: Set(day_of_week),
        next_run_date: Set(new.first_run),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(rule_id = created.id, next_run = %created.next_run_date, "Recurring rule created");
    Ok(created)
}

/// The user's rules, soonest first.
pub async fn list_rules(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<recurring_rule::Model>> {
    RecurringRule::find()
        .filter(recurring_rule::Column::UserId.eq(user_id))
        .order_by_asc(recurring_rule::Column::NextRunDate)
        .order_by_asc(recurring_rule::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Pauses or resumes a rule.
pub async fn set_rule_active(
    db: &DatabaseConnection,
    user_id: &str,
    rule_id: i64,
    is_active: bool,
) -> Result<recurring_rule::Model> {
    let rule = RecurringRule::find_by_id(rule_id)
        .one(db)
        .await?
        .filter(|found| found.user_id == user_id)
        .ok_or_else(|| Error::validation(format!("recurring rule {rule_id} not found")))?;
    let mut active: recurring_rule::ActiveModel = rule.into();
    active.is_active = Set(is_active);
    active.update(db).await.map_err(Into::into)
}

/// Writes every occurrence due on or before `today`.
///
/// Each occurrence commits separately together with the advanced
/// `next_run_date`, so a rerun never duplicates a row. An occurrence refused
/// by the overspend block, or aimed at a deactivated envelope, stops that
/// rule for this run and leaves it due.
#[instrument(skip(db))]
pub async fn run_due_rules(
    db: &DatabaseConnection,
    user_id: &str,
    today: NaiveDate,
) -> Result<RunReport> {
    let due = RecurringRule::find()
        .filter(recurring_rule::Column::UserId.eq(user_id))
        .filter(recurring_rule::Column::IsActive.eq(true))
        .filter(recurring_rule::Column::NextRunDate.lte(today))
        .order_by_asc(recurring_rule::Column::NextRunDate)
        .all(db)
        .await?;

    let mut report = RunReport::default();
    for rule in due {
        let schedule = rule.schedule()?;
        let rule_id = rule.id;
        let mut next = rule.next_run_date;
        let mut runs = 0;
        while next <= today && runs < MAX_CATCH_UP {
            match run_occurrence(db, &rule, schedule, next).await {
                Ok((written, following)) => {
                    report.written.push(written);
                    next = following;
                    runs += 1;
                }
                Err(e @ (Error::OverspendBlocked { .. } | Error::EnvelopeNotFound { .. })) => {
                    warn!(rule_id, occurrence = %next, error = %e, "Recurring occurrence refused");
                    report.stalled_rules.push(rule_id);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(rule_id, runs, next_run = %next, "Recurring rule processed");
    }

    if !report.written.is_empty() {
        info!(user_id, rows = report.written.len(), "Recurring rows written");
    }
    Ok(report)
}

async fn run_occurrence(
    db: &DatabaseConnection,
    rule: &recurring_rule::Model,
    schedule: Schedule,
    occurrence: NaiveDate,
) -> Result<(i64, NaiveDate)> {
    let txn = db.begin().await?;
    let mut new = NewTransaction {
        user_id: rule.user_id.clone(),
        amount: rule.amount,
        transaction_type: rule.transaction_type,
        category: rule.category.clone(),
        envelope_id: None,
        pay_cycle_instance_id: None,
        source: TransactionSource::Recurring,
        transaction_date: occurrence,
        description: Some(rule.description.clone()),
    };
    let envelope_id = match rule.envelope_id {
        Some(envelope_id) => Some(envelope_id),
        None => envelope::default_envelope_for(&txn, &rule.user_id, &rule.category).await?,
    };
    if let Some(envelope_id) = envelope_id {
        new = new.envelope(envelope_id);
    }
    let appended = ledger::append_in(&txn, new, None).await?;

    let following = schedule.next_pay_date_after(occurrence)?;
    RecurringRule::update_many()
        .col_expr(recurring_rule::Column::NextRunDate, Expr::value(following))
        .filter(recurring_rule::Column::Id.eq(rule.id))
        .exec(&txn)
        .await?;
    txn.commit().await?;
    Ok((appended.transaction.id, following))
}
