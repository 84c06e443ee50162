//! Dashboard projection and display helpers.
//!
//! The dashboard is read-only: it looks at the pay period already covering
//! `today` and never materializes one, so viewing it cannot change state.
//! Spent figures are summed from the ledger rather than read from the cache.

use crate::{
    core::{
        allocation, envelope, pay_cycle, round_cents,
        schedule::{days_remaining, safe_daily_spend, shift},
    },
    entities::{OverflowReserve, envelope as envelope_entity, overflow_reserve, pay_cycle_instance},
    errors::Result,
};
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, prelude::*};

/// One envelope's row on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeLine {
    /// The envelope
    pub envelope: envelope_entity::Model,
    /// Planned budget this period
    pub allocated: f64,
    /// Carried in or reserve-covered budget
    pub rollover: f64,
    /// Spent this period
    pub spent: f64,
    /// Cap minus spent, negative when over
    pub remaining: f64,
    /// Spent as a share of the cap (0 when there is no cap)
    pub percent_spent: f64,
    /// Spent beyond the cap
    pub is_over_budget: bool,
}

/// Everything `/dashboard` shows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    /// Day the projection was taken
    pub today: NaiveDate,
    /// Period covering today, if materialized
    pub instance: Option<pay_cycle_instance::Model>,
    /// Per-envelope lines in sort order
    pub lines: Vec<EnvelopeLine>,
    /// Sum of allocated amounts
    pub total_allocated: f64,
    /// Sum of spent amounts
    pub total_spent: f64,
    /// Sum of remaining amounts
    pub total_remaining: f64,
    /// Days left in the period, today included
    pub days_remaining: i64,
    /// What can be spent per day without breaking the budget
    pub safe_daily_spend: f64,
    /// Next expected salary date on or after today
    pub next_payday: Option<NaiveDate>,
    /// Reserve balance
    pub reserve_balance: f64,
    /// Reserve savings goal
    pub reserve_goal: Option<f64>,
    /// Reserve goal label
    pub reserve_goal_name: Option<String>,
    /// Periods still assumed or flagged for reconfirmation
    pub pending: Vec<pay_cycle_instance::Model>,
}

/// Builds the dashboard for `user_id` as of `today`.
pub async fn build_dashboard(
    db: &DatabaseConnection,
    user_id: &str,
    today: NaiveDate,
) -> Result<Dashboard> {
    let instance = pay_cycle::instance_for_date(db, user_id, today).await?;
    let envelopes = envelope::get_active_envelopes(db, user_id).await?;

    let mut lines = Vec::with_capacity(envelopes.len());
    if let Some(period) = &instance {
        let allocations = allocation::allocations_for_instance(db, period.id).await?;
        for env in envelopes {
            let budget = allocations.iter().find(|alloc| alloc.envelope_id == env.id);
            let spent = allocation::spent_in_period(
                db,
                user_id,
                env.id,
                period.period_start,
                period.period_end,
            )
            .await?;
            lines.push(envelope_line(
                env,
                budget.map_or(0.0, |alloc| alloc.allocated_amount),
                budget.map_or(0.0, |alloc| alloc.rollover_amount),
                spent,
            ));
        }
    } else {
        lines.extend(envelopes.into_iter().map(|env| envelope_line(env, 0.0, 0.0, 0.0)));
    }

    let total_allocated = round_cents(lines.iter().map(|line| line.allocated).sum());
    let total_spent = round_cents(lines.iter().map(|line| line.spent).sum());
    let total_remaining = round_cents(lines.iter().map(|line| line.remaining).sum());
    let days_left = instance
        .as_ref()
        .map_or(0, |period| days_remaining(period.period_end, today));

    let next_payday = match pay_cycle::active_pay_cycle(db, user_id).await? {
        Some(cycle) => {
            let schedule = cycle.schedule()?;
            Some(schedule.next_pay_date_after(shift(today, -1)?)?)
        }
        None => None,
    };

    let reserve = OverflowReserve::find()
        .filter(overflow_reserve::Column::UserId.eq(user_id))
        .one(db)
        .await?;

    Ok(Dashboard {
        today,
        instance,
        lines,
        total_allocated,
        total_spent,
        total_remaining,
        days_remaining: days_left,
        safe_daily_spend: safe_daily_spend(total_remaining, days_left),
        next_payday,
        reserve_balance: reserve.as_ref().map_or(0.0, |r| r.current_balance),
        reserve_goal: reserve.as_ref().and_then(|r| r.goal_amount),
        reserve_goal_name: reserve.and_then(|r| r.goal_name),
        pending: pay_cycle::pending_instances(db, user_id).await?,
    })
}

fn envelope_line(
    envelope: envelope_entity::Model,
    allocated: f64,
    rollover: f64,
    spent: f64,
) -> EnvelopeLine {
    let cap = allocated + rollover;
    EnvelopeLine {
        envelope,
        allocated,
        rollover,
        spent,
        remaining: round_cents(cap - spent),
        percent_spent: calculate_percent_spent(spent, cap),
        is_over_budget: crate::core::exceeds(spent, cap),
    }
}

/// Spent as a percentage of the cap; 0 when the cap is not positive.
#[must_use]
pub fn calculate_percent_spent(spent: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (spent / cap) * 100.0
}

/// Generates a progress bar string for visual representation.
///
/// Creates a text-based progress bar like: `[████████░░] 80.0%`. The bar is
/// clamped to its length; the printed percentage is not.
#[must_use]
pub fn format_progress_bar(progress_percent: f64, bar_length: Option<usize>) -> String {
    let length = bar_length.unwrap_or(10);
    let clamped_progress = progress_percent.clamp(0.0, 100.0);

    // clamped_progress is in [0, 100] and length is small, so the result is in [0, length].
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let filled = ((clamped_progress / 100.0) * length as f64).round() as usize;
    let empty = length.saturating_sub(filled);

    let filled_str = "█".repeat(filled);
    let empty_str = "░".repeat(empty);

    format!("[{filled_str}{empty_str}] {progress_percent:.1}%")
}

/// Formats an amount as pesos with thousands separators, e.g. `₱1,234.50`.
#[must_use]
pub fn format_peso(amount: f64) -> String {
    let rounded = round_cents(amount.abs());
    let fixed = format!("{rounded:.2}");
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if round_cents(amount) < 0.0 { "-" } else { "" };
    format!("{sign}₱{grouped}.{cents}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{
        core::{
            allocation::AllocationRule,
            reserve::{self, ReserveRefs},
        },
        entities::ReserveSource,
        test_utils::*,
    };

    #[test]
    fn test_calculate_percent_spent() {
        assert_eq!(calculate_percent_spent(50.0, 100.0), 50.0);
        assert_eq!(calculate_percent_spent(125.0, 100.0), 125.0);
        assert_eq!(calculate_percent_spent(50.0, 0.0), 0.0);
    }

    #[test]
    fn test_format_progress_bar() {
        assert_eq!(format_progress_bar(100.0, Some(10)), "[██████████] 100.0%");
        assert_eq!(format_progress_bar(50.0, Some(10)), "[█████░░░░░] 50.0%");
        assert_eq!(format_progress_bar(0.0, None), "[░░░░░░░░░░] 0.0%");
        // Overspending fills the bar but keeps the real figure
        assert_eq!(format_progress_bar(125.0, Some(4)), "[████] 125.0%");
    }

    #[test]
    fn test_format_peso() {
        assert_eq!(format_peso(0.0), "₱0.00");
        assert_eq!(format_peso(13.5), "₱13.50");
        assert_eq!(format_peso(1234.5), "₱1,234.50");
        assert_eq!(format_peso(1_000_000.0), "₱1,000,000.00");
        assert_eq!(format_peso(-50.0), "-₱50.00");
        assert_eq!(format_peso(-0.001), "₱0.00");
    }

    #[tokio::test]
    async fn test_dashboard_projection() -> Result<()> {
        let (db, instance) = setup_with_period(20000.0).await?;
        let food = create_test_envelope(&db, "Food").await?;
        let fun = create_test_envelope(&db, "Fun").await?;
        create_test_envelope(&db, "Unbudgeted").await?;
        allocation::allocate(&db, instance.id, food.id, AllocationRule::fixed(6000.0)).await?;
        allocation::allocate(&db, instance.id, fun.id, AllocationRule::fixed(1000.0)).await?;
        spend(&db, food.id, 1500.0, date(2025, 1, 3)).await?;
        reserve::deposit(&db, TEST_USER, 300.0, ReserveSource::Manual, ReserveRefs::NONE).await?;

        let dashboard = build_dashboard(&db, TEST_USER, date(2025, 1, 22)).await?;
        assert_eq!(dashboard.instance.as_ref().unwrap().id, instance.id);
        assert_eq!(dashboard.lines.len(), 3);
        assert_eq!(dashboard.lines[0].envelope.name, "Food");
        assert_eq!(dashboard.lines[0].remaining, 4500.0);
        assert_eq!(dashboard.lines[0].percent_spent, 25.0);
        assert!(!dashboard.lines[0].is_over_budget);
        assert_eq!(dashboard.lines[2].allocated, 0.0);

        assert_eq!(dashboard.total_allocated, 7000.0);
        assert_eq!(dashboard.total_spent, 1500.0);
        assert_eq!(dashboard.total_remaining, 5500.0);
        // Jan 22 through Jan 31
        assert_eq!(dashboard.days_remaining, 10);
        assert_eq!(dashboard.safe_daily_spend, 550.0);
        assert_eq!(dashboard.next_payday, Some(date(2025, 2, 15)));
        assert_eq!(dashboard.reserve_balance, 300.0);
        assert_eq!(dashboard.pending.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_dashboard_never_materializes() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_pay_cycle(&db, 20000.0).await?;
        create_test_envelope(&db, "Food").await?;

        let dashboard = build_dashboard(&db, TEST_USER, date(2025, 1, 15)).await?;
        assert!(dashboard.instance.is_none());
        assert_eq!(dashboard.days_remaining, 0);
        assert_eq!(dashboard.safe_daily_spend, 0.0);
        assert_eq!(dashboard.next_payday, Some(date(2025, 1, 15)));
        assert!(
            pay_cycle::instance_history(&db, TEST_USER, 10)
                .await?
                .is_empty()
        );
        Ok(())
    }
}
