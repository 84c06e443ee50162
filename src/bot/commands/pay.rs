//! Pay day command - confirming what a pay period actually brought in.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{Context, catch_up, today},
        core::{
            dashboard::format_peso,
            pay_cycle::{self, IncomeLink},
            reserve,
        },
        errors::{Error, Result},
    };

    /// Confirms your salary for the oldest unconfirmed pay period.
    ///
    /// An income row you already recorded near the pay date is linked instead
    /// of writing a second one. Leftover income goes to the cookie jar; a
    /// shortfall is only covered from the jar when you ask.
    #[poise::command(slash_command, prefix_command)]
    pub async fn confirm_pay(
        ctx: Context<'_>,
        #[description = "Amount you were actually paid (defaults to the expected amount)"]
        amount: Option<f64>,
        #[description = "Cover any shortfall from the cookie jar"] cover_shortfall: Option<bool>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();
        let date = today();

        let current = catch_up(db, &user_id).await?;
        let pending = pay_cycle::pending_instances(db, &user_id).await?;
        let target = pending
            .into_iter()
            .find(|p| p.expected_pay_date <= date)
            .or(current)
            .ok_or(Error::NoActivePeriod { date })?;

        let expected = amount.unwrap_or(target.expected_amount);
        let link = match pay_cycle::find_salary_candidate(db, target.id, expected).await? {
            Some(row) => IncomeLink::Existing(row.id),
            None => IncomeLink::Create,
        };
        let linked_existing = matches!(link, IncomeLink::Existing(_));
        let outcome = pay_cycle::confirm_income(db, target.id, amount, link, date).await?;

        let mut lines = vec![format!(
            "✅ Confirmed {} for {} to {}.",
            format_peso(outcome.instance.actual_amount.unwrap_or(expected)),
            outcome.instance.period_start,
            outcome.instance.period_end
        )];
        if linked_existing {
            lines.push("🔗 Linked the income you had already recorded.".to_string());
        }
        if outcome.surplus_routed > 0.0 {
            lines.push(format!(
                "🫙 {} left over went to the cookie jar.",
                format_peso(outcome.surplus_routed)
            ));
        }

        if let Some(shortfall) = &outcome.shortfall {
            lines.push(format!(
                "⚠️ You budgeted {} but were paid {}, short by {}.",
                format_peso(shortfall.allocated),
                format_peso(shortfall.actual),
                format_peso(shortfall.deficit)
            ));
            if cover_shortfall == Some(true) {
                let available = reserve::balance(db, &user_id).await?;
                let cover = shortfall.deficit.min(available);
                if cover > 0.0 {
                    reserve::cover_shortfall(db, outcome.instance.id, cover).await?;
                    lines.push(format!(
                        "🫙 Covered {} from the cookie jar.",
                        format_peso(cover)
                    ));
                }
                if cover < shortfall.deficit {
                    lines.push(
                        "Lower some allocations with `/allocate` to cover the rest.".to_string(),
                    );
                }
            } else {
                lines.push(
                    "Cover it with `cover_shortfall`, or lower allocations with `/allocate`."
                        .to_string(),
                );
            }
        }

        ctx.say(lines.join("\n")).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
