//! Envelope Discord commands - dashboard, allocation, transfers and setup.
//!
//! These commands work on the pay period covering today, materializing it
//! first when needed.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{Context, catch_up, envelope_named, handlers::autocomplete, today},
        core::{
            allocation::{self, AllocationRule},
            dashboard::{
                Dashboard, EnvelopeLine, build_dashboard, calculate_percent_spent, format_peso,
                format_progress_bar,
            },
            pay_cycle, provision,
            schedule::Schedule,
        },
        entities::TransferReason,
        errors::{Error, Result},
    };
    use poise::serenity_prelude as serenity;

    /// Shows the current pay period at a glance.
    ///
    /// One field per envelope with a progress bar, then the period totals,
    /// how much is safe to spend per day and the cookie jar.
    #[poise::command(slash_command, prefix_command)]
    pub async fn dashboard(ctx: Context<'_>) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        catch_up(db, &user_id).await?;
        let view = build_dashboard(db, &user_id, today()).await?;

        let Some(period) = &view.instance else {
            ctx.say("📊 No pay period yet. Run `/setup` to create your pay cycle.")
                .await?;
            return Ok(());
        };

        let mut fields: Vec<(String, String, bool)> = view
            .lines
            .iter()
            .map(|line| (line_title(line), line_body(line), false))
            .collect();
        fields.push(("Totals".to_string(), totals_body(&view), false));
        fields.push(("🫙 Cookie jar".to_string(), jar_body(&view), false));
        if !view.pending.is_empty() {
            let pending = view
                .pending
                .iter()
                .map(|p| {
                    let flag = if p.requires_manual_reconfirm {
                        " ⚠️ needs reconfirming"
                    } else {
                        ""
                    };
                    format!("• {} to {}{flag}", p.period_start, p.period_end)
                })
                .collect::<Vec<_>>()
                .join("\n");
            fields.push(("Unconfirmed pay".to_string(), pending, false));
        }

        let status = if period.is_assumed {
            "pay not yet confirmed"
        } else {
            "pay confirmed"
        };
        let embed = serenity::CreateEmbed::default()
            .title("📊 Dashboard")
            .description(format!(
                "Pay period {} to {} ({status})",
                period.period_start, period.period_end
            ))
            .color(0x0034_98DB)
            .fields(fields)
            .footer(serenity::CreateEmbedFooter::new(format!(
                "As of {}",
                view.today
            )));

        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        Ok(())
    }

    /// Budgets an envelope for the current pay period.
    #[poise::command(slash_command, prefix_command)]
    pub async fn allocate(
        ctx: Context<'_>,
        #[description = "Envelope to budget"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        envelope_name: String,
        #[description = "Amount for this pay period"] amount: f64,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        let Some(period) = catch_up(db, &user_id).await? else {
            return Err(Error::NoActivePeriod { date: today() });
        };
        let envelope = envelope_named(db, &user_id, &envelope_name).await?;
        let alloc =
            allocation::allocate(db, period.id, envelope.id, AllocationRule::fixed(amount)).await?;

        ctx.say(format!(
            "✅ {} {} now has {} budgeted ({} available) for {} to {}.",
            envelope.emoji,
            envelope.name,
            format_peso(alloc.cap()),
            format_peso(alloc.available()),
            period.period_start,
            period.period_end
        ))
        .await?;
        Ok(())
    }

    /// Moves budget from one envelope to another in the current pay period.
    #[poise::command(slash_command, prefix_command)]
    pub async fn transfer(
        ctx: Context<'_>,
        #[description = "Envelope giving budget"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        from_envelope: String,
        #[description = "Envelope receiving budget"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        to_envelope: String,
        #[description = "Amount to move"] amount: f64,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        catch_up(db, &user_id).await?;
        let from = envelope_named(db, &user_id, &from_envelope).await?;
        let to = envelope_named(db, &user_id, &to_envelope).await?;
        let moved = crate::core::transfer::transfer(
            db,
            &user_id,
            from.id,
            to.id,
            amount,
            TransferReason::ManualTransfer,
            today(),
        )
        .await?;

        ctx.say(format!(
            "🔁 Moved {} from {} to {}.",
            format_peso(moved.amount),
            from.name,
            to.name
        ))
        .await?;
        Ok(())
    }

    /// Creates your pay cycle and the starter envelopes and shortcuts.
    ///
    /// Safe to run again: an existing pay cycle is kept and templates whose
    /// names you already use are skipped.
    #[poise::command(slash_command, prefix_command)]
    pub async fn setup(
        ctx: Context<'_>,
        #[description = "Income you expect each payday"] expected_amount: f64,
        #[description = "Day of the month you get paid (1-31)"] pay_day: u32,
        #[description = "Second payday of the month, if paid twice a month"]
        second_pay_day: Option<u32>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        ctx.defer().await?;

        let mut lines = Vec::new();
        match pay_cycle::active_pay_cycle(db, &user_id).await? {
            Some(existing) => lines.push(format!(
                "ℹ️ Keeping your pay cycle '{}' ({} expected).",
                existing.label,
                format_peso(existing.expected_amount)
            )),
            None => {
                let schedule = match second_pay_day {
                    Some(second) => Schedule::bimonthly(pay_day, second)?,
                    None => Schedule::monthly(pay_day)?,
                };
                let cycle = pay_cycle::create_pay_cycle(
                    db,
                    &user_id,
                    "Salary",
                    expected_amount,
                    schedule,
                )
                .await?;
                lines.push(format!(
                    "✅ Created pay cycle '{}' expecting {} per payday.",
                    cycle.label,
                    format_peso(cycle.expected_amount)
                ));
            }
        }

        let report = provision::provision_templates(db, &user_id, &ctx.data().templates).await?;
        if !report.envelopes_created.is_empty() {
            lines.push(format!(
                "📁 Envelopes: {}",
                report.envelopes_created.join(", ")
            ));
        }
        if !report.shortcuts_created.is_empty() {
            lines.push(format!(
                "⚡ Shortcuts: {}",
                report.shortcuts_created.join(", ")
            ));
        }
        let skipped = report.envelopes_skipped.len() + report.shortcuts_skipped.len();
        if skipped > 0 {
            lines.push(format!("Skipped {skipped} template(s) you already have."));
        }
        lines.push("Next: budget your envelopes with `/allocate`.".to_string());

        catch_up(db, &user_id).await?;
        ctx.say(lines.join("\n")).await?;
        Ok(())
    }

    fn line_title(line: &EnvelopeLine) -> String {
        let status = if line.is_over_budget {
            "🔴"
        } else if line.percent_spent >= 80.0 {
            "🟡"
        } else {
            "🟢"
        };
        format!("{status} {} {}", line.envelope.emoji, line.envelope.name)
    }

    fn line_body(line: &EnvelopeLine) -> String {
        let mut body = format!(
            "**Spent:** {} of {}\n**Left:** {}\n{}",
            format_peso(line.spent),
            format_peso(line.allocated + line.rollover),
            format_peso(line.remaining),
            format_progress_bar(line.percent_spent, Some(10))
        );
        if line.rollover > 0.0 {
            body.push_str(&format!("\n*Includes {} carried in*", format_peso(line.rollover)));
        }
        body
    }

    fn totals_body(view: &Dashboard) -> String {
        let next_payday = view
            .next_payday
            .map_or_else(|| "unknown".to_string(), |date| date.to_string());
        format!(
            "**Budgeted:** {}\n**Spent:** {}\n**Left:** {}\n\
             **Safe to spend:** {}/day for {} day(s)\n**Next payday:** {next_payday}",
            format_peso(view.total_allocated),
            format_peso(view.total_spent),
            format_peso(view.total_remaining),
            format_peso(view.safe_daily_spend),
            view.days_remaining
        )
    }

    fn jar_body(view: &Dashboard) -> String {
        let balance = format_peso(view.reserve_balance);
        match view.reserve_goal {
            Some(goal) if goal > 0.0 => {
                let name = view.reserve_goal_name.as_deref().unwrap_or("Goal");
                let percent = calculate_percent_spent(view.reserve_balance, goal);
                format!(
                    "{balance}\n{name}: {}\n{}",
                    format_peso(goal),
                    format_progress_bar(percent, Some(10))
                )
            }
            _ => balance,
        }
    }
}

// Re-export all commands
pub use inner::*;
