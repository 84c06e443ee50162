//! Cookie jar Discord commands.
//!
//! The jar is the overflow reserve: it collects leftover budget and income
//! surplus, and pays for overspends and shortfalls when asked.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{Context, catch_up, envelope_named, handlers::autocomplete, today},
        core::{
            dashboard::format_peso,
            reserve::{self, ReserveRefs},
        },
        entities::{ReserveMovement, ReserveSource},
        errors::Result,
    };

    const HISTORY_LIMIT: u64 = 10;

    /// Cookie jar commands.
    #[poise::command(
        slash_command,
        prefix_command,
        subcommands("balance", "deposit", "cover", "goal")
    )]
    pub async fn jar(_ctx: Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Shows the jar balance, goal and recent movements.
    #[poise::command(slash_command, prefix_command)]
    pub async fn balance(ctx: Context<'_>) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        catch_up(db, &user_id).await?;
        let jar = reserve::get_reserve(db, &user_id).await?;
        let movements = reserve::history(db, &user_id, HISTORY_LIMIT).await?;

        let mut text = format!("🫙 **Cookie jar:** {}", format_peso(jar.current_balance));
        if let Some(goal) = jar.goal_amount {
            let name = jar.goal_name.as_deref().unwrap_or("Goal");
            text.push_str(&format!("\n🎯 {name}: {}", format_peso(goal)));
        }
        if !movements.is_empty() {
            text.push_str("\n\n**Recent**");
            for movement in &movements {
                let arrow = match movement.transaction_type {
                    ReserveMovement::Deposit => "⬆️",
                    ReserveMovement::Withdrawal => "⬇️",
                };
                text.push_str(&format!(
                    "\n{arrow} {} · {} · {}",
                    format_peso(movement.amount),
                    source_label(movement.source),
                    movement.created_at.format("%Y-%m-%d")
                ));
            }
        }

        ctx.say(text).await?;
        Ok(())
    }

    /// Puts money into the jar.
    #[poise::command(slash_command, prefix_command)]
    pub async fn deposit(
        ctx: Context<'_>,
        #[description = "Amount to deposit"] amount: f64,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        reserve::deposit(
            db,
            &user_id,
            amount,
            ReserveSource::Manual,
            ReserveRefs::default(),
        )
        .await?;
        let total = reserve::balance(db, &user_id).await?;

        ctx.say(format!(
            "🫙 Deposited {}. The jar now holds {}.",
            format_peso(amount),
            format_peso(total)
        ))
        .await?;
        Ok(())
    }

    /// Raises an envelope's budget this pay period using jar money.
    #[poise::command(slash_command, prefix_command)]
    pub async fn cover(
        ctx: Context<'_>,
        #[description = "Envelope to top up"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        envelope_name: String,
        #[description = "Amount to take from the jar"] amount: f64,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        catch_up(db, &user_id).await?;
        let envelope = envelope_named(db, &user_id, &envelope_name).await?;
        let alloc = reserve::cover_overspend(db, &user_id, envelope.id, amount, today()).await?;

        ctx.say(format!(
            "🫙 Moved {} from the jar into {}. {} left this pay period.",
            format_peso(amount),
            envelope.name,
            format_peso(alloc.available())
        ))
        .await?;
        Ok(())
    }

    /// Sets or clears the jar's savings goal.
    #[poise::command(slash_command, prefix_command)]
    pub async fn goal(
        ctx: Context<'_>,
        #[description = "Target amount (leave empty to clear)"] amount: Option<f64>,
        #[description = "What you are saving for"] name: Option<String>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        let jar = reserve::set_goal(db, &user_id, amount, name).await?;
        let text = match jar.goal_amount {
            Some(goal) => format!(
                "🎯 Goal set: {} {}.",
                jar.goal_name.as_deref().unwrap_or("savings"),
                format_peso(goal)
            ),
            None => "🎯 Goal cleared.".to_string(),
        };
        ctx.say(text).await?;
        Ok(())
    }

    const fn source_label(source: ReserveSource) -> &'static str {
        match source {
            ReserveSource::EnvelopeRollover => "leftover budget",
            ReserveSource::IncomeSurplus => "income surplus",
            ReserveSource::Manual => "manual",
            ReserveSource::OverspendCover => "overspend cover",
            ReserveSource::ShortfallCover => "shortfall cover",
        }
    }
}

// Re-export all commands
pub use inner::*;
