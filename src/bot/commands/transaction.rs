//! Ledger Discord commands - `spend`, `income` and `quick`.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{Context, catch_up, envelope_named, handlers::autocomplete, today},
        core::{
            dashboard::format_peso,
            ledger::{self, Appended, NewTransaction, Resolution},
            shortcut,
        },
        errors::{Error, Result},
    };

    /// Records an expense from an envelope.
    ///
    /// An expense that would overspend the envelope is refused unless you say
    /// how to fund the gap: from the cookie jar, or from another envelope.
    #[poise::command(slash_command, prefix_command)]
    pub async fn spend(
        ctx: Context<'_>,
        #[description = "Envelope to spend from"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        envelope_name: String,
        #[description = "Amount spent"] amount: f64,
        #[description = "What it was for"] description: Option<String>,
        #[description = "Category (defaults to the envelope name)"] category: Option<String>,
        #[description = "Cover any overspend from the cookie jar"] cover_from_jar: Option<bool>,
        #[description = "Cover any overspend by moving budget from this envelope"]
        #[autocomplete = "autocomplete::autocomplete_envelope_name"]
        cover_from: Option<String>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();
        catch_up(db, &user_id).await?;
        let envelope = envelope_named(db, &user_id, &envelope_name).await?;
        let donor = match cover_from.as_deref() {
            Some(name) => Some(envelope_named(db, &user_id, name).await?.id),
            None => None,
        };

        let mut new = NewTransaction::expense(
            &user_id,
            amount,
            category.as_deref().unwrap_or(&envelope.name),
            today(),
        )
        .envelope(envelope.id);
        if let Some(text) = description {
            new = new.description(text);
        }

        let first_try = ledger::append_transaction(db, new.clone(), None).await;
        let appended = match (first_try, donor) {
            (Err(Error::OverspendBlocked { deficit, .. }), Some(from_envelope_id)) => {
                let resolution = Resolution::Transfer {
                    from_envelope_id,
                    amount: deficit,
                };
                ledger::append_transaction(db, new, Some(resolution)).await?
            }
            (Err(Error::OverspendBlocked { deficit, .. }), None) if cover_from_jar == Some(true) => {
                let resolution = Resolution::ReserveCover { amount: deficit };
                ledger::append_transaction(db, new, Some(resolution)).await?
            }
            (other, _) => other?,
        };

        ctx.say(spend_message(&envelope.name, &appended)).await?;
        Ok(())
    }

    /// Records income that is not your salary, such as a refund or side job.
    #[poise::command(slash_command, prefix_command)]
    pub async fn income(
        ctx: Context<'_>,
        #[description = "Amount received"] amount: f64,
        #[description = "Category, e.g. 'refund'"] category: Option<String>,
        #[description = "What it was for"] description: Option<String>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();

        let mut new = NewTransaction::income(
            &user_id,
            amount,
            category.as_deref().unwrap_or("other income"),
            today(),
        );
        if let Some(text) = description {
            new = new.description(text);
        }
        let appended = ledger::append_transaction(db, new, None).await?;

        ctx.say(format!(
            "✅ Recorded {} income (Transaction ID: {})",
            format_peso(appended.transaction.amount),
            appended.transaction.id
        ))
        .await?;
        Ok(())
    }

    /// Records a preset expense from one of your shortcuts.
    #[poise::command(slash_command, prefix_command)]
    pub async fn quick(
        ctx: Context<'_>,
        #[description = "Shortcut to use"]
        #[autocomplete = "autocomplete::autocomplete_shortcut_label"]
        shortcut_label: String,
        #[description = "Override the preset amount"] amount: Option<f64>,
        #[description = "Cover any overspend from the cookie jar"] cover_from_jar: Option<bool>,
    ) -> Result<()> {
        let db = &ctx.data().database;
        let user_id = ctx.author().id.to_string();
        catch_up(db, &user_id).await?;
        let Some(preset) = shortcut::find_shortcut_by_label(db, &user_id, &shortcut_label).await?
        else {
            ctx.say(format!(
                "❌ Shortcut '{shortcut_label}' not found. `/setup` adds the starter shortcuts."
            ))
            .await?;
            return Ok(());
        };

        let date = today();
        let appended =
            match shortcut::use_shortcut(db, &user_id, preset.id, amount, date, None).await {
                Err(Error::OverspendBlocked { deficit, .. }) if cover_from_jar == Some(true) => {
                    let resolution = Resolution::ReserveCover { amount: deficit };
                    shortcut::use_shortcut(db, &user_id, preset.id, amount, date, Some(resolution))
                        .await?
                }
                other => other?,
            };

        ctx.say(spend_message(&format!("{} {}", preset.emoji, preset.label), &appended))
            .await?;
        Ok(())
    }

    fn spend_message(name: &str, appended: &Appended) -> String {
        let amount = format_peso(appended.transaction.amount);
        match &appended.allocation {
            Some(alloc) => format!(
                "✅ Spent {amount} on {name}. {} left this pay period.",
                format_peso(alloc.available())
            ),
            None => format!("✅ Spent {amount} on {name} (not budgeted this pay period)."),
        }
    }
}

// Re-export all commands
pub use inner::*;
