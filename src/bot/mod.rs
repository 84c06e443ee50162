//! Bot layer - Discord-specific interface and command handlers
//!
//! Commands are thin adapters: they parse arguments, call into `core`, and
//! render the result. Engine errors carry structured detail, which
//! [`describe_error`] turns into a message the user can act on.

/// Discord command implementations
pub mod commands;
/// Discord interaction handlers (autocomplete, etc.)
pub mod handlers;

use crate::{
    config::templates::Templates,
    core::{dashboard::format_peso, pay_cycle, recurring},
    errors::{Error, Result},
};
use poise::serenity_prelude as serenity;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Days after the expected pay date before an unconfirmed period is assumed paid.
pub const AUTO_CONFIRM_GRACE_DAYS: i64 = 3;

/// Shared data available to all bot commands.
pub struct BotData {
    /// Database connection for all database operations
    pub database: DatabaseConnection,
    /// Starter envelopes and shortcuts offered by `/setup`
    pub templates: Arc<Templates>,
}

impl BotData {
    /// Creates a new `BotData` instance with the given database connection.
    #[must_use]
    pub const fn new(database: DatabaseConnection, templates: Arc<Templates>) -> Self {
        Self {
            database,
            templates,
        }
    }
}

/// Poise context used by every command.
pub type Context<'a> = poise::Context<'a, BotData, Error>;

/// Today's date in the bot's local time zone.
#[must_use]
pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

/// Brings a user's state up to today before a command runs.
///
/// Materializes the pay period covering today, auto-confirms periods past
/// their grace window and writes due recurring rows. Returns the current
/// period, if the user has an active pay cycle.
pub(crate) async fn catch_up(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<crate::entities::PayCycleInstanceModel>> {
    let date = today();
    let current = pay_cycle::current_instance(db, user_id, date).await?;
    let confirmed =
        pay_cycle::auto_confirm_due(db, Some(user_id), date, AUTO_CONFIRM_GRACE_DAYS).await?;
    let rules = recurring::run_due_rules(db, user_id, date).await?;
    if !confirmed.is_empty() || !rules.written.is_empty() {
        info!(
            user_id,
            auto_confirmed = confirmed.len(),
            recurring_rows = rules.written.len(),
            "Caught up user state"
        );
    }
    Ok(current)
}

/// Looks up one of the user's envelopes by name for a command argument.
pub(crate) async fn envelope_named(
    db: &DatabaseConnection,
    user_id: &str,
    name: &str,
) -> Result<crate::entities::EnvelopeModel> {
    crate::core::envelope::get_envelope_by_name(db, user_id, name)
        .await?
        .ok_or_else(|| Error::Validation {
            message: format!("Envelope '{name}' not found. Check `/dashboard` for your envelopes."),
        })
}

/// Renders an error as a user-facing message.
#[must_use]
pub fn describe_error(error: &Error) -> String {
    match error {
        Error::OverspendBlocked {
            cap,
            spent,
            attempted,
            deficit,
            ..
        } => format!(
            "🚫 That would overspend this envelope.\n\
             Cap {} · spent {} · this expense {}\n\
             Short by **{}**. Retry with `cover_from_jar` or `cover_from` another envelope.",
            format_peso(*cap),
            format_peso(*spent),
            format_peso(*attempted),
            format_peso(*deficit)
        ),
        Error::InsufficientBalance {
            available,
            requested,
        } => format!(
            "🫙 The cookie jar only has {} (needed {}).",
            format_peso(*available),
            format_peso(*requested)
        ),
        Error::InsufficientSourceBudget {
            available,
            requested,
            ..
        } => format!(
            "❌ That envelope only has {} left to give (asked for {}).",
            format_peso(*available),
            format_peso(*requested)
        ),
        Error::OverAllocated {
            base,
            requested_total,
        } => format!(
            "❌ Allocations would total {} but this pay period only brings in {}.",
            format_peso(*requested_total),
            format_peso(*base)
        ),
        Error::NoActivePeriod { date } => {
            format!("❌ No pay period covers {date}. Set one up with `/setup`.")
        }
        Error::OrphanedInstance { .. } => {
            "⚠️ This pay period lost its salary record. Confirm it again with `/confirm_pay`."
                .to_string()
        }
        Error::AlreadyConfirmed { .. } => "ℹ️ That pay period is already confirmed.".to_string(),
        Error::InvalidAmount { .. } => "❌ Amount must be a positive number.".to_string(),
        Error::Validation { message } => format!("❌ {message}"),
        Error::Database(_) | Error::Io(_) | Error::FrameworkError(_) => {
            "❌ Something went wrong on our side. Please try again.".to_string()
        }
        other => format!("❌ {other}"),
    }
}

async fn on_error(error: poise::FrameworkError<'_, BotData, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
            if let Err(e) = ctx.say(describe_error(&error)).await {
                error!("Failed to send error message: {}", e);
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Builds the poise framework and runs the Discord client until it stops.
#[instrument(skip(token, data))]
pub async fn run_bot(token: String, data: BotData) -> Result<()> {
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::spend(),
                commands::income(),
                commands::quick(),
                commands::confirm_pay(),
                commands::dashboard(),
                commands::allocate(),
                commands::transfer(),
                commands::jar(),
                commands::setup(),
                commands::ping(),
                commands::help(),
            ],
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Slash commands registered");
                Ok(data)
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged();
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot client...");
    client.start().await?;
    Ok(())
}
