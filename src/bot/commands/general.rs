//! General Discord commands - ping and help.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{bot::Context, errors::Result};

    /// Responds with "Pong!" to test bot connectivity.
    #[poise::command(slash_command, prefix_command)]
    pub async fn ping(ctx: Context<'_>) -> Result<()> {
        ctx.say("Pong!").await?;
        Ok(())
    }

    /// Displays help information about available commands.
    #[poise::command(slash_command, prefix_command)]
    pub async fn help(ctx: Context<'_>) -> Result<()> {
        let help_text = "**Sahod Envelopes Help**\n\
        Budget each pay period into envelopes; leftovers go to the cookie jar.\n\n\
        **Getting started**\n\
        • `/setup <expected_amount> <pay_day> [second_pay_day]` - Creates your pay cycle and starter envelopes.\n\
        • `/allocate <envelope> <amount>` - Budgets an envelope for the current pay period.\n\n\
        **Everyday**\n\
        • `/spend <envelope> <amount> [description] [cover_from_jar] [cover_from]` - Records an expense.\n\
        • `/income <amount> [category] [description]` - Records extra income.\n\
        • `/quick <shortcut> [amount]` - Records a preset expense.\n\
        • `/dashboard` - Shows this pay period at a glance.\n\n\
        **Pay day**\n\
        • `/confirm_pay [amount] [cover_shortfall]` - Confirms what you were actually paid.\n\n\
        **Moving money**\n\
        • `/transfer <from> <to> <amount>` - Moves budget between envelopes.\n\
        • `/jar balance|deposit|cover|goal` - Manages the cookie jar.\n\n\
        **Utility**\n\
        • `/ping` - Checks if the bot is responsive.\n\
        • `/help` - Shows this help message.";

        ctx.say(help_text).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
