//! Autocomplete handlers for Discord slash command parameters.
//!
//! Suggestions are scoped to the invoking user's own envelopes and shortcuts.

use crate::{
    bot::Context,
    core::{envelope, shortcut},
};

/// Discord caps autocomplete lists at 25 entries.
const MAX_SUGGESTIONS: usize = 25;

/// Suggests the user's active envelope names containing `partial`.
pub async fn autocomplete_envelope_name(ctx: Context<'_>, partial: &str) -> Vec<String> {
    let db = &ctx.data().database;
    let user_id = ctx.author().id.to_string();

    let Ok(envelopes) = envelope::get_active_envelopes(db, &user_id).await else {
        return Vec::new();
    };
    matching(envelopes.into_iter().map(|env| env.name), partial)
}

/// Suggests the user's shortcut labels containing `partial`, most used first.
pub async fn autocomplete_shortcut_label(ctx: Context<'_>, partial: &str) -> Vec<String> {
    let db = &ctx.data().database;
    let user_id = ctx.author().id.to_string();

    let Ok(shortcuts) = shortcut::list_shortcuts(db, &user_id).await else {
        return Vec::new();
    };
    matching(shortcuts.into_iter().map(|s| s.label), partial)
}

fn matching(names: impl Iterator<Item = String>, partial: &str) -> Vec<String> {
    let partial_lower = partial.to_lowercase();
    names
        .filter(|name| name.to_lowercase().contains(&partial_lower))
        .take(MAX_SUGGESTIONS)
        .collect()
}
