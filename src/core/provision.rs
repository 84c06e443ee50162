//! Template provisioning - seeds a user's envelopes and shortcuts from
//! the system templates.
//!
//! Provisioning is idempotent: envelopes whose names already exist and
//! shortcuts whose labels already exist are skipped, ignoring case.

use crate::{
    config::templates::{EnvelopeTemplate, ShortcutTemplate, Templates},
    core::{
        envelope::{self, NewEnvelope},
        shortcut::{self, NewShortcut},
    },
    entities::{RolloverPolicy, TransactionType, envelope as envelope_entity},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use tracing::{debug, info, instrument};

/// What a provisioning run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Envelopes created
    pub envelopes_created: Vec<String>,
    /// Envelope templates skipped because the name was taken
    pub envelopes_skipped: Vec<String>,
    /// Shortcuts created
    pub shortcuts_created: Vec<String>,
    /// Shortcut templates skipped because the label was taken
    pub shortcuts_skipped: Vec<String>,
}

/// Creates the template envelopes and shortcuts the user does not have yet.
///
/// Shortcut templates are bound to an envelope through their hint aliases,
/// matched against the user's envelopes after the envelope pass.
#[instrument(skip(db, templates))]
pub async fn provision_templates(
    db: &DatabaseConnection,
    user_id: &str,
    templates: &Templates,
) -> Result<ProvisionReport> {
    let mut report = ProvisionReport::default();

    let mut names: Vec<String> = envelope::get_active_envelopes(db, user_id)
        .await?
        .into_iter()
        .map(|existing| existing.name.to_lowercase())
        .collect();
    for template in &templates.envelopes {
        let name = template.name.trim().to_lowercase();
        if names.contains(&name) {
            debug!(name = %template.name, "Envelope exists, skipping template");
            report.envelopes_skipped.push(template.name.clone());
            continue;
        }
        envelope::create_envelope(db, user_id, envelope_from_template(template)).await?;
        report.envelopes_created.push(template.name.clone());
        names.push(name);
    }

    let envelopes = envelope::get_active_envelopes(db, user_id).await?;
    let mut labels: Vec<String> = shortcut::list_shortcuts(db, user_id)
        .await?
        .into_iter()
        .map(|existing| existing.label.to_lowercase())
        .collect();
    for template in &templates.shortcuts {
        if labels.contains(&template.label.trim().to_lowercase()) {
            report.shortcuts_skipped.push(template.label.clone());
            continue;
        }
        let envelope_id =
            find_envelope_flexible(&envelopes, &template.hint_aliases()).map(|found| found.id);
        shortcut::create_shortcut(db, user_id, shortcut_from_template(template, envelope_id))
            .await?;
        report.shortcuts_created.push(template.label.clone());
        labels.push(template.label.trim().to_lowercase());
    }

    info!(
        user_id,
        envelopes = report.envelopes_created.len(),
        shortcuts = report.shortcuts_created.len(),
        "Templates provisioned"
    );
    Ok(report)
}

/// Finds the envelope an alias list refers to.
///
/// An exact name match (ignoring case) on any alias wins; otherwise the
/// first envelope whose name contains an alias, or is contained in one.
#[must_use]
pub fn find_envelope_flexible<'a>(
    envelopes: &'a [envelope_entity::Model],
    aliases: &[&str],
) -> Option<&'a envelope_entity::Model> {
    let aliases: Vec<String> = aliases
        .iter()
        .map(|alias| alias.trim().to_lowercase())
        .filter(|alias| !alias.is_empty())
        .collect();

    let exact = envelopes.iter().find(|candidate| {
        let name = candidate.name.to_lowercase();
        aliases.iter().any(|alias| *alias == name)
    });
    exact.or_else(|| {
        envelopes.iter().find(|candidate| {
            let name = candidate.name.to_lowercase();
            aliases
                .iter()
                .any(|alias| name.contains(alias.as_str()) || alias.contains(name.as_str()))
        })
    })
}

fn envelope_from_template(template: &EnvelopeTemplate) -> NewEnvelope {
    let mut new = NewEnvelope::named(template.name.trim());
    new.emoji.clone_from(&template.emoji);
    new.color.clone_from(&template.color);
    new.target_amount = template.target_amount;
    if template.is_rollover {
        new = new.rollover(RolloverPolicy::SweepToReserve);
    }
    new
}

fn shortcut_from_template(template: &ShortcutTemplate, envelope_id: Option<i64>) -> NewShortcut {
    NewShortcut {
        label: template.label.clone(),
        emoji: template.emoji.clone(),
        default_amount: template.default_amount,
        transaction_type: TransactionType::Expense,
        category: template.category.clone(),
        envelope_id,
        is_system_default: true,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    fn templates() -> Templates {
        toml::from_str(
            r#"
            [[envelopes]]
            name = "Food"
            target_amount = 6000.0

            [[envelopes]]
            name = "Transport"

            [[envelopes]]
            name = "Emergency Fund"
            is_rollover = true

            [[shortcuts]]
            label = "Jeep fare"
            default_amount = 13.0
            category = "transport"
            envelope_hint = "commute,transport"

            [[shortcuts]]
            label = "Lunch"
            default_amount = 150.0
            category = "food"
            envelope_hint = "meals"
            "#,
        )
        .unwrap()
    }

    fn named(id: i64, name: &str) -> envelope_entity::Model {
        envelope_entity::Model {
            id,
            user_id: TEST_USER.into(),
            name: name.into(),
            emoji: String::new(),
            color: String::new(),
            target_amount: None,
            is_rollover: false,
            rollover_policy: RolloverPolicy::SweepToReserve,
            overflow_balance: 0.0,
            is_active: true,
            sort_order: i32::try_from(id).unwrap(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_find_envelope_flexible() {
        let envelopes = vec![named(1, "Food & Groceries"), named(2, "Food"), named(3, "Load")];

        // Exact beats substring
        assert_eq!(find_envelope_flexible(&envelopes, &["FOOD"]).unwrap().id, 2);
        // Alias inside the name
        assert_eq!(find_envelope_flexible(&envelopes, &["grocer"]).unwrap().id, 1);
        // Name inside the alias
        assert_eq!(find_envelope_flexible(&envelopes, &["load & internet"]).unwrap().id, 3);
        assert!(find_envelope_flexible(&envelopes, &["rent", " "]).is_none());
        assert!(find_envelope_flexible(&envelopes, &[]).is_none());
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_envelope(&db, "food").await?;

        let first = provision_templates(&db, TEST_USER, &templates()).await?;
        assert_eq!(first.envelopes_created, vec!["Transport", "Emergency Fund"]);
        assert_eq!(first.envelopes_skipped, vec!["Food"]);
        assert_eq!(first.shortcuts_created, vec!["Jeep fare", "Lunch"]);

        let envelopes = envelope::get_active_envelopes(&db, TEST_USER).await?;
        assert_eq!(envelopes.len(), 3);
        let emergency = envelopes.iter().find(|e| e.name == "Emergency Fund").unwrap();
        assert!(emergency.is_rollover);

        let shortcuts = shortcut::list_shortcuts(&db, TEST_USER).await?;
        let jeep = shortcuts.iter().find(|s| s.label == "Jeep fare").unwrap();
        let transport = envelopes.iter().find(|e| e.name == "Transport").unwrap();
        assert_eq!(jeep.envelope_id, Some(transport.id));
        assert!(jeep.is_system_default);
        let lunch = shortcuts.iter().find(|s| s.label == "Lunch").unwrap();
        assert_eq!(lunch.envelope_id, None);

        let second = provision_templates(&db, TEST_USER, &templates()).await?;
        assert!(second.envelopes_created.is_empty());
        assert!(second.shortcuts_created.is_empty());
        assert_eq!(second.shortcuts_skipped.len(), 2);
        assert_eq!(envelope::get_active_envelopes(&db, TEST_USER).await?.len(), 3);
        Ok(())
    }
}
