//! System template loading from config.toml
//!
//! Templates are the starter envelopes and quick-add shortcuts offered to a
//! new user by `/setup`. They are read once at startup and shared read-only.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Templates {
    /// Starter envelopes
    #[serde(default)]
    pub envelopes: Vec<EnvelopeTemplate>,
    /// Starter quick-add shortcuts
    #[serde(default)]
    pub shortcuts: Vec<ShortcutTemplate>,
}

/// A starter envelope
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EnvelopeTemplate {
    /// Name of the envelope
    pub name: String,
    /// Cosmetic emoji
    #[serde(default = "default_emoji")]
    pub emoji: String,
    /// Cosmetic hex color
    #[serde(default = "default_color")]
    pub color: String,
    /// Optional per-period target
    #[serde(default)]
    pub target_amount: Option<f64>,
    /// Whether unspent balance rolls over at period end
    #[serde(default)]
    pub is_rollover: bool,
}

/// A starter quick-add shortcut
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShortcutTemplate {
    /// Button label
    pub label: String,
    /// Cosmetic emoji
    #[serde(default = "default_emoji")]
    pub emoji: String,
    /// Amount used unless overridden
    pub default_amount: f64,
    /// Category id
    pub category: String,
    /// Comma-separated envelope name aliases, e.g. "transport,commute"
    #[serde(default)]
    pub envelope_hint: Option<String>,
}

impl ShortcutTemplate {
    /// The hint's aliases, trimmed, with empty entries dropped.
    #[must_use]
    pub fn hint_aliases(&self) -> Vec<&str> {
        self.envelope_hint
            .as_deref()
            .map(|hint| {
                hint.split(',')
                    .map(str::trim)
                    .filter(|alias| !alias.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn default_emoji() -> String {
    "💰".to_string()
}

fn default_color() -> String {
    "#4A90D9".to_string()
}

/// Loads templates from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing
pub fn load_templates<P: AsRef<Path>>(path: P) -> Result<Templates> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_templates(&contents)
}

/// Loads templates from `CONFIG_PATH`, or ./config.toml when unset
pub fn load_default_templates() -> Result<Templates> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_templates(path)
}

fn parse_templates(contents: &str) -> Result<Templates> {
    let templates: Templates = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    if let Some(bad) = templates
        .shortcuts
        .iter()
        .find(|shortcut| !shortcut.default_amount.is_finite() || shortcut.default_amount <= 0.0)
    {
        return Err(Error::Config {
            message: format!("Shortcut '{}' needs a positive default_amount", bad.label),
        });
    }
    Ok(templates)
}
