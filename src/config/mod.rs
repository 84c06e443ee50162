/// Database configuration and connection management
pub mod database;

/// Envelope and shortcut templates loaded from config.toml
pub mod templates;
