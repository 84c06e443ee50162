//! Discord interaction handlers
//!
//! This module provides handlers for Discord interactions such as autocomplete.

/// Autocomplete handlers for envelope names and shortcut labels
pub mod autocomplete;
