//! Utility functions for display formatting.

pub mod format;

pub use format::{browser_name, format_currency, format_optional, format_timestamp, is_valid_email, truncate_string};
