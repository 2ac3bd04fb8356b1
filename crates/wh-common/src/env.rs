//! Typed environment variable lookups.

use std::str::FromStr;

use crate::error::{Result, WhError};

/// Reads `key` and parses it, returning `default` when the variable is unset.
///
/// A set but unparsable value is an error rather than a silent fallback.
pub fn var_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| WhError::InvalidEnv {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Like [`var_or`] but tries each key in order, first hit wins.
pub fn first_var_or<T: FromStr>(keys: &[&str], default: T) -> Result<T> {
    for key in keys {
        if std::env::var(key).is_ok() {
            return var_or(key, default);
        }
    }
    Ok(default)
}

/// Optional string variable; empty values count as unset.
pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
