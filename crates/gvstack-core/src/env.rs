//! Environment variable helpers for configuration overrides
//!
//! ```ignore
//! use gvstack_core::env::{env_get, env_get_bool};
//!
//! let engines: usize = env_get("GVS_NUM_ENGINES", 4);
//! let guard = env_get_bool("GVS_GUARD_PAGES", true);
//! ```

use std::str::FromStr;

/// Variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Variable as a boolean
///
/// "1", "true", "yes", "on" (any case) are true, any other value is false,
/// unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Variable parsed as `T` if set and valid
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
