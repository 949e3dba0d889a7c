//! Environment variable utilities
//!
//! All uvreq knobs are `UVR_*` variables. Unparseable values fall back to
//! the default rather than failing, so a typo never aborts a process.
//!
//! ```ignore
//! use uvreq_core::env::{env_get, env_get_bool};
//!
//! let level: String = env_get("UVR_LOG_LEVEL", "info".to_string());
//! let tracked = env_get_bool("UVR_TRACK_ALLOCATIONS", cfg!(debug_assertions));
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or unparseable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and well-formed
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read `key` as a boolean flag
///
/// "1", "true", "yes", "on" are true and "0", "false", "no", "off" are
/// false (case-insensitive). Anything else, including unset, is `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => parse_flag(&val).unwrap_or(default),
        Err(_) => default,
    }
}

/// Interpret a flag string, `None` if it is neither true nor false
pub fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
