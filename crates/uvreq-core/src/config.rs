//! Bridge configuration
//!
//! Library defaults with runtime environment overrides, adjustable through
//! a builder before the bridge is constructed.
//!
//! ```rust,ignore
//! use uvreq_core::config::BridgeConfig;
//!
//! // Defaults with env overrides
//! let config = BridgeConfig::from_env();
//!
//! // Force leak tracking on for a test binary
//! let config = BridgeConfig::from_env().track_allocations(true);
//! ```

use crate::env::{env_get_bool, env_get_opt};
use crate::log::LogLevel;

pub mod defaults {
    /// Leak tracking follows the build profile unless overridden
    pub const TRACK_ALLOCATIONS: bool = cfg!(debug_assertions);
    pub const PANIC_ON_MISUSE: bool = false;
}

/// Configuration for a `Bridge` and its arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Record every live allocation (address and size) for leak diagnosis
    pub track_allocations: bool,
    /// Panic instead of logging when an untracked address is released
    pub panic_on_misuse: bool,
    /// Log level applied when the bridge is built; `None` keeps the current one
    pub log_level: Option<LogLevel>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            track_allocations: defaults::TRACK_ALLOCATIONS,
            panic_on_misuse: defaults::PANIC_ON_MISUSE,
            log_level: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `UVR_TRACK_ALLOCATIONS` - Track live allocations (0/1)
    /// - `UVR_PANIC_ON_MISUSE` - Panic on untracked release (0/1)
    /// - `UVR_LOG_LEVEL` - off, error, warn, info, debug, trace
    pub fn from_env() -> Self {
        Self {
            track_allocations: env_get_bool(
                "UVR_TRACK_ALLOCATIONS",
                defaults::TRACK_ALLOCATIONS,
            ),
            panic_on_misuse: env_get_bool("UVR_PANIC_ON_MISUSE", defaults::PANIC_ON_MISUSE),
            log_level: env_get_opt::<String>("UVR_LOG_LEVEL")
                .and_then(|s| LogLevel::parse(&s)),
        }
    }

    pub fn track_allocations(mut self, enable: bool) -> Self {
        self.track_allocations = enable;
        self
    }

    pub fn panic_on_misuse(mut self, enable: bool) -> Self {
        self.panic_on_misuse = enable;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Checked mode: tracking on
    pub fn checked() -> Self {
        Self::default().track_allocations(true)
    }

    /// Unchecked mode: straight to the system allocator
    pub fn unchecked() -> Self {
        Self::default().track_allocations(false)
    }
}
