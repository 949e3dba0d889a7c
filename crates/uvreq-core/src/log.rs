//! Leveled stderr logging for uvreq
//!
//! Lines are written under the stderr lock so a line from the loop thread
//! never interleaves with one from another thread.
//!
//! # Environment Variables
//!
//! - `UVR_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5)
//! - `UVR_LOG_FLUSH=1` - Flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use uvreq_core::{uv_error, uv_trace};
//!
//! uv_error!("release of untracked address {:#x}", addr);
//! uv_trace!("disposed request at {:p}", ptr);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "uvreq ERROR",
            LogLevel::Warn => "uvreq WARN ",
            LogLevel::Info => "uvreq INFO ",
            LogLevel::Debug => "uvreq DEBUG",
            LogLevel::Trace => "uvreq TRACE",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);
static LOADED: AtomicBool = AtomicBool::new(false);

/// Load `UVR_LOG_LEVEL` / `UVR_LOG_FLUSH` once
///
/// Runs implicitly on the first log call. Levels set through
/// [`set_log_level`] before that are kept.
pub fn init() {
    if LOADED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(level) = std::env::var("UVR_LOG_LEVEL")
        .ok()
        .and_then(|v| LogLevel::parse(&v))
    {
        LEVEL.store(level as u8, Ordering::Relaxed);
    }
    let flush = crate::env::env_get_bool("UVR_LOG_FLUSH", false);
    FLUSH.store(flush, Ordering::Relaxed);
}

#[inline]
pub fn log_level() -> LogLevel {
    if !LOADED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level; wins over the environment
pub fn set_log_level(level: LogLevel) {
    LOADED.store(true, Ordering::SeqCst);
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "[{}] {}", level.tag(), args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

/// Error level: binding-layer bugs (misuse, recovery failure)
#[macro_export]
macro_rules! uv_error {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level: leaks and suspicious states
#[macro_export]
macro_rules! uv_warn {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level: bridge setup
#[macro_export]
macro_rules! uv_info {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! uv_debug {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level: per-request lifecycle events
#[macro_export]
macro_rules! uv_trace {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}
