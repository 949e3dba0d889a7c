//! # uvreq-core
//!
//! Core types and traits for uvreq, the request/handle lifecycle layer that
//! sits between owned Rust objects and a callback-driven native I/O engine.
//!
//! This crate holds no allocation policy and no engine. It defines the
//! native structure layouts the engine reads and writes, the `NativeEngine`
//! boundary, and the shared utilities every other uvreq crate uses.
//!
//! ## Modules
//!
//! - `native` - `#[repr(C)]` request/buffer layouts, type tags, callback typedefs
//! - `engine` - `NativeEngine` trait (sizes, error tables, fs cleanup)
//! - `token` - Pin token stored in a request's payload slot
//! - `error` - Error types
//! - `config` - Bridge configuration with environment overrides
//! - `env` - Environment variable utilities
//! - `log` - Leveled stderr logging macros
//! - `spinlock` - Spinlock guarding shared arena state

pub mod native;
pub mod engine;
pub mod token;
pub mod error;
pub mod config;
pub mod env;
pub mod log;
pub mod spinlock;

// Re-exports for convenience
pub use native::{HandleType, RequestType};
pub use engine::NativeEngine;
pub use token::PinToken;
pub use error::{OperationError, ReqError, Result};
pub use config::BridgeConfig;
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool};

/// Constants shared with the native engine
pub mod constants {
    /// `result` value a filesystem request reports on failure
    pub const FS_RESULT_FAILED: isize = -1;

    /// Byte written over released blocks when poisoning is enabled
    pub const POISON_BYTE: u8 = 0xDD;
}
