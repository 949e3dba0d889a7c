//! # uvreq
//!
//! Request/handle lifecycle for callback-driven native I/O engines.
//!
//! The engine works on raw addresses and calls back through C function
//! pointers; Rust code wants owned objects and closures. This crate sits in
//! between:
//!
//! ```text
//!   Rust owner (Rc<R>)                         native engine
//!   ┌──────────────────┐  address (submit)    ┌──────────────┐
//!   │ PinnedRequest ───┼────────────────────► │ uv_*_t block │
//!   │ Callback         │                      │   data ──► token
//!   └────────▲─────────┘  trampoline(addr)    └──────┬───────┘
//!            └──── recover(addr) ◄───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `arena` - Native memory arena with optional leak tracking
//! - `handles` - Per-thread pin table (token → owner)
//! - `request` - Opaque request block with a typed payload slot
//! - `pinned` - Pinned requests and owner recovery
//! - `callback` - Completion callbacks, trampolines, `CallbackRequest`
//! - `connect` - `ConnectRequest`
//! - `fs` - `FileSystemRequest`
//! - `error_desc` - Engine error code descriptions
//! - `bridge` - Arena + engine pair used to build requests
//!
//! ## Threading
//!
//! Requests are `!Send`: create, submit, complete and dispose them on the
//! loop thread. The arena is `Sync` and may be shared.

pub mod arena;
pub mod handles;
pub mod request;
pub mod pinned;
pub mod callback;
pub mod connect;
pub mod fs;
pub mod error_desc;
pub mod bridge;

// Re-exports for convenience
pub use arena::{ArenaStats, NativeArena, NativeBlock};
pub use request::OpaqueRequest;
pub use pinned::{Pinnable, PinnedRequest};
pub use callback::{end_trampoline, Callback, CallbackRequest, Completion};
pub use connect::ConnectRequest;
pub use fs::FileSystemRequest;
pub use error_desc::ErrorDescriptor;
pub use bridge::Bridge;

pub use uvreq_core::{
    BridgeConfig, HandleType, NativeEngine, OperationError, PinToken, ReqError, RequestType,
    Result,
};
