//! Native engine boundary.
//!
//! A `NativeEngine` is the external asynchronous runtime: it owns the event
//! loop and the I/O primitives. uvreq never reimplements any of that; it
//! only needs the handful of queries and cleanup hooks below to size,
//! describe and tear down request memory correctly.
//!
//! # Implementors
//!
//! - `SimEngine` (uvreq-sim): in-process engine with a single-threaded
//!   completion queue. Used by tests and the smoke binary.
//! - A linked engine binding forwards each method to the matching C entry
//!   point (`uv_req_size`, `uv_handle_size`, `uv_err_name`, `uv_strerror`,
//!   `uv_fs_req_cleanup`).

use std::borrow::Cow;

use crate::native::{uv_fs_t, HandleType, RequestType};

/// Queries and cleanup hooks the request layer needs from the engine.
///
/// **Contract:**
/// - `request_size()` / `handle_size()` report the exact size of the native
///   structure. Allocating fewer bytes is memory corruption.
/// - The error strings come from the engine's static tables; callers treat
///   them as read-only and never free them.
/// - `fs_req_cleanup()` releases allocations the engine made for one
///   filesystem request (path copy, stat buffer). It must be safe to call
///   on a request that was never submitted.
pub trait NativeEngine: Send + Sync {
    /// Size in bytes of the native structure for a request type.
    fn request_size(&self, ty: RequestType) -> usize;

    /// Size in bytes of the native structure for a handle type.
    fn handle_size(&self, ty: HandleType) -> usize;

    /// Symbolic name of an error code (e.g. `"ENOENT"`).
    fn err_name(&self, code: i32) -> Cow<'static, str>;

    /// Human-readable description of an error code.
    fn strerror(&self, code: i32) -> Cow<'static, str>;

    /// Release engine-owned nested allocations of a filesystem request.
    ///
    /// # Safety
    ///
    /// `req` must point to a live, fully sized `uv_fs_t`.
    unsafe fn fs_req_cleanup(&self, req: *mut uv_fs_t);

    /// Short engine name for diagnostics.
    fn name(&self) -> &'static str {
        "native"
    }
}
