//! Filesystem request
//!
//! Completes with the request itself rather than a status code: the engine
//! writes `result`, `error` and `ptr` into the native structure, and a
//! `result` of -1 means failure with `error` holding the code. The
//! callback receives that failure already resolved to an
//! [`OperationError`].
//!
//! The engine may hang allocations of its own off the request (a path
//! copy, a stat buffer). Disposal runs the engine cleanup for those
//! exactly once before the request memory is released.

use std::cell::Cell;
use std::ffi::CStr;
use std::fmt;
use std::mem;
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use libc::{c_int, c_void};
use uvreq_core::constants::FS_RESULT_FAILED;
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::{fs_type, uv_fs_cb, uv_fs_t, uv_stat_t};
use uvreq_core::{uv_trace, NativeEngine, OperationError, RequestType};

use crate::bridge::Bridge;
use crate::callback::{at_boundary, invoke_guarded, Callback};
use crate::error_desc::ErrorDescriptor;
use crate::pinned::{Pinnable, PinnedRequest};

pub struct FileSystemRequest {
    pinned: PinnedRequest,
    callback: Callback<Option<OperationError>, FileSystemRequest>,
    engine: Arc<dyn NativeEngine>,
    cleaned: Cell<bool>,
}

impl FileSystemRequest {
    /// Filesystem request sized by the engine, pinned
    pub fn new(bridge: &Bridge) -> Result<Rc<Self>> {
        let size = bridge.request_size(RequestType::FileSystem);
        let min = mem::size_of::<uv_fs_t>();
        if size < min {
            return Err(ReqError::InvalidSize { size, min });
        }
        PinnedRequest::pin(Self {
            pinned: PinnedRequest::new(bridge.arena(), size, RequestType::FileSystem)?,
            callback: Callback::new(),
            engine: Arc::clone(bridge.engine()),
            cleaned: Cell::new(false),
        })
    }

    pub fn as_native(&self) -> *mut uv_fs_t {
        self.pinned.request().native()
    }

    /// Arm the completion callback. It receives `Some(error)` when the
    /// operation failed.
    pub fn set_callback<F>(&self, f: F)
    where
        F: FnOnce(Option<OperationError>, &Self) + 'static,
    {
        self.callback.set(f);
    }

    /// Address to hand to the engine. A callback is optional here; without
    /// one the completion only disposes the request.
    pub fn submit_ptr(&self) -> Result<*mut uv_fs_t> {
        if self.is_disposed() {
            return Err(ReqError::Disposed);
        }
        Ok(self.as_native())
    }

    /// Completion function to register with the engine
    pub fn trampoline() -> uv_fs_cb {
        Self::end_native
    }

    extern "C" fn end_native(req: *mut uv_fs_t) {
        at_boundary(req.cast(), || {
            PinnedRequest::recover::<Self>(req.cast()).end();
        });
    }

    fn read<T>(&self, field: impl FnOnce(&uv_fs_t) -> T, disposed: T) -> T {
        let native = self.as_native();
        if native.is_null() {
            return disposed;
        }
        field(unsafe { &*native })
    }

    /// Operation result: a byte count, descriptor, or -1 on failure.
    /// 0 once disposed.
    pub fn result(&self) -> isize {
        self.read(|fs| fs.result, 0)
    }

    /// Engine error code; meaningful when `result()` is -1
    pub fn error(&self) -> c_int {
        self.read(|fs| fs.error, 0)
    }

    /// Operation-specific result pointer (engine-owned)
    pub fn pointer(&self) -> *mut c_void {
        self.read(|fs| fs.ptr, ptr::null_mut())
    }

    pub fn fs_type(&self) -> c_int {
        self.read(|fs| fs.fs_type, fs_type::UNKNOWN)
    }

    /// Path the engine recorded for the operation
    pub fn path(&self) -> Option<String> {
        self.read(
            |fs| {
                if fs.path.is_null() {
                    None
                } else {
                    let path = unsafe { CStr::from_ptr(fs.path) };
                    Some(path.to_string_lossy().into_owned())
                }
            },
            None,
        )
    }

    /// Stat buffer of a successful stat operation
    pub fn stat(&self) -> Option<uv_stat_t> {
        self.read(
            |fs| {
                if fs.fs_type != fs_type::STAT || fs.result != 0 || fs.ptr.is_null() {
                    None
                } else {
                    Some(unsafe { *(fs.ptr as *const uv_stat_t) })
                }
            },
            None,
        )
    }

    /// Failure reported by the engine, resolved through its error tables
    pub fn failure(&self) -> Option<OperationError> {
        if self.result() != FS_RESULT_FAILED {
            return None;
        }
        Some(ErrorDescriptor::new(self.error(), Arc::clone(&self.engine)).to_operation_error())
    }

    /// Deliver the completion: invoke the callback (if armed) with the
    /// resolved failure, then dispose.
    pub fn end(self: Rc<Self>) {
        let failure = self.failure();
        uv_trace!(
            "end fs request at {:p} result {}",
            self.pinned.address(),
            self.result()
        );
        if let Some(callback) = self.callback.take() {
            invoke_guarded("filesystem", || callback(failure, &*self));
        }
        self.dispose();
    }

    fn cleanup(&self) {
        let native = self.as_native();
        if native.is_null() || self.cleaned.replace(true) {
            return;
        }
        unsafe { self.engine.fs_req_cleanup(native) };
    }
}

impl Pinnable for FileSystemRequest {
    fn pinned(&self) -> &PinnedRequest {
        &self.pinned
    }

    fn dispose(&self) {
        self.cleanup();
        self.pinned.dispose();
    }
}

impl Drop for FileSystemRequest {
    fn drop(&mut self) {
        // Runs before the request block is freed by the field drop
        self.cleanup();
    }
}

impl fmt::Debug for FileSystemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemRequest")
            .field("pinned", &self.pinned)
            .field("fs_type", &self.fs_type())
            .field("result", &self.result())
            .finish()
    }
}
