//! Completion callbacks and the native-boundary trampolines
//!
//! Flow for one operation:
//!
//! ```text
//!   CallbackRequest::new ──► set_callback ──► submit_ptr ──► engine
//!                                                              │
//!   dispose ◄── user callback ◄── end ◄── recover ◄── end_trampoline
//! ```
//!
//! Panics never cross into the engine. A panicking user callback is caught
//! and logged, and the request is disposed anyway. A failure to recover the
//! request (or a completion with no callback armed) means the binding layer
//! is broken; the trampoline logs it and aborts the process.

use std::any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use libc::{c_int, c_void};
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::{uv_req_cb, uv_req_t};
use uvreq_core::{uv_error, uv_trace, RequestType};

use crate::arena::NativeArena;
use crate::bridge::Bridge;
use crate::pinned::{Pinnable, PinnedRequest};

type Slot<A, R> = Box<dyn FnOnce(A, &R)>;

/// One-shot completion callback slot
pub struct Callback<A, R> {
    slot: RefCell<Option<Slot<A, R>>>,
}

impl<A, R> Callback<A, R> {
    pub fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// Arm the slot, replacing any callback already set
    pub fn set<F>(&self, f: F)
    where
        F: FnOnce(A, &R) + 'static,
    {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn take(&self) -> Option<Slot<A, R>> {
        self.slot.borrow_mut().take()
    }
}

impl<A, R> Default for Callback<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("set", &self.is_set()).finish()
    }
}

/// Run a user callback; a panic is logged and swallowed. Returns whether
/// it completed normally.
pub(crate) fn invoke_guarded<F: FnOnce()>(what: &str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic>".to_string());
            uv_error!("{} callback panicked: {}", what, msg);
            false
        }
    }
}

/// Entry point for everything invoked by the engine. Never unwinds.
pub(crate) fn at_boundary<F: FnOnce()>(req: *mut c_void, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        uv_error!("completion for {:p} failed at the native boundary, aborting", req);
        std::process::abort();
    }
}

/// A pinned request completed through a status-code callback.
pub trait Completion: Pinnable + Sized {
    /// Native layout the engine passes back to the trampoline
    type Native;

    fn callback(&self) -> &Callback<c_int, Self>;

    fn set_callback<F>(&self, f: F)
    where
        F: FnOnce(c_int, &Self) + 'static,
    {
        self.callback().set(f);
    }

    /// Address to hand to the engine.
    ///
    /// Fails if the request is disposed or has no callback armed, so a
    /// completion can never arrive for a request that cannot handle it.
    fn submit_ptr(&self) -> Result<*mut Self::Native> {
        if self.is_disposed() {
            return Err(ReqError::Disposed);
        }
        if !self.callback().is_set() {
            return Err(ReqError::CallbackNotSet);
        }
        Ok(self.pinned().address().cast())
    }

    /// Deliver the completion status: invoke the callback exactly once,
    /// then dispose.
    ///
    /// # Panics
    ///
    /// If no callback is armed.
    fn end(self: Rc<Self>, status: c_int) {
        let callback = match self.callback().take() {
            Some(cb) => cb,
            None => panic!(
                "{} at {:p} completed without a callback",
                any::type_name::<Self>(),
                self.pinned().address()
            ),
        };
        uv_trace!(
            "end {} at {:p} status {}",
            any::type_name::<Self>(),
            self.pinned().address(),
            status
        );
        invoke_guarded(any::type_name::<Self>(), || callback(status, &*self));
        self.dispose();
    }
}

/// Native completion entry point for any [`Completion`] type.
///
/// Recovers the owning request from `req` and ends it with `status`.
pub extern "C" fn end_trampoline<R: Completion>(req: *mut R::Native, status: c_int) {
    at_boundary(req.cast(), || {
        PinnedRequest::recover::<R>(req.cast()).end(status);
    });
}

/// Generic request completed with a status code
pub struct CallbackRequest {
    pinned: PinnedRequest,
    callback: Callback<c_int, CallbackRequest>,
}

impl CallbackRequest {
    /// Request sized by the engine for `ty`, pinned
    pub fn new(bridge: &Bridge, ty: RequestType) -> Result<Rc<Self>> {
        Self::build(bridge.arena(), bridge.request_size(ty), ty)
    }

    /// Request with an explicit block size, pinned
    pub fn with_size(arena: &Arc<NativeArena>, size: usize) -> Result<Rc<Self>> {
        Self::build(arena, size, RequestType::Unknown)
    }

    fn build(arena: &Arc<NativeArena>, size: usize, ty: RequestType) -> Result<Rc<Self>> {
        PinnedRequest::pin(Self {
            pinned: PinnedRequest::new(arena, size, ty)?,
            callback: Callback::new(),
        })
    }

    pub fn as_native(&self) -> *mut uv_req_t {
        self.pinned.request().as_ptr()
    }

    /// Completion function to register with the engine
    pub fn trampoline() -> uv_req_cb {
        end_trampoline::<Self>
    }
}

impl Pinnable for CallbackRequest {
    fn pinned(&self) -> &PinnedRequest {
        &self.pinned
    }
}

impl Completion for CallbackRequest {
    type Native = uv_req_t;

    fn callback(&self) -> &Callback<c_int, Self> {
        &self.callback
    }
}

impl fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRequest")
            .field("pinned", &self.pinned)
            .field("callback", &self.callback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn arena() -> Arc<NativeArena> {
        Arc::new(NativeArena::checked())
    }

    #[test]
    fn test_submit_requires_callback() {
        let arena = arena();
        let req = CallbackRequest::with_size(&arena, 64).unwrap();
        assert_eq!(req.submit_ptr().unwrap_err(), ReqError::CallbackNotSet);

        req.set_callback(|_, _| {});
        assert_eq!(req.submit_ptr().unwrap(), req.as_native());

        req.dispose();
        assert_eq!(req.submit_ptr().unwrap_err(), ReqError::Disposed);
    }

    #[test]
    fn test_end_invokes_once_and_disposes() {
        let arena = arena();
        let req = CallbackRequest::with_size(&arena, 64).unwrap();
        assert_eq!(arena.live_count(), 2);

        let seen = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));
        {
            let seen = seen.clone();
            let calls = calls.clone();
            req.set_callback(move |status, r: &CallbackRequest| {
                assert!(!r.is_disposed());
                assert!(!r.pinned().address().is_null());
                seen.set(Some(status));
                calls.set(calls.get() + 1);
            });
        }

        let addr = req.pinned().address();
        drop(req);
        PinnedRequest::recover::<CallbackRequest>(addr).end(-5);

        assert_eq!(seen.get(), Some(-5));
        assert_eq!(calls.get(), 1);
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_trampoline_round_trip() {
        let arena = arena();
        let req = CallbackRequest::with_size(&arena, 64).unwrap();
        let seen = Rc::new(Cell::new(i32::MIN));
        let s = seen.clone();
        req.set_callback(move |status, _| s.set(status));

        let native = req.submit_ptr().unwrap();
        let cb = CallbackRequest::trampoline();
        unsafe { cb(native, 0) };

        assert_eq!(seen.get(), 0);
        assert!(req.is_disposed());
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_panicking_callback_still_disposes() {
        let arena = arena();
        let req = CallbackRequest::with_size(&arena, 64).unwrap();
        req.set_callback(|_, _| panic!("user bug"));

        Rc::clone(&req).end(1);
        assert!(req.is_disposed());
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "completed without a callback")]
    fn test_end_without_callback() {
        let arena = arena();
        let req = CallbackRequest::with_size(&arena, 64).unwrap();
        req.end(0);
    }

    #[test]
    fn test_callback_slot_replace_and_take() {
        let slot: Callback<i32, ()> = Callback::default();
        assert!(!slot.is_set());
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        slot.set(|_, _| panic!("replaced"));
        slot.set(move |v, _| h.set(v));
        (slot.take().unwrap())(9, &());
        assert_eq!(hits.get(), 9);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_too_small_request() {
        let arena = arena();
        let err = CallbackRequest::with_size(&arena, 1).unwrap_err();
        assert!(matches!(err, ReqError::InvalidSize { size: 1, .. }));
        assert_eq!(arena.live_count(), 0);
    }
}
