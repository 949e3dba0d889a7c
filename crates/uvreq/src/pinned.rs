//! Pinned requests: recover the owning object from a native address
//!
//! A pinned request keeps a [`PinToken`] in its payload slot. While the
//! engine holds the request address, the pin table holds an `Rc` to the
//! owner so it cannot be dropped underneath the engine. When a completion
//! arrives, [`PinnedRequest::recover`] turns the address back into that
//! `Rc`, after checking the address is a live pin and that the token in
//! the slot is the one the table issued for it.
//!
//! Recovery failures are programming errors and panic.

use std::any::{self, Any};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use libc::c_void;
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::uv_req_t;
use uvreq_core::{uv_trace, PinToken, RequestType};

use crate::arena::NativeArena;
use crate::handles;
use crate::request::OpaqueRequest;

/// An object that owns a [`PinnedRequest`] and can be recovered from its
/// native address.
pub trait Pinnable: Any {
    fn pinned(&self) -> &PinnedRequest;

    /// Unpin and release native memory. Idempotent.
    ///
    /// Types with engine-owned nested allocations override this to release
    /// them first.
    fn dispose(&self) {
        self.pinned().dispose();
    }

    fn is_disposed(&self) -> bool {
        self.pinned().is_disposed()
    }
}

pub struct PinnedRequest {
    request: OpaqueRequest<PinToken>,
}

impl PinnedRequest {
    /// Allocate the request block and its token slot. Not pinned yet; hand
    /// the owner to [`pin`](Self::pin).
    pub fn new(arena: &Arc<NativeArena>, size: usize, kind: RequestType) -> Result<Self> {
        Ok(Self {
            request: OpaqueRequest::with_kind(arena, size, kind, true)?,
        })
    }

    pub fn request(&self) -> &OpaqueRequest<PinToken> {
        &self.request
    }

    #[inline]
    pub fn address(&self) -> *mut c_void {
        self.request.address()
    }

    /// Token in the payload slot, `None` before pinning or after disposal
    pub fn token(&self) -> Option<PinToken> {
        self.request.value().and_then(PinToken::to_option)
    }

    pub fn is_pinned(&self) -> bool {
        self.token().is_some()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.request.is_disposed()
    }

    /// Move `owner` behind an `Rc` and pin it so it stays alive until it
    /// is disposed, whatever happens to the returned reference.
    pub fn pin<R: Pinnable>(owner: R) -> Result<Rc<R>> {
        let owner = Rc::new(owner);
        let pinned = owner.pinned();
        let addr = pinned.address();
        if addr.is_null() {
            return Err(ReqError::Disposed);
        }

        let target: Rc<dyn Any> = owner.clone();
        let token = handles::register(addr as usize, target, any::type_name::<R>());
        if let Err(e) = pinned.request.set_value(token) {
            drop(handles::release(token));
            return Err(e);
        }
        uv_trace!("pinned {} at {:p} as {}", any::type_name::<R>(), addr, token);
        Ok(owner)
    }

    /// Recover the owner of a pinned request from its native address.
    ///
    /// # Panics
    ///
    /// If `addr` is not a live pin on this thread, if the token in its
    /// payload slot does not match the one issued for it, or if the owner
    /// is not an `R`.
    pub fn recover<R: Pinnable>(addr: *mut c_void) -> Rc<R> {
        let token = match handles::token_at(addr as usize) {
            Some(token) => token,
            None => panic!(
                "no pinned request at {:p} (disposed, foreign, or another thread)",
                addr
            ),
        };

        // addr is a live block on this thread, so its header is readable
        let stored = unsafe { read_token(addr) };
        if stored != token {
            panic!(
                "pin token mismatch at {:p}: slot holds {:?}, expected {:?}",
                addr, stored, token
            );
        }

        let (_, owner, type_name) = match handles::resolve(token) {
            Some(entry) => entry,
            None => panic!("{} at {:p} has no owner", token, addr),
        };
        match owner.downcast::<R>() {
            Ok(owner) => owner,
            Err(_) => panic!(
                "pinned request at {:p} is a {}, not a {}",
                addr,
                type_name,
                any::type_name::<R>()
            ),
        }
    }

    /// Unpin, then release native memory. Idempotent.
    pub fn dispose(&self) {
        if self.request.is_disposed() {
            return;
        }
        // Every `&R` is borrowed from an `Rc<R>` handed out by `pin` or
        // `recover`, so the table's reference is never the last one here.
        let owner = self.token().and_then(handles::release);
        self.request.dispose();
        drop(owner);
    }
}

unsafe fn read_token(addr: *mut c_void) -> PinToken {
    let data = (*(addr as *const uv_req_t)).data as *const PinToken;
    if data.is_null() {
        PinToken::NONE
    } else {
        ptr::read(data)
    }
}

impl std::fmt::Debug for PinnedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedRequest")
            .field("address", &self.address())
            .field("token", &self.token())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Probe {
        pinned: PinnedRequest,
        tag: u32,
    }

    impl Pinnable for Probe {
        fn pinned(&self) -> &PinnedRequest {
            &self.pinned
        }
    }

    struct Other {
        pinned: PinnedRequest,
    }

    impl Pinnable for Other {
        fn pinned(&self) -> &PinnedRequest {
            &self.pinned
        }
    }

    fn probe(arena: &Arc<NativeArena>, tag: u32) -> Rc<Probe> {
        let pinned = PinnedRequest::new(arena, 64, RequestType::Unknown).unwrap();
        PinnedRequest::pin(Probe { pinned, tag }).unwrap()
    }

    #[test]
    fn test_pin_and_recover() {
        let arena = Arc::new(NativeArena::checked());
        let req = probe(&arena, 11);
        assert!(req.pinned().is_pinned());
        assert_eq!(arena.live_count(), 2);

        let back = PinnedRequest::recover::<Probe>(req.pinned().address());
        assert!(Rc::ptr_eq(&req, &back));
        assert_eq!(back.tag, 11);
        req.dispose();
    }

    #[test]
    fn test_pin_keeps_owner_alive() {
        let arena = Arc::new(NativeArena::checked());
        let addr = probe(&arena, 3).pinned().address();

        // caller's reference is gone; the pin still owns it
        let back = PinnedRequest::recover::<Probe>(addr);
        assert_eq!(back.tag, 3);
        assert_eq!(Rc::strong_count(&back), 2);

        back.dispose();
        assert_eq!(Rc::strong_count(&back), 1);
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_dispose_unpins_and_frees() {
        let arena = Arc::new(NativeArena::checked());
        let pins = handles::live_count();
        let req = probe(&arena, 1);
        let token = req.pinned().token().unwrap();
        assert_eq!(handles::live_count(), pins + 1);

        req.dispose();
        assert!(req.is_disposed());
        assert_eq!(req.pinned().token(), None);
        assert_eq!(handles::live_count(), pins);
        assert!(handles::resolve(token).is_none());
        assert_eq!(arena.live_count(), 0);

        req.dispose();
        assert_eq!(arena.stats().misuses, 0);
    }

    #[test]
    #[should_panic(expected = "no pinned request")]
    fn test_recover_unrelated_address() {
        let arena = Arc::new(NativeArena::checked());
        let block = arena.allocate(64).unwrap();
        PinnedRequest::recover::<Probe>(block.cast());
    }

    #[test]
    #[should_panic(expected = "no pinned request")]
    fn test_recover_after_dispose() {
        let arena = Arc::new(NativeArena::checked());
        let req = probe(&arena, 1);
        let addr = req.pinned().address();
        req.dispose();
        PinnedRequest::recover::<Probe>(addr);
    }

    #[test]
    #[should_panic(expected = "pin token mismatch")]
    fn test_recover_tampered_slot() {
        let arena = Arc::new(NativeArena::checked());
        let req = probe(&arena, 1);
        req.pinned().request().set_value(PinToken::new(u64::MAX)).unwrap();
        PinnedRequest::recover::<Probe>(req.pinned().address());
    }

    #[test]
    #[should_panic(expected = "not a")]
    fn test_recover_wrong_type() {
        let arena = Arc::new(NativeArena::checked());
        let pinned = PinnedRequest::new(&arena, 64, RequestType::Unknown).unwrap();
        let other = PinnedRequest::pin(Other { pinned }).unwrap();
        PinnedRequest::recover::<Probe>(other.pinned().address());
    }

    #[test]
    fn test_pin_disposed_request_rejected() {
        let arena = Arc::new(NativeArena::checked());
        let pinned = PinnedRequest::new(&arena, 64, RequestType::Unknown).unwrap();
        pinned.dispose();
        let err = PinnedRequest::pin(Probe { pinned, tag: 0 }).unwrap_err();
        assert_eq!(err, ReqError::Disposed);
        assert_eq!(arena.live_count(), 0);
    }
}
