//! Opaque request: a native request block plus an optional payload slot
//!
//! Layout in native memory:
//!
//! ```text
//!   request block (engine-sized)          payload slot (size_of::<T>())
//!   ┌──────────┬──────────┬─────────┐      ┌───────────┐
//!   │ type_    │ data ────┼─────────┼────► │ T         │
//!   ├──────────┴──────────┘ type-   │      └───────────┘
//!   │        specific fields ...    │
//!   └───────────────────────────────┘
//! ```
//!
//! Both blocks belong to the request. `dispose` frees the payload first,
//! nulls `data`, frees the request block, and is idempotent.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::Arc;

use libc::c_void;
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::uv_req_t;
use uvreq_core::{uv_debug, uv_trace, RequestType};

use crate::arena::{NativeArena, NativeBlock};

/// Smallest block that can hold the generic request header
pub const MIN_REQUEST_SIZE: usize = mem::size_of::<uv_req_t>();

pub struct OpaqueRequest<T: Copy> {
    arena: Arc<NativeArena>,
    block: Cell<Option<NativeBlock>>,
    payload: Cell<Option<NativeBlock>>,
    size: usize,
    kind: RequestType,
    _value: PhantomData<T>,
}

impl<T: Copy> OpaqueRequest<T> {
    /// Allocate a zeroed request block of `size` bytes, and a payload slot
    /// for one `T` when `with_payload` is set.
    ///
    /// Fails with `InvalidSize` if `size` cannot hold the request header.
    /// Nothing stays allocated on failure.
    pub fn new(arena: &Arc<NativeArena>, size: usize, with_payload: bool) -> Result<Self> {
        Self::with_kind(arena, size, RequestType::Unknown, with_payload)
    }

    /// Like [`new`](Self::new), recording the request type the block was sized for
    pub fn with_kind(
        arena: &Arc<NativeArena>,
        size: usize,
        kind: RequestType,
        with_payload: bool,
    ) -> Result<Self> {
        if size < MIN_REQUEST_SIZE {
            return Err(ReqError::InvalidSize {
                size,
                min: MIN_REQUEST_SIZE,
            });
        }
        // calloc alignment covers any payload the layer stores
        debug_assert!(mem::align_of::<T>() <= 2 * mem::size_of::<usize>());

        let block = arena.allocate(size)?;
        let payload = if with_payload {
            match arena.allocate(mem::size_of::<T>()) {
                Ok(p) => Some(p),
                Err(e) => {
                    let _ = unsafe { arena.release(block) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        unsafe {
            let header = block.cast::<uv_req_t>();
            (*header).data = payload.map_or(ptr::null_mut(), |p| p.cast());
        }
        uv_trace!(
            "request {:p} ({:?}, {} bytes, payload {})",
            block.as_ptr(),
            kind,
            size,
            with_payload
        );

        Ok(Self {
            arena: Arc::clone(arena),
            block: Cell::new(Some(block)),
            payload: Cell::new(payload),
            size,
            kind,
            _value: PhantomData,
        })
    }

    /// Request header pointer; null once disposed
    #[inline]
    pub fn as_ptr(&self) -> *mut uv_req_t {
        self.block.get().map_or(ptr::null_mut(), |b| b.cast())
    }

    /// Request block viewed as a type-specific native layout
    #[inline]
    pub fn native<S>(&self) -> *mut S {
        self.as_ptr().cast()
    }

    /// Address handed to the engine; null once disposed
    #[inline]
    pub fn address(&self) -> *mut c_void {
        self.as_ptr().cast()
    }

    /// Size the request block was allocated with
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn kind(&self) -> RequestType {
        self.kind
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.block.get().is_none()
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        self.payload.get().is_some()
    }

    pub fn arena(&self) -> &Arc<NativeArena> {
        &self.arena
    }

    /// Current `data` field; null once disposed
    pub fn data(&self) -> *mut c_void {
        let header = self.as_ptr();
        if header.is_null() {
            return ptr::null_mut();
        }
        unsafe { (*header).data }
    }

    /// Overwrite the `data` field.
    ///
    /// # Safety
    ///
    /// [`value`](Self::value) and [`set_value`](Self::set_value) read and
    /// write a `T` through `data`; `ptr` must be null or valid for that.
    /// The request's own payload slot is still freed on disposal.
    pub unsafe fn set_data(&self, ptr: *mut c_void) -> Result<()> {
        let header = self.as_ptr();
        if header.is_null() {
            return Err(ReqError::Disposed);
        }
        (*header).data = ptr;
        Ok(())
    }

    /// Payload value, `None` when there is no slot or the request is disposed
    pub fn value(&self) -> Option<T> {
        let data = self.data();
        if data.is_null() {
            return None;
        }
        Some(unsafe { ptr::read(data as *const T) })
    }

    pub fn set_value(&self, value: T) -> Result<()> {
        if self.is_disposed() {
            return Err(ReqError::Disposed);
        }
        let data = self.data();
        if data.is_null() {
            return Err(ReqError::NoPayloadSlot);
        }
        unsafe { ptr::write(data as *mut T, value) };
        Ok(())
    }

    /// Release the payload slot then the request block. Safe to call twice.
    pub fn dispose(&self) {
        let Some(block) = self.block.take() else {
            return;
        };
        unsafe {
            (*block.cast::<uv_req_t>()).data = ptr::null_mut();
        }
        if let Some(payload) = self.payload.take() {
            self.free(payload);
        }
        self.free(block);
        uv_trace!("request {:p} disposed", block.as_ptr());
    }

    fn free(&self, block: NativeBlock) {
        // Refusals are already logged and counted by the arena
        if let Err(e) = unsafe { self.arena.release(block) } {
            uv_debug!("dispose: {}", e);
        }
    }
}

impl<T: Copy> Drop for OpaqueRequest<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: Copy> std::fmt::Debug for OpaqueRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpaqueRequest")
            .field("address", &self.address())
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("payload", &self.has_payload())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arc<NativeArena> {
        Arc::new(NativeArena::checked())
    }

    #[test]
    fn test_new_with_payload() {
        let arena = arena();
        let req = OpaqueRequest::<u64>::new(&arena, 64, true).unwrap();
        assert_eq!(arena.live_count(), 2);
        assert_eq!(arena.allocation_size(req.as_ptr().cast()), Some(64));
        assert!(!req.data().is_null());
        assert_eq!(arena.allocation_size(req.data().cast()), Some(8));
        assert_eq!(req.value(), Some(0));

        req.set_value(0xfeed).unwrap();
        assert_eq!(req.value(), Some(0xfeed));
    }

    #[test]
    fn test_new_without_payload() {
        let arena = arena();
        let req = OpaqueRequest::<u64>::new(&arena, 32, false).unwrap();
        assert_eq!(arena.live_count(), 1);
        assert!(req.data().is_null());
        assert_eq!(req.value(), None);
        assert_eq!(req.set_value(1), Err(ReqError::NoPayloadSlot));
    }

    #[test]
    fn test_too_small_rejected() {
        let arena = arena();
        let err = OpaqueRequest::<u8>::new(&arena, 4, true).unwrap_err();
        assert_eq!(
            err,
            ReqError::InvalidSize {
                size: 4,
                min: MIN_REQUEST_SIZE
            }
        );
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_allocation_failure_leaves_nothing() {
        let arena = arena();
        let err = OpaqueRequest::<u8>::new(&arena, usize::MAX, true).unwrap_err();
        assert!(matches!(err, ReqError::AllocationFailed { .. }));
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_payload_failure_releases_block() {
        type Huge = [u8; 1 << 46];
        let arena = arena();
        let err = OpaqueRequest::<Huge>::new(&arena, 64, true).unwrap_err();
        assert_eq!(err, ReqError::AllocationFailed { size: 1 << 46 });
        assert_eq!(arena.live_count(), 0);
        let stats = arena.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, stats.allocations);
    }

    #[test]
    fn test_dispose_idempotent() {
        let arena = arena();
        let req = OpaqueRequest::<u32>::with_kind(&arena, 48, RequestType::Write, true).unwrap();
        assert_eq!(req.kind(), RequestType::Write);
        assert_eq!(arena.live_count(), 2);

        req.dispose();
        assert!(req.is_disposed());
        assert!(req.as_ptr().is_null());
        assert!(req.data().is_null());
        assert_eq!(req.value(), None);
        assert_eq!(req.set_value(3), Err(ReqError::Disposed));
        assert_eq!(arena.live_count(), 0);

        req.dispose();
        assert_eq!(arena.live_count(), 0);
        assert_eq!(arena.stats().misuses, 0);
    }

    #[test]
    fn test_drop_releases() {
        let arena = arena();
        {
            let _req = OpaqueRequest::<u16>::new(&arena, 16, true).unwrap();
            assert_eq!(arena.live_count(), 2);
        }
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_set_data() {
        let arena = arena();
        let req = OpaqueRequest::<u64>::new(&arena, 16, false).unwrap();
        let mut slot = 5u64;
        unsafe { req.set_data(&mut slot as *mut u64 as *mut c_void).unwrap() };
        assert_eq!(req.value(), Some(5));
        req.set_value(6).unwrap();
        assert_eq!(slot, 6);

        req.dispose();
        assert_eq!(
            unsafe { req.set_data(ptr::null_mut()) },
            Err(ReqError::Disposed)
        );
        // foreign data pointer is never handed to the arena
        assert_eq!(arena.stats().misuses, 0);
    }
}
