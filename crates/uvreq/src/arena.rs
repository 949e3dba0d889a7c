//! Native memory arena for request and handle blocks
//!
//! Every block handed to the engine comes from here. Two modes, picked at
//! construction:
//!
//! - **checked** (`tracking = true`): every live block is recorded
//!   (address → size). Releasing an address that is not live is refused,
//!   logged and counted instead of reaching the system allocator, and the
//!   live set can be listed for leak diagnosis.
//! - **unchecked**: straight `calloc`/`free`, no bookkeeping beyond two
//!   counters.
//!
//! The tracking map sits behind a spinlock, so an arena may be shared
//! between the loop thread and helper threads through an `Arc`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use uvreq_core::config::BridgeConfig;
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::uv_buf_t;
use uvreq_core::{uv_debug, uv_error, uv_trace, uv_warn, SpinLock};

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        /// Overwrite a block before it goes back to the allocator so reads
        /// through a disposed request show up as a poison pattern.
        #[inline]
        unsafe fn poison(ptr: *mut u8, size: usize) {
            ptr.write_bytes(uvreq_core::constants::POISON_BYTE, size);
        }
    } else {
        #[inline(always)]
        unsafe fn poison(_ptr: *mut u8, _size: usize) {}
    }
}

/// A block of native memory: address + size.
///
/// Plain descriptor, not an owner. Whoever allocated it releases it
/// through the arena exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBlock {
    ptr: NonNull<u8>,
    size: usize,
}

impl NativeBlock {
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Address reinterpreted as a native structure pointer
    #[inline]
    pub fn cast<T>(&self) -> *mut T {
        self.ptr.as_ptr().cast()
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Arena counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub allocations: u64,
    pub releases: u64,
    /// Refused releases of untracked addresses
    pub misuses: u64,
    pub live: u64,
}

pub struct NativeArena {
    tracking: bool,
    panic_on_misuse: bool,
    /// Live blocks, address → size. Only touched when `tracking`.
    live: SpinLock<HashMap<usize, usize>>,
    allocations: AtomicU64,
    releases: AtomicU64,
    misuses: AtomicU64,
}

impl NativeArena {
    pub fn new(tracking: bool) -> Self {
        Self {
            tracking,
            panic_on_misuse: false,
            live: SpinLock::new(HashMap::new()),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            misuses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut arena = Self::new(config.track_allocations);
        arena.panic_on_misuse = config.panic_on_misuse;
        arena
    }

    /// Arena with leak tracking
    pub fn checked() -> Self {
        Self::new(true)
    }

    /// Arena without bookkeeping
    pub fn unchecked() -> Self {
        Self::new(false)
    }

    #[inline]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Allocate `size` zeroed bytes.
    ///
    /// Zero-sized requests still get a unique, non-null block.
    pub fn allocate(&self, size: usize) -> Result<NativeBlock> {
        let raw = unsafe { libc::calloc(1, size.max(1)) } as *mut u8;
        let ptr = NonNull::new(raw).ok_or(ReqError::AllocationFailed { size })?;

        if self.tracking {
            let prev = self.live.lock().insert(ptr.as_ptr() as usize, size);
            debug_assert!(prev.is_none(), "allocator returned a live address");
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        uv_trace!("alloc {:p} ({} bytes)", raw, size);

        Ok(NativeBlock { ptr, size })
    }

    /// Release a block.
    ///
    /// # Safety
    ///
    /// In unchecked mode the block must come from this arena and must not
    /// have been released yet; the pointer goes straight to `free`. In
    /// checked mode a repeated or foreign release is refused and reported
    /// as `UntrackedRelease`, leaving the arena untouched.
    pub unsafe fn release(&self, block: NativeBlock) -> Result<()> {
        self.release_ptr(block.as_ptr())
    }

    /// Release by raw address. A null pointer is a no-op.
    ///
    /// # Safety
    ///
    /// Same contract as [`release`](Self::release).
    pub unsafe fn release_ptr(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let addr = ptr as usize;

        if self.tracking {
            let size = self.live.lock().remove(&addr);
            match size {
                Some(size) => poison(ptr, size),
                None => return self.misuse(addr),
            }
        }

        libc::free(ptr.cast());
        self.releases.fetch_add(1, Ordering::Relaxed);
        uv_trace!("free {:p}", ptr);
        Ok(())
    }

    fn misuse(&self, addr: usize) -> Result<()> {
        self.misuses.fetch_add(1, Ordering::Relaxed);
        uv_error!("{:#x} not allocated (double free or foreign pointer), release refused", addr);
        if self.panic_on_misuse {
            panic!("release of untracked address {:#x}", addr);
        }
        Err(ReqError::UntrackedRelease { addr })
    }

    /// Allocate an I/O buffer for an engine read callback
    pub fn alloc_buf(&self, size: usize) -> Result<uv_buf_t> {
        let block = self.allocate(size)?;
        Ok(uv_buf_t {
            base: block.cast(),
            len: size,
        })
    }

    /// Release a buffer from [`alloc_buf`](Self::alloc_buf)
    ///
    /// # Safety
    ///
    /// Same contract as [`release`](Self::release).
    pub unsafe fn release_buf(&self, buf: uv_buf_t) -> Result<()> {
        self.release_ptr(buf.base.cast())
    }

    /// Whether `ptr` is a live block. Always false in unchecked mode.
    pub fn is_live(&self, ptr: *const u8) -> bool {
        self.tracking && self.live.lock().contains_key(&(ptr as usize))
    }

    /// Size recorded for a live block (checked mode only)
    pub fn allocation_size(&self, ptr: *const u8) -> Option<usize> {
        if !self.tracking {
            return None;
        }
        self.live.lock().get(&(ptr as usize)).copied()
    }

    /// Number of live blocks
    pub fn live_count(&self) -> usize {
        if self.tracking {
            self.live.lock().len()
        } else {
            let stats = self.stats();
            stats.live as usize
        }
    }

    /// Sorted live addresses (empty in unchecked mode)
    pub fn live_addresses(&self) -> Vec<usize> {
        if !self.tracking {
            return Vec::new();
        }
        let mut addrs: Vec<usize> = self.live.lock().keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn stats(&self) -> ArenaStats {
        let allocations = self.allocations.load(Ordering::Relaxed);
        let releases = self.releases.load(Ordering::Relaxed);
        ArenaStats {
            allocations,
            releases,
            misuses: self.misuses.load(Ordering::Relaxed),
            live: allocations.saturating_sub(releases),
        }
    }

    /// Live addresses formatted as `[0x.., 0x..]`
    pub fn leak_report(&self) -> String {
        let mut out = String::from("[");
        for (i, addr) in self.live_addresses().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{:#x}", addr);
        }
        out.push(']');
        out
    }

    /// Warn about live blocks; returns how many there were
    pub fn log_leaks(&self) -> usize {
        let live = self.live_count();
        if live > 0 {
            uv_warn!("{} native block(s) still live: {}", live, self.leak_report());
        } else {
            uv_debug!("no live native blocks");
        }
        live
    }
}

impl Default for NativeArena {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl Drop for NativeArena {
    fn drop(&mut self) {
        // Live blocks may still be referenced by the engine; report, never free.
        if self.tracking && !self.live.get_mut().is_empty() {
            self.log_leaks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_zeroed_and_tracked() {
        let arena = NativeArena::checked();
        let block = arena.allocate(32).unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(arena.is_live(block.as_ptr()));
        assert_eq!(arena.allocation_size(block.as_ptr()), Some(32));
        assert_eq!(arena.live_count(), 1);

        unsafe { arena.release(block).unwrap() };
        assert_eq!(arena.live_count(), 0);
        assert!(!arena.is_live(block.as_ptr()));
    }

    #[test]
    fn test_zero_size_allocation() {
        let arena = NativeArena::checked();
        let a = arena.allocate(0).unwrap();
        let b = arena.allocate(0).unwrap();
        assert_ne!(a.addr(), b.addr());
        assert_eq!(a.size(), 0);
        unsafe {
            arena.release(a).unwrap();
            arena.release(b).unwrap();
        }
    }

    #[test]
    fn test_allocation_failure() {
        let arena = NativeArena::checked();
        let err = arena.allocate(usize::MAX).unwrap_err();
        assert_eq!(err, ReqError::AllocationFailed { size: usize::MAX });
        assert_eq!(arena.live_count(), 0);
        assert_eq!(arena.stats().allocations, 0);
    }

    #[test]
    fn test_double_release_refused() {
        let arena = NativeArena::checked();
        let keep = arena.allocate(8).unwrap();
        let block = arena.allocate(16).unwrap();
        unsafe { arena.release(block).unwrap() };

        let err = unsafe { arena.release(block) }.unwrap_err();
        assert_eq!(err, ReqError::UntrackedRelease { addr: block.addr() });
        assert_eq!(arena.live_addresses(), vec![keep.addr()]);
        assert_eq!(arena.stats().misuses, 1);
        assert_eq!(arena.stats().releases, 1);

        unsafe { arena.release(keep).unwrap() };
    }

    #[test]
    fn test_foreign_release_refused() {
        let arena = NativeArena::checked();
        let mut local = 0u64;
        let ptr = &mut local as *mut u64 as *mut u8;
        let err = unsafe { arena.release_ptr(ptr) }.unwrap_err();
        assert!(matches!(err, ReqError::UntrackedRelease { .. }));
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_null_release_is_noop() {
        let arena = NativeArena::checked();
        unsafe { arena.release_ptr(std::ptr::null_mut()).unwrap() };
        assert_eq!(arena.stats(), ArenaStats::default());
    }

    #[test]
    #[should_panic(expected = "release of untracked address")]
    fn test_panic_on_misuse() {
        let config = BridgeConfig::checked().panic_on_misuse(true);
        let arena = NativeArena::from_config(&config);
        let _ = unsafe { arena.release_ptr(0x40 as *mut u8) };
    }

    #[test]
    fn test_unchecked_mode_counts_only() {
        let arena = NativeArena::unchecked();
        let a = arena.allocate(24).unwrap();
        let b = arena.allocate(24).unwrap();
        assert_eq!(arena.live_count(), 2);
        assert!(arena.live_addresses().is_empty());
        assert_eq!(arena.allocation_size(a.as_ptr()), None);
        assert!(!arena.is_live(a.as_ptr()));

        unsafe {
            arena.release(a).unwrap();
            arena.release(b).unwrap();
        }
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_buffers() {
        let arena = NativeArena::checked();
        let buf = arena.alloc_buf(4096).unwrap();
        assert!(!buf.base.is_null());
        assert_eq!(buf.len, 4096);
        assert_eq!(arena.allocation_size(buf.base.cast()), Some(4096));
        unsafe { arena.release_buf(buf).unwrap() };
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_leak_report() {
        let arena = NativeArena::checked();
        assert_eq!(arena.leak_report(), "[]");
        assert_eq!(arena.log_leaks(), 0);

        let a = arena.allocate(8).unwrap();
        let b = arena.allocate(8).unwrap();
        let (lo, hi) = if a.addr() < b.addr() { (a, b) } else { (b, a) };
        assert_eq!(
            arena.leak_report(),
            format!("[{:#x}, {:#x}]", lo.addr(), hi.addr())
        );
        assert_eq!(arena.log_leaks(), 2);

        unsafe {
            arena.release(a).unwrap();
            arena.release(b).unwrap();
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc(usize),
        Release(usize),
        ReleaseReleased(usize),
        ReleaseForeign,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..256).prop_map(Op::Alloc),
            any::<usize>().prop_map(Op::Release),
            any::<usize>().prop_map(Op::ReleaseReleased),
            Just(Op::ReleaseForeign),
        ]
    }

    proptest! {
        #[test]
        fn prop_live_set_is_consistent(ops in prop::collection::vec(op(), 1..64)) {
            let arena = NativeArena::checked();
            let mut live: Vec<NativeBlock> = Vec::new();
            let mut released: Vec<NativeBlock> = Vec::new();

            for op in ops {
                let before = arena.live_addresses();
                match op {
                    Op::Alloc(size) => live.push(arena.allocate(size).unwrap()),
                    Op::Release(i) if !live.is_empty() => {
                        let block = live.swap_remove(i % live.len());
                        unsafe { arena.release(block).unwrap() };
                        released.push(block);
                    }
                    Op::ReleaseReleased(i) if !released.is_empty() => {
                        let block = released[i % released.len()];
                        // The address may have been handed out again; only a
                        // non-live address must be refused.
                        if !live.iter().any(|b| b.addr() == block.addr()) {
                            let refused = unsafe { arena.release(block) };
                            prop_assert!(refused.is_err());
                            prop_assert_eq!(arena.live_addresses(), before);
                        }
                    }
                    Op::ReleaseForeign => {
                        let refused = unsafe { arena.release_ptr(0x8 as *mut u8) };
                        prop_assert!(refused.is_err());
                        prop_assert_eq!(arena.live_addresses(), before);
                    }
                    _ => {}
                }

                let addrs = arena.live_addresses();
                let unique: HashSet<usize> = addrs.iter().copied().collect();
                prop_assert_eq!(unique.len(), addrs.len());
                prop_assert_eq!(addrs.len(), live.len());
            }

            for block in live {
                unsafe { arena.release(block).unwrap() };
            }
            prop_assert_eq!(arena.live_count(), 0);
        }
    }
}
