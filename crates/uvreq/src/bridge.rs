//! Bridge: the arena and the engine a set of requests share
//!
//! Cheap to clone. Every request constructor takes a `&Bridge` so it can
//! size its block through the engine and allocate it from the arena.

use std::fmt;
use std::sync::Arc;

use uvreq_core::config::BridgeConfig;
use uvreq_core::error::Result;
use uvreq_core::log::set_log_level;
use uvreq_core::{uv_info, HandleType, NativeEngine, RequestType};

use crate::arena::{NativeArena, NativeBlock};
use crate::error_desc::ErrorDescriptor;

#[derive(Clone)]
pub struct Bridge {
    arena: Arc<NativeArena>,
    engine: Arc<dyn NativeEngine>,
}

impl Bridge {
    pub fn new(engine: Arc<dyn NativeEngine>, config: &BridgeConfig) -> Self {
        if let Some(level) = config.log_level {
            set_log_level(level);
        }
        let arena = Arc::new(NativeArena::from_config(config));
        uv_info!(
            "bridge on {} engine (tracking {}, panic on misuse {})",
            engine.name(),
            config.track_allocations,
            config.panic_on_misuse
        );
        Self { arena, engine }
    }

    /// Bridge configured from `UVR_*` environment variables
    pub fn from_env(engine: Arc<dyn NativeEngine>) -> Self {
        Self::new(engine, &BridgeConfig::from_env())
    }

    /// Bridge over an existing arena
    pub fn with_arena(engine: Arc<dyn NativeEngine>, arena: Arc<NativeArena>) -> Self {
        uv_info!(
            "bridge on {} engine (shared arena, tracking {})",
            engine.name(),
            arena.is_tracking()
        );
        Self { arena, engine }
    }

    #[inline]
    pub fn arena(&self) -> &Arc<NativeArena> {
        &self.arena
    }

    #[inline]
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn request_size(&self, ty: RequestType) -> usize {
        self.engine.request_size(ty)
    }

    pub fn handle_size(&self, ty: HandleType) -> usize {
        self.engine.handle_size(ty)
    }

    /// Zeroed block sized for a request type
    pub fn alloc_request(&self, ty: RequestType) -> Result<NativeBlock> {
        self.arena.allocate(self.request_size(ty))
    }

    /// Zeroed block sized for a handle type
    pub fn alloc_handle(&self, ty: HandleType) -> Result<NativeBlock> {
        self.arena.allocate(self.handle_size(ty))
    }

    /// Release a block from `alloc_request` / `alloc_handle`
    ///
    /// # Safety
    ///
    /// See [`NativeArena::release`].
    pub unsafe fn release(&self, block: NativeBlock) -> Result<()> {
        self.arena.release(block)
    }

    /// Describe an engine error code
    pub fn error(&self, code: i32) -> ErrorDescriptor {
        ErrorDescriptor::new(code, Arc::clone(&self.engine))
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("engine", &self.engine.name())
            .field("stats", &self.arena.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackRequest;
    use crate::pinned::Pinnable;
    use uvreq_sim::SimEngine;

    fn bridge() -> Bridge {
        Bridge::new(Arc::new(SimEngine::new()), &BridgeConfig::checked())
    }

    #[test]
    fn test_request_blocks_match_engine_sizes() {
        let bridge = bridge();
        for ty in RequestType::ALL {
            let req = CallbackRequest::new(&bridge, ty).unwrap();
            let addr = req.pinned().address();
            assert_eq!(
                bridge.arena().allocation_size(addr.cast()),
                Some(bridge.request_size(ty)),
                "{:?}",
                ty
            );
            assert_eq!(req.pinned().request().kind(), ty);
            req.dispose();
        }
        assert_eq!(bridge.arena().live_count(), 0);
    }

    #[test]
    fn test_handle_blocks_match_engine_sizes() {
        let bridge = bridge();
        for ty in HandleType::ALL {
            let block = bridge.alloc_handle(ty).unwrap();
            assert_eq!(block.size(), bridge.handle_size(ty));
            assert_eq!(
                bridge.arena().allocation_size(block.as_ptr()),
                Some(bridge.handle_size(ty))
            );
            unsafe { bridge.release(block).unwrap() };
        }
        assert_eq!(bridge.arena().live_count(), 0);
    }

    #[test]
    fn test_alloc_request_block() {
        let bridge = bridge();
        let block = bridge.alloc_request(RequestType::Write).unwrap();
        assert_eq!(block.size(), bridge.request_size(RequestType::Write));
        unsafe { bridge.release(block).unwrap() };
        assert!(unsafe { bridge.release(block) }.is_err());
    }

    #[test]
    fn test_clones_share_arena() {
        let bridge = bridge();
        let other = bridge.clone();
        let block = other.alloc_handle(HandleType::Timer).unwrap();
        assert_eq!(bridge.arena().live_count(), 1);
        unsafe { bridge.release(block).unwrap() };
        assert_eq!(other.arena().live_count(), 0);
    }

    #[test]
    fn test_unchecked_bridge() {
        let bridge = Bridge::new(Arc::new(SimEngine::new()), &BridgeConfig::unchecked());
        assert!(!bridge.arena().is_tracking());
        let req = CallbackRequest::new(&bridge, RequestType::Work).unwrap();
        assert_eq!(bridge.arena().live_count(), 2);
        req.dispose();
        assert_eq!(bridge.arena().live_count(), 0);
    }

    #[test]
    fn test_from_env_tracking() {
        std::env::set_var("UVR_TRACK_ALLOCATIONS", "1");
        let bridge = Bridge::from_env(Arc::new(SimEngine::new()));
        std::env::remove_var("UVR_TRACK_ALLOCATIONS");

        assert!(bridge.arena().is_tracking());
        let block = bridge.alloc_request(RequestType::Work).unwrap();
        assert_eq!(bridge.arena().live_addresses(), vec![block.addr()]);
        unsafe { bridge.release(block).unwrap() };
    }

    #[test]
    fn test_bridges_over_one_arena() {
        let arena = Arc::new(NativeArena::checked());
        let a = Bridge::with_arena(Arc::new(SimEngine::new()), Arc::clone(&arena));
        let b = Bridge::with_arena(Arc::new(SimEngine::new()), Arc::clone(&arena));

        let req = CallbackRequest::new(&a, RequestType::Work).unwrap();
        let block = b.alloc_handle(HandleType::Tcp).unwrap();
        assert_eq!(arena.live_count(), 3);

        unsafe { a.release(block).unwrap() };
        req.dispose();
        assert_eq!(b.arena().live_count(), 0);
        assert!(Arc::ptr_eq(a.arena(), b.arena()));
    }

    #[test]
    fn test_error_lookup() {
        let bridge = bridge();
        let err = bridge.error(libc::EBADF);
        assert_eq!(err.code(), libc::EBADF);
        assert_eq!(err.name(), "EBADF");
    }
}
