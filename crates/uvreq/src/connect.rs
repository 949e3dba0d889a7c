//! Connect request

use std::fmt;
use std::mem;
use std::ptr;
use std::rc::Rc;

use libc::{c_int, c_void};
use uvreq_core::error::{ReqError, Result};
use uvreq_core::native::{uv_connect_cb, uv_connect_t};
use uvreq_core::RequestType;

use crate::bridge::Bridge;
use crate::callback::{end_trampoline, Callback, Completion};
use crate::pinned::{Pinnable, PinnedRequest};

/// Request for a stream connect; completes with a status code.
pub struct ConnectRequest {
    pinned: PinnedRequest,
    callback: Callback<c_int, ConnectRequest>,
}

impl ConnectRequest {
    /// Connect request sized by the engine, pinned
    pub fn new(bridge: &Bridge) -> Result<Rc<Self>> {
        let size = bridge.request_size(RequestType::Connect);
        let min = mem::size_of::<uv_connect_t>();
        if size < min {
            return Err(ReqError::InvalidSize { size, min });
        }
        PinnedRequest::pin(Self {
            pinned: PinnedRequest::new(bridge.arena(), size, RequestType::Connect)?,
            callback: Callback::new(),
        })
    }

    pub fn as_native(&self) -> *mut uv_connect_t {
        self.pinned.request().native()
    }

    /// Stream handle the engine recorded for this connect; null before
    /// submission or after disposal
    pub fn connect_handle(&self) -> *mut c_void {
        let native = self.as_native();
        if native.is_null() {
            return ptr::null_mut();
        }
        unsafe { (*native).handle }
    }

    pub fn trampoline() -> uv_connect_cb {
        end_trampoline::<Self>
    }
}

impl Pinnable for ConnectRequest {
    fn pinned(&self) -> &PinnedRequest {
        &self.pinned
    }
}

impl Completion for ConnectRequest {
    type Native = uv_connect_t;

    fn callback(&self) -> &Callback<c_int, Self> {
        &self.callback
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("pinned", &self.pinned)
            .field("handle", &self.connect_handle())
            .finish()
    }
}
