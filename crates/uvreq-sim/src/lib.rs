//! # uvreq-sim: in-process `NativeEngine`
//!
//! `SimEngine` stands in for a linked native engine. It reports structure
//! sizes from the `#[repr(C)]` layouts in `uvreq_core::native`, resolves
//! error codes through the OS errno table, and completes submitted requests
//! from a bounded queue when [`SimEngine::run`] drains it, calling the
//! registered C callbacks exactly as a real loop would.
//!
//! Submission and completion are split on purpose: a request is handed
//! over by address, the caller may drop every reference it holds, and the
//! completion still has to find its owner.
//!
//! ```text
//!   connect / fs_stat / fs_complete / complete
//!                 │ push
//!                 ▼
//!   ┌────────────────────────────┐   run()   ┌──────────────┐
//!   │ ArrayQueue<Pending>        │ ────────► │ cb(req, ...) │
//!   └────────────────────────────┘           └──────────────┘
//! ```

use std::borrow::Cow;
use std::ffi::CString;
use std::mem;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use libc::{c_int, c_void};
use nix::errno::Errno;

use uvreq_core::constants::FS_RESULT_FAILED;
use uvreq_core::native::{
    fs_type, uv_connect_cb, uv_connect_t, uv_fs_cb, uv_fs_t, uv_req_cb, uv_req_t, uv_stat_t,
};
use uvreq_core::{uv_trace, HandleType, NativeEngine, RequestType};

/// Default completion queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Request sizes for types without a layout in `uvreq_core::native`.
/// Each includes room for the generic header.
mod sizes {
    pub const WRITE: usize = 96;
    pub const SHUTDOWN: usize = 48;
    pub const UDP_SEND: usize = 112;
    pub const WORK: usize = 64;
    pub const GETADDRINFO: usize = 104;
}

enum Pending {
    Req {
        req: usize,
        cb: uv_req_cb,
        status: c_int,
    },
    Connect {
        req: usize,
        cb: uv_connect_cb,
        status: c_int,
    },
    Fs {
        req: usize,
        cb: uv_fs_cb,
    },
}

pub struct SimEngine {
    queue: ArrayQueue<Pending>,
    cleanups: AtomicU64,
    completed: AtomicU64,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_QUEUE_DEPTH)
    }

    /// Engine whose completion queue holds at most `depth` operations.
    /// Submissions beyond that fail with `-EAGAIN`.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            queue: ArrayQueue::new(depth.max(1)),
            cleanups: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, pending: Pending) -> c_int {
        match self.queue.push(pending) {
            Ok(()) => 0,
            Err(_) => -libc::EAGAIN,
        }
    }

    /// Complete a generic request with `status` on the next `run`.
    ///
    /// # Safety
    ///
    /// `req` must point to a live request block that stays allocated until
    /// its callback has run.
    pub unsafe fn complete(&self, req: *mut uv_req_t, status: c_int, cb: uv_req_cb) -> c_int {
        self.enqueue(Pending::Req {
            req: req as usize,
            cb,
            status,
        })
    }

    /// Connect `req` to a stream handle. A null handle completes with
    /// `-EINVAL`.
    ///
    /// # Safety
    ///
    /// `req` must point to a live, fully sized `uv_connect_t` that stays
    /// allocated until its callback has run.
    pub unsafe fn connect(
        &self,
        req: *mut uv_connect_t,
        handle: *mut c_void,
        cb: uv_connect_cb,
    ) -> c_int {
        let conn = &mut *req;
        conn.type_ = RequestType::Connect.as_raw();
        conn.handle = handle;
        conn.cb = Some(cb);

        let status = if handle.is_null() { -libc::EINVAL } else { 0 };
        uv_trace!("sim: connect {:p} -> {:p}", req, handle);
        self.enqueue(Pending::Connect {
            req: req as usize,
            cb,
            status,
        })
    }

    /// Stat `path` into an engine-owned buffer hung off `req.ptr`.
    ///
    /// # Safety
    ///
    /// `req` must point to a live, fully sized `uv_fs_t` that stays
    /// allocated until its callback has run.
    pub unsafe fn fs_stat(&self, req: *mut uv_fs_t, path: &Path, cb: uv_fs_cb) -> c_int {
        let fs = &mut *req;
        free_owned(fs);
        fs.type_ = RequestType::FileSystem.as_raw();
        fs.fs_type = fs_type::STAT;
        fs.cb = Some(cb);
        fs.path = CString::new(path.to_string_lossy().into_owned())
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut());

        match std::fs::metadata(path) {
            Ok(md) => {
                fs.result = 0;
                fs.error = 0;
                fs.ptr = Box::into_raw(Box::new(stat_from(&md))).cast();
            }
            Err(e) => {
                fs.result = FS_RESULT_FAILED;
                fs.error = e.raw_os_error().unwrap_or(libc::EIO);
            }
        }
        self.enqueue(Pending::Fs {
            req: req as usize,
            cb,
        })
    }

    /// Complete a filesystem request with an arbitrary outcome.
    ///
    /// # Safety
    ///
    /// Same contract as [`fs_stat`](Self::fs_stat).
    pub unsafe fn fs_complete(
        &self,
        req: *mut uv_fs_t,
        op: c_int,
        result: isize,
        error: c_int,
        cb: uv_fs_cb,
    ) -> c_int {
        let fs = &mut *req;
        free_owned(fs);
        fs.type_ = RequestType::FileSystem.as_raw();
        fs.fs_type = op;
        fs.cb = Some(cb);
        fs.result = result;
        fs.error = error;
        self.enqueue(Pending::Fs {
            req: req as usize,
            cb,
        })
    }

    /// Deliver every queued completion, including ones queued by callbacks
    /// while draining. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while let Some(pending) = self.queue.pop() {
            unsafe {
                match pending {
                    Pending::Req { req, cb, status } => cb(req as *mut uv_req_t, status),
                    Pending::Connect { req, cb, status } => cb(req as *mut uv_connect_t, status),
                    Pending::Fs { req, cb } => cb(req as *mut uv_fs_t),
                }
            }
            ran += 1;
        }
        self.completed.fetch_add(ran as u64, Ordering::Relaxed);
        ran
    }

    /// Operations queued and not yet completed
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total completions delivered
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Total `fs_req_cleanup` calls
    pub fn cleanup_calls(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for SimEngine {
    fn request_size(&self, ty: RequestType) -> usize {
        match ty {
            RequestType::Connect => mem::size_of::<uv_connect_t>(),
            RequestType::FileSystem => mem::size_of::<uv_fs_t>(),
            RequestType::Write => sizes::WRITE,
            RequestType::Shutdown => sizes::SHUTDOWN,
            RequestType::UdpSend => sizes::UDP_SEND,
            RequestType::Work => sizes::WORK,
            RequestType::GetAddrInfo => sizes::GETADDRINFO,
            RequestType::Unknown | RequestType::Private => mem::size_of::<uv_req_t>(),
        }
    }

    fn handle_size(&self, ty: HandleType) -> usize {
        match ty {
            HandleType::Unknown | HandleType::Private => 64,
            HandleType::AresTask => 72,
            HandleType::Async | HandleType::Check | HandleType::Idle | HandleType::Prepare => 96,
            HandleType::FsEvent => 104,
            HandleType::NamedPipe => 264,
            HandleType::Process => 136,
            HandleType::Tcp => 248,
            HandleType::Timer => 152,
            HandleType::Tty => 320,
            HandleType::Udp => 216,
            HandleType::File => 128,
        }
    }

    fn err_name(&self, code: i32) -> Cow<'static, str> {
        match Errno::from_raw(code.saturating_abs()) {
            Errno::UnknownErrno => Cow::Borrowed("UNKNOWN"),
            errno => Cow::Owned(format!("{:?}", errno)),
        }
    }

    fn strerror(&self, code: i32) -> Cow<'static, str> {
        Cow::Borrowed(Errno::from_raw(code.saturating_abs()).desc())
    }

    unsafe fn fs_req_cleanup(&self, req: *mut uv_fs_t) {
        if req.is_null() {
            return;
        }
        let fs = &mut *req;
        free_owned(fs);
        fs.ptr = ptr::null_mut();
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

/// Free the path and stat buffer a previous operation left on `fs`.
///
/// # Safety
///
/// `fs.path` and a `STAT` request's `fs.ptr` must be null or come from
/// this engine.
unsafe fn free_owned(fs: &mut uv_fs_t) {
    if !fs.path.is_null() {
        drop(CString::from_raw(fs.path));
        fs.path = ptr::null_mut();
    }
    // only stat buffers are engine-owned; other ptr values belong to the caller
    if fs.fs_type == fs_type::STAT && !fs.ptr.is_null() {
        drop(Box::from_raw(fs.ptr as *mut uv_stat_t));
        fs.ptr = ptr::null_mut();
    }
}

#[cfg(unix)]
fn stat_from(md: &std::fs::Metadata) -> uv_stat_t {
    use std::os::unix::fs::MetadataExt;

    uv_stat_t {
        dev: md.dev(),
        ino: md.ino(),
        mode: md.mode(),
        nlink: md.nlink(),
        uid: md.uid(),
        gid: md.gid(),
        rdev: md.rdev(),
        size: md.size(),
        atime: md.atime(),
        mtime: md.mtime(),
        ctime: md.ctime(),
    }
}

#[cfg(not(unix))]
fn stat_from(md: &std::fs::Metadata) -> uv_stat_t {
    uv_stat_t {
        size: md.len(),
        ..uv_stat_t::default()
    }
}
