//! Native structure layouts shared with the engine.
//!
//! These mirror the engine's public header. Every request struct starts
//! with the generic `uv_req_t` header (`type_`, `data`), so any request
//! address can be read as a `uv_req_t` to reach its payload slot.
//!
//! Type tags are stored as raw `c_int` because the engine writes them;
//! decode with [`RequestType::from_raw`] / [`HandleType::from_raw`].

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_void};

/// Request kinds the engine knows how to size
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Unknown = 0,
    Connect,
    Write,
    Shutdown,
    UdpSend,
    FileSystem,
    Work,
    GetAddrInfo,
    Private,
}

impl RequestType {
    /// Every concrete tag, in engine order
    pub const ALL: [RequestType; 9] = [
        RequestType::Unknown,
        RequestType::Connect,
        RequestType::Write,
        RequestType::Shutdown,
        RequestType::UdpSend,
        RequestType::FileSystem,
        RequestType::Work,
        RequestType::GetAddrInfo,
        RequestType::Private,
    ];

    pub fn from_raw(v: c_int) -> Self {
        Self::ALL
            .get(v as usize)
            .copied()
            .filter(|_| v >= 0)
            .unwrap_or(RequestType::Unknown)
    }

    #[inline]
    pub const fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Handle kinds the engine knows how to size
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Unknown = 0,
    AresTask,
    Async,
    Check,
    FsEvent,
    Idle,
    NamedPipe,
    Prepare,
    Process,
    Tcp,
    Timer,
    Tty,
    Udp,
    File,
    Private,
}

impl HandleType {
    pub const ALL: [HandleType; 15] = [
        HandleType::Unknown,
        HandleType::AresTask,
        HandleType::Async,
        HandleType::Check,
        HandleType::FsEvent,
        HandleType::Idle,
        HandleType::NamedPipe,
        HandleType::Prepare,
        HandleType::Process,
        HandleType::Tcp,
        HandleType::Timer,
        HandleType::Tty,
        HandleType::Udp,
        HandleType::File,
        HandleType::Private,
    ];

    pub fn from_raw(v: c_int) -> Self {
        Self::ALL
            .get(v as usize)
            .copied()
            .filter(|_| v >= 0)
            .unwrap_or(HandleType::Unknown)
    }
}

/// Filesystem operation codes written into `uv_fs_t::fs_type`
pub mod fs_type {
    use libc::c_int;

    pub const UNKNOWN: c_int = -1;
    pub const CUSTOM: c_int = 0;
    pub const OPEN: c_int = 1;
    pub const CLOSE: c_int = 2;
    pub const READ: c_int = 3;
    pub const WRITE: c_int = 4;
    pub const STAT: c_int = 6;
    pub const UNLINK: c_int = 11;
}

// ── Callback signatures ──

pub type uv_req_cb = unsafe extern "C" fn(*mut uv_req_t, c_int);
pub type uv_connect_cb = unsafe extern "C" fn(*mut uv_connect_t, c_int);
pub type uv_fs_cb = unsafe extern "C" fn(*mut uv_fs_t);

// ── Request layouts ──

/// Generic request header
#[repr(C)]
#[derive(Debug)]
pub struct uv_req_t {
    pub type_: c_int,
    pub data: *mut c_void,
}

/// Connect request
#[repr(C)]
#[derive(Debug)]
pub struct uv_connect_t {
    pub type_: c_int,
    pub data: *mut c_void,
    pub cb: Option<uv_connect_cb>,
    /// Stream handle being connected
    pub handle: *mut c_void,
}

/// Filesystem request
///
/// `path` and `ptr` are owned by the engine once the operation is
/// submitted; `uv_fs_req_cleanup` releases them.
#[repr(C)]
#[derive(Debug)]
pub struct uv_fs_t {
    pub type_: c_int,
    pub data: *mut c_void,
    pub loop_: *mut c_void,
    pub fs_type: c_int,
    pub cb: Option<uv_fs_cb>,
    pub result: isize,
    pub ptr: *mut c_void,
    pub path: *mut c_char,
    pub error: c_int,
}

/// I/O buffer descriptor handed to read/write operations
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct uv_buf_t {
    pub base: *mut c_char,
    pub len: usize,
}

impl uv_buf_t {
    pub const fn empty() -> Self {
        Self {
            base: std::ptr::null_mut(),
            len: 0,
        }
    }
}

/// Stat buffer the engine points `uv_fs_t::ptr` at for stat operations
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct uv_stat_t {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}
