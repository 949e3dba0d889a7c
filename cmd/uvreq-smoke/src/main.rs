//! uvreq End-to-End Smoke Test
//!
//! Drives the full request lifecycle against the in-process engine:
//!   Part A: arena sizes, refused double release, leak report
//!   Part B: pinning (submit, drop every reference, complete, recover)
//!   Part C: connect requests, success and failure status
//!   Part D: filesystem requests, stat, missing path, engine cleanup
//!   Part E: error descriptors
//!
//! Run: ./target/release/uvreq-smoke
//! (UVR_LOG_LEVEL=trace shows every allocation and completion)

use uvreq::handles;
use uvreq::{
    Bridge, CallbackRequest, Completion, ConnectRequest, FileSystemRequest, HandleType,
    NativeArena, Pinnable, PinnedRequest, RequestType,
};
use uvreq_sim::SimEngine;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

/// Requests in flight for the batch test
const BATCH: usize = 512;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Arena
// ════════════════════════════════════════════════════════════

fn test_arena(t: &mut TestRunner) {
    t.section("Part A: Arena");

    let arena = NativeArena::checked();

    // A1: allocate + recorded size
    let block = match arena.allocate(128) {
        Ok(b) => { t.pass("allocate 128 bytes"); b }
        Err(e) => { t.fail("allocate 128 bytes", &e.to_string()); return; }
    };
    t.check(
        "recorded size",
        arena.allocation_size(block.as_ptr()) == Some(128),
        &format!("{:?}", arena.allocation_size(block.as_ptr())),
    );

    // A2: leak report lists the live block
    let report = arena.leak_report();
    t.check(
        "leak report lists live block",
        report == format!("[{:#x}]", block.addr()),
        &report,
    );

    // A3: release then double release
    let first = unsafe { arena.release(block) };
    t.check("release", first.is_ok(), &format!("{:?}", first));
    let second = unsafe { arena.release(block) };
    t.check(
        "double release refused",
        second.is_err() && arena.stats().misuses == 1,
        &format!("{:?}", second),
    );
    t.check("arena empty", arena.live_count() == 0, &arena.leak_report());
}

// ════════════════════════════════════════════════════════════
// Part B: Pinning
// ════════════════════════════════════════════════════════════

fn test_pinning(t: &mut TestRunner, engine: &Arc<SimEngine>, bridge: &Bridge) {
    t.section("Part B: Pinning and recovery");

    let base_live = bridge.arena().live_count();
    let base_pins = handles::live_count();

    // B1: recover returns the same object
    match CallbackRequest::new(bridge, RequestType::Work) {
        Ok(req) => {
            let back = PinnedRequest::recover::<CallbackRequest>(req.pinned().address());
            t.check("recover same object", Rc::ptr_eq(&req, &back), "different Rc");
            req.dispose();
            t.check(
                "dispose frees block + slot",
                bridge.arena().live_count() == base_live,
                &bridge.arena().leak_report(),
            );
        }
        Err(e) => t.fail("create work request", &e.to_string()),
    }

    // B2: submit without callback is rejected
    if let Ok(req) = CallbackRequest::new(bridge, RequestType::Work) {
        t.check(
            "submit without callback rejected",
            req.submit_ptr().is_err(),
            "accepted",
        );
        req.dispose();
    }

    // B3: batch of requests with every Rust reference dropped before completion
    let fired = Rc::new(Cell::new(0usize));
    let mut submitted = 0;
    for i in 0..BATCH {
        let req = match CallbackRequest::new(bridge, RequestType::Work) {
            Ok(r) => r,
            Err(e) => { t.fail("batch create", &e.to_string()); return; }
        };
        let fired = fired.clone();
        req.set_callback(move |status, _| {
            if status == i as i32 {
                fired.set(fired.get() + 1);
            }
        });
        let rc = match req.submit_ptr() {
            Ok(ptr) => unsafe { engine.complete(ptr, i as i32, CallbackRequest::trampoline()) },
            Err(_) => -1,
        };
        if rc == 0 {
            submitted += 1;
        }
    }
    t.check(
        &format!("{} requests submitted", BATCH),
        submitted == BATCH,
        &format!("{} submitted", submitted),
    );
    t.check(
        "pins held while pending",
        handles::live_count() == base_pins + BATCH,
        &format!("{} pins", handles::live_count()),
    );

    let ran = engine.run();
    t.check(
        "every callback ran once",
        ran == BATCH && fired.get() == BATCH,
        &format!("ran {} fired {}", ran, fired.get()),
    );
    t.check(
        "no pins left",
        handles::live_count() == base_pins,
        &format!("{:?}", handles::audit()),
    );
    t.check(
        "no native blocks left",
        bridge.arena().live_count() == base_live,
        &bridge.arena().leak_report(),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Connect
// ════════════════════════════════════════════════════════════

fn test_connect(t: &mut TestRunner, engine: &Arc<SimEngine>, bridge: &Bridge) {
    t.section("Part C: Connect requests");

    let stream = match bridge.alloc_handle(HandleType::Tcp) {
        Ok(b) => b,
        Err(e) => { t.fail("alloc tcp handle", &e.to_string()); return; }
    };
    let base_live = bridge.arena().live_count();

    for (name, handle, expect) in [
        ("connect to stream", stream.cast::<libc::c_void>(), 0),
        ("connect with null handle", std::ptr::null_mut(), -libc::EINVAL),
    ] {
        let req = match ConnectRequest::new(bridge) {
            Ok(r) => r,
            Err(e) => { t.fail(name, &e.to_string()); continue; }
        };
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        req.set_callback(move |status, r: &ConnectRequest| {
            s.set(Some((status, r.connect_handle())));
        });

        if let Ok(ptr) = req.submit_ptr() {
            unsafe { engine.connect(ptr, handle, ConnectRequest::trampoline()) };
        }
        drop(req);
        engine.run();

        t.check(
            name,
            seen.get() == Some((expect, handle)),
            &format!("{:?}", seen.get()),
        );
    }
    t.check(
        "connect requests disposed",
        bridge.arena().live_count() == base_live,
        &bridge.arena().leak_report(),
    );

    let released = unsafe { bridge.release(stream) };
    t.check("release tcp handle", released.is_ok(), &format!("{:?}", released));
}

// ════════════════════════════════════════════════════════════
// Part D: Filesystem
// ════════════════════════════════════════════════════════════

fn test_fs(t: &mut TestRunner, engine: &Arc<SimEngine>, bridge: &Bridge) {
    t.section("Part D: Filesystem requests");

    let base_live = bridge.arena().live_count();
    let base_cleanups = engine.cleanup_calls();

    // D1: stat of our own executable
    let exe = std::env::current_exe().unwrap_or_else(|_| std::env::temp_dir());
    let expect_size = std::fs::metadata(&exe).map(|m| m.len()).unwrap_or(0);
    match FileSystemRequest::new(bridge) {
        Ok(req) => {
            let seen = Rc::new(Cell::new(None));
            let s = seen.clone();
            req.set_callback(move |err, r: &FileSystemRequest| {
                s.set(Some((err.is_none(), r.stat().map(|st| st.size))));
            });
            if let Ok(ptr) = req.submit_ptr() {
                unsafe { engine.fs_stat(ptr, &exe, FileSystemRequest::trampoline()) };
            }
            drop(req);
            engine.run();
            t.check(
                "stat current executable",
                seen.get() == Some((true, Some(expect_size))),
                &format!("{:?}", seen.get()),
            );
        }
        Err(e) => t.fail("stat current executable", &e.to_string()),
    }

    // D2: stat of a missing path resolves ENOENT
    match FileSystemRequest::new(bridge) {
        Ok(req) => {
            let seen = Rc::new(Cell::new(0));
            let s = seen.clone();
            req.set_callback(move |err, _| s.set(err.map_or(0, |e| e.code)));
            let missing = std::env::temp_dir().join("uvreq-smoke-missing/none");
            if let Ok(ptr) = req.submit_ptr() {
                unsafe { engine.fs_stat(ptr, &missing, FileSystemRequest::trampoline()) };
            }
            engine.run();
            t.check(
                "stat missing path -> ENOENT",
                seen.get() == libc::ENOENT,
                &format!("code {}", seen.get()),
            );
        }
        Err(e) => t.fail("stat missing path", &e.to_string()),
    }

    t.check(
        "engine cleanup once per request",
        engine.cleanup_calls() - base_cleanups == 2,
        &format!("{} cleanups", engine.cleanup_calls() - base_cleanups),
    );
    t.check(
        "fs requests disposed",
        bridge.arena().live_count() == base_live,
        &bridge.arena().leak_report(),
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Error descriptors
// ════════════════════════════════════════════════════════════

fn test_errors(t: &mut TestRunner, bridge: &Bridge) {
    t.section("Part E: Error descriptors");

    for (code, name) in [
        (libc::ENOENT, "ENOENT"),
        (-libc::ECONNREFUSED, "ECONNREFUSED"),
        (libc::EAGAIN, "EAGAIN"),
    ] {
        let desc = bridge.error(code);
        t.check(
            &format!("{} -> {}", code, name),
            desc.name() == name && !desc.description().is_empty(),
            &desc.to_string(),
        );
    }
}

fn main() {
    println!("=== uvreq End-to-End Smoke Test ===");

    // Leak checks need tracking regardless of build profile
    let engine = Arc::new(SimEngine::new());
    let bridge = Bridge::with_arena(engine.clone(), Arc::new(NativeArena::checked()));
    println!(
        "    engine: {}  tracking: {}",
        bridge.engine().name(),
        bridge.arena().is_tracking()
    );

    let mut t = TestRunner::new();

    test_arena(&mut t);
    test_pinning(&mut t, &engine, &bridge);
    test_connect(&mut t, &engine, &bridge);
    test_fs(&mut t, &engine, &bridge);
    test_errors(&mut t, &bridge);

    if bridge.arena().log_leaks() > 0 {
        t.fail("no leaks at exit", &bridge.arena().leak_report());
    }

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
