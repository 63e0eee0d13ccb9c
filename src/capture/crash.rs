//! Crash-drain hook: a best-effort flush of in-flight capture data when
//! the process takes a fatal signal.
//!
//! The handler records a synthetic `CRASHED` zone carrying the signal
//! number, gives the capture writer time to observe it, requests
//! shutdown, waits for the final drain, and aborts. Reserving and
//! committing a packet is a CAS plus plain stores plus one release store,
//! so the ring stays usable from signal context — unless the interrupted
//! thread was itself mid-reservation on this buffer, in which case the
//! head-of-line packet never commits and the drain loses whatever sits
//! behind it. Best effort, not a guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::capture::clock;
use crate::capture::profiler::{self, Profiler};
use crate::location;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install handlers for the fatal-signal set. Once per process.
pub(crate) fn install() {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    #[cfg(unix)]
    // SAFETY: `sigaction` is called with a zeroed, then fully initialized
    // struct and a handler with the expected `extern "C" fn(c_int)` shape.
    unsafe {
        register_handlers();
    }
}

#[cfg(unix)]
const FATAL_SIGNALS: [libc::c_int; 5] = [
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGSEGV,
    libc::SIGPIPE,
    libc::SIGBUS,
];

#[cfg(unix)]
unsafe fn register_handlers() {
    let mut action: libc::sigaction = std::mem::zeroed();
    libc::sigemptyset(&mut action.sa_mask);
    action.sa_sigaction = on_fatal_signal as libc::sighandler_t;
    for signal in FATAL_SIGNALS {
        libc::sigaction(signal, &action, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn on_fatal_signal(signum: libc::c_int) {
    let profiler = profiler::global();
    record_crash_zone(profiler, signum);
    // Leave the writer enough time for its final drain passes.
    std::thread::sleep(Duration::from_millis(1000));
    std::process::abort();
}

/// The drain body: emit the `CRASHED` zone with the signal number, pause
/// so the writer can pick it up, close the zone, and request shutdown.
/// Separate from the handler so the sequence is testable without
/// delivering a real signal.
pub(crate) fn record_crash_zone(profiler: &Profiler, signum: i32) {
    let tid = clock::current_thread_id();
    profiler.emit_zone_start(tid, tid, clock::now(), location!("CRASHED"));
    profiler.emit_zone_param_int(tid, crate::static_str!("signal"), signum as i64);
    std::thread::sleep(Duration::from_millis(100));
    profiler.emit_zone_end(tid, clock::now());
    profiler.request_shutdown();
}
