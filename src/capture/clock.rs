//! Monotonic clock and OS thread identity for capture timestamps.

use std::cell::Cell;

/// Nanoseconds on the monotonic clock.
///
/// This is a vDSO call on Linux (~20-40ns), no actual syscall.
pub fn now() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, initialized timespec on the stack.
    // CLOCK_MONOTONIC is always available and always succeeds.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// The calling thread's OS id, cached in TLS after the first call.
pub fn current_thread_id() -> u64 {
    thread_local! {
        // 0 means not yet resolved.
        static TID: Cell<u64> = const { Cell::new(0) };
    }

    TID.with(|cell| {
        let cached = cell.get();
        if cached != 0 {
            return cached;
        }
        let tid = os_thread_id();
        cell.set(tid);
        tid
    })
}

#[cfg(target_os = "linux")]
fn os_thread_id() -> u64 {
    // SAFETY: SYS_gettid takes no arguments and always succeeds; unsafe is
    // required because syscall() is a raw FFI function with no type
    // checking.
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
}

#[cfg(not(target_os = "linux"))]
fn os_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
