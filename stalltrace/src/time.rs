//! Process-relative clocks backing every recorded timestamp.
//!
//! All timestamps in the trace are milliseconds since the first time either
//! clock was observed in this process, so they fit the 43-bit field of a
//! packed [`Record`](crate::record::Record) for the entire process lifetime.

use std::{sync::OnceLock, time::Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds of wall-clock time since the process epoch.
///
/// Monotonic and cheap enough to call on every instrumented method boundary;
/// sub-millisecond precision is deliberately dropped to keep records packable.
pub fn uptime_millis() -> i64 {
    epoch().elapsed().as_millis() as i64
}

/// Milliseconds of CPU time consumed by the calling thread.
///
/// Sleeps, I/O waits and scheduling delays do not advance this clock, which
/// is what lets analyzers tell "busy" stalls apart from "blocked" stalls.
/// Returns 0 on platforms without a per-thread CPU clock.
pub fn thread_time_millis() -> i64 {
    thread_cpu_ns() / 1_000_000
}

#[cfg(target_family = "unix")]
fn thread_cpu_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if ret != 0 {
        return 0;
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

#[cfg(not(target_family = "unix"))]
fn thread_cpu_ns() -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotonic() {
        let first = uptime_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = uptime_millis();
        assert!(second >= first + 4);
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn thread_time_ignores_sleep() {
        let before = thread_time_millis();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let after = thread_time_millis();
        assert!(after - before < 25, "sleep advanced the CPU clock");
    }
}
