//! A single process-wide monotonic clock, nanoseconds from an arbitrary
//! epoch fixed at first use.
//!
//! The original backend mixed `steady_clock` and wall-clock `time_since_epoch`
//! calls when stamping frames and measuring latency; comparing the two
//! silently produces garbage durations whenever the wall clock steps. Every
//! timestamp in this crate — sensor frame capture, world-frame emission,
//! heartbeat liveness — goes through this one function instead.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds elapsed since an arbitrary, process-lifetime-stable epoch.
/// Never wraps within any realistic process lifetime and is immune to
/// wall-clock adjustments (NTP steps, DST, manual clock changes).
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_non_decreasing_across_calls() {
        let a = monotonic_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = monotonic_ns();
        assert!(b > a);
    }
}
