//! Process-local monotonic clock.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds since a process-local epoch. The pacer only requires a
/// single consistent monotonic clock; the epoch itself is arbitrary.
pub fn monotonic_now() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now()
        .checked_duration_since(*epoch)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}
