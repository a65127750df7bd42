//! Clock helpers

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Wall-clock time in milliseconds since the unix epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock time in microseconds since the unix epoch
pub fn current_time_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Monotonic microseconds since the first call in this process
pub fn steady_micros() -> u64 {
    PROCESS_START.elapsed().as_micros() as u64
}
