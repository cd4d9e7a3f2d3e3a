use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Time elapsed between two millisecond timestamps, zero if `earlier` is in the future.
pub fn elapsed_between(earlier: u64, now: u64) -> Duration {
    Duration::from_millis(now.saturating_sub(earlier))
}
