//! Time utilities for the duel tick loop

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const TICKS_PER_SECOND: u64 = 20; // 20 ticks per second
pub const TICK_DURATION_MILLIS: u64 = 1_000 / TICKS_PER_SECOND;

/// Wall-clock length of `ticks` ticks
pub fn ticks(ticks: u64) -> Duration {
    Duration::from_millis(ticks * TICK_DURATION_MILLIS)
}

/// Number of ticks in `secs` seconds
pub fn secs_to_ticks(secs: u64) -> u64 {
    secs * TICKS_PER_SECOND
}

/// Ticks covering `duration`, rounded up
pub fn duration_ticks(duration: Duration) -> u64 {
    (duration.as_millis() as u64 + TICK_DURATION_MILLIS - 1) / TICK_DURATION_MILLIS
}
