//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Position/death reports per second over WebSocket (per participant)
pub const REPORT_RATE_LIMIT: u32 = 30;

/// Duel and queue commands per second (per participant)
pub const COMMAND_RATE_LIMIT: u32 = 3;

/// Per-participant rate limiter state
#[derive(Clone)]
pub struct ParticipantRateLimiter {
    report_limiter: Arc<Limiter>,
    command_limiter: Arc<Limiter>,
}

impl ParticipantRateLimiter {
    pub fn new() -> Self {
        Self {
            report_limiter: create_limiter(REPORT_RATE_LIMIT),
            command_limiter: create_limiter(COMMAND_RATE_LIMIT),
        }
    }

    /// Check if a world report is allowed (returns true if allowed)
    pub fn check_report(&self) -> bool {
        self.report_limiter.check().is_ok()
    }

    /// Check if a duel/queue command is allowed (returns true if allowed)
    pub fn check_command(&self) -> bool {
        self.command_limiter.check().is_ok()
    }
}

impl Default for ParticipantRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_burst_is_limited() {
        let limiter = ParticipantRateLimiter::new();
        let allowed = (0..10).filter(|_| limiter.check_command()).count();
        assert_eq!(allowed, COMMAND_RATE_LIMIT as usize);
        assert!(limiter.check_report());
    }
}
