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

/// Relayed messages per connection per second (moves, shots and votes)
pub const RELAY_MESSAGE_RATE_LIMIT: u32 = 60;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct PeerRateLimiter {
    message_limiter: Arc<Limiter>,
}

impl PeerRateLimiter {
    pub fn new() -> Self {
        Self::with_rate(RELAY_MESSAGE_RATE_LIMIT)
    }

    pub fn with_rate(per_second: u32) -> Self {
        Self {
            message_limiter: create_limiter(per_second),
        }
    }

    /// Check if a message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }
}

impl Default for PeerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
