//! Heartbeat throttling. The store owns presence expiry; the server only
//! ever extends a participant's TTL, and at most once per window no matter
//! how fast the client pings.

use std::time::Duration;

use tokio::time::Instant;

pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True iff at least one window has elapsed since the last accepted
    /// call. The first call is always accepted.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
