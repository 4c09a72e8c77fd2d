use chrono::{DateTime, Utc};
use std::time::Instant;

/// Time source taken by explicit construction rather than called as a
/// process global (`Utc::now()` scattered everywhere), so the Worker and
/// Store can be driven by a fake clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn monotonic(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}
