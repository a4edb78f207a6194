/*!
    monotonic deadlines bounding every wait of a link.

    Deadlines never use the wall clock: a system clock stepped forward or backward during an exchange must not shorten or stretch it. [tokio::time::Instant] is monotonic, and also lets tests run with a paused clock.
*/

use core::time::Duration;
use tokio::time::Instant;


/// absolute expiry instant
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Deadline {
    stop: Instant,
}
impl Deadline {
    /// deadline expiring after the given duration from now
    pub fn after(timeout: Duration) -> Self {
        Self {stop: Instant::now() + timeout}
    }
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.stop
    }
    /// time left before expiry, zero if already expired
    pub fn remaining(&self) -> Duration {
        self.stop.saturating_duration_since(Instant::now())
    }
    /// the earliest of both deadlines
    pub fn min(self, other: Self) -> Self {
        Ord::min(self, other)
    }
}

/**
    suspend the current task between two polls

    The sleep is shortened to the time left before the deadline, so a poll loop never overshoots its deadline by more than one sleep granularity.
*/
pub async fn pause(deadline: &Deadline, interval: Duration) {
    let duration = interval.min(deadline.remaining());
    if duration.is_zero() {
        tokio::task::yield_now().await;
    }
    else {
        tokio::time::sleep(duration).await;
    }
}
