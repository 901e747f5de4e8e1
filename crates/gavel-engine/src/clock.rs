//! Time sources for the engine.
//!
//! Deadlines are tracked in two forms: a monotonic [`tokio::time::Instant`]
//! that drives the lot timers, and a wall-clock [`jiff::Timestamp`] recorded
//! on events and persisted rows. [`Clock`] provides both so tests can run the
//! whole engine under tokio's paused time with deterministic wall timestamps.

use std::time::Duration;

use jiff::{
    SignedDuration,
    Timestamp,
};
use tokio::time::Instant;

pub trait Clock: Send + Sync + 'static {
    /// Wall-clock timestamp, recorded on events and persisted deadlines.
    fn now(&self) -> Timestamp;

    /// Monotonic instant used for timer arithmetic.
    fn instant(&self) -> Instant;
}

/// The production clock: wall time from the system, instants from tokio.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Manual-advance clock for tests.
///
/// Wall time is anchored at a fixed epoch and advances in lockstep with
/// tokio's clock, so under `#[tokio::test(start_paused = true)]` a
/// `tokio::time::advance` moves both the timers and the recorded timestamps
/// by exactly the same amount.
#[derive(Clone, Copy, Debug)]
pub struct TestClock {
    epoch: Timestamp,
    started: Instant,
}

impl TestClock {
    #[must_use]
    pub fn new(epoch: Timestamp) -> Self {
        Self {
            epoch,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn epoch(&self) -> Timestamp {
        self.epoch
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        timestamp_after(self.epoch, self.started.elapsed())
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// `ts + duration`, saturating at the representable maximum.
pub(crate) fn timestamp_after(ts: Timestamp, duration: Duration) -> Timestamp {
    let signed = SignedDuration::try_from(duration).unwrap_or(SignedDuration::MAX);
    ts.checked_add(signed).unwrap_or(Timestamp::MAX)
}

/// How much of `deadline` is left at `now`; zero if the deadline has passed.
pub(crate) fn remaining_until(deadline: Timestamp, now: Timestamp) -> Duration {
    let left = now.duration_until(deadline);
    Duration::try_from(left).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_tracks_tokio_time() {
        let epoch: Timestamp = "2026-03-01T10:00:00Z".parse().unwrap();
        let clock = TestClock::new(epoch);
        assert_eq!(clock.now(), epoch);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), timestamp_after(epoch, Duration::from_secs(30)));
    }

    #[test]
    fn remaining_until_saturates_at_zero() {
        let now: Timestamp = "2026-03-01T10:00:00Z".parse().unwrap();
        let deadline = timestamp_after(now, Duration::from_secs(7));
        assert_eq!(remaining_until(deadline, now), Duration::from_secs(7));
        assert_eq!(remaining_until(now, deadline), Duration::ZERO);
    }
}
