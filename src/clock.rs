//! Wall-clock source used to stamp candidate snapshots.

use std::fmt;

use time::OffsetDateTime;
use tokio::time::Instant;

/// Millisecond wall clock.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current Unix time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall clock anchored once and advanced with Tokio's monotonic clock.
///
/// Stamps never go backwards even if the system clock is adjusted, and they
/// follow Tokio's paused clock in tests.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_ms: unix_ms(OffsetDateTime::now_utc()),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }
}

/// Convert a timestamp to Unix milliseconds.
pub fn unix_ms(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Convert float seconds, as sent by the server, to integer milliseconds.
pub fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1_000.0).round() as i64
}

pub fn ms_to_secs(ms: i64) -> f64 {
    ms as f64 / 1_000.0
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_seconds_round_to_millis() {
        assert_eq!(secs_to_ms(1_700_000_000.1234), 1_700_000_000_123);
        assert_eq!(secs_to_ms(0.0005), 1);
        assert_eq!(ms_to_secs(1_500), 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert_eq!(clock.now_ms() - before, 2_000);
    }
}
