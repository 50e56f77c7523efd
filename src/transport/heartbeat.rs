//! Keep-alive pacing for the push channel.

use std::time::Duration;

use tokio::time::Instant;

/// Heightened keep-alive around questions known to draw heavy traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighTrafficPolicy {
    /// Question numbers the policy applies to.
    pub question_indices: Vec<u32>,
    /// Ping cadence while critical pings remain.
    pub heartbeat_interval: Duration,
    /// Critical pings sent per high-traffic question.
    pub max_critical_pings: u32,
    /// Minimum spacing of keep-alives sent over the poll path.
    pub http_keep_alive_throttle: Duration,
    /// Delay before asking the push channel for the tally again after a vote update.
    pub votes_refresh_delay: Duration,
}

impl HighTrafficPolicy {
    pub fn applies_to(&self, question_index: u32) -> bool {
        self.question_indices.contains(&question_index)
    }
}

impl Default for HighTrafficPolicy {
    fn default() -> Self {
        Self {
            question_indices: vec![3],
            heartbeat_interval: Duration::from_secs(3),
            max_critical_pings: 5,
            http_keep_alive_throttle: Duration::from_secs(3),
            votes_refresh_delay: Duration::from_secs(2),
        }
    }
}

/// Allows one action per window.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Claim the window at `now`; `false` if it was claimed less than a window ago.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Cadence and criticality of client pings.
#[derive(Debug, Clone)]
pub struct HeartbeatSchedule {
    base: Duration,
    policy: HighTrafficPolicy,
    critical_question: Option<u32>,
    critical_sent: u32,
}

impl HeartbeatSchedule {
    pub fn new(base: Duration, policy: HighTrafficPolicy) -> Self {
        Self {
            base,
            policy,
            critical_question: None,
            critical_sent: 0,
        }
    }

    pub fn policy(&self) -> &HighTrafficPolicy {
        &self.policy
    }

    /// Delay until the next ping while `question_index` is displayed.
    pub fn cadence(&self, question_index: u32) -> Duration {
        if self.critical_pings_left(question_index) {
            self.base.min(self.policy.heartbeat_interval)
        } else {
            self.base
        }
    }

    /// Record a ping for `question_index`, returning whether it is a critical one.
    pub fn next_ping(&mut self, question_index: u32) -> bool {
        if !self.policy.applies_to(question_index) {
            return false;
        }
        if self.critical_question != Some(question_index) {
            self.critical_question = Some(question_index);
            self.critical_sent = 0;
        }
        if self.critical_sent < self.policy.max_critical_pings {
            self.critical_sent += 1;
            true
        } else {
            false
        }
    }

    fn critical_pings_left(&self, question_index: u32) -> bool {
        self.policy.applies_to(question_index)
            && (self.critical_question != Some(question_index)
                || self.critical_sent < self.policy.max_critical_pings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttle_allows_one_per_window() {
        let mut throttle = Throttle::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(throttle.try_acquire(start));
        assert!(!throttle.try_acquire(start + Duration::from_millis(1_999)));
        assert!(throttle.try_acquire(start + Duration::from_secs(2)));
    }

    #[test]
    fn high_traffic_question_gets_limited_critical_pings() {
        let mut schedule =
            HeartbeatSchedule::new(Duration::from_secs(8), HighTrafficPolicy::default());

        assert_eq!(schedule.cadence(2), Duration::from_secs(8));
        assert!(!schedule.next_ping(2));

        assert_eq!(schedule.cadence(3), Duration::from_secs(3));
        let critical: Vec<bool> = (0..7).map(|_| schedule.next_ping(3)).collect();
        assert_eq!(critical, [true, true, true, true, true, false, false]);
        assert_eq!(schedule.cadence(3), Duration::from_secs(8));
    }

    #[test]
    fn each_high_traffic_question_gets_its_own_budget() {
        let policy = HighTrafficPolicy {
            question_indices: vec![3, 7],
            max_critical_pings: 1,
            ..HighTrafficPolicy::default()
        };
        let mut schedule = HeartbeatSchedule::new(Duration::from_secs(8), policy);
        assert!(schedule.next_ping(3));
        assert!(!schedule.next_ping(3));
        assert!(schedule.next_ping(7));
    }
}
