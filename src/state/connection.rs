use std::{fmt, time::Duration};

use serde::Serialize;
use thiserror::Error;

/// Transport the session is currently synchronising through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or shut down.
    Disconnected,
    /// Establishing (or re-establishing) the push channel.
    Connecting,
    /// Push channel open and healthy.
    PushLive,
    /// Push exhausted its retries; polling carries the state.
    PollLive,
    /// Polling, but the poll requests are failing as well.
    Degraded,
}

impl ConnectionState {
    /// Whether a poll adapter is expected to be running in this state.
    pub fn is_polling(self) -> bool {
        matches!(self, ConnectionState::PollLive | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::PushLive => "push-live",
            ConnectionState::PollLive => "poll-live",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(label)
    }
}

/// Why a push channel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCause {
    /// The server closed the channel on purpose.
    ServerClosed,
    /// Low-level transport failure while the channel was open.
    TransportError,
    /// Nothing was received within the idle timeout.
    HeartbeatTimeout,
    /// The connection attempt was refused or failed.
    ConnectFailed,
    /// The connection attempt did not complete in time.
    ConnectTimeout,
}

/// Notices raised by transitions, forwarded to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportNotice {
    /// Push gave up; the session now polls.
    FallbackActivated,
    /// A probe succeeded and push replaced polling.
    TransportRestored,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session start.
    Start,
    /// The active push adapter reported an open channel.
    PushOpened,
    /// The active push adapter ended.
    PushLost(DisconnectCause),
    /// A scheduled reconnect delay elapsed.
    ReconnectDue,
    /// The poll adapter crossed its failure threshold.
    PollDegraded,
    /// The poll adapter succeeded again after degrading.
    PollRecovered,
    /// The probe timer elapsed.
    ProbeDue,
    /// The probe push channel opened.
    ProbeOpened,
    /// The probe push channel failed.
    ProbeFailed(DisconnectCause),
    /// Something asked to retry push now rather than at the next probe.
    PushRetryRequested,
    /// Session shutdown.
    Stop,
}

/// Side effects requested by a transition, executed in order by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Spawn a fresh push adapter, replacing any previous one.
    ConnectPush,
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    /// Retire the push adapter and disarm the reconnect timer.
    StopPush,
    /// Spawn the poll adapter if none is running.
    StartPolling,
    /// Retire the poll adapter.
    StopPolling,
    /// Arm the probe timer.
    SchedulePushProbe(Duration),
    /// Spawn a probe push adapter alongside polling.
    LaunchProbe,
    /// Turn the probe adapter into the active push adapter.
    PromoteProbe,
    /// Retire the probe adapter.
    DiscardProbe,
    /// Publish a transport notice.
    Notify(TransportNotice),
}

/// Error returned when an event does not apply to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from}")]
pub struct InvalidTransition {
    /// State the machine was in.
    pub from: ConnectionState,
    /// Rejected event.
    pub event: ConnectionEvent,
}

/// Retry and fallback tuning for [`ConnectionStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Push attempts allowed after the first failure before falling back.
    pub retry_ceiling: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the doubling delay.
    pub max_delay: Duration,
    /// Quick retries granted to low-level transport errors.
    pub fast_retry_attempts: u32,
    /// Delay between quick retries.
    pub fast_retry_delay: Duration,
    /// Delay between entering polling and the first probe.
    pub probe_interval: Duration,
    /// Delay before probing again after a failed probe.
    pub probe_retry_interval: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            retry_ceiling: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            fast_retry_attempts: 3,
            fast_retry_delay: Duration::from_millis(500),
            probe_interval: Duration::from_secs(30),
            probe_retry_interval: Duration::from_secs(60),
        }
    }
}

impl ConnectionPolicy {
    /// Delay before retry number `attempt` (1-based): doubling, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Pure connection state machine; timers and adapters live in the selector.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    policy: ConnectionPolicy,
    attempts: u32,
    fast_attempts: u32,
    probe_in_flight: bool,
    version: usize,
}

impl ConnectionStateMachine {
    /// Create a machine in [`ConnectionState::Disconnected`].
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            fast_attempts: 0,
            probe_in_flight: false,
            version: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries consumed on the ceiling-based path since the last open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }

    /// Number of applied transitions, including self-transitions.
    pub fn version(&self) -> usize {
        self.version
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Apply an event, returning the actions the selector must execute.
    pub fn handle(
        &mut self,
        event: ConnectionEvent,
    ) -> Result<Vec<ConnectionAction>, InvalidTransition> {
        use ConnectionAction as A;
        use ConnectionEvent as E;
        use ConnectionState as S;

        let (next, actions) = match (self.state, event) {
            (S::Disconnected, E::Start) => {
                self.reset_retries();
                (S::Connecting, vec![A::ConnectPush])
            }
            (S::Connecting, E::PushOpened) => {
                self.reset_retries();
                (S::PushLive, Vec::new())
            }
            (S::Connecting | S::PushLive, E::PushLost(cause)) => self.retry_or_fall_back(cause),
            (S::Connecting, E::ReconnectDue | E::PushRetryRequested) => {
                (S::Connecting, vec![A::ConnectPush])
            }
            (S::PushLive, E::PushRetryRequested) => (S::PushLive, Vec::new()),
            (S::PollLive | S::Degraded, E::PollDegraded) => (S::Degraded, Vec::new()),
            (S::PollLive | S::Degraded, E::PollRecovered) => (S::PollLive, Vec::new()),
            (state @ (S::PollLive | S::Degraded), E::ProbeDue | E::PushRetryRequested) => {
                if self.probe_in_flight {
                    (state, Vec::new())
                } else {
                    self.probe_in_flight = true;
                    (state, vec![A::LaunchProbe])
                }
            }
            (S::PollLive | S::Degraded, E::ProbeOpened) => {
                self.reset_retries();
                (
                    S::PushLive,
                    vec![
                        A::PromoteProbe,
                        A::StopPolling,
                        A::Notify(TransportNotice::TransportRestored),
                    ],
                )
            }
            (state @ (S::PollLive | S::Degraded), E::ProbeFailed(_)) => {
                self.probe_in_flight = false;
                (
                    state,
                    vec![
                        A::DiscardProbe,
                        A::SchedulePushProbe(self.policy.probe_retry_interval),
                    ],
                )
            }
            (from, E::Stop) if from != S::Disconnected => {
                self.reset_retries();
                (
                    S::Disconnected,
                    vec![A::StopPush, A::DiscardProbe, A::StopPolling],
                )
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        self.state = next;
        self.version += 1;
        Ok(actions)
    }

    fn retry_or_fall_back(
        &mut self,
        cause: DisconnectCause,
    ) -> (ConnectionState, Vec<ConnectionAction>) {
        if cause == DisconnectCause::TransportError
            && self.fast_attempts < self.policy.fast_retry_attempts
        {
            self.fast_attempts += 1;
            return (
                ConnectionState::Connecting,
                vec![ConnectionAction::ScheduleReconnect(
                    self.policy.fast_retry_delay,
                )],
            );
        }

        self.attempts += 1;
        if self.attempts <= self.policy.retry_ceiling {
            let delay = self.policy.backoff_delay(self.attempts);
            return (
                ConnectionState::Connecting,
                vec![ConnectionAction::ScheduleReconnect(delay)],
            );
        }

        self.probe_in_flight = false;
        (
            ConnectionState::PollLive,
            vec![
                ConnectionAction::StopPush,
                ConnectionAction::StartPolling,
                ConnectionAction::SchedulePushProbe(self.policy.probe_interval),
                ConnectionAction::Notify(TransportNotice::FallbackActivated),
            ],
        )
    }

    fn reset_retries(&mut self) {
        self.attempts = 0;
        self.fast_attempts = 0;
        self.probe_in_flight = false;
    }
}
