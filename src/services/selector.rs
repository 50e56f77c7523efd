//! Runs the connection state machine against real adapters and timers.
//!
//! The selector owns at most one push adapter, one probe adapter and one poll
//! adapter. Lifecycle signals are matched against the adapter that sent them,
//! so a retired adapter can never move the machine.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
    time::sleep,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::SyncConfig,
    state::{
        Command, ConnectionAction, ConnectionEvent, ConnectionPolicy, ConnectionState,
        ConnectionStateMachine, TransportNotice,
    },
    transport::{
        AdapterId, AdapterMessage, CommandOutcome, PollClient, PollHealth, PushConnector,
        SyncContext, SyncUpdate, TransportEvent,
        poll::{PollAdapter, PollEnvironment, PollSettings, dispatch_command},
        push::{PushAdapter, PushEnvironment, PushSettings},
    },
};

/// Tunables the selector needs, extracted from [`SyncConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSettings {
    pub policy: ConnectionPolicy,
    pub push: PushSettings,
    pub probe: PushSettings,
    pub poll: PollSettings,
    /// Random spread applied to reconnect delays.
    pub jitter_ratio: f64,
}

impl SelectorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            policy: config.connection_policy(),
            push: config.push_settings(),
            probe: config.probe_settings(),
            poll: config.poll_settings(),
            jitter_ratio: config.reconnect.jitter_ratio,
        }
    }
}

/// The two ways of reaching the quiz server.
#[derive(Clone)]
pub struct Transports {
    pub push: Arc<dyn PushConnector>,
    pub poll: Arc<dyn PollClient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Reconnect,
    Probe,
}

/// A timer armed by the selector went off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    kind: TimerKind,
    token: u64,
}

/// Receivers the session must drain into the selector.
#[derive(Debug)]
pub struct SelectorInbox {
    pub adapters: mpsc::UnboundedReceiver<AdapterMessage>,
    pub timers: mpsc::UnboundedReceiver<TimerFired>,
}

/// What the session has to act on after a selector call.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorOutput {
    Update(SyncUpdate),
    CommandOutcome(CommandOutcome),
    Notice(TransportNotice),
    StateChanged(ConnectionState),
}

#[derive(Debug)]
struct Timer {
    token: u64,
    handle: AbortHandle,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct TransportSelector {
    machine: ConnectionStateMachine,
    settings: SelectorSettings,
    transports: Transports,
    context: watch::Receiver<SyncContext>,
    clock: Arc<dyn Clock>,
    client_id: Uuid,
    adapter_events: mpsc::UnboundedSender<AdapterMessage>,
    timer_events: mpsc::UnboundedSender<TimerFired>,
    push: Option<PushAdapter>,
    probe: Option<PushAdapter>,
    poll: Option<PollAdapter>,
    reconnect_timer: Option<Timer>,
    probe_timer: Option<Timer>,
    next_adapter: u64,
    next_timer: u64,
    state: watch::Sender<ConnectionState>,
}

impl TransportSelector {
    pub fn new(
        settings: SelectorSettings,
        transports: Transports,
        context: watch::Receiver<SyncContext>,
        clock: Arc<dyn Clock>,
    ) -> (Self, SelectorInbox) {
        let (adapter_events, adapters) = mpsc::unbounded_channel();
        let (timer_events, timers) = mpsc::unbounded_channel();
        let machine = ConnectionStateMachine::new(settings.policy);
        let (state, _) = watch::channel(machine.state());
        let selector = Self {
            machine,
            settings,
            transports,
            context,
            clock,
            client_id: Uuid::new_v4(),
            adapter_events,
            timer_events,
            push: None,
            probe: None,
            poll: None,
            reconnect_timer: None,
            probe_timer: None,
            next_adapter: 0,
            next_timer: 0,
            state,
        };
        (selector, SelectorInbox { adapters, timers })
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn start(&mut self) -> Vec<SelectorOutput> {
        self.transition(ConnectionEvent::Start)
    }

    pub fn stop(&mut self) -> Vec<SelectorOutput> {
        self.transition(ConnectionEvent::Stop)
    }

    /// Try push again now instead of waiting for the next scheduled attempt.
    pub fn request_push_retry(&mut self) -> Vec<SelectorOutput> {
        self.transition(ConnectionEvent::PushRetryRequested)
    }

    /// Route a command through push while it is live, through poll otherwise.
    pub fn dispatch(&mut self, command: Command) {
        if self.machine.state() == ConnectionState::PushLive {
            if let Some(push) = &self.push {
                if push.send(command.into()) {
                    debug!(%command, adapter = %push.id(), "command sent over push");
                    return;
                }
            }
        }
        let source = self.allocate_id();
        debug!(%command, adapter = %source, "command sent over poll");
        dispatch_command(
            Arc::clone(&self.transports.poll),
            command,
            self.settings.poll.request_timeout,
            source,
            self.adapter_events.clone(),
        );
    }

    pub fn on_adapter(&mut self, message: AdapterMessage) -> Vec<SelectorOutput> {
        let AdapterMessage { source, event } = message;
        match event {
            TransportEvent::Update(update) => vec![SelectorOutput::Update(update)],
            TransportEvent::CommandOutcome(outcome) => {
                vec![SelectorOutput::CommandOutcome(outcome)]
            }
            TransportEvent::Opened if is_current(&self.push, source) => {
                self.transition(ConnectionEvent::PushOpened)
            }
            TransportEvent::Opened if is_current(&self.probe, source) => {
                self.transition(ConnectionEvent::ProbeOpened)
            }
            TransportEvent::Closed(cause) if is_current(&self.push, source) => {
                self.push = None;
                self.transition(ConnectionEvent::PushLost(cause))
            }
            TransportEvent::Closed(cause) if is_current(&self.probe, source) => {
                self.probe = None;
                self.transition(ConnectionEvent::ProbeFailed(cause))
            }
            TransportEvent::PollHealth(health) if self.is_current_poll(source) => {
                self.transition(match health {
                    PollHealth::Degraded => ConnectionEvent::PollDegraded,
                    PollHealth::Recovered => ConnectionEvent::PollRecovered,
                })
            }
            TransportEvent::PushRetryRequested if self.is_current_poll(source) => {
                self.transition(ConnectionEvent::PushRetryRequested)
            }
            other => {
                debug!(adapter = %source, event = ?other, "ignoring signal from retired adapter");
                Vec::new()
            }
        }
    }

    pub fn on_timer(&mut self, fired: TimerFired) -> Vec<SelectorOutput> {
        let slot = match fired.kind {
            TimerKind::Reconnect => &mut self.reconnect_timer,
            TimerKind::Probe => &mut self.probe_timer,
        };
        if slot.as_ref().map(|timer| timer.token) != Some(fired.token) {
            debug!(kind = ?fired.kind, "ignoring cancelled timer");
            return Vec::new();
        }
        *slot = None;
        self.transition(match fired.kind {
            TimerKind::Reconnect => ConnectionEvent::ReconnectDue,
            TimerKind::Probe => ConnectionEvent::ProbeDue,
        })
    }

    fn transition(&mut self, event: ConnectionEvent) -> Vec<SelectorOutput> {
        let before = self.machine.state();
        let actions = match self.machine.handle(event) {
            Ok(actions) => actions,
            Err(err) => {
                debug!(error = %err, "connection event ignored");
                return Vec::new();
            }
        };

        let mut outputs = Vec::new();
        for action in actions {
            self.execute(action, &mut outputs);
        }

        let after = self.machine.state();
        if after != before {
            info!(from = %before, to = %after, ?event, "connection state changed");
            self.state.send_replace(after);
            outputs.push(SelectorOutput::StateChanged(after));
        }
        outputs
    }

    fn execute(&mut self, action: ConnectionAction, outputs: &mut Vec<SelectorOutput>) {
        match action {
            ConnectionAction::ConnectPush => {
                self.reconnect_timer = None;
                if let Some(previous) = self.push.take() {
                    previous.retire();
                }
                self.push = Some(self.spawn_push(self.settings.push.clone()));
            }
            ConnectionAction::ScheduleReconnect(delay) => {
                let delay = jittered(delay, self.settings.jitter_ratio);
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.machine.attempts(),
                    "reconnect scheduled"
                );
                self.reconnect_timer = Some(self.arm(TimerKind::Reconnect, delay));
            }
            ConnectionAction::StopPush => {
                self.reconnect_timer = None;
                if let Some(push) = self.push.take() {
                    push.retire();
                }
            }
            ConnectionAction::StartPolling => {
                if self.poll.is_none() {
                    let id = self.allocate_id();
                    let env = PollEnvironment {
                        context: self.context.clone(),
                        clock: Arc::clone(&self.clock),
                        events: self.adapter_events.clone(),
                    };
                    self.poll = Some(PollAdapter::spawn(
                        id,
                        Arc::clone(&self.transports.poll),
                        self.settings.poll.clone(),
                        env,
                    ));
                }
            }
            ConnectionAction::StopPolling => {
                if let Some(poll) = self.poll.take() {
                    poll.shutdown();
                }
            }
            ConnectionAction::SchedulePushProbe(delay) => {
                debug!(delay_ms = delay.as_millis() as u64, "push probe scheduled");
                self.probe_timer = Some(self.arm(TimerKind::Probe, delay));
            }
            ConnectionAction::LaunchProbe => {
                self.probe_timer = None;
                if let Some(previous) = self.probe.take() {
                    previous.retire();
                }
                let probe = self.spawn_push(self.settings.probe.clone());
                info!(adapter = %probe.id(), "probing push channel");
                self.probe = Some(probe);
            }
            ConnectionAction::PromoteProbe => {
                self.probe_timer = None;
                if let Some(previous) = self.push.take() {
                    previous.retire();
                }
                self.push = self.probe.take();
            }
            ConnectionAction::DiscardProbe => {
                self.probe_timer = None;
                if let Some(probe) = self.probe.take() {
                    probe.retire();
                }
            }
            ConnectionAction::Notify(notice) => outputs.push(SelectorOutput::Notice(notice)),
        }
    }

    fn spawn_push(&mut self, settings: PushSettings) -> PushAdapter {
        let id = self.allocate_id();
        let env = PushEnvironment {
            connector: Arc::clone(&self.transports.push),
            keep_alive_client: Some(Arc::clone(&self.transports.poll)),
            context: self.context.clone(),
            clock: Arc::clone(&self.clock),
            events: self.adapter_events.clone(),
            client_id: self.client_id,
        };
        PushAdapter::spawn(id, settings, env)
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) -> Timer {
        self.next_timer += 1;
        let token = self.next_timer;
        let events = self.timer_events.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(TimerFired { kind, token });
        })
        .abort_handle();
        Timer { token, handle }
    }

    fn allocate_id(&mut self) -> AdapterId {
        self.next_adapter += 1;
        AdapterId::new(self.next_adapter)
    }

    fn is_current_poll(&self, source: AdapterId) -> bool {
        self.poll.as_ref().is_some_and(|poll| poll.id() == source)
    }
}

fn is_current(slot: &Option<PushAdapter>, source: AdapterId) -> bool {
    slot.as_ref().is_some_and(|adapter| adapter.id() == source)
}

/// Spread `delay` by up to `ratio` either way.
fn jittered(delay: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 || delay.is_zero() {
        return delay;
    }
    let ratio = ratio.min(1.0);
    let factor = rand::rng().random_range((1.0 - ratio)..=(1.0 + ratio));
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        state::DisconnectCause,
        transport::testing::{ConnectBehavior, FakePollClient, FakePushConnector, PollScript},
    };

    fn settings() -> SelectorSettings {
        SelectorSettings {
            jitter_ratio: 0.0,
            ..SelectorSettings::from_config(&SyncConfig::default())
        }
    }

    fn selector(
        behavior: ConnectBehavior,
    ) -> (TransportSelector, SelectorInbox, Arc<FakePushConnector>) {
        let (connector, _servers) = FakePushConnector::new([], behavior);
        let transports = Transports {
            push: connector.clone(),
            poll: FakePollClient::new(PollScript::default()),
        };
        let (_context_tx, context) = watch::channel(SyncContext::default());
        let (selector, inbox) =
            TransportSelector::new(settings(), transports, context, Arc::new(SystemClock::new()));
        (selector, inbox, connector)
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let base = Duration::from_secs(4);
        assert_eq!(jittered(base, 0.0), base);
        for _ in 0..100 {
            let delay = jittered(base, 0.25);
            assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn signals_from_unknown_adapters_are_ignored() {
        let (mut selector, _inbox, _connector) = selector(ConnectBehavior::Hang);
        selector.start();
        assert_eq!(selector.state(), ConnectionState::Connecting);

        let stray = AdapterMessage {
            source: AdapterId::new(99),
            event: TransportEvent::Closed(DisconnectCause::ServerClosed),
        };
        assert!(selector.on_adapter(stray).is_empty());
        assert_eq!(selector.state(), ConnectionState::Connecting);
        assert_eq!(selector.machine.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_pass_through_from_any_source() {
        let (mut selector, _inbox, _connector) = selector(ConnectBehavior::Hang);
        let update = SyncUpdate::Countdown { remaining_secs: 3 };
        let outputs = selector.on_adapter(AdapterMessage {
            source: AdapterId::new(42),
            event: TransportEvent::Update(update.clone()),
        });
        assert_eq!(outputs, [SelectorOutput::Update(update)]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_falls_back_to_polling() {
        let (mut selector, mut inbox, connector) = selector(ConnectBehavior::Refuse);
        let mut notices = Vec::new();
        let mut outputs = selector.start();

        while selector.state() != ConnectionState::PollLive {
            notices.extend(outputs.iter().filter_map(|output| match output {
                SelectorOutput::Notice(notice) => Some(*notice),
                _ => None,
            }));
            outputs = tokio::select! {
                Some(message) = inbox.adapters.recv() => selector.on_adapter(message),
                Some(fired) = inbox.timers.recv() => selector.on_timer(fired),
            };
        }
        notices.extend(outputs.iter().filter_map(|output| match output {
            SelectorOutput::Notice(notice) => Some(*notice),
            _ => None,
        }));

        assert_eq!(connector.attempts(), 4);
        assert_eq!(notices, [TransportNotice::FallbackActivated]);
        assert!(selector.poll.is_some());
        assert!(selector.push.is_none());
        assert!(selector.probe_timer.is_some());
        assert_eq!(*selector.watch_state().borrow(), ConnectionState::PollLive);
    }

    #[tokio::test(start_paused = true)]
    async fn early_retry_cancels_the_pending_reconnect() {
        let (mut selector, mut inbox, connector) = selector(ConnectBehavior::Refuse);
        selector.start();
        let refused = inbox.adapters.recv().await.unwrap();
        selector.on_adapter(refused);
        assert!(selector.reconnect_timer.is_some());

        selector.request_push_retry();
        assert!(selector.reconnect_timer.is_none());
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(inbox.timers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_ignored() {
        let (mut selector, _inbox, _connector) = selector(ConnectBehavior::Hang);
        selector.start();
        let fired = TimerFired {
            kind: TimerKind::Reconnect,
            token: 7,
        };
        assert!(selector.on_timer(fired).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_everything_down() {
        let (mut selector, _inbox, _connector) = selector(ConnectBehavior::Hang);
        selector.start();
        let outputs = selector.stop();
        assert_eq!(outputs, [SelectorOutput::StateChanged(ConnectionState::Disconnected)]);
        assert!(selector.push.is_none());
        assert!(selector.reconnect_timer.is_none());
    }
}
