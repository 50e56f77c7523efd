//! Push adapter: one task per connection attempt.
//!
//! The task connects, keeps the channel alive with pings, answers server
//! keep-alives, and turns inbound frames into [`SyncUpdate`]s. It reports
//! `Opened` once and `Closed` once at most; a retired adapter reports nothing
//! further about its lifecycle.

use std::{future, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::{
        poll::KeepAliveRequest,
        push::{KeepAliveResponsePayload, PingPayload, PushInbound, PushOutbound, decode},
    },
    error::TransportError,
    state::{DisconnectCause, OptionKey, Snapshot},
    transport::{
        AdapterId, AdapterMessage, CommandOutcome, PollClient, PushConnector, PushLink, SyncContext,
        SyncUpdate, TransportEvent,
        heartbeat::{HeartbeatSchedule, HighTrafficPolicy, Throttle},
    },
};

/// Timing of one push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Longest silence from the server before the link is declared dead.
    pub idle_timeout: Duration,
    /// Minimum spacing of `keep_alive_response` frames.
    pub keep_alive_throttle: Duration,
    pub http_keep_alive_timeout: Duration,
    pub high_traffic: HighTrafficPolicy,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(8),
            idle_timeout: Duration::from_secs(25),
            keep_alive_throttle: Duration::from_secs(2),
            http_keep_alive_timeout: Duration::from_secs(5),
            high_traffic: HighTrafficPolicy::default(),
        }
    }
}

/// Everything a push adapter needs besides its settings.
#[derive(Clone)]
pub struct PushEnvironment {
    pub connector: Arc<dyn PushConnector>,
    /// Used for keep-alives over the poll path around high-traffic questions.
    pub keep_alive_client: Option<Arc<dyn PollClient>>,
    pub context: watch::Receiver<SyncContext>,
    pub clock: Arc<dyn Clock>,
    pub events: mpsc::UnboundedSender<AdapterMessage>,
    pub client_id: Uuid,
}

#[derive(Debug)]
enum PushCommand {
    Send(PushOutbound),
    Close,
}

/// Handle to a running push adapter.
#[derive(Debug)]
pub struct PushAdapter {
    id: AdapterId,
    commands: mpsc::UnboundedSender<PushCommand>,
    task: JoinHandle<()>,
}

impl PushAdapter {
    pub fn spawn(id: AdapterId, settings: PushSettings, env: PushEnvironment) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let schedule =
            HeartbeatSchedule::new(settings.heartbeat_interval, settings.high_traffic.clone());
        let task = PushTask {
            id,
            keep_alive: Throttle::new(settings.keep_alive_throttle),
            http_keep_alive: Throttle::new(settings.high_traffic.http_keep_alive_throttle),
            schedule,
            settings,
            env,
            commands: inbox,
            link_question: 0,
            votes_refresh: None,
        };
        let task = tokio::spawn(task.run());
        Self { id, commands, task }
    }

    pub fn id(&self) -> AdapterId {
        self.id
    }

    /// Queue a frame; `false` once the adapter has stopped.
    pub fn send(&self, frame: PushOutbound) -> bool {
        !self.task.is_finished() && self.commands.send(PushCommand::Send(frame)).is_ok()
    }

    /// Close the channel without reporting it.
    pub fn retire(self) {
        debug!(adapter = %self.id, "retiring push adapter");
        let _ = self.commands.send(PushCommand::Close);
    }
}

struct PushTask {
    id: AdapterId,
    settings: PushSettings,
    env: PushEnvironment,
    commands: mpsc::UnboundedReceiver<PushCommand>,
    schedule: HeartbeatSchedule,
    keep_alive: Throttle,
    http_keep_alive: Throttle,
    /// Last question number announced on this link.
    link_question: u32,
    /// When to ask for the tally again on a high-traffic question.
    votes_refresh: Option<Instant>,
}

impl PushTask {
    async fn run(mut self) {
        let Some(mut link) = self.open().await else {
            return;
        };
        info!(adapter = %self.id, "push channel open");
        self.emit(TransportEvent::Opened);

        let mut cause = None;
        for frame in [PushOutbound::GetQuizStatus, PushOutbound::GetRanking] {
            if let Err(err) = self.send_frame(link.as_mut(), &frame).await {
                warn!(adapter = %self.id, error = %err, "initial push request failed");
                cause = Some(DisconnectCause::TransportError);
                break;
            }
        }
        if cause.is_none() {
            cause = self.pump(link.as_mut()).await;
        }

        link.close().await;
        if let Some(cause) = cause {
            info!(adapter = %self.id, ?cause, "push channel closed");
            self.emit(TransportEvent::Closed(cause));
        }
    }

    async fn open(&mut self) -> Option<Box<dyn PushLink>> {
        let connect = timeout(self.settings.connect_timeout, self.env.connector.connect());
        tokio::select! {
            result = connect => match result {
                Ok(Ok(link)) => Some(link),
                Ok(Err(err)) => {
                    warn!(adapter = %self.id, error = %err, "push connect failed");
                    self.emit(TransportEvent::Closed(DisconnectCause::ConnectFailed));
                    None
                }
                Err(_) => {
                    warn!(
                        adapter = %self.id,
                        timeout_ms = self.settings.connect_timeout.as_millis() as u64,
                        "push connect timed out"
                    );
                    self.emit(TransportEvent::Closed(DisconnectCause::ConnectTimeout));
                    None
                }
            },
            () = wait_for_close(&mut self.commands) => {
                debug!(adapter = %self.id, "push adapter retired while connecting");
                None
            }
        }
    }

    /// Serve an open link until it fails or the adapter is retired.
    async fn pump(&mut self, link: &mut dyn PushLink) -> Option<DisconnectCause> {
        let mut last_inbound = Instant::now();
        let mut next_ping = Instant::now() + self.cadence();
        loop {
            let idle_deadline = last_inbound + self.settings.idle_timeout;
            let votes_refresh = self.votes_refresh;
            tokio::select! {
                frame = link.recv() => match frame {
                    Ok(Some(text)) => {
                        last_inbound = Instant::now();
                        let question = self.question_index();
                        if let Err(err) = self.handle_frame(&text, link).await {
                            warn!(adapter = %self.id, error = %err, "push send failed");
                            return Some(DisconnectCause::TransportError);
                        }
                        if self.question_index() != question {
                            next_ping = next_ping.min(Instant::now() + self.cadence());
                        }
                    }
                    Ok(None) => return Some(DisconnectCause::ServerClosed),
                    Err(err) => {
                        warn!(adapter = %self.id, error = %err, "push link failed");
                        return Some(DisconnectCause::TransportError);
                    }
                },
                () = sleep_until(next_ping) => {
                    if let Err(err) = self.send_ping(link).await {
                        warn!(adapter = %self.id, error = %err, "ping failed");
                        return Some(DisconnectCause::TransportError);
                    }
                    next_ping = Instant::now() + self.cadence();
                }
                () = sleep_until_some(votes_refresh) => {
                    self.votes_refresh = None;
                    let question = self.question_index();
                    if self.schedule.policy().applies_to(question) {
                        debug!(adapter = %self.id, question, "re-requesting tally");
                        if let Err(err) = self.send_frame(link, &PushOutbound::GetVotes).await {
                            warn!(adapter = %self.id, error = %err, "push send failed");
                            return Some(DisconnectCause::TransportError);
                        }
                    }
                }
                () = sleep_until(idle_deadline) => {
                    warn!(
                        adapter = %self.id,
                        idle_ms = self.settings.idle_timeout.as_millis() as u64,
                        "no traffic from server"
                    );
                    return Some(DisconnectCause::HeartbeatTimeout);
                }
                command = self.commands.recv() => match command {
                    Some(PushCommand::Send(frame)) => {
                        if let Err(err) = self.send_frame(link, &frame).await {
                            warn!(adapter = %self.id, error = %err, "push send failed");
                            return Some(DisconnectCause::TransportError);
                        }
                    }
                    Some(PushCommand::Close) | None => return None,
                },
            }
        }
    }

    async fn handle_frame(
        &mut self,
        text: &str,
        link: &mut dyn PushLink,
    ) -> Result<(), TransportError> {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(adapter = %self.id, error = %err, "dropping push frame");
                return Ok(());
            }
        };
        let now_ms = self.env.clock.now_ms();

        match frame {
            PushInbound::Status(status) => self.emit_update(SyncUpdate::QuizStatus {
                running: status.quiz_running,
                observed_at_ms: now_ms,
            }),
            PushInbound::QuizStatus(status) => {
                if let Some(running) = status.quiz_running {
                    self.emit_update(SyncUpdate::QuizStatus {
                        running,
                        observed_at_ms: now_ms,
                    });
                }
                if !status.success {
                    self.emit(TransportEvent::CommandOutcome(CommandOutcome {
                        command: None,
                        accepted: false,
                        message: status.message,
                    }));
                }
            }
            PushInbound::NextQuestion(next) => {
                let options = match next.question.options.to_options() {
                    Ok(options) => options,
                    Err(err) => {
                        warn!(
                            adapter = %self.id,
                            error = %err,
                            "dropping question without options"
                        );
                        return Ok(());
                    }
                };
                self.link_question = next.question_num;
                let mut snapshot = Snapshot::open(
                    next.question_num,
                    next.total_questions,
                    next.question.question,
                    options,
                    now_ms,
                );
                snapshot.answer_time_secs = next.answer_time;
                self.emit_update(SyncUpdate::Question(snapshot));
            }
            PushInbound::UpdateVotes(update) => match update.votes.to_counts() {
                Ok(votes) => {
                    let question_index = self.question_index();
                    self.emit_update(SyncUpdate::Votes {
                        question_index,
                        votes,
                        observed_at_ms: now_ms,
                    });
                    let policy = self.schedule.policy();
                    if self.votes_refresh.is_none() && policy.applies_to(question_index) {
                        self.votes_refresh = Some(Instant::now() + policy.votes_refresh_delay);
                    }
                }
                Err(err) => warn!(adapter = %self.id, error = %err, "dropping vote update"),
            },
            PushInbound::ShowCountingVotes(_) => self.emit_update(SyncUpdate::VotingClosed {
                question_index: self.known_question(),
                observed_at_ms: now_ms,
            }),
            PushInbound::ShowResults(results) => {
                let Some(correct) = OptionKey::parse(&results.correct_answer) else {
                    warn!(adapter = %self.id, answer = %results.correct_answer, "dropping results");
                    return Ok(());
                };
                let votes = results.votes.as_ref().and_then(|votes| votes.to_counts().ok());
                self.emit_update(SyncUpdate::Results {
                    question_index: self.known_question(),
                    correct,
                    explanation: results.explanation,
                    votes,
                    observed_at_ms: now_ms,
                });
            }
            PushInbound::ChatMessage(message) => {
                self.emit_update(SyncUpdate::Chat(vec![message.into_message(now_ms)]));
            }
            PushInbound::UpdateRanking(update) => {
                self.emit_update(SyncUpdate::Ranking(update.ranking.into_entries()));
            }
            PushInbound::RankingUpdate(update) => match update.ranking {
                Some(ranking) if update.success => {
                    self.emit_update(SyncUpdate::Ranking(ranking.into_entries()));
                }
                _ => debug!(adapter = %self.id, "ranking request returned nothing"),
            },
            PushInbound::KeepAlive(keep_alive) => {
                self.answer_keep_alive(keep_alive.critical, now_ms, link).await?;
            }
            PushInbound::Pong => debug!(adapter = %self.id, "pong"),
            PushInbound::UpdateTimer(timer) => self.emit_update(SyncUpdate::Countdown {
                remaining_secs: timer.time,
            }),
            PushInbound::Error(error) => self.emit_update(SyncUpdate::ServerError {
                message: error.message.unwrap_or_else(|| "unspecified server error".into()),
            }),
            PushInbound::Unknown(event) => {
                debug!(adapter = %self.id, %event, "ignoring push event")
            }
        }
        Ok(())
    }

    async fn answer_keep_alive(
        &mut self,
        critical: bool,
        now_ms: i64,
        link: &mut dyn PushLink,
    ) -> Result<(), TransportError> {
        let question_number = self.question_index();
        if self.keep_alive.try_acquire(Instant::now()) {
            let response = PushOutbound::KeepAliveResponse(KeepAliveResponsePayload {
                timestamp: now_ms,
                question_number,
                client_id: self.env.client_id,
            });
            self.send_frame(link, &response).await?;
        } else {
            debug!(adapter = %self.id, "keep-alive response throttled");
        }
        if critical || self.schedule.policy().applies_to(question_number) {
            self.http_keep_alive(question_number, critical, now_ms);
        }
        Ok(())
    }

    async fn send_ping(&mut self, link: &mut dyn PushLink) -> Result<(), TransportError> {
        let question_number = self.question_index();
        let critical = self.schedule.next_ping(question_number);
        let now_ms = self.env.clock.now_ms();
        let ping = PushOutbound::PingServer(PingPayload {
            timestamp: now_ms,
            question_number,
            critical,
            rate_limited: critical,
        });
        self.send_frame(link, &ping).await?;
        debug!(adapter = %self.id, question_number, critical, "ping sent");
        if critical {
            self.http_keep_alive(question_number, true, now_ms);
        }
        Ok(())
    }

    /// Fire-and-forget keep-alive over the poll path.
    fn http_keep_alive(&mut self, question_number: u32, critical: bool, now_ms: i64) {
        let Some(client) = self.env.keep_alive_client.clone() else {
            return;
        };
        if !self.http_keep_alive.try_acquire(Instant::now()) {
            return;
        }
        let request = KeepAliveRequest {
            timestamp: now_ms,
            question_number,
            client_id: self.env.client_id,
            critical,
        };
        let limit = self.settings.http_keep_alive_timeout;
        let id = self.id;
        tokio::spawn(async move {
            match timeout(limit, client.keep_alive(request)).await {
                Ok(Ok(())) => debug!(adapter = %id, question_number, "http keep-alive sent"),
                Ok(Err(err)) => debug!(adapter = %id, error = %err, "http keep-alive failed"),
                Err(_) => debug!(adapter = %id, "http keep-alive timed out"),
            }
        });
    }

    async fn send_frame(
        &self,
        link: &mut dyn PushLink,
        frame: &PushOutbound,
    ) -> Result<(), TransportError> {
        match frame.encode() {
            Ok(text) => link.send(text).await,
            Err(err) => {
                warn!(adapter = %self.id, error = %err, ?frame, "skipping unencodable frame");
                Ok(())
            }
        }
    }

    fn cadence(&self) -> Duration {
        self.schedule.cadence(self.question_index())
    }

    /// Question the next tally or phase change on this link refers to.
    fn question_index(&self) -> u32 {
        self.link_question.max(self.env.context.borrow().question_index)
    }

    fn known_question(&self) -> Option<u32> {
        Some(self.question_index()).filter(|index| *index > 0)
    }

    fn emit_update(&self, update: SyncUpdate) {
        self.emit(TransportEvent::Update(update));
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.env.events.send(AdapterMessage {
            source: self.id,
            event,
        });
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<PushCommand>) {
    loop {
        match commands.recv().await {
            Some(PushCommand::Send(frame)) => debug!(?frame, "dropping frame queued before open"),
            Some(PushCommand::Close) | None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        clock::testing::ManualClock,
        state::VoteCounts,
        transport::testing::{
            ConnectBehavior, FakePollClient, FakePushConnector, FakeServer, PollScript,
            next_question_event,
        },
    };

    struct Harness {
        adapter: PushAdapter,
        events: mpsc::UnboundedReceiver<AdapterMessage>,
        servers: mpsc::UnboundedReceiver<FakeServer>,
        context: watch::Sender<SyncContext>,
        poll: Arc<FakePollClient>,
    }

    fn start(behavior: ConnectBehavior) -> Harness {
        let (connector, servers) = FakePushConnector::new([], behavior);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (context, context_rx) = watch::channel(SyncContext::default());
        let poll = FakePollClient::new(PollScript::default());
        let keep_alive_client: Arc<dyn PollClient> = poll.clone();
        let env = PushEnvironment {
            connector,
            keep_alive_client: Some(keep_alive_client),
            context: context_rx,
            clock: Arc::new(ManualClock::new(1_000)),
            events: events_tx,
            client_id: Uuid::new_v4(),
        };
        let adapter = PushAdapter::spawn(AdapterId::new(1), PushSettings::default(), env);
        Harness {
            adapter,
            events,
            servers,
            context,
            poll,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<AdapterMessage>) -> TransportEvent {
        events.recv().await.unwrap().event
    }

    async fn next_update(events: &mut mpsc::UnboundedReceiver<AdapterMessage>) -> SyncUpdate {
        loop {
            if let TransportEvent::Update(update) = next_event(events).await {
                return update;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_and_requests_initial_state() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();

        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        server.expect_event("get_quiz_status").await;
        server.expect_event("get_ranking").await;
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_become_stamped_updates() {
        let mut harness = start(ConnectBehavior::Accept);
        let server = harness.servers.recv().await.unwrap();

        server.send_event("next_question", next_question_event(2, "Capital of France?"));
        server.send_event("update_votes", json!({"votes": {"A": 4, "B": 1}}));
        server.send_event("show_results", json!({"correct_answer": "a", "explanation": "Paris"}));

        let SyncUpdate::Question(snapshot) = next_update(&mut harness.events).await else {
            panic!("expected a question");
        };
        assert_eq!(snapshot.question_index, 2);
        assert_eq!(snapshot.timestamp_ms, 1_000);
        assert_eq!(snapshot.answer_time_secs, Some(20));

        assert_eq!(
            next_update(&mut harness.events).await,
            SyncUpdate::Votes {
                question_index: 2,
                votes: VoteCounts::new([4, 1, 0, 0]),
                observed_at_ms: 1_000,
            }
        );
        assert_eq!(
            next_update(&mut harness.events).await,
            SyncUpdate::Results {
                question_index: Some(2),
                correct: OptionKey::A,
                explanation: Some("Paris".into()),
                votes: None,
                observed_at_ms: 1_000,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let mut harness = start(ConnectBehavior::Accept);
        let server = harness.servers.recv().await.unwrap();

        server.send_raw("{not json");
        server.send_event("update_votes", json!({"votes": "lots"}));
        server.send_event("update_timer", json!({"time": 12}));

        assert_eq!(
            next_update(&mut harness.events).await,
            SyncUpdate::Countdown { remaining_secs: 12 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn votes_use_session_question_before_link_announces_one() {
        let mut harness = start(ConnectBehavior::Accept);
        let server = harness.servers.recv().await.unwrap();
        harness.context.send_modify(|context| context.question_index = 4);

        server.send_event("update_votes", json!({"votes": [1, 2, 3, 4]}));

        let SyncUpdate::Votes { question_index, .. } = next_update(&mut harness.events).await else {
            panic!("expected votes");
        };
        assert_eq!(question_index, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_why_the_link_ended() {
        let mut harness = start(ConnectBehavior::Accept);
        let server = harness.servers.recv().await.unwrap();
        server.close();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        assert!(matches!(
            next_event(&mut harness.events).await,
            TransportEvent::Closed(DisconnectCause::ServerClosed)
        ));

        let mut harness = start(ConnectBehavior::Accept);
        let server = harness.servers.recv().await.unwrap();
        server.fail();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        assert!(matches!(
            next_event(&mut harness.events).await,
            TransportEvent::Closed(DisconnectCause::TransportError)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_are_classified() {
        let mut refused = start(ConnectBehavior::Refuse);
        assert!(matches!(
            next_event(&mut refused.events).await,
            TransportEvent::Closed(DisconnectCause::ConnectFailed)
        ));

        let mut hanging = start(ConnectBehavior::Hang);
        let started = Instant::now();
        assert!(matches!(
            next_event(&mut hanging.events).await,
            TransportEvent::Closed(DisconnectCause::ConnectTimeout)
        ));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_after_pings() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        let opened = Instant::now();

        assert!(matches!(
            next_event(&mut harness.events).await,
            TransportEvent::Closed(DisconnectCause::HeartbeatTimeout)
        ));
        assert!(opened.elapsed() >= Duration::from_secs(25));

        let pings = server
            .drain()
            .into_iter()
            .filter(|frame| frame["event"] == "ping_server")
            .count();
        assert_eq!(pings, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_responses_are_throttled() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));

        server.send_event("keep_alive", json!({"timestamp": 1.0}));
        server.send_event("keep_alive", json!({"timestamp": 1.1}));
        server.expect_event("keep_alive_response").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let extra = server
            .drain()
            .into_iter()
            .filter(|frame| frame["event"] == "keep_alive_response")
            .count();
        assert_eq!(extra, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        server.send_event("keep_alive", json!({"timestamp": 3.2}));
        server.expect_event("keep_alive_response").await;
    }

    #[tokio::test(start_paused = true)]
    async fn high_traffic_question_sends_critical_pings_and_http_keep_alives() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        server.send_event("next_question", next_question_event(3, "Busy one"));
        assert!(matches!(next_update(&mut harness.events).await, SyncUpdate::Question(_)));

        let ping = server.expect_event("ping_server").await;
        assert_eq!(ping["data"]["critical"], true);
        assert_eq!(ping["data"]["questionNumber"], 3);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let keep_alives = harness.poll.calls().keep_alives;
        assert_eq!(keep_alives.len(), 1);
        assert!(keep_alives[0].critical);
        assert_eq!(keep_alives[0].question_number, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn entering_a_high_traffic_question_brings_the_next_ping_forward() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        let opened = Instant::now();

        tokio::time::sleep(Duration::from_millis(500)).await;
        server.send_event("next_question", next_question_event(3, "Busy one"));

        let ping = server.expect_event("ping_server").await;
        let waited = opened.elapsed();
        assert!(waited >= Duration::from_millis(3_500), "{waited:?}");
        assert!(waited < Duration::from_secs(4), "{waited:?}");
        assert_eq!(ping["data"]["critical"], true);
        assert_eq!(ping["data"]["rateLimited"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn regular_pings_are_not_rate_limited() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        server.send_event("next_question", next_question_event(2, "Quiet one"));

        let ping = server.expect_event("ping_server").await;
        assert_eq!(ping["data"]["critical"], false);
        assert_eq!(ping["data"]["rateLimited"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn high_traffic_tally_is_requested_once_after_vote_updates() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        server.send_event("next_question", next_question_event(3, "Busy one"));
        server.send_event("update_votes", json!({"votes": [1, 0, 0, 0]}));
        server.send_event("update_votes", json!({"votes": [2, 0, 0, 0]}));
        let sent = Instant::now();

        server.expect_event("get_votes").await;
        assert!(sent.elapsed() >= Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let repeats = server
            .drain()
            .into_iter()
            .filter(|frame| frame["event"] == "get_votes")
            .count();
        assert_eq!(repeats, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ordinary_tally_is_not_requested_again() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));
        server.send_event("next_question", next_question_event(2, "Quiet one"));
        server.send_event("update_votes", json!({"votes": [1, 0, 0, 0]}));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let requests = server
            .drain()
            .into_iter()
            .filter(|frame| frame["event"] == "get_votes")
            .count();
        assert_eq!(requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_forwarded_and_retire_is_silent() {
        let mut harness = start(ConnectBehavior::Accept);
        let mut server = harness.servers.recv().await.unwrap();
        assert!(matches!(next_event(&mut harness.events).await, TransportEvent::Opened));

        assert!(harness.adapter.send(PushOutbound::CastVote { option: OptionKey::C }));
        let vote = server.expect_event("cast_vote").await;
        assert_eq!(vote["data"]["option"], "C");

        harness.adapter.retire();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(harness.events.try_recv().is_err());
    }
}
