//! Poll adapter: periodic requests for state, chat and ranking.
//!
//! Three independent loops share one failure counter. Sustained failures
//! widen the poll interval for a cool-down, flag the adapter as degraded and
//! periodically ask for push to be retried.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinSet,
    time::{Instant, sleep, timeout},
};
use tracing::{debug, warn};
use validator::Validate;

use crate::{
    clock::{Clock, ms_to_secs},
    dto::poll::CurrentQuestionResponse,
    error::TransportError,
    state::{Command, Snapshot},
    transport::{
        AdapterId, AdapterMessage, CommandOutcome, PollClient, PollHealth, SyncContext, SyncUpdate,
        TransportEvent,
    },
};

/// Poll cadence and failure handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub state_interval: Duration,
    pub chat_interval: Duration,
    pub ranking_interval: Duration,
    pub request_timeout: Duration,
    /// Consecutive failures before intervals widen and the adapter degrades.
    pub widen_after_failures: u32,
    /// Consecutive failures before push is retried, and every multiple after.
    pub escalate_after_failures: u32,
    pub widened_interval: Duration,
    pub cooldown: Duration,
    /// Consecutive failures past which ranking polls are skipped.
    pub ranking_skip_after_failures: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            state_interval: Duration::from_secs(3),
            chat_interval: Duration::from_secs(5),
            ranking_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            widen_after_failures: 6,
            escalate_after_failures: 7,
            widened_interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(10),
            ranking_skip_after_failures: 3,
        }
    }
}

/// Result of recording a failed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureVerdict {
    /// The adapter just became degraded.
    pub degraded: bool,
    /// Push should be retried now.
    pub escalate: bool,
}

/// Consecutive-failure bookkeeping shared by the poll loops.
#[derive(Debug, Clone)]
pub struct PollHealthTracker {
    settings: PollSettings,
    consecutive_failures: u32,
    widened_until: Option<Instant>,
    degraded: bool,
}

impl PollHealthTracker {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            consecutive_failures: 0,
            widened_until: None,
            degraded: false,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Record a successful request; `true` if this ends a degraded spell.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.degraded;
        self.consecutive_failures = 0;
        self.widened_until = None;
        self.degraded = false;
        recovered
    }

    pub fn record_failure(&mut self, now: Instant) -> FailureVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failures = self.consecutive_failures;
        let mut verdict = FailureVerdict::default();

        if failures >= self.settings.widen_after_failures {
            if self.widened_until.is_none_or(|until| now >= until) {
                self.widened_until = Some(now + self.settings.cooldown);
            }
            if !self.degraded {
                self.degraded = true;
                verdict.degraded = true;
            }
        }

        let escalate_after = self.settings.escalate_after_failures.max(1);
        verdict.escalate =
            failures >= escalate_after && (failures - escalate_after) % escalate_after == 0;
        verdict
    }

    /// Interval to wait before the next poll of a loop whose cadence is `base`.
    pub fn interval(&self, base: Duration, now: Instant) -> Duration {
        match self.widened_until {
            Some(until) if now < until => base.max(self.settings.widened_interval),
            _ => base,
        }
    }

    pub fn should_poll_ranking(&self) -> bool {
        self.consecutive_failures < self.settings.ranking_skip_after_failures
    }
}

/// Everything a poll adapter needs besides its client and settings.
#[derive(Clone)]
pub struct PollEnvironment {
    pub context: watch::Receiver<SyncContext>,
    pub clock: Arc<dyn Clock>,
    pub events: mpsc::UnboundedSender<AdapterMessage>,
}

/// Handle to the running poll loops. Dropping it stops them.
#[derive(Debug)]
pub struct PollAdapter {
    id: AdapterId,
    tasks: JoinSet<()>,
}

impl PollAdapter {
    pub fn spawn(
        id: AdapterId,
        client: Arc<dyn PollClient>,
        settings: PollSettings,
        env: PollEnvironment,
    ) -> Self {
        let shared = Arc::new(PollShared {
            id,
            client,
            health: Mutex::new(PollHealthTracker::new(settings.clone())),
            settings,
            env,
        });
        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&shared).state_loop());
        tasks.spawn(Arc::clone(&shared).chat_loop());
        tasks.spawn(shared.ranking_loop());
        debug!(adapter = %id, "poll adapter started");
        Self { id, tasks }
    }

    pub fn id(&self) -> AdapterId {
        self.id
    }

    /// Stop polling. Responses already reported stay queued for the session.
    pub fn shutdown(mut self) {
        debug!(adapter = %self.id, "poll adapter stopped");
        self.tasks.abort_all();
    }
}

struct PollShared {
    id: AdapterId,
    client: Arc<dyn PollClient>,
    settings: PollSettings,
    env: PollEnvironment,
    health: Mutex<PollHealthTracker>,
}

impl PollShared {
    async fn state_loop(self: Arc<Self>) {
        loop {
            self.poll_state().await;
            self.pause(self.settings.state_interval).await;
        }
    }

    async fn chat_loop(self: Arc<Self>) {
        loop {
            self.poll_chat().await;
            self.pause(self.settings.chat_interval).await;
        }
    }

    async fn ranking_loop(self: Arc<Self>) {
        loop {
            if self.health.lock().await.should_poll_ranking() {
                self.poll_ranking().await;
            } else {
                debug!(adapter = %self.id, "skipping ranking poll while requests fail");
            }
            self.pause(self.settings.ranking_interval).await;
        }
    }

    async fn pause(&self, base: Duration) {
        let delay = self.health.lock().await.interval(base, Instant::now());
        sleep(delay).await;
    }

    /// One status, question and tally cycle, all stamped at issue time.
    async fn poll_state(&self) {
        let issued = *self.env.context.borrow();
        let issued_at_ms = self.env.clock.now_ms();

        let Some(status) = self.request("status", self.client.status()).await else {
            return;
        };
        self.emit_update(SyncUpdate::QuizStatus {
            running: status.quiz_running,
            observed_at_ms: issued_at_ms,
        });
        if !status.quiz_running {
            return;
        }

        let Some(current) = self.request("current question", self.client.current_question()).await
        else {
            return;
        };
        let mut question_index = issued.question_index;
        if let Some(current) = current {
            match question_snapshot(current, issued_at_ms) {
                Some(snapshot) => {
                    question_index = snapshot.question_index;
                    self.emit_update(SyncUpdate::Question(snapshot));
                }
                None => warn!(adapter = %self.id, "dropping malformed question"),
            }
        }

        if let Some(Some(tally)) = self.request("votes", self.client.votes()).await {
            match tally.votes.to_counts() {
                Ok(votes) => self.emit_update(SyncUpdate::Votes {
                    question_index: tally.question_num.unwrap_or(question_index),
                    votes,
                    observed_at_ms: issued_at_ms,
                }),
                Err(err) => warn!(adapter = %self.id, error = %err, "dropping vote tally"),
            }
        }
    }

    async fn poll_chat(&self) {
        let since_ms = self.env.context.borrow().chat_since_ms;
        let received_at_ms = self.env.clock.now_ms();
        let Some(chat) = self
            .request("chat", self.client.chat_since(ms_to_secs(since_ms)))
            .await
        else {
            return;
        };
        let messages: Vec<_> = chat
            .messages
            .into_iter()
            .filter_map(|message| match message.validate() {
                Ok(()) => Some(message.into_message(received_at_ms)),
                Err(err) => {
                    warn!(adapter = %self.id, error = %err, "dropping chat line");
                    None
                }
            })
            .collect();
        if !messages.is_empty() {
            self.emit_update(SyncUpdate::Chat(messages));
        }
    }

    async fn poll_ranking(&self) {
        if let Some(response) = self.request("ranking", self.client.ranking()).await {
            if let Some(ranking) = response.ranking {
                self.emit_update(SyncUpdate::Ranking(ranking.into_entries()));
            }
        }
    }

    /// Run one request under the timeout and account for the outcome.
    async fn request<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Option<T> {
        let outcome = match timeout(self.settings.request_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout { operation }),
        };
        match outcome {
            Ok(value) => {
                if self.health.lock().await.record_success() {
                    debug!(adapter = %self.id, "poll requests succeeding again");
                    self.emit(TransportEvent::PollHealth(PollHealth::Recovered));
                }
                Some(value)
            }
            Err(err) => {
                let (verdict, failures) = {
                    let mut health = self.health.lock().await;
                    let verdict = health.record_failure(Instant::now());
                    (verdict, health.consecutive_failures())
                };
                warn!(adapter = %self.id, operation, failures, error = %err, "poll request failed");
                if verdict.degraded {
                    self.emit(TransportEvent::PollHealth(PollHealth::Degraded));
                }
                if verdict.escalate {
                    self.emit(TransportEvent::PushRetryRequested);
                }
                None
            }
        }
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

fn question_snapshot(current: CurrentQuestionResponse, observed_at_ms: i64) -> Option<Snapshot> {
    if current.validate().is_err() {
        return None;
    }
    let options = current.question.options.to_options().ok()?;
    let mut snapshot = Snapshot::open(
        current.question_num,
        current.total_questions,
        current.question.question,
        options,
        observed_at_ms,
    );
    snapshot.answer_time_secs = current.remaining_time;
    Some(snapshot)
}

/// Send `command` over the poll path and report the server's answer.
///
/// Transport failures are only logged; the user sees nothing for them.
pub fn dispatch_command(
    client: Arc<dyn PollClient>,
    command: Command,
    request_timeout: Duration,
    source: AdapterId,
    events: mpsc::UnboundedSender<AdapterMessage>,
) {
    tokio::spawn(async move {
        let response = match timeout(request_timeout, client.send_command(command)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(%command, error = %err, "command request failed");
                return;
            }
            Err(_) => {
                warn!(%command, "command request timed out");
                return;
            }
        };
        let outcome = CommandOutcome {
            command: Some(command),
            accepted: response.success,
            message: response.message,
        };
        let _ = events.send(AdapterMessage {
            source,
            event: TransportEvent::CommandOutcome(outcome),
        });
    });
}
