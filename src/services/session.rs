//! Session controller: the single writer of session state.
//!
//! One task owns the reconciliation engine, the chat log, the leaderboard and
//! the transport selector. Adapter messages, timer expiries and caller
//! requests are applied strictly one at a time, in arrival order.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::SyncConfig,
    dao::SnapshotStore,
    error::SessionError,
    services::{
        hub::{Notice, SessionUpdate, UpdateHub},
        persistence::{PersistWriter, restore},
        selector::{SelectorInbox, SelectorOutput, SelectorSettings, TransportSelector, Transports},
    },
    state::{
        ApplyOutcome, ChatMessage, Command, ConnectionState, LeaderboardEntry, PhaseEvent,
        ReconciliationEngine, Snapshot, TransportNotice, chat::ChatLog, leaderboard::Leaderboard,
    },
    transport::{CommandOutcome, SyncContext, SyncUpdate},
};

/// Everything a viewer needs to redraw from scratch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    pub snapshot: Option<Snapshot>,
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Oldest first.
    pub chat: Vec<ChatMessage>,
    /// `None` until the server reported it.
    pub quiz_running: Option<bool>,
}

/// Builds and starts a sync session.
pub struct SessionController {
    config: SyncConfig,
    transports: Transports,
    persistence: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl SessionController {
    pub fn new(
        config: SyncConfig,
        transports: Transports,
        persistence: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            config,
            transports,
            persistence,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replace the wall clock used to stamp updates and judge freshness.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Restore persisted state, then start synchronising in the background.
    pub async fn start(self) -> SessionHandle {
        let Self {
            config,
            transports,
            persistence,
            clock,
        } = self;

        let mut engine = ReconciliationEngine::new();
        if let Some(snapshot) = restore(
            persistence.as_ref(),
            clock.now_ms(),
            config.session.freshness_window,
        )
        .await
        {
            engine.apply(snapshot);
        }

        let context = SyncContext {
            question_index: engine.store().question_index().unwrap_or(0),
            ..SyncContext::default()
        };
        let (context_tx, context_rx) = watch::channel(context);
        let (selector, inbox) = TransportSelector::new(
            SelectorSettings::from_config(&config),
            transports,
            context_rx,
            Arc::clone(&clock),
        );

        let hub = UpdateHub::new(config.session.update_capacity);
        let (view, view_rx) = watch::channel(SessionView {
            snapshot: engine.current().cloned(),
            ..SessionView::default()
        });
        let connection = selector.watch_state();
        let (control, control_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            engine,
            clock,
            freshness_window: config.session.freshness_window,
            persistence: Arc::clone(&persistence),
            chat: ChatLog::new(config.session.chat_history),
            leaderboard: Leaderboard::new(config.session.leaderboard_size),
            quiz_running: None,
            selector,
            hub: hub.clone(),
            view,
            context: context_tx,
            writer: Some(PersistWriter::spawn(persistence)),
        };
        let task = tokio::spawn(actor.run(inbox, control_rx));
        info!("sync session started");

        SessionHandle {
            control,
            hub,
            connection,
            view: view_rx,
            task: Arc::new(task),
        }
    }
}

enum Control {
    Command(Command),
    RetryPush,
    Reactivate,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    control: mpsc::UnboundedSender<Control>,
    hub: UpdateHub,
    connection: watch::Receiver<ConnectionState>,
    view: watch::Receiver<SessionView>,
    task: Arc<JoinHandle<()>>,
}

impl SessionHandle {
    /// Receive every update published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.hub.subscribe()
    }

    /// Updates as a stream; lagging subscribers see a `Lagged` error item.
    pub fn updates(&self) -> BroadcastStream<SessionUpdate> {
        BroadcastStream::new(self.hub.subscribe())
    }

    /// Call `listener` for every update until the session and all its handles are gone.
    pub fn subscribe_with<F>(&self, mut listener: F) -> JoinHandle<()>
    where
        F: FnMut(SessionUpdate) + Send + 'static,
    {
        let mut updates = self.hub.subscribe();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => listener(update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagging; updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Send a command over whichever transport is live.
    pub fn issue_command(&self, command: Command) -> Result<(), SessionError> {
        self.control.send(Control::Command(command))?;
        Ok(())
    }

    /// Ask for an immediate push attempt, e.g. when the viewer becomes visible again.
    pub fn retry_push(&self) -> Result<(), SessionError> {
        self.control.send(Control::RetryPush)?;
        Ok(())
    }

    /// Resume after the viewer was backgrounded or reloaded.
    ///
    /// The persisted record is offered to reconciliation again, so newer
    /// in-memory state wins, and push is retried unless it is already live.
    pub fn reactivate(&self) -> Result<(), SessionError> {
        self.control.send(Control::Reactivate)?;
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn current_snapshot(&self) -> Option<Snapshot> {
        self.view.borrow().snapshot.clone()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop all transports and flush pending persistence.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (ack, done) = oneshot::channel();
        self.control.send(Control::Shutdown(ack))?;
        done.await.map_err(|_| SessionError::Closed)
    }
}

struct SessionActor {
    engine: ReconciliationEngine,
    clock: Arc<dyn Clock>,
    freshness_window: Duration,
    persistence: Arc<dyn SnapshotStore>,
    chat: ChatLog,
    leaderboard: Leaderboard,
    quiz_running: Option<bool>,
    selector: TransportSelector,
    hub: UpdateHub,
    view: watch::Sender<SessionView>,
    context: watch::Sender<SyncContext>,
    writer: Option<PersistWriter>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut inbox: SelectorInbox,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        let outputs = self.selector.start();
        self.handle_outputs(outputs);

        let ack = loop {
            tokio::select! {
                Some(message) = inbox.adapters.recv() => {
                    let outputs = self.selector.on_adapter(message);
                    self.handle_outputs(outputs);
                }
                Some(fired) = inbox.timers.recv() => {
                    let outputs = self.selector.on_timer(fired);
                    self.handle_outputs(outputs);
                }
                request = control.recv() => match request {
                    Some(Control::Command(command)) => self.selector.dispatch(command),
                    Some(Control::RetryPush) => {
                        let outputs = self.selector.request_push_retry();
                        self.handle_outputs(outputs);
                    }
                    Some(Control::Reactivate) => self.reactivate().await,
                    Some(Control::Shutdown(ack)) => break Some(ack),
                    None => break None,
                },
            }
        };

        let outputs = self.selector.stop();
        self.handle_outputs(outputs);
        if let Some(writer) = self.writer.take() {
            writer.finish().await;
        }
        info!("sync session stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    async fn reactivate(&mut self) {
        let now_ms = self.clock.now_ms();
        if let Some(snapshot) =
            restore(self.persistence.as_ref(), now_ms, self.freshness_window).await
        {
            let outcome = self.engine.apply(snapshot);
            self.after_apply(outcome);
        }
        if self.selector.state() != ConnectionState::PushLive {
            let outputs = self.selector.request_push_retry();
            self.handle_outputs(outputs);
        }
    }

    fn handle_outputs(&mut self, outputs: Vec<SelectorOutput>) {
        for output in outputs {
            match output {
                SelectorOutput::Update(update) => self.apply(update),
                SelectorOutput::CommandOutcome(outcome) => self.command_outcome(outcome),
                SelectorOutput::Notice(notice) => {
                    let notice = match notice {
                        TransportNotice::FallbackActivated => Notice::FallbackActivated,
                        TransportNotice::TransportRestored => Notice::TransportRestored,
                    };
                    self.publish(SessionUpdate::Notice { notice });
                }
                SelectorOutput::StateChanged(state) => {
                    self.publish(SessionUpdate::ConnectionChanged { state });
                }
            }
        }
    }

    fn apply(&mut self, update: SyncUpdate) {
        match update {
            SyncUpdate::QuizStatus {
                running,
                observed_at_ms,
            } => self.quiz_status(running, observed_at_ms),
            SyncUpdate::Question(snapshot) => {
                let outcome = self.engine.apply(snapshot);
                self.after_apply(outcome);
            }
            SyncUpdate::Votes {
                question_index,
                votes,
                observed_at_ms,
            } => {
                let outcome = self.engine.apply_votes(question_index, votes, observed_at_ms);
                self.after_apply(outcome);
            }
            SyncUpdate::VotingClosed {
                question_index,
                observed_at_ms,
            } => self.advance(PhaseEvent::VotingClosed, question_index, observed_at_ms),
            SyncUpdate::Results {
                question_index,
                correct,
                explanation,
                votes,
                observed_at_ms,
            } => self.advance(
                PhaseEvent::ResultsRevealed {
                    correct,
                    explanation,
                    votes,
                },
                question_index,
                observed_at_ms,
            ),
            SyncUpdate::Chat(messages) => self.chat(messages),
            SyncUpdate::Ranking(entries) => {
                if self.leaderboard.replace(entries) {
                    let entries = self.leaderboard.entries().to_vec();
                    self.view
                        .send_modify(|view| view.leaderboard.clone_from(&entries));
                    self.publish(SessionUpdate::LeaderboardChanged { entries });
                }
            }
            SyncUpdate::Countdown { remaining_secs } => {
                self.publish(SessionUpdate::Countdown { remaining_secs });
            }
            SyncUpdate::ServerError { message } => {
                warn!(%message, "server reported an error");
                self.publish(SessionUpdate::Notice {
                    notice: Notice::ServerError { message },
                });
            }
        }
    }

    fn advance(&mut self, event: PhaseEvent, question_index: Option<u32>, observed_at_ms: i64) {
        match self.engine.advance(event, question_index, observed_at_ms) {
            Ok(outcome) => self.after_apply(outcome),
            Err(err) => debug!(error = %err, "phase step ignored"),
        }
    }

    fn after_apply(&mut self, outcome: ApplyOutcome) {
        let changes = match outcome {
            ApplyOutcome::Applied(changes) => changes,
            ApplyOutcome::Duplicate => {
                trace!("duplicate update");
                return;
            }
            ApplyOutcome::Stale(reason) => {
                debug!(?reason, "stale update discarded");
                return;
            }
        };
        let Some(snapshot) = self.engine.current().cloned() else {
            return;
        };

        if let Some(writer) = &self.writer {
            writer.save(&snapshot);
        }
        self.context.send_if_modified(|context| {
            set_if_changed(&mut context.question_index, snapshot.question_index)
        });
        self.view
            .send_modify(|view| view.snapshot = Some(snapshot.clone()));

        let update = if changes.question {
            info!(question = snapshot.question_index, "question changed");
            SessionUpdate::QuestionChanged { snapshot }
        } else if changes.phase {
            info!(
                question = snapshot.question_index,
                phase = ?snapshot.phase,
                "question phase changed"
            );
            SessionUpdate::PhaseChanged {
                question_index: snapshot.question_index,
                phase: snapshot.phase,
                correct_option: snapshot.correct_option,
                votes: snapshot.vote_counts,
            }
        } else if changes.votes {
            SessionUpdate::VotesChanged {
                question_index: snapshot.question_index,
                votes: snapshot.vote_counts,
            }
        } else {
            trace!(question = snapshot.question_index, "snapshot refreshed");
            return;
        };
        self.publish(update);
    }

    fn quiz_status(&mut self, running: bool, observed_at_ms: i64) {
        if !running {
            if let Some(ended) = self.engine.end_run(observed_at_ms) {
                info!(question = ended.question_index, "quiz stopped; dropping held question");
                if let Some(writer) = &self.writer {
                    writer.clear();
                }
                self.context
                    .send_if_modified(|context| set_if_changed(&mut context.question_index, 0));
                self.view.send_modify(|view| view.snapshot = None);
            }
        }
        if self.quiz_running != Some(running) {
            self.quiz_running = Some(running);
            self.context
                .send_if_modified(|context| set_if_changed(&mut context.quiz_running, running));
            self.view
                .send_modify(|view| view.quiz_running = Some(running));
            self.publish(SessionUpdate::QuizStatusChanged { running });
        }
    }

    fn chat(&mut self, messages: Vec<ChatMessage>) {
        let mut accepted = Vec::new();
        for message in messages {
            if self.chat.insert(message.clone()) {
                accepted.push(message);
            }
        }
        if accepted.is_empty() {
            return;
        }
        if let Some(newest) = self.chat.newest_ms() {
            self.context
                .send_if_modified(|context| set_if_changed(&mut context.chat_since_ms, newest));
        }
        let history: Vec<_> = self.chat.iter().cloned().collect();
        self.view.send_modify(|view| view.chat = history);
        for message in accepted {
            self.publish(SessionUpdate::ChatMessage { message });
        }
    }

    fn command_outcome(&mut self, outcome: CommandOutcome) {
        if outcome.accepted {
            debug!(command = ?outcome.command, "command accepted");
            return;
        }
        warn!(command = ?outcome.command, message = ?outcome.message, "command rejected");
        self.publish(SessionUpdate::Notice {
            notice: Notice::CommandRejected {
                command: outcome.command,
                message: outcome.message,
            },
        });
    }

    fn publish(&self, update: SessionUpdate) {
        trace!(?update, "publishing update");
        self.hub.publish(update);
    }
}

/// Assign `value`, reporting whether it differed.
fn set_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
