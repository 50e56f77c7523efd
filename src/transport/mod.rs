//! Push and poll transports and the events they feed into the session.
//!
//! Adapters never touch session state. They report lifecycle changes and
//! candidate updates as [`AdapterMessage`]s, which the session applies one at a
//! time.

pub mod heartbeat;
#[cfg(feature = "http-poll")]
pub mod http;
pub mod poll;
pub mod push;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(feature = "ws-push")]
pub mod ws;

use std::fmt;

use futures::future::BoxFuture;

use crate::{
    dto::poll::{
        ChatResponse, CommandResponse, CurrentQuestionResponse, KeepAliveRequest, RankingResponse,
        StatusResponse, VotesResponse,
    },
    error::TransportError,
    state::{
        ChatMessage, Command, DisconnectCause, LeaderboardEntry, OptionKey, Snapshot, VoteCounts,
    },
};

/// Identifies one adapter instance.
///
/// A probe keeps its id when promoted, so lifecycle signals from retired
/// adapters can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(u64);

impl AdapterId {
    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter#{}", self.0)
    }
}

/// Event emitted by an adapter, tagged with its source.
#[derive(Debug, Clone)]
pub struct AdapterMessage {
    pub source: AdapterId,
    pub event: TransportEvent,
}

/// What an adapter can report.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Push channel open.
    Opened,
    /// Push channel ended.
    Closed(DisconnectCause),
    /// Candidate data for reconciliation.
    Update(SyncUpdate),
    /// Poll adapter health crossed a threshold.
    PollHealth(PollHealth),
    /// Poll adapter wants push retried now.
    PushRetryRequested,
    /// Server answer to a user command.
    CommandOutcome(CommandOutcome),
}

/// Poll adapter health transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollHealth {
    Degraded,
    Recovered,
}

/// Candidate data observed on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    QuizStatus {
        running: bool,
        observed_at_ms: i64,
    },
    /// A complete question snapshot.
    Question(Snapshot),
    /// Tally for the question it was observed for.
    Votes {
        question_index: u32,
        votes: VoteCounts,
        observed_at_ms: i64,
    },
    VotingClosed {
        question_index: Option<u32>,
        observed_at_ms: i64,
    },
    Results {
        question_index: Option<u32>,
        correct: OptionKey,
        explanation: Option<String>,
        votes: Option<VoteCounts>,
        observed_at_ms: i64,
    },
    Chat(Vec<ChatMessage>),
    Ranking(Vec<LeaderboardEntry>),
    /// Seconds left to answer.
    Countdown {
        remaining_secs: u32,
    },
    ServerError {
        message: String,
    },
}

/// Server answer to a command.
///
/// `command` is `None` when the answer could not be tied to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: Option<Command>,
    pub accepted: bool,
    pub message: Option<String>,
}

/// Session facts adapters read to shape their requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncContext {
    /// Question currently held by the store, 0 before the first one.
    pub question_index: u32,
    /// Emission time of the newest chat line seen.
    pub chat_since_ms: i64,
    pub quiz_running: bool,
}

/// Opens push channels.
pub trait PushConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushLink>, TransportError>>;
}

/// An open push channel carrying JSON text frames.
pub trait PushLink: Send {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;
    /// Next text frame; `Ok(None)` once the server closed the channel.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>>;
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Request/response access to the poll endpoints.
pub trait PollClient: Send + Sync {
    fn status(&self) -> BoxFuture<'static, Result<StatusResponse, TransportError>>;
    /// `None` when no question is active.
    fn current_question(
        &self,
    ) -> BoxFuture<'static, Result<Option<CurrentQuestionResponse>, TransportError>>;
    /// `None` when the quiz is not running.
    fn votes(&self) -> BoxFuture<'static, Result<Option<VotesResponse>, TransportError>>;
    /// Chat lines emitted strictly after `since_secs`.
    fn chat_since(
        &self,
        since_secs: f64,
    ) -> BoxFuture<'static, Result<ChatResponse, TransportError>>;
    fn ranking(&self) -> BoxFuture<'static, Result<RankingResponse, TransportError>>;
    fn send_command(
        &self,
        command: Command,
    ) -> BoxFuture<'static, Result<CommandResponse, TransportError>>;
    fn keep_alive(
        &self,
        request: KeepAliveRequest,
    ) -> BoxFuture<'static, Result<(), TransportError>>;
}
