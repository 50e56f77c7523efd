//! Fan-out of accepted changes to subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::{
    ChatMessage, Command, ConnectionState, LeaderboardEntry, OptionKey, QuestionPhase, Snapshot,
    VoteCounts,
};

/// A visible change, published once per accepted update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// A new question replaced the previous one.
    QuestionChanged { snapshot: Snapshot },
    VotesChanged {
        question_index: u32,
        votes: VoteCounts,
    },
    /// Lifecycle step, with the tally as it stood at that step.
    PhaseChanged {
        question_index: u32,
        phase: QuestionPhase,
        correct_option: Option<OptionKey>,
        votes: VoteCounts,
    },
    /// Countdown tick from the server; not persisted.
    Countdown { remaining_secs: u32 },
    ChatMessage { message: ChatMessage },
    LeaderboardChanged { entries: Vec<LeaderboardEntry> },
    ConnectionChanged { state: ConnectionState },
    QuizStatusChanged { running: bool },
    Notice { notice: Notice },
}

/// User-facing notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Live updates switched to polling.
    FallbackActivated,
    /// Live updates are back on the push channel.
    TransportRestored,
    /// The server refused a command.
    CommandRejected {
        command: Option<Command>,
        message: Option<String>,
    },
    ServerError { message: String },
}

/// Broadcast hub carrying [`SessionUpdate`]s.
#[derive(Debug, Clone)]
pub struct UpdateHub {
    sender: broadcast::Sender<SessionUpdate>,
}

impl UpdateHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a subscriber for subsequent updates.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.sender.subscribe()
    }

    /// Send to all current subscribers, ignoring the case where there are none.
    pub fn publish(&self, update: SessionUpdate) {
        let _ = self.sender.send(update);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
