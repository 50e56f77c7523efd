//! Pure session state: the snapshot model, reconciliation, and the connection state machine.

pub mod chat;
pub mod command;
pub mod connection;
pub mod leaderboard;
pub mod reconcile;
pub mod snapshot;
pub mod store;

pub use self::command::Command;
pub use self::connection::{
    ConnectionAction, ConnectionEvent, ConnectionPolicy, ConnectionState, ConnectionStateMachine,
    DisconnectCause, InvalidTransition, TransportNotice,
};
pub use self::reconcile::{ApplyOutcome, Changes, PhaseEvent, ReconciliationEngine, StaleReason};
pub use self::snapshot::{
    ChatMessage, LeaderboardEntry, OptionKey, QuestionPhase, Snapshot, VoteCounts,
};
