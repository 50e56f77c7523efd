/// Fan-out of session updates to subscribers.
pub mod hub;
/// Restore and write-behind of the reconciled snapshot.
pub mod persistence;
/// Transport selection driven by the connection state machine.
pub mod selector;
/// The session task and its public handle.
pub mod session;
