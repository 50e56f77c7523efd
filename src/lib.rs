//! Live quiz state synchronisation client.
//!
//! Keeps a local view of a quiz server's current question, tally, chat and
//! leaderboard over a push channel, falling back to HTTP polling when push is
//! unavailable.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
pub mod transport;

pub use crate::config::SyncConfig;
pub use crate::error::{SessionError, TransportError};
pub use crate::services::hub::{Notice, SessionUpdate};
pub use crate::services::selector::Transports;
pub use crate::services::session::{SessionController, SessionHandle, SessionView};
pub use crate::state::{Command, ConnectionState, Snapshot};
