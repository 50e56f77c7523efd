use std::error::Error;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Boxed source error carried by transport failures.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors raised by the push and poll transports.
///
/// None of these is fatal to a session; they only drive connection-state
/// transitions or get logged.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured endpoint cannot be used.
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: &'static str },
    /// Opening the push channel failed.
    #[error("failed to connect to `{url}`")]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },
    /// An operation did not complete in time.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    /// The open push channel failed.
    #[error("push link failed")]
    Link(#[source] BoxError),
    /// The push channel is already closed.
    #[error("push link closed")]
    Closed,
    /// A poll request could not be sent.
    #[error("request to `{path}` failed")]
    Request {
        path: String,
        #[source]
        source: BoxError,
    },
    /// A poll endpoint answered with an unexpected status.
    #[error("unexpected response status {status} for `{path}`")]
    Status { path: String, status: u16 },
    /// A poll response body could not be decoded.
    #[error("failed to decode response for `{path}`")]
    Decode {
        path: String,
        #[source]
        source: BoxError,
    },
}

impl TransportError {
    /// Construct a link failure from any backend error.
    pub fn link(source: impl Error + Send + Sync + 'static) -> Self {
        TransportError::Link(Box::new(source))
    }
}

/// Errors returned by the session handle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session task has stopped.
    #[error("session is closed")]
    Closed,
}

impl<T> From<SendError<T>> for SessionError {
    fn from(_: SendError<T>) -> Self {
        SessionError::Closed
    }
}
