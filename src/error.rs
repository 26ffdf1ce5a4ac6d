//! Error types for the transport layer and for PMI itself.
//!
//! A [`TransportError`] means the message-passing layer failed: a socket
//! closed, a peer hung up, a frame arrived truncated. A [`PmiError`] is what
//! the PMI verbs return; its category decides the status code a worker
//! reports back to the controller.

use crate::types::Status;

/// Failures of a [`crate::message::Communicator`].
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The channel or connection to the given rank has been closed.
    #[error("rank {0} is disconnected")]
    Disconnected(usize),

    #[error("rank {0} is outside the communicator")]
    InvalidRank(usize),

    /// A received message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A peer address list or rank could not be parsed.
    #[error("bad address configuration: {0}")]
    Address(String),
}

/// Errors raised by PMI operations.
///
/// `User` and `Internal` follow the two categories a worker can report.
/// `Other` covers everything a callback does that is neither (for example a
/// panic inside a user method).
#[derive(thiserror::Error, Debug)]
pub enum PmiError {
    /// The API was misused: wrong role, unregistered name, workers ended.
    #[error("user error: {0}")]
    User(String),

    /// A protocol invariant was violated between ranks.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("other error: {0}")]
    Other(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PmiError {
    /// The status code a worker reports for this error.
    pub fn status(&self) -> Status {
        match self {
            PmiError::User(_) => Status::UserError,
            PmiError::Internal(_) => Status::InternalError,
            _ => Status::OtherError,
        }
    }

    /// Rebuilds an error from a status code and the message a worker sent
    /// alongside it.
    pub fn from_status(status: Status, what: String) -> Self {
        match status {
            Status::UserError => PmiError::User(what),
            Status::InternalError => PmiError::Internal(what),
            Status::OtherError | Status::Ok => PmiError::Other(what),
        }
    }

    /// The message without its category prefix. This is what a worker sends
    /// to the controller, which restores the category from the status code.
    pub fn message(&self) -> String {
        match self {
            PmiError::User(m) | PmiError::Internal(m) | PmiError::Other(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Rewrites the message of a categorized error, keeping its category.
    pub fn map_message<F: FnOnce(String) -> String>(self, f: F) -> Self {
        match self {
            PmiError::User(m) => PmiError::User(f(m)),
            PmiError::Internal(m) => PmiError::Internal(f(m)),
            PmiError::Other(m) => PmiError::Other(f(m)),
            other => other,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, PmiError::User(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PmiError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, PmiError>;
