//! Error types surfaced to callers of the engine
//!
//! Protocol errors never leave the dispatch boundary as `Err`; they become a
//! [`JingleResponse`](jingle_common::protocol::JingleResponse). The types
//! here cover local precondition violations, transport failures and the
//! terminal outcome of a transfer.

use std::io;
use std::path::PathBuf;

use jingle_common::NegotiationError;
use jingle_common::protocol::{Jid, Reason, SessionId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::content::ContentState;

/// Error returned by public engine entry points
#[derive(Debug, Error)]
pub enum JingleError {
    #[error("{peer} does not support {namespace}")]
    FeatureNotSupported { peer: Jid, namespace: String },

    #[error("file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("no transport in common with {0}")]
    NoCommonTransport(Jid),

    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferFailure),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session is terminated")]
    SessionTerminated,

    #[error("session is not active")]
    SessionNotActive,

    #[error("unknown content {0}")]
    UnknownContent(String),

    #[error("no local security layer for {0}")]
    UnsupportedSecurity(String),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("invalid file description: {0}")]
    InvalidDescription(String),

    #[error("peer answered with {0}")]
    Remote(NegotiationError),

    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to obtain or use a byte channel
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport establishment timed out")]
    Timeout,

    #[error("peer rejected the transport: {0}")]
    Rejected(String),

    #[error("transport establishment cancelled")]
    Cancelled,

    #[error("incompatible transport parameters: {0}")]
    Incompatible(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A content transition that the current state does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("session is terminated")]
    SessionTerminated,

    #[error("content is not accepted")]
    NotAccepted,

    #[error("cannot {operation} a content that is {state}")]
    InvalidTransition {
        state: ContentState,
        operation: &'static str,
    },
}

/// Why a transfer ended without success
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("channel closed after {received} of {expected} bytes")]
    ShortRead { expected: u64, received: u64 },

    #[error("moved {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("file size is unknown")]
    MissingSize,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("session terminated: {0}")]
    SessionTerminated(Reason),
}

impl TransferFailure {
    /// Reason code to send when this failure ends the session
    #[must_use]
    pub fn reason(&self) -> Reason {
        match self {
            Self::Io(_) => Reason::FailedApplication,
            Self::ShortRead { .. } => Reason::ConnectivityError,
            Self::SizeMismatch { .. } | Self::DigestMismatch | Self::MissingSize => {
                Reason::MediaError
            }
            Self::Cancelled => Reason::Cancel,
            Self::SessionTerminated(reason) => *reason,
        }
    }
}

impl From<io::Error> for TransferFailure {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
