//! Outbound message seam
//!
//! The engine never talks to the IM connection directly. Messages produced
//! by state transitions are queued and handed, in order, to a
//! [`MessageSender`] by a single writer task per registry.

use async_trait::async_trait;
use jingle_common::protocol::{Jid, JingleMessage, JingleResponse};

use crate::error::JingleError;
use crate::session::SessionKey;

/// Delivers Jingle requests to a peer and returns its response
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, to: &Jid, message: JingleMessage) -> Result<JingleResponse, JingleError>;
}

/// What the writer does when a request fails or is answered with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailurePolicy {
    /// End the session locally without notifying the peer
    TerminateOnFailure(SessionKey),
    LogOnly,
}

/// A queued request
#[derive(Debug)]
pub(crate) struct Outbound {
    pub message: JingleMessage,
    pub policy: FailurePolicy,
}
