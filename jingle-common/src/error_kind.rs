//! Machine-readable negotiation error codes
//!
//! These are the only errors a peer ever sees from the dispatch boundary.
//! Each code maps to a generic stanza condition and, where the protocol
//! defines one, a more specific Jingle condition.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes returned in response to an inbound Jingle action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationError {
    /// The session id is not known for this peer
    UnknownSession,

    /// The payload could not be understood or violates the data model
    BadRequest,

    /// The action is part of the protocol but not handled here
    FeatureNotImplemented,

    /// A session-info payload of an unknown kind
    UnsupportedInfo,

    /// Simultaneous contradictory proposals; the peer lost the tie-break
    Conflict,

    /// The action is inconsistent with the current session or content state
    OutOfOrder,
}

impl NegotiationError {
    /// Convert to the string representation used in responses
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown-session",
            Self::BadRequest => "bad-request",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::UnsupportedInfo => "unsupported-info",
            Self::Conflict => "conflict",
            Self::OutOfOrder => "out-of-order",
        }
    }

    /// Parse from string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown-session" => Some(Self::UnknownSession),
            "bad-request" => Some(Self::BadRequest),
            "feature-not-implemented" => Some(Self::FeatureNotImplemented),
            "unsupported-info" => Some(Self::UnsupportedInfo),
            "conflict" => Some(Self::Conflict),
            "out-of-order" => Some(Self::OutOfOrder),
            _ => None,
        }
    }

    /// Generic stanza error condition carried alongside the Jingle condition
    #[must_use]
    pub fn stanza_condition(&self) -> &'static str {
        match self {
            Self::UnknownSession => "item-not-found",
            Self::BadRequest => "bad-request",
            Self::FeatureNotImplemented | Self::UnsupportedInfo => "feature-not-implemented",
            Self::Conflict => "conflict",
            Self::OutOfOrder => "unexpected-request",
        }
    }

    /// Jingle-specific error condition, if the protocol defines one
    #[must_use]
    pub fn jingle_condition(&self) -> Option<&'static str> {
        match self {
            Self::UnknownSession => Some("unknown-session"),
            Self::UnsupportedInfo => Some("unsupported-info"),
            Self::Conflict => Some("tie-break"),
            Self::OutOfOrder => Some("out-of-order"),
            Self::BadRequest | Self::FeatureNotImplemented => None,
        }
    }
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for NegotiationError {}

impl From<NegotiationError> for String {
    fn from(kind: NegotiationError) -> Self {
        kind.as_str().to_string()
    }
}
