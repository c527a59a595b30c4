//! Abstract Jingle message structures
//!
//! These types are what the session engine consumes and produces. Turning
//! them into markup (and back) is the job of the serialization layer, which
//! only needs serde to round-trip them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::hash::{HashAlgorithm, decode_base64, encode_base64};
use crate::validators::{self, JidError, SessionIdError};
use crate::{NS_FILE_TRANSFER, NegotiationError};

// =============================================================================
// Identifiers
// =============================================================================

/// A full address (`local@domain/resource`) of a session endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid(String);

impl Jid {
    /// Parse and validate a full JID
    pub fn parse(s: &str) -> Result<Self, JidError> {
        validators::validate_full_jid(s)?;
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without its resource
    #[must_use]
    pub fn bare(&self) -> &str {
        self.0
            .split_once('/')
            .map_or(self.0.as_str(), |(bare, _)| bare)
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, resource)| resource)
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validators::validate_full_jid(&value)?;
        Ok(Self(value))
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identifier chosen by the initiator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, SessionIdError> {
        validators::validate_session_id(s)?;
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validators::validate_session_id(&value)?;
        Ok(Self(value))
    }
}

impl From<SessionId> for String {
    fn from(sid: SessionId) -> Self {
        sid.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Roles and actions
// =============================================================================

/// Which side of a session a party is on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, AsRefStr,
    Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// The party that proposed a content
pub type Creator = Role;

/// Who may send data over a content
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Senders {
    Initiator,
    Responder,
    #[default]
    Both,
    None,
}

impl Senders {
    /// Senders value that lets exactly `role` send
    #[must_use]
    pub fn only(role: Role) -> Self {
        match role {
            Role::Initiator => Self::Initiator,
            Role::Responder => Self::Responder,
        }
    }

    /// Whether `role` may send data
    #[must_use]
    pub fn includes(self, role: Role) -> bool {
        matches!(
            (self, role),
            (Self::Both, _)
                | (Self::Initiator, Role::Initiator)
                | (Self::Responder, Role::Responder)
        )
    }
}

/// The Jingle action vocabulary
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JingleAction {
    ContentAccept,
    ContentAdd,
    ContentModify,
    ContentReject,
    ContentRemove,
    DescriptionInfo,
    SecurityInfo,
    SessionAccept,
    SessionInfo,
    SessionInitiate,
    SessionTerminate,
    TransportAccept,
    TransportInfo,
    TransportReject,
    TransportReplace,
}

impl JingleAction {
    /// Actions whose payload must name at least one content
    #[must_use]
    pub fn requires_content(self) -> bool {
        matches!(
            self,
            Self::ContentAccept
                | Self::ContentAdd
                | Self::ContentModify
                | Self::ContentReject
                | Self::ContentRemove
                | Self::SessionAccept
                | Self::SessionInitiate
                | Self::TransportAccept
                | Self::TransportReject
                | Self::TransportReplace
        )
    }
}

/// Reason codes carried by session-terminate and content removal
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Reason {
    AlternativeSession,
    Busy,
    Cancel,
    ConnectivityError,
    Decline,
    Expired,
    FailedApplication,
    FailedTransport,
    GeneralError,
    Gone,
    IncompatibleParameters,
    MediaError,
    SecurityError,
    Success,
    Timeout,
    UnsupportedApplications,
    UnsupportedTransports,
}

/// A reason code plus optional human-readable text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonElement {
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ReasonElement {
    #[must_use]
    pub fn new(reason: Reason) -> Self {
        Self { reason, text: None }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl From<Reason> for ReasonElement {
    fn from(reason: Reason) -> Self {
        Self::new(reason)
    }
}

// =============================================================================
// File description
// =============================================================================

/// A digest value tagged with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashElement {
    pub algorithm: HashAlgorithm,
    #[serde(with = "base64_value")]
    pub value: Vec<u8>,
}

impl HashElement {
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }
}

mod base64_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Byte range of a partial transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default)]
    pub offset: u64,
    /// Number of bytes; `None` means "to the end of the file"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Digest over the ranged bytes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashElement>,
}

impl Range {
    /// Resolve to `(offset, length)` within a file of `size` bytes
    ///
    /// Returns `None` if the range does not fit inside the file.
    #[must_use]
    pub fn window(&self, size: u64) -> Option<(u64, u64)> {
        let available = size.checked_sub(self.offset)?;
        let length = self.length.unwrap_or(available);
        (length <= available).then_some((self.offset, length))
    }
}

/// File metadata offered or requested in a file-transfer content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<HashElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl FileElement {
    /// Digest for a specific algorithm, if present
    #[must_use]
    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&HashElement> {
        self.hashes.iter().find(|h| h.algorithm == algorithm)
    }

    /// Strongest digest whose algorithm satisfies `usable`
    pub fn best_hash(&self, usable: impl Fn(HashAlgorithm) -> bool) -> Option<&HashElement> {
        self.hashes
            .iter()
            .filter(|h| usable(h.algorithm))
            .max_by_key(|h| h.algorithm)
    }

    /// Add a digest, replacing any existing one for the same algorithm
    pub fn set_hash(&mut self, hash: HashElement) {
        match self.hashes.iter_mut().find(|h| h.algorithm == hash.algorithm) {
            Some(existing) => *existing = hash,
            None => self.hashes.push(hash),
        }
    }

    /// The `(offset, length)` window to move, or `None` if size is unknown
    /// or the range does not fit
    #[must_use]
    pub fn transfer_window(&self) -> Option<(u64, u64)> {
        let size = self.size?;
        match &self.range {
            Some(range) => range.window(size),
            None => Some((0, size)),
        }
    }

    /// Whether this file satisfies every property `criteria` specifies
    ///
    /// Unset criteria fields match anything. When both sides carry digests
    /// for a shared algorithm the values must agree, and at least one shared
    /// algorithm is required if the criteria carry any digest.
    #[must_use]
    pub fn matches(&self, criteria: &FileElement) -> bool {
        fn agrees<T: PartialEq>(mine: &Option<T>, wanted: &Option<T>) -> bool {
            wanted.as_ref().is_none_or(|w| mine.as_ref() == Some(w))
        }

        if !agrees(&self.name, &criteria.name)
            || !agrees(&self.size, &criteria.size)
            || !agrees(&self.media_type, &criteria.media_type)
            || !agrees(&self.date, &criteria.date)
        {
            return false;
        }
        if criteria.hashes.is_empty() {
            return true;
        }

        let mut shared = false;
        for wanted in &criteria.hashes {
            if let Some(mine) = self.hash(wanted.algorithm) {
                if mine.value != wanted.value {
                    return false;
                }
                shared = true;
            }
        }
        shared
    }
}

/// Application description of a content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionElement {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileElement>,
}

impl DescriptionElement {
    #[must_use]
    pub fn file_transfer(file: FileElement) -> Self {
        Self {
            namespace: NS_FILE_TRANSFER.to_string(),
            file: Some(file),
        }
    }

    /// The file element, if this is a file-transfer description
    #[must_use]
    pub fn file(&self) -> Option<&FileElement> {
        if self.namespace == NS_FILE_TRANSFER {
            self.file.as_ref()
        } else {
            None
        }
    }

    pub fn file_mut(&mut self) -> Option<&mut FileElement> {
        if self.namespace == NS_FILE_TRANSFER {
            self.file.as_mut()
        } else {
            None
        }
    }
}

// =============================================================================
// Transport and security
// =============================================================================

/// Transport proposal or counter-proposal for a content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportElement {
    pub namespace: String,
    /// Block size (in-band bytestreams)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
    /// Stream identifier chosen by the proposer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Method-specific parameters for other transports
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl TransportElement {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            block_size: None,
            sid: None,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = Some(block_size);
        self
    }

    #[must_use]
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Security layer attached to a content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityElement {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl SecurityElement {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Contents and messages
// =============================================================================

/// One content as carried in a Jingle message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentElement {
    pub creator: Creator,
    pub name: String,
    #[serde(default)]
    pub senders: Senders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<DescriptionElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityElement>,
}

impl ContentElement {
    #[must_use]
    pub fn new(creator: Creator, name: impl Into<String>) -> Self {
        Self {
            creator,
            name: name.into(),
            senders: Senders::default(),
            description: None,
            transport: None,
            security: None,
        }
    }

    #[must_use]
    pub fn with_senders(mut self, senders: Senders) -> Self {
        self.senders = senders;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: DescriptionElement) -> Self {
        self.description = Some(description);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportElement) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityElement) -> Self {
        self.security = Some(security);
        self
    }
}

/// Payload of a session-info action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionInfo {
    /// Liveness check; always acknowledged
    Ping,
    /// A digest that became known after the file was offered
    Checksum {
        creator: Creator,
        name: String,
        file: FileElement,
    },
    /// The receiver has all bytes of a content
    Received { creator: Creator, name: String },
    /// An informational payload of a namespace this engine does not know
    Other { namespace: String },
}

/// A Jingle request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JingleMessage {
    pub from: Jid,
    pub to: Jid,
    pub action: JingleAction,
    pub sid: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<Jid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<ContentElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SessionInfo>,
}

impl JingleMessage {
    #[must_use]
    pub fn new(from: Jid, to: Jid, action: JingleAction, sid: SessionId) -> Self {
        Self {
            from,
            to,
            action,
            sid,
            initiator: None,
            responder: None,
            contents: Vec::new(),
            reason: None,
            info: None,
        }
    }

    #[must_use]
    pub fn with_initiator(mut self, initiator: Jid) -> Self {
        self.initiator = Some(initiator);
        self
    }

    #[must_use]
    pub fn with_responder(mut self, responder: Jid) -> Self {
        self.responder = Some(responder);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: ContentElement) -> Self {
        self.contents.push(content);
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<ReasonElement>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: SessionInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Find a content by its `(creator, name)` key
    #[must_use]
    pub fn content(&self, creator: Creator, name: &str) -> Option<&ContentElement> {
        self.contents
            .iter()
            .find(|c| c.creator == creator && c.name == name)
    }

    /// Structural checks every inbound message must pass
    ///
    /// # Errors
    ///
    /// Returns `NegotiationError::BadRequest` when a content-bearing action
    /// has no contents, a content name is invalid, or two contents share the
    /// same `(creator, name)` key.
    pub fn validate(&self) -> Result<(), NegotiationError> {
        if self.action.requires_content() && self.contents.is_empty() {
            return Err(NegotiationError::BadRequest);
        }
        let mut seen = HashSet::new();
        for content in &self.contents {
            if validators::validate_content_name(&content.name).is_err() {
                return Err(NegotiationError::BadRequest);
            }
            if !seen.insert((content.creator, content.name.as_str())) {
                return Err(NegotiationError::BadRequest);
            }
        }
        Ok(())
    }
}

/// Response to a Jingle request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JingleResponse {
    /// Acknowledgement
    Result,
    /// Negotiation error
    Error {
        condition: NegotiationError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl JingleResponse {
    #[must_use]
    pub fn error(condition: NegotiationError) -> Self {
        Self::Error {
            condition,
            text: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Result)
    }

    #[must_use]
    pub fn error_condition(&self) -> Option<NegotiationError> {
        match self {
            Self::Result => None,
            Self::Error { condition, .. } => Some(*condition),
        }
    }
}

impl From<Result<(), NegotiationError>> for JingleResponse {
    fn from(result: Result<(), NegotiationError>) -> Self {
        match result {
            Ok(()) => Self::Result,
            Err(condition) => Self::error(condition),
        }
    }
}
