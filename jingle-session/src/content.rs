//! Content negotiation state
//!
//! A content is one negotiable unit of a session: an application
//! description, the transport currently agreed for it, an optional security
//! layer and its own negotiation state. State transitions here are pure;
//! notifying anyone about them is the session registry's job.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jingle_common::protocol::{
    ContentElement, Creator, DescriptionElement, FileElement, Reason, SecurityElement, Senders,
    TransportElement,
};
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::{ContentError, TransferFailure};
use crate::events::TransferOutcome;
use crate::session::SessionState;

/// Negotiation state of a single content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentState {
    Proposed,
    Accepted,
    Rejected,
    Removed,
}

impl ContentState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Removed => "removed",
        }
    }

    /// Whether the content still counts toward keeping its session alive
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Proposed | Self::Accepted)
    }
}

impl fmt::Display for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared slot for a content's terminal outcome; the first write wins
pub(crate) type OutcomeSlot = Arc<watch::Sender<Option<TransferOutcome>>>;

/// Record `outcome` unless one is already set
///
/// Returns `true` if this call set it.
pub(crate) fn record_outcome(slot: &watch::Sender<Option<TransferOutcome>>, outcome: TransferOutcome) -> bool {
    slot.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(outcome);
        true
    })
}

/// Awaitable view of one content's terminal outcome
#[derive(Debug, Clone)]
pub struct OutcomeReceiver(watch::Receiver<Option<TransferOutcome>>);

impl OutcomeReceiver {
    /// The outcome, if the content already finished
    pub fn current(&self) -> Option<TransferOutcome> {
        self.0.borrow().clone()
    }

    /// Wait until the content finishes
    pub async fn wait(&mut self) -> TransferOutcome {
        match self.0.wait_for(Option::is_some).await {
            Ok(outcome) => Option::clone(&outcome).unwrap_or(TransferOutcome::Failure(
                TransferFailure::SessionTerminated(Reason::GeneralError),
            )),
            Err(_) => TransferOutcome::Failure(TransferFailure::SessionTerminated(
                Reason::GeneralError,
            )),
        }
    }
}

fn guard(session: SessionState) -> Result<(), ContentError> {
    if session == SessionState::Terminated {
        return Err(ContentError::SessionTerminated);
    }
    Ok(())
}

/// One negotiable unit within a session
pub struct Content {
    creator: Creator,
    name: String,
    senders: Senders,
    description: DescriptionElement,
    transport: Option<TransportElement>,
    pending_transport: Option<TransportElement>,
    security: Option<SecurityElement>,
    state: ContentState,
    endpoint: Option<PathBuf>,
    generation: u64,
    establishing: Option<AbortHandle>,
    peer_received: bool,
    outcome: OutcomeSlot,
}

impl Content {
    /// A new content in the `proposed` state
    pub fn new(
        creator: Creator,
        name: impl Into<String>,
        senders: Senders,
        description: DescriptionElement,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            creator,
            name: name.into(),
            senders,
            description,
            transport: None,
            pending_transport: None,
            security: None,
            state: ContentState::Proposed,
            endpoint: None,
            generation: 0,
            establishing: None,
            peer_received: false,
            outcome: Arc::new(outcome),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportElement) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: Option<SecurityElement>) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: PathBuf) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn creator(&self) -> Creator {
        self.creator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn senders(&self) -> Senders {
        self.senders
    }

    pub fn state(&self) -> ContentState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn description(&self) -> &DescriptionElement {
        &self.description
    }

    /// File metadata, for file-transfer contents
    pub fn file(&self) -> Option<&FileElement> {
        self.description.file()
    }

    /// The current transport descriptor (at most one per content)
    pub fn transport(&self) -> Option<&TransportElement> {
        self.transport.as_ref()
    }

    /// A locally proposed replacement awaiting the peer's answer
    pub fn pending_transport(&self) -> Option<&TransportElement> {
        self.pending_transport.as_ref()
    }

    pub fn security(&self) -> Option<&SecurityElement> {
        self.security.as_ref()
    }

    /// Local file this content reads from or writes to
    pub fn endpoint(&self) -> Option<&Path> {
        self.endpoint.as_deref()
    }

    /// Establishment generation; bumps whenever an attempt is started or
    /// invalidated
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the peer confirmed receiving every byte of this content
    pub fn peer_received(&self) -> bool {
        self.peer_received
    }

    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.outcome.borrow().clone()
    }

    pub(crate) fn is_key(&self, creator: Creator, name: &str) -> bool {
        self.creator == creator && self.name == name
    }

    // =========================================================================
    // Negotiation transitions
    // =========================================================================

    /// Confirm the content is (still) a fresh proposal
    pub fn propose(&mut self, session: SessionState) -> Result<(), ContentError> {
        guard(session)?;
        match self.state {
            ContentState::Proposed => Ok(()),
            state => Err(ContentError::InvalidTransition {
                state,
                operation: "propose",
            }),
        }
    }

    pub fn accept(&mut self, session: SessionState) -> Result<(), ContentError> {
        guard(session)?;
        match self.state {
            ContentState::Proposed => {
                self.state = ContentState::Accepted;
                Ok(())
            }
            state => Err(ContentError::InvalidTransition {
                state,
                operation: "accept",
            }),
        }
    }

    pub fn reject(&mut self, session: SessionState) -> Result<(), ContentError> {
        guard(session)?;
        match self.state {
            ContentState::Proposed => {
                self.state = ContentState::Rejected;
                self.invalidate_attempt();
                Ok(())
            }
            state => Err(ContentError::InvalidTransition {
                state,
                operation: "reject",
            }),
        }
    }

    pub fn remove(&mut self, session: SessionState) -> Result<(), ContentError> {
        guard(session)?;
        match self.state {
            ContentState::Proposed | ContentState::Accepted => {
                self.state = ContentState::Removed;
                self.invalidate_attempt();
                Ok(())
            }
            state => Err(ContentError::InvalidTransition {
                state,
                operation: "remove",
            }),
        }
    }

    /// Change who may send; only an accepted content can be modified
    pub fn modify(&mut self, senders: Senders, session: SessionState) -> Result<(), ContentError> {
        guard(session)?;
        if self.state != ContentState::Accepted {
            return Err(ContentError::NotAccepted);
        }
        self.senders = senders;
        Ok(())
    }

    // =========================================================================
    // Engine bookkeeping
    // =========================================================================

    pub(crate) fn set_description(&mut self, description: DescriptionElement) {
        self.description = description;
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut FileElement> {
        self.description.file_mut()
    }

    pub(crate) fn mark_peer_received(&mut self) {
        self.peer_received = true;
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: PathBuf) {
        self.endpoint = Some(endpoint);
    }

    /// Adopt `transport` as current, dropping any pending replacement and
    /// abandoning an in-flight attempt
    pub(crate) fn set_transport(&mut self, transport: TransportElement) {
        self.transport = Some(transport);
        self.pending_transport = None;
        self.invalidate_attempt();
    }

    /// Record a locally proposed replacement; the current attempt is abandoned
    pub(crate) fn propose_replacement(&mut self, transport: TransportElement) {
        self.pending_transport = Some(transport);
        self.invalidate_attempt();
    }

    pub(crate) fn take_pending_transport(&mut self) -> Option<TransportElement> {
        self.pending_transport.take()
    }

    /// Start a new establishment attempt and return its generation
    pub(crate) fn begin_attempt(&mut self) -> u64 {
        self.invalidate_attempt();
        self.generation
    }

    pub(crate) fn set_establishing(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.establishing.replace(handle) {
            previous.abort();
        }
    }

    /// The attempt with `generation` finished; forget its abort handle
    pub(crate) fn finish_attempt(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.establishing = None;
        true
    }

    /// Abort any in-flight attempt and make its result stale
    pub(crate) fn invalidate_attempt(&mut self) {
        if let Some(handle) = self.establishing.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    pub(crate) fn outcome_slot(&self) -> OutcomeSlot {
        Arc::clone(&self.outcome)
    }

    pub(crate) fn subscribe_outcome(&self) -> OutcomeReceiver {
        OutcomeReceiver(self.outcome.subscribe())
    }

    /// Wire form of this content
    pub(crate) fn to_element(&self, include_description: bool) -> ContentElement {
        let mut element = ContentElement::new(self.creator, self.name.clone())
            .with_senders(self.senders);
        if include_description {
            element = element.with_description(self.description.clone());
        }
        if let Some(transport) = &self.transport {
            element = element.with_transport(transport.clone());
        }
        if let Some(security) = &self.security {
            element = element.with_security(security.clone());
        }
        element
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("creator", &self.creator)
            .field("name", &self.name)
            .field("senders", &self.senders)
            .field("state", &self.state)
            .field(
                "transport",
                &self.transport.as_ref().map(|t| t.namespace.as_str()),
            )
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jingle_common::NS_IBB_TRANSPORT;
    use jingle_common::protocol::Role;

    fn content() -> Content {
        Content::new(
            Role::Initiator,
            "file",
            Senders::Initiator,
            DescriptionElement::file_transfer(FileElement::default()),
        )
    }

    const ACTIVE: SessionState = SessionState::Active;

    #[test]
    fn test_accept_from_proposed() {
        let mut c = content();
        assert_eq!(c.state(), ContentState::Proposed);
        assert!(c.propose(SessionState::Pending).is_ok());
        assert!(c.accept(ACTIVE).is_ok());
        assert_eq!(c.state(), ContentState::Accepted);
        assert_eq!(
            c.accept(ACTIVE),
            Err(ContentError::InvalidTransition {
                state: ContentState::Accepted,
                operation: "accept"
            })
        );
    }

    #[test]
    fn test_reject_only_when_proposed() {
        let mut c = content();
        assert!(c.reject(ACTIVE).is_ok());
        assert_eq!(c.state(), ContentState::Rejected);
        assert!(!c.is_live());
        assert!(c.accept(ACTIVE).is_err());
        assert!(c.remove(ACTIVE).is_err());
    }

    #[test]
    fn test_remove_accepted() {
        let mut c = content();
        c.accept(ACTIVE).unwrap();
        assert!(c.remove(ACTIVE).is_ok());
        assert_eq!(c.state(), ContentState::Removed);
        assert!(c.propose(ACTIVE).is_err());
    }

    #[test]
    fn test_terminated_session_blocks_transitions() {
        let mut c = content();
        let terminated = SessionState::Terminated;
        assert_eq!(c.propose(terminated), Err(ContentError::SessionTerminated));
        assert_eq!(c.accept(terminated), Err(ContentError::SessionTerminated));
        assert_eq!(
            c.modify(Senders::Both, terminated),
            Err(ContentError::SessionTerminated)
        );
        assert_eq!(c.state(), ContentState::Proposed);
    }

    #[test]
    fn test_modify_requires_accepted() {
        let mut c = content();
        assert_eq!(
            c.modify(Senders::Both, ACTIVE),
            Err(ContentError::NotAccepted)
        );
        assert_eq!(c.senders(), Senders::Initiator);

        c.accept(ACTIVE).unwrap();
        assert!(c.modify(Senders::Both, ACTIVE).is_ok());
        assert_eq!(c.senders(), Senders::Both);
    }

    #[test]
    fn test_single_current_transport() {
        let mut c = content().with_transport(TransportElement::new(NS_IBB_TRANSPORT));
        let before = c.generation();

        c.propose_replacement(TransportElement::new("urn:test:other"));
        assert_eq!(c.transport().unwrap().namespace, NS_IBB_TRANSPORT);
        assert_eq!(c.pending_transport().unwrap().namespace, "urn:test:other");
        assert!(c.generation() > before);

        let pending = c.take_pending_transport().unwrap();
        c.set_transport(pending);
        assert_eq!(c.transport().unwrap().namespace, "urn:test:other");
        assert!(c.pending_transport().is_none());
    }

    #[test]
    fn test_stale_attempts_detected() {
        let mut c = content();
        let first = c.begin_attempt();
        let second = c.begin_attempt();
        assert!(!c.finish_attempt(first));
        assert!(c.finish_attempt(second));

        let third = c.begin_attempt();
        c.remove(ACTIVE).unwrap();
        assert!(!c.finish_attempt(third));
    }

    #[test]
    fn test_first_outcome_wins() {
        let c = content();
        let slot = c.outcome_slot();
        assert!(record_outcome(&slot, TransferOutcome::Success { bytes: 10 }));
        assert!(!record_outcome(
            &slot,
            TransferOutcome::Failure(TransferFailure::Cancelled)
        ));
        assert_eq!(c.outcome(), Some(TransferOutcome::Success { bytes: 10 }));
    }

    #[tokio::test]
    async fn test_outcome_receiver_waits() {
        let c = content();
        let mut receiver = c.subscribe_outcome();
        assert!(receiver.current().is_none());

        let slot = c.outcome_slot();
        let waiter = tokio::spawn(async move { receiver.wait().await });
        record_outcome(&slot, TransferOutcome::Success { bytes: 4 });
        assert_eq!(
            waiter.await.unwrap(),
            TransferOutcome::Success { bytes: 4 }
        );
    }

    #[test]
    fn test_to_element() {
        let c = content().with_transport(TransportElement::new(NS_IBB_TRANSPORT));
        let element = c.to_element(false);
        assert!(element.description.is_none());
        assert_eq!(element.senders, Senders::Initiator);
        assert!(c.to_element(true).description.is_some());
    }
}
