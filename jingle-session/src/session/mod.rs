//! Session state machine
//!
//! A [`Session`] owns its contents and the set of transport methods that
//! already failed. Inbound actions are applied by the handlers in
//! [`handlers`]; the registry serializes them per session.

pub(crate) mod handlers;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeSet;
use std::fmt;

use jingle_common::NegotiationError;
use jingle_common::protocol::{Creator, Jid, JingleAction, JingleMessage, Role, SessionId, Senders};
use tokio::sync::watch;

use crate::content::{Content, ContentState};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, waiting for the responder's session-accept
    Pending,
    Active,
    Terminated,
}

impl SessionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key: the remote full JID plus the session id
///
/// Two peers may pick the same sid without their sessions aliasing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub remote: Jid,
    pub sid: SessionId,
}

impl SessionKey {
    pub fn new(remote: Jid, sid: SessionId) -> Self {
        Self { remote, sid }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.remote, self.sid)
    }
}

/// Fires once when the owning session terminates
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve when the session terminates (or its owner is gone)
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One negotiated exchange between two peers
pub struct Session {
    initiator: Jid,
    responder: Jid,
    sid: SessionId,
    role: Role,
    state: SessionState,
    contents: Vec<Content>,
    failed_transport_methods: BTreeSet<String>,
    cancel: watch::Sender<bool>,
}

impl Session {
    pub fn new(initiator: Jid, responder: Jid, sid: SessionId, role: Role) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            initiator,
            responder,
            sid,
            role,
            state: SessionState::Pending,
            contents: Vec::new(),
            failed_transport_methods: BTreeSet::new(),
            cancel,
        }
    }

    pub fn initiator(&self) -> &Jid {
        &self.initiator
    }

    pub fn responder(&self) -> &Jid {
        &self.responder
    }

    pub fn sid(&self) -> &SessionId {
        &self.sid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_initiator(&self) -> bool {
        self.role == Role::Initiator
    }

    /// The local endpoint's address
    pub fn local(&self) -> &Jid {
        match self.role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    pub fn remote(&self) -> &Jid {
        match self.role {
            Role::Initiator => &self.responder,
            Role::Responder => &self.initiator,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.remote().clone(), self.sid.clone())
    }

    /// Session identity, independent of which side we are
    pub fn identity(&self) -> (&Jid, &Jid, &SessionId) {
        (&self.initiator, &self.responder, &self.sid)
    }

    pub fn contents(&self) -> &[Content] {
        &self.contents
    }

    pub(crate) fn contents_mut(&mut self) -> impl Iterator<Item = &mut Content> {
        self.contents.iter_mut()
    }

    pub fn content(&self, creator: Creator, name: &str) -> Option<&Content> {
        self.contents.iter().find(|c| c.is_key(creator, name))
    }

    pub(crate) fn content_mut(&mut self, creator: Creator, name: &str) -> Option<&mut Content> {
        self.contents.iter_mut().find(|c| c.is_key(creator, name))
    }

    /// Append a content; its `(creator, name)` must be new to the session
    pub(crate) fn add_content(&mut self, content: Content) -> Result<(), NegotiationError> {
        if self.content(content.creator(), content.name()).is_some() {
            return Err(NegotiationError::Conflict);
        }
        self.contents.push(content);
        Ok(())
    }

    /// Whether any content is still proposed or accepted
    pub fn has_live_contents(&self) -> bool {
        self.contents.iter().any(Content::is_live)
    }

    pub fn failed_transport_methods(&self) -> &BTreeSet<String> {
        &self.failed_transport_methods
    }

    /// Remember that `namespace` failed; returns `false` if already known
    pub(crate) fn mark_transport_failed(&mut self, namespace: &str) -> bool {
        self.failed_transport_methods.insert(namespace.to_string())
    }

    pub fn is_transport_failed(&self, namespace: &str) -> bool {
        self.failed_transport_methods.contains(namespace)
    }

    /// Move from pending to active; returns `false` in any other state
    pub(crate) fn activate(&mut self) -> bool {
        if self.state != SessionState::Pending {
            return false;
        }
        self.state = SessionState::Active;
        true
    }

    /// Enter the terminal state
    ///
    /// Fires the cancel signal and abandons every in-flight transport
    /// attempt. Returns `false` if the session was already terminated.
    pub(crate) fn terminate(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        self.state = SessionState::Terminated;
        self.cancel.send_replace(true);
        for content in &mut self.contents {
            content.invalidate_attempt();
        }
        true
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal(self.cancel.subscribe())
    }

    /// Skeleton of an outbound message for this session
    pub(crate) fn message(&self, action: JingleAction) -> JingleMessage {
        let message = JingleMessage::new(
            self.local().clone(),
            self.remote().clone(),
            action,
            self.sid.clone(),
        );
        match action {
            JingleAction::SessionInitiate => message.with_initiator(self.initiator.clone()),
            JingleAction::SessionAccept => message.with_responder(self.responder.clone()),
            _ => message,
        }
    }

    /// Whether the local side sends over a content with `senders`
    pub(crate) fn sends(&self, senders: Senders) -> bool {
        senders == Senders::only(self.role)
    }

    /// Whether the local side receives over a content with `senders`
    pub(crate) fn receives(&self, senders: Senders) -> bool {
        senders == Senders::only(self.role.opposite())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key(),
            initiator: self.initiator.clone(),
            responder: self.responder.clone(),
            role: self.role,
            state: self.state,
            contents: self
                .contents
                .iter()
                .map(|c| ContentSnapshot {
                    creator: c.creator(),
                    name: c.name().to_string(),
                    senders: c.senders(),
                    state: c.state(),
                    transport: c.transport().map(|t| t.namespace.clone()),
                    pending_transport: c.pending_transport().map(|t| t.namespace.clone()),
                })
                .collect(),
            failed_transport_methods: self.failed_transport_methods.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("initiator", &self.initiator)
            .field("responder", &self.responder)
            .field("sid", &self.sid)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("contents", &self.contents)
            .field("failed_transport_methods", &self.failed_transport_methods)
            .finish()
    }
}

/// Point-in-time copy of a session for callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub initiator: Jid,
    pub responder: Jid,
    pub role: Role,
    pub state: SessionState,
    pub contents: Vec<ContentSnapshot>,
    pub failed_transport_methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub creator: Creator,
    pub name: String,
    pub senders: Senders,
    pub state: ContentState,
    pub transport: Option<String>,
    pub pending_transport: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jingle_common::protocol::{DescriptionElement, FileElement};

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    fn pair() -> (Session, Session) {
        let romeo = jid("romeo@montague.example/orchard");
        let juliet = jid("juliet@capulet.example/balcony");
        let sid = SessionId::generate();
        (
            Session::new(romeo.clone(), juliet.clone(), sid.clone(), Role::Initiator),
            Session::new(romeo, juliet, sid, Role::Responder),
        )
    }

    #[test]
    fn test_identity_symmetry() {
        let (a, b) = pair();
        assert_eq!(a.initiator(), b.initiator());
        assert_eq!(a.responder(), b.responder());
        assert_eq!(a.identity(), b.identity());

        assert_eq!(a.local(), b.remote());
        assert_eq!(a.remote(), b.local());
        assert_eq!(a.key().remote, *b.local());
    }

    #[test]
    fn test_state_transitions() {
        let (mut a, _) = pair();
        assert_eq!(a.state(), SessionState::Pending);
        assert!(a.activate());
        assert!(!a.activate());
        assert!(a.terminate());
        assert!(!a.terminate());
        assert_eq!(a.state(), SessionState::Terminated);
        assert!(!a.activate());
    }

    #[test]
    fn test_terminate_fires_cancel() {
        let (mut a, _) = pair();
        let signal = a.cancel_signal();
        assert!(!signal.is_cancelled());
        a.terminate();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let (mut a, _) = pair();
        let mut signal = a.cancel_signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        a.terminate();
        waiter.await.unwrap();
    }

    #[test]
    fn test_content_key_collision() {
        let (mut a, _) = pair();
        let make = |creator, name| {
            Content::new(
                creator,
                name,
                Senders::Initiator,
                DescriptionElement::file_transfer(FileElement::default()),
            )
        };
        assert!(a.add_content(make(Role::Initiator, "file")).is_ok());
        assert_eq!(
            a.add_content(make(Role::Initiator, "file")),
            Err(NegotiationError::Conflict)
        );
        assert!(a.add_content(make(Role::Responder, "file")).is_ok());
        assert_eq!(a.contents().len(), 2);
        assert!(a.has_live_contents());
    }

    #[test]
    fn test_message_addressing() {
        let (a, b) = pair();
        let initiate = a.message(JingleAction::SessionInitiate);
        assert_eq!(initiate.from, *a.local());
        assert_eq!(initiate.to, *a.remote());
        assert_eq!(initiate.initiator.as_ref(), Some(a.initiator()));

        let accept = b.message(JingleAction::SessionAccept);
        assert_eq!(accept.from, *b.responder());
        assert_eq!(accept.responder.as_ref(), Some(b.responder()));
    }

    #[test]
    fn test_direction() {
        let (a, b) = pair();
        assert!(a.sends(Senders::Initiator));
        assert!(b.receives(Senders::Initiator));
        assert!(!a.sends(Senders::Both));
        assert!(!b.receives(Senders::None));
    }

    #[test]
    fn test_failed_transports() {
        let (mut a, _) = pair();
        assert!(a.mark_transport_failed("urn:a"));
        assert!(!a.mark_transport_failed("urn:a"));
        assert!(a.is_transport_failed("urn:a"));
        assert_eq!(a.snapshot().failed_transport_methods, vec!["urn:a"]);
    }
}
