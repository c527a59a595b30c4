//! Inbound action handlers
//!
//! One handler per Jingle action, selected by [`handler_for`]. A handler runs
//! while the registry holds the session lock: it validates the message,
//! commits state transitions on the [`Session`] and records follow-up work as
//! [`Effect`]s. It never awaits. On `Err` the handler must not have mutated
//! anything; validate first, then commit.

mod content_accept;
mod content_add;
mod content_modify;
mod content_reject;
mod session_accept;
mod session_info;
mod session_initiate;
mod session_terminate;
mod transport_accept;
mod transport_reject;
mod transport_replace;

pub(crate) use content_accept::handle_content_accept;
pub(crate) use content_add::handle_content_add;
pub(crate) use content_modify::handle_content_modify;
pub(crate) use content_reject::{handle_content_reject, handle_content_remove};
pub(crate) use session_accept::handle_session_accept;
pub(crate) use session_info::handle_session_info;
pub(crate) use session_initiate::handle_session_initiate;
pub(crate) use session_terminate::handle_session_terminate;
pub(crate) use transport_accept::handle_transport_accept;
pub(crate) use transport_reject::handle_transport_reject;
pub(crate) use transport_replace::handle_transport_replace;

use jingle_common::protocol::{
    ContentElement, Creator, JingleAction, JingleMessage, Reason, ReasonElement,
    TransportElement,
};
use jingle_common::validators::validate_file_name;
use jingle_common::{NS_FILE_TRANSFER, NegotiationError};
use tracing::debug;

use super::{Session, SessionState};
use crate::content::{Content, ContentState};
use crate::registry::Environment;

/// Whether an inbound content offers us a file or asks us for one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentKind {
    Offer,
    Request,
}

/// Work the registry performs after a handler commits
#[derive(Debug)]
pub(crate) enum Effect {
    /// Queue a message to the peer
    Send(JingleMessage),
    /// Start establishing the content's current transport
    Establish { creator: Creator, name: String },
    /// Pick the next transport after the current one was refused
    Fallback { creator: Creator, name: String },
    /// Tell listeners about a new inbound content
    Incoming {
        creator: Creator,
        name: String,
        kind: ContentKind,
    },
    /// Stop the content's transfer and settle its outcome as cancelled
    CancelContent { creator: Creator, name: String },
    /// End the session
    Terminate {
        reason: ReasonElement,
        notify_peer: bool,
    },
}

/// State a handler works on
pub(crate) struct HandlerContext<'a> {
    pub session: &'a mut Session,
    pub env: &'a Environment,
    pub effects: Vec<Effect>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(session: &'a mut Session, env: &'a Environment) -> Self {
        Self {
            session,
            env,
            effects: Vec::new(),
        }
    }

    pub fn send(&mut self, message: JingleMessage) {
        self.effects.push(Effect::Send(message));
    }

    pub fn terminate(&mut self, reason: impl Into<ReasonElement>, notify_peer: bool) {
        self.effects.push(Effect::Terminate {
            reason: reason.into(),
            notify_peer,
        });
    }

    /// Request establishment if the content is accepted in an active session
    pub fn establish_if_ready(&mut self, creator: Creator, name: &str) {
        if self.session.state() != SessionState::Active {
            return;
        }
        let ready = self
            .session
            .content(creator, name)
            .is_some_and(|c| c.state() == ContentState::Accepted && c.transport().is_some());
        if ready {
            self.effects.push(Effect::Establish {
                creator,
                name: name.to_string(),
            });
        }
    }

    /// Message naming one content and carrying `transport`
    pub fn transport_message(
        &self,
        action: JingleAction,
        creator: Creator,
        name: &str,
        transport: TransportElement,
    ) -> JingleMessage {
        self.session
            .message(action)
            .with_content(ContentElement::new(creator, name).with_transport(transport))
    }
}

pub(crate) type Handler =
    fn(&JingleMessage, &mut HandlerContext<'_>) -> Result<(), NegotiationError>;

/// Handler for an action; unhandled actions answer feature-not-implemented
pub(crate) fn handler_for(action: JingleAction) -> Handler {
    match action {
        JingleAction::ContentAccept => handle_content_accept,
        JingleAction::ContentAdd => handle_content_add,
        JingleAction::ContentModify => handle_content_modify,
        JingleAction::ContentReject => handle_content_reject,
        JingleAction::ContentRemove => handle_content_remove,
        JingleAction::SessionAccept => handle_session_accept,
        JingleAction::SessionInfo => handle_session_info,
        JingleAction::SessionInitiate => handle_session_initiate,
        JingleAction::SessionTerminate => handle_session_terminate,
        JingleAction::TransportAccept => handle_transport_accept,
        JingleAction::TransportReject => handle_transport_reject,
        JingleAction::TransportReplace => handle_transport_replace,
        JingleAction::DescriptionInfo | JingleAction::SecurityInfo | JingleAction::TransportInfo => {
            handle_unimplemented
        }
    }
}

fn handle_unimplemented(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    debug!(
        sid = %ctx.session.sid(),
        action = %message.action,
        "action not implemented"
    );
    Err(NegotiationError::FeatureNotImplemented)
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Result of checking an inbound content against local capabilities
pub(crate) enum Screened {
    Usable { content: Content, kind: ContentKind },
    /// Well-formed but not something we can take part in
    Refused(Reason),
}

/// Check an inbound content proposal and build the local [`Content`]
///
/// Malformed proposals are `BadRequest`. Proposals we cannot serve are
/// `Refused` with the reason to end the session (or reject the content) with.
pub(crate) fn screen_content(
    session: &Session,
    env: &Environment,
    element: &ContentElement,
) -> Result<Screened, NegotiationError> {
    let Some(description) = &element.description else {
        return Err(NegotiationError::BadRequest);
    };
    let Some(transport) = &element.transport else {
        return Err(NegotiationError::BadRequest);
    };
    if element.creator != session.role().opposite() {
        return Err(NegotiationError::BadRequest);
    }
    if description.namespace != NS_FILE_TRANSFER {
        return Ok(Screened::Refused(Reason::UnsupportedApplications));
    }
    let Some(file) = description.file() else {
        return Err(NegotiationError::BadRequest);
    };

    let kind = if session.receives(element.senders) {
        ContentKind::Offer
    } else if session.sends(element.senders) {
        ContentKind::Request
    } else {
        return Err(NegotiationError::BadRequest);
    };
    // Offers must be bounded and verifiable
    if kind == ContentKind::Offer && (file.hashes.is_empty() || file.transfer_window().is_none()) {
        return Err(NegotiationError::BadRequest);
    }
    if let Some(name) = &file.name
        && validate_file_name(name).is_err()
    {
        return Err(NegotiationError::BadRequest);
    }

    let Some(plugin) = env.transports.get(&transport.namespace) else {
        return Ok(Screened::Refused(Reason::UnsupportedTransports));
    };
    if let Some(security) = &element.security
        && !env.security.contains(&security.namespace)
    {
        return Ok(Screened::Refused(Reason::SecurityError));
    }
    let counter = match plugin.propose_from_peer_offer(transport) {
        Ok(counter) => counter,
        Err(e) => {
            debug!(
                namespace = %transport.namespace,
                error = %e,
                "cannot answer transport proposal"
            );
            return Ok(Screened::Refused(Reason::IncompatibleParameters));
        }
    };

    let content = Content::new(
        element.creator,
        element.name.clone(),
        element.senders,
        description.clone(),
    )
    .with_transport(counter)
    .with_security(element.security.clone());
    Ok(Screened::Usable { content, kind })
}

/// The local content an inbound element refers to
pub(crate) fn existing<'s>(
    session: &'s Session,
    element: &ContentElement,
) -> Result<&'s Content, NegotiationError> {
    session
        .content(element.creator, &element.name)
        .ok_or(NegotiationError::BadRequest)
}

/// The transport an inbound element carries, if its namespace matches `current`
pub(crate) fn matching_transport<'m>(
    element: &'m ContentElement,
    current: Option<&TransportElement>,
) -> Result<Option<&'m TransportElement>, NegotiationError> {
    match (&element.transport, current) {
        (Some(offered), Some(current)) if offered.namespace != current.namespace => {
            Err(NegotiationError::BadRequest)
        }
        (offered, _) => Ok(offered.as_ref()),
    }
}

/// Reason carried by a message, or `fallback`
pub(crate) fn reason_or(message: &JingleMessage, fallback: Reason) -> ReasonElement {
    message
        .reason
        .clone()
        .unwrap_or_else(|| ReasonElement::new(fallback))
}
