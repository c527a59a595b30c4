//! Handler for content-accept - the peer accepts a content we added

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, Senders};
use tracing::info;

use super::{HandlerContext, existing, matching_transport};
use crate::content::ContentState;
use crate::session::SessionState;

/// Handle content-accept
///
/// Accepting completes transport negotiation for the content, so
/// establishment starts right away.
pub(crate) fn handle_content_accept(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    if ctx.session.state() != SessionState::Active {
        return Err(NegotiationError::OutOfOrder);
    }
    let local_role = ctx.session.role();
    for element in &message.contents {
        let content = existing(ctx.session, element)?;
        if content.creator() != local_role || content.state() != ContentState::Proposed {
            return Err(NegotiationError::OutOfOrder);
        }
        matching_transport(element, content.transport())?;
    }

    let state = ctx.session.state();
    let remote_sends = Senders::only(local_role.opposite());
    for element in &message.contents {
        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        if let Some(transport) = &element.transport {
            content.set_transport(transport.clone());
        }
        if content.senders() == remote_sends
            && let Some(description) = &element.description
        {
            content.set_description(description.clone());
        }
        content
            .accept(state)
            .map_err(|_| NegotiationError::OutOfOrder)?;
        info!(sid = %message.sid, content = %element.name, "content accepted by peer");
    }

    for element in &message.contents {
        ctx.establish_if_ready(element.creator, &element.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jingle_common::protocol::{
        ContentElement, DescriptionElement, JingleAction, Role, SessionId,
    };

    use crate::content::Content;
    use crate::session::handlers::Effect;
    use crate::session::testing::*;

    fn with_added_content(sid: &SessionId) -> crate::session::Session {
        let mut session = active_initiator_session(sid);
        session
            .add_content(
                Content::new(
                    Role::Initiator,
                    "second",
                    Senders::Initiator,
                    DescriptionElement::file_transfer(report_pdf()),
                )
                .with_transport(ibb_transport()),
            )
            .unwrap();
        session
    }

    #[test]
    fn test_accept_added_content() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = with_added_content(&sid);
        let message = from_responder(&sid, JingleAction::ContentAccept).with_content(
            ContentElement::new(Role::Initiator, "second").with_transport(ibb_transport()),
        );

        let (result, effects) = run(handle_content_accept, &mut session, &env, &message);

        assert_eq!(result, Ok(()));
        assert_eq!(
            session
                .content(Role::Initiator, "second")
                .unwrap()
                .state(),
            ContentState::Accepted
        );
        assert!(matches!(
            effects.as_slice(),
            [Effect::Establish { name, .. }] if name == "second"
        ));
    }

    #[test]
    fn test_accept_twice_is_out_of_order() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = with_added_content(&sid);
        let message = from_responder(&sid, JingleAction::ContentAccept)
            .with_content(ContentElement::new(Role::Initiator, "report"));

        let (result, effects) = run(handle_content_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::OutOfOrder));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_accept_of_peer_content_is_out_of_order() {
        let env = environment(juliet());
        let sid = SessionId::generate();
        let mut session = accepted_responder_session(&sid, &env);
        let message = from_initiator(&sid, JingleAction::ContentAccept)
            .with_content(ContentElement::new(Role::Initiator, "report"));

        let (result, _) = run(handle_content_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::OutOfOrder));
    }

    #[test]
    fn test_unknown_content_is_bad_request() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = with_added_content(&sid);
        let message = from_responder(&sid, JingleAction::ContentAccept)
            .with_content(ContentElement::new(Role::Initiator, "nope"));

        let (result, _) = run(handle_content_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::BadRequest));
    }
}
