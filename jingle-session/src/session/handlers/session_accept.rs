//! Handler for session-accept - the responder agrees to our session

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, Senders};
use tracing::{debug, info};

use super::{Effect, HandlerContext, existing, matching_transport};
use crate::content::ContentState;
use crate::session::SessionState;

/// Handle session-accept on the initiator side
///
/// The accept carries the responder's counter-transport for each content,
/// and for file requests the full description of the file it will send.
/// Contents the accept leaves out count as rejected.
pub(crate) fn handle_session_accept(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    if !ctx.session.is_initiator() || ctx.session.state() != SessionState::Pending {
        return Err(NegotiationError::OutOfOrder);
    }
    if message
        .responder
        .as_ref()
        .is_some_and(|responder| responder != ctx.session.responder())
    {
        return Err(NegotiationError::BadRequest);
    }

    for element in &message.contents {
        let content = existing(ctx.session, element)?;
        if content.state() != ContentState::Proposed {
            return Err(NegotiationError::OutOfOrder);
        }
        matching_transport(element, content.transport())?;
        if element
            .description
            .as_ref()
            .is_some_and(|d| d.namespace != content.description().namespace)
        {
            return Err(NegotiationError::BadRequest);
        }
    }

    let state = ctx.session.state();
    for element in &message.contents {
        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        if let Some(transport) = &element.transport {
            content.set_transport(transport.clone());
        }
        // The responder describes the file it sends for a request
        if content.senders() == Senders::Responder
            && let Some(description) = &element.description
        {
            content.set_description(description.clone());
        }
        content
            .accept(state)
            .map_err(|_| NegotiationError::OutOfOrder)?;
    }

    for content in ctx.session.contents_mut() {
        let mentioned = message.content(content.creator(), content.name()).is_some();
        if !mentioned && content.state() == ContentState::Proposed {
            debug!(content = content.name(), "content left out of session-accept");
            content
                .reject(state)
                .map_err(|_| NegotiationError::OutOfOrder)?;
            ctx.effects.push(Effect::CancelContent {
                creator: content.creator(),
                name: content.name().to_string(),
            });
        }
    }

    ctx.session.activate();
    info!(
        sid = %message.sid,
        peer = %message.from,
        "session accepted by peer"
    );

    for element in &message.contents {
        ctx.establish_if_ready(element.creator, &element.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jingle_common::NS_IBB_TRANSPORT;
    use jingle_common::protocol::{
        ContentElement, DescriptionElement, FileElement, JingleAction, Role, SessionId,
        TransportElement,
    };

    use crate::content::Content;
    use crate::session::testing::*;

    fn accept_message(sid: &SessionId, transport: TransportElement) -> JingleMessage {
        from_responder(sid, JingleAction::SessionAccept)
            .with_responder(juliet())
            .with_content(
                ContentElement::new(Role::Initiator, "report")
                    .with_senders(Senders::Initiator)
                    .with_transport(transport),
            )
    }

    #[test]
    fn test_accept_activates_and_establishes() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = initiator_session(&sid);
        let counter = TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(2048)
            .with_sid("ibb-stream");

        let (result, effects) = run(
            handle_session_accept,
            &mut session,
            &env,
            &accept_message(&sid, counter),
        );

        assert_eq!(result, Ok(()));
        assert_eq!(session.state(), SessionState::Active);
        let content = session.content(Role::Initiator, "report").unwrap();
        assert_eq!(content.state(), ContentState::Accepted);
        assert_eq!(content.transport().unwrap().block_size, Some(2048));
        assert_eq!(
            count(&effects, |e| matches!(e, Effect::Establish { .. })),
            1
        );
    }

    #[test]
    fn test_accept_on_responder_is_out_of_order() {
        let env = environment(juliet());
        let sid = SessionId::generate();
        let mut session = accepted_responder_session(&sid, &env);
        let message = from_initiator(&sid, JingleAction::SessionAccept)
            .with_content(ContentElement::new(Role::Initiator, "report"));

        let (result, effects) = run(handle_session_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::OutOfOrder));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_second_accept_is_out_of_order() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = initiator_session(&sid);
        let message = accept_message(&sid, ibb_transport());

        assert_eq!(
            run(handle_session_accept, &mut session, &env, &message).0,
            Ok(())
        );
        assert_eq!(
            run(handle_session_accept, &mut session, &env, &message).0,
            Err(NegotiationError::OutOfOrder)
        );
    }

    #[test]
    fn test_unknown_content_is_bad_request() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = initiator_session(&sid);
        let message = from_responder(&sid, JingleAction::SessionAccept)
            .with_content(ContentElement::new(Role::Initiator, "other"));

        let (result, _) = run(handle_session_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::BadRequest));
        assert_eq!(session.state(), SessionState::Pending);
    }

    #[test]
    fn test_transport_namespace_change_is_bad_request() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = initiator_session(&sid);
        let message = accept_message(&sid, TransportElement::new(NS_TEST_TRANSPORT));

        let (result, _) = run(handle_session_accept, &mut session, &env, &message);
        assert_eq!(result, Err(NegotiationError::BadRequest));
        assert_eq!(
            session
                .content(Role::Initiator, "report")
                .unwrap()
                .state(),
            ContentState::Proposed
        );
    }

    #[test]
    fn test_request_adopts_responder_description() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = crate::session::Session::new(
            romeo(),
            juliet(),
            sid.clone(),
            Role::Initiator,
        );
        let placeholder = FileElement {
            name: Some("report.pdf".into()),
            ..Default::default()
        };
        session
            .add_content(
                Content::new(
                    Role::Initiator,
                    "wanted",
                    Senders::Responder,
                    DescriptionElement::file_transfer(placeholder),
                )
                .with_transport(ibb_transport()),
            )
            .unwrap();

        let message = from_responder(&sid, JingleAction::SessionAccept).with_content(
            ContentElement::new(Role::Initiator, "wanted")
                .with_senders(Senders::Responder)
                .with_description(DescriptionElement::file_transfer(report_pdf()))
                .with_transport(ibb_transport()),
        );

        let (result, _) = run(handle_session_accept, &mut session, &env, &message);
        assert_eq!(result, Ok(()));
        let file = session
            .content(Role::Initiator, "wanted")
            .unwrap()
            .file()
            .unwrap();
        assert_eq!(file.size, Some(1000));
        assert_eq!(file.hashes.len(), 1);
    }
}
