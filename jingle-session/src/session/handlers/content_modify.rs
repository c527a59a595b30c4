//! Handler for content-modify - change who may send over a content

use jingle_common::NegotiationError;
use jingle_common::protocol::JingleMessage;
use tracing::info;

use super::{HandlerContext, existing};
use crate::content::ContentState;

pub(crate) fn handle_content_modify(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    for element in &message.contents {
        if existing(ctx.session, element)?.state() != ContentState::Accepted {
            return Err(NegotiationError::OutOfOrder);
        }
    }

    let state = ctx.session.state();
    for element in &message.contents {
        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        content
            .modify(element.senders, state)
            .map_err(|_| NegotiationError::OutOfOrder)?;
        info!(
            sid = %message.sid,
            content = %element.name,
            senders = %element.senders,
            "content senders modified"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jingle_common::protocol::{ContentElement, JingleAction, Role, Senders, SessionId};

    use crate::session::testing::*;

    #[test]
    fn test_modify_accepted_content() {
        let env = environment(juliet());
        let sid = SessionId::generate();
        let mut session = accepted_responder_session(&sid, &env);
        let message = from_initiator(&sid, JingleAction::ContentModify).with_content(
            ContentElement::new(Role::Initiator, "report").with_senders(Senders::None),
        );

        assert_eq!(
            run(handle_content_modify, &mut session, &env, &message).0,
            Ok(())
        );
        assert_eq!(
            session
                .content(Role::Initiator, "report")
                .unwrap()
                .senders(),
            Senders::None
        );
    }

    #[test]
    fn test_modify_proposed_content_is_out_of_order() {
        let env = environment(romeo());
        let sid = SessionId::generate();
        let mut session = initiator_session(&sid);
        let message = from_responder(&sid, JingleAction::ContentModify).with_content(
            ContentElement::new(Role::Initiator, "report").with_senders(Senders::Both),
        );

        assert_eq!(
            run(handle_content_modify, &mut session, &env, &message).0,
            Err(NegotiationError::OutOfOrder)
        );
        assert_eq!(
            session
                .content(Role::Initiator, "report")
                .unwrap()
                .senders(),
            Senders::Initiator
        );
    }
}
