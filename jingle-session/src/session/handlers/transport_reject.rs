//! Handler for transport-reject - the peer refuses our replacement

use jingle_common::NegotiationError;
use jingle_common::protocol::JingleMessage;
use tracing::warn;

use super::{Effect, HandlerContext, existing};

/// Handle transport-reject
///
/// The refused namespace joins the session's failed set and the next
/// candidate transport is tried.
pub(crate) fn handle_transport_reject(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    for element in &message.contents {
        let content = existing(ctx.session, element)?;
        let Some(pending) = content.pending_transport() else {
            return Err(NegotiationError::OutOfOrder);
        };
        if element
            .transport
            .as_ref()
            .is_some_and(|t| t.namespace != pending.namespace)
        {
            return Err(NegotiationError::OutOfOrder);
        }
    }

    for element in &message.contents {
        let Some(pending) = ctx
            .session
            .content_mut(element.creator, &element.name)
            .and_then(|content| content.take_pending_transport())
        else {
            continue;
        };
        warn!(
            sid = %message.sid,
            content = %element.name,
            namespace = %pending.namespace,
            "transport replacement rejected"
        );
        ctx.session.mark_transport_failed(&pending.namespace);
        ctx.effects.push(Effect::Fallback {
            creator: element.creator,
            name: element.name.clone(),
        });
    }
    Ok(())
}
