//! Handler for transport-accept - the peer accepts our replacement

use jingle_common::NegotiationError;
use jingle_common::protocol::JingleMessage;
use tracing::info;

use super::{HandlerContext, existing};

/// Handle transport-accept
///
/// The accept must answer our outstanding replacement; the peer's
/// parameters (if any) become the content's current transport.
pub(crate) fn handle_transport_accept(
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
        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        let Some(pending) = content.take_pending_transport() else {
            continue;
        };
        let adopted = element.transport.clone().unwrap_or(pending);
        info!(
            sid = %message.sid,
            content = %element.name,
            namespace = %adopted.namespace,
            "transport replacement accepted"
        );
        content.set_transport(adopted);
        ctx.establish_if_ready(element.creator, &element.name);
    }
    Ok(())
}
