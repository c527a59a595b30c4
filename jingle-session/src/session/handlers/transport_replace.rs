//! Handler for transport-replace - the peer proposes a different transport

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleAction, JingleMessage};
use tracing::{debug, info, warn};

use super::{HandlerContext, existing};

/// Handle transport-replace
///
/// If we have our own replacement outstanding for the same content, the
/// initiator wins the tie-break: as initiator we answer conflict, as
/// responder we drop our proposal. A namespace that already failed in this
/// session, or one we have no plugin for, is answered with transport-reject.
pub(crate) fn handle_transport_replace(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    for element in &message.contents {
        let content = existing(ctx.session, element)?;
        if element.transport.is_none() {
            return Err(NegotiationError::BadRequest);
        }
        if !content.is_live() {
            return Err(NegotiationError::OutOfOrder);
        }
        if content.pending_transport().is_some() && ctx.session.is_initiator() {
            debug!(
                sid = %message.sid,
                content = %element.name,
                "transport-replace tie-break won locally"
            );
            return Err(NegotiationError::Conflict);
        }
    }

    for element in &message.contents {
        let Some(proposal) = &element.transport else {
            continue;
        };
        let counter = if ctx.session.is_transport_failed(&proposal.namespace) {
            None
        } else {
            ctx.env
                .transports
                .get(&proposal.namespace)
                .and_then(|plugin| plugin.propose_from_peer_offer(proposal).ok())
        };

        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        if content.take_pending_transport().is_some() {
            debug!(
                sid = %message.sid,
                content = %element.name,
                "dropping own transport replacement after tie-break"
            );
        }

        match counter {
            Some(counter) => {
                info!(
                    sid = %message.sid,
                    content = %element.name,
                    namespace = %counter.namespace,
                    "transport replaced by peer"
                );
                content.set_transport(counter.clone());
                let accept = ctx.transport_message(
                    JingleAction::TransportAccept,
                    element.creator,
                    &element.name,
                    counter,
                );
                ctx.send(accept);
                ctx.establish_if_ready(element.creator, &element.name);
            }
            None => {
                warn!(
                    sid = %message.sid,
                    content = %element.name,
                    namespace = %proposal.namespace,
                    "refusing transport replacement"
                );
                let reject = ctx.transport_message(
                    JingleAction::TransportReject,
                    element.creator,
                    &element.name,
                    proposal.clone(),
                );
                ctx.send(reject);
            }
        }
    }
    Ok(())
}
