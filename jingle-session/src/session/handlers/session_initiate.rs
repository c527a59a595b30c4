//! Handler for session-initiate - a peer proposes a new session

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, Reason};
use tracing::{info, warn};

use super::{Effect, HandlerContext, Screened, screen_content};
use crate::session::SessionState;

/// Handle session-initiate on a freshly created responder session
///
/// Contents we cannot serve are still acknowledged; the session is then
/// terminated with the matching reason.
pub(crate) fn handle_session_initiate(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    if message
        .initiator
        .as_ref()
        .is_some_and(|initiator| *initiator != message.from)
    {
        return Err(NegotiationError::BadRequest);
    }
    if ctx.session.state() != SessionState::Pending || !ctx.session.contents().is_empty() {
        return Err(NegotiationError::OutOfOrder);
    }

    let mut usable = Vec::with_capacity(message.contents.len());
    let mut refusal: Option<Reason> = None;
    for element in &message.contents {
        match screen_content(ctx.session, ctx.env, element)? {
            Screened::Usable { content, kind } => usable.push((content, kind)),
            Screened::Refused(reason) => {
                warn!(
                    sid = %message.sid,
                    peer = %message.from,
                    content = %element.name,
                    %reason,
                    "refusing proposed content"
                );
                refusal.get_or_insert(reason);
            }
        }
    }

    info!(
        sid = %message.sid,
        peer = %message.from,
        contents = message.contents.len(),
        "session initiated by peer"
    );

    let mut incoming = Vec::with_capacity(usable.len());
    for (content, kind) in usable {
        incoming.push(Effect::Incoming {
            creator: content.creator(),
            name: content.name().to_string(),
            kind,
        });
        ctx.session.add_content(content)?;
    }

    if let Some(reason) = refusal {
        ctx.terminate(reason, true);
        return Ok(());
    }
    ctx.effects.extend(incoming);
    Ok(())
}
