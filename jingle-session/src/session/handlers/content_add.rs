//! Handler for content-add - the peer proposes more contents

use jingle_common::NegotiationError;
use jingle_common::protocol::{ContentElement, JingleAction, JingleMessage};
use tracing::{info, warn};

use super::{Effect, HandlerContext, Screened, screen_content};
use crate::session::SessionState;

/// Handle content-add on an active session
///
/// A name that collides with an existing content is a conflict. Contents
/// we cannot serve are answered with content-reject.
pub(crate) fn handle_content_add(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    if ctx.session.state() != SessionState::Active {
        return Err(NegotiationError::OutOfOrder);
    }

    let mut screened = Vec::with_capacity(message.contents.len());
    for element in &message.contents {
        if ctx.session.content(element.creator, &element.name).is_some() {
            return Err(NegotiationError::Conflict);
        }
        screened.push((element, screen_content(ctx.session, ctx.env, element)?));
    }

    for (element, outcome) in screened {
        match outcome {
            Screened::Usable { content, kind } => {
                info!(
                    sid = %message.sid,
                    content = %element.name,
                    ?kind,
                    "content added by peer"
                );
                ctx.session.add_content(content)?;
                ctx.effects.push(Effect::Incoming {
                    creator: element.creator,
                    name: element.name.clone(),
                    kind,
                });
            }
            Screened::Refused(reason) => {
                warn!(
                    sid = %message.sid,
                    content = %element.name,
                    %reason,
                    "rejecting added content"
                );
                let reject = ctx
                    .session
                    .message(JingleAction::ContentReject)
                    .with_content(ContentElement::new(element.creator, element.name.clone()))
                    .with_reason(reason);
                ctx.send(reject);
            }
        }
    }
    Ok(())
}
