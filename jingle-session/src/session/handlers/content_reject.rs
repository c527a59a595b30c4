//! Handlers for content-reject and content-remove
//!
//! Both drop contents from negotiation and cancel their transfers. A session
//! left without any live content is terminated.

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, Reason};
use tracing::info;

use super::{Effect, HandlerContext, existing, reason_or};
use crate::content::ContentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Withdrawal {
    Reject,
    Remove,
}

/// Handle content-reject - the peer refuses contents we proposed
pub(crate) fn handle_content_reject(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    drop_contents(message, ctx, Withdrawal::Reject)
}

/// Handle content-remove - the peer withdraws contents
pub(crate) fn handle_content_remove(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    drop_contents(message, ctx, Withdrawal::Remove)
}

fn drop_contents(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
    operation: Withdrawal,
) -> Result<(), NegotiationError> {
    let local_role = ctx.session.role();
    for element in &message.contents {
        let content = existing(ctx.session, element)?;
        let allowed = match operation {
            Withdrawal::Reject => {
                content.creator() == local_role && content.state() == ContentState::Proposed
            }
            Withdrawal::Remove => content.is_live(),
        };
        if !allowed {
            return Err(NegotiationError::OutOfOrder);
        }
    }

    let state = ctx.session.state();
    for element in &message.contents {
        let Some(content) = ctx.session.content_mut(element.creator, &element.name) else {
            continue;
        };
        let result = match operation {
            Withdrawal::Reject => content.reject(state),
            Withdrawal::Remove => content.remove(state),
        };
        result.map_err(|_| NegotiationError::OutOfOrder)?;
        info!(
            sid = %message.sid,
            content = %element.name,
            ?operation,
            "content dropped by peer"
        );
        ctx.effects.push(Effect::CancelContent {
            creator: element.creator,
            name: element.name.clone(),
        });
    }

    if !ctx.session.has_live_contents() {
        ctx.terminate(reason_or(message, Reason::Cancel), true);
    }
    Ok(())
}
