//! Handler for session-terminate - the peer ends the session

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, Reason};
use tracing::info;

use super::{HandlerContext, reason_or};

/// Handle session-terminate
///
/// The registry removes the session and notifies listeners once the
/// terminate effect is applied. A missing reason counts as general-error.
pub(crate) fn handle_session_terminate(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    let reason = reason_or(message, Reason::GeneralError);
    info!(
        sid = %message.sid,
        peer = %message.from,
        reason = %reason.reason,
        "session terminated by peer"
    );
    ctx.terminate(reason, false);
    Ok(())
}
