//! Handler for session-info - informational payloads

use jingle_common::NegotiationError;
use jingle_common::protocol::{JingleMessage, SessionInfo};
use tracing::{debug, info};

use super::HandlerContext;
use crate::session::SessionState;

/// Handle session-info
///
/// An empty payload is a ping. Checksums update the digest of the named
/// content; "received" is recorded on the content. Only a checksum may
/// arrive before the session is accepted.
pub(crate) fn handle_session_info(
    message: &JingleMessage,
    ctx: &mut HandlerContext<'_>,
) -> Result<(), NegotiationError> {
    let early_checksum = matches!(message.info, Some(SessionInfo::Checksum { .. }));
    if ctx.session.state() != SessionState::Active && !early_checksum {
        return Err(NegotiationError::OutOfOrder);
    }
    match &message.info {
        None | Some(SessionInfo::Ping) => {
            debug!(sid = %message.sid, peer = %message.from, "ping");
            Ok(())
        }
        Some(SessionInfo::Checksum {
            creator,
            name,
            file,
        }) => {
            if file.hashes.is_empty() {
                return Err(NegotiationError::BadRequest);
            }
            let target = ctx
                .session
                .content_mut(*creator, name)
                .and_then(|content| content.file_mut())
                .ok_or(NegotiationError::BadRequest)?;
            for hash in &file.hashes {
                target.set_hash(hash.clone());
            }
            info!(
                sid = %message.sid,
                content = %name,
                hashes = file.hashes.len(),
                "checksum received"
            );
            Ok(())
        }
        Some(SessionInfo::Received { creator, name }) => {
            let content = ctx
                .session
                .content_mut(*creator, name)
                .ok_or(NegotiationError::BadRequest)?;
            content.mark_peer_received();
            info!(sid = %message.sid, content = %name, "peer received content");
            Ok(())
        }
        Some(SessionInfo::Other { namespace }) => {
            debug!(sid = %message.sid, %namespace, "unsupported session-info");
            Err(NegotiationError::UnsupportedInfo)
        }
    }
}
