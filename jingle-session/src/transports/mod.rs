//! Transport plugins
//!
//! A transport plugin knows one method of moving bytes between peers. It
//! builds descriptors for the signaling layer and, once both sides agree,
//! turns a descriptor into a live [`ByteChannel`].

mod ibb;
mod manager;

pub use ibb::{InBandBytestreamProvider, InBandTransport};
pub use manager::TransportManager;

use std::time::Duration;

use async_trait::async_trait;
use jingle_common::protocol::{Jid, Role, SessionId, TransportElement};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// Bidirectional byte stream produced by an established transport
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Owned, type-erased byte channel
pub type ByteChannel = Box<dyn ByteStream>;

/// Everything a plugin needs to perform its handshake
#[derive(Debug, Clone)]
pub struct EstablishParams {
    pub local: Jid,
    pub remote: Jid,
    pub sid: SessionId,
    /// Local role in the Jingle session
    pub role: Role,
    /// The agreed transport descriptor
    pub descriptor: TransportElement,
    /// Upper bound the engine enforces on this attempt
    pub timeout: Duration,
}

/// One transport method
#[async_trait]
pub trait TransportPlugin: Send + Sync {
    /// Stable namespace, used for capability checks and fallback bookkeeping
    fn namespace(&self) -> &str;

    /// Descriptor to attach to an outbound content
    ///
    /// Must not perform network I/O.
    fn propose_for_initiator(&self, content_name: &str) -> TransportElement;

    /// Counter-descriptor answering a peer's proposal
    fn propose_from_peer_offer(
        &self,
        remote: &TransportElement,
    ) -> Result<TransportElement, TransportError>;

    /// Perform the handshake and return a live channel
    ///
    /// The engine may drop this future at any await point when the attempt
    /// is superseded; implementations must release partial resources on drop.
    async fn establish(&self, params: EstablishParams) -> Result<ByteChannel, TransportError>;

    /// Chunk size dictated by the negotiated descriptor, if any
    fn chunk_size(&self, _descriptor: &TransportElement) -> Option<usize> {
        None
    }
}
