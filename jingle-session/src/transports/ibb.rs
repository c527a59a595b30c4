//! In-band bytestream transport
//!
//! Bytes travel as base64 chunks over the IM connection itself, so this
//! method works whenever signaling works. The actual stream is provided by
//! an [`InBandBytestreamProvider`]; this plugin only negotiates block size
//! and stream id and decides who opens the stream. The session initiator
//! connects and the responder accepts.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use jingle_common::protocol::{Jid, Role, TransportElement};
use jingle_common::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, NS_IBB_TRANSPORT};
use tracing::debug;
use uuid::Uuid;

use super::{ByteChannel, EstablishParams, TransportPlugin};
use crate::config::EngineConfig;
use crate::error::TransportError;

/// Opens and accepts in-band bytestreams on the IM connection
#[async_trait]
pub trait InBandBytestreamProvider: Send + Sync {
    /// Open a stream to `peer`
    async fn connect(
        &self,
        local: &Jid,
        peer: &Jid,
        stream_id: &str,
        block_size: u32,
    ) -> io::Result<ByteChannel>;

    /// Wait for `peer` to open the stream with `stream_id`
    async fn accept(&self, local: &Jid, peer: &Jid, stream_id: &str) -> io::Result<ByteChannel>;
}

/// Transport plugin for `urn:xmpp:jingle:transports:ibb:1`
pub struct InBandTransport {
    provider: Arc<dyn InBandBytestreamProvider>,
    block_size: u32,
    max_block_size: u32,
}

impl InBandTransport {
    pub fn new(provider: Arc<dyn InBandBytestreamProvider>) -> Self {
        Self {
            provider,
            block_size: DEFAULT_BLOCK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
        }
    }

    /// Plugin using the configured block sizes
    pub fn from_config(provider: Arc<dyn InBandBytestreamProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            block_size: config.ibb_block_size,
            max_block_size: config.max_ibb_block_size,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}

fn negotiated_block_size(descriptor: &TransportElement) -> u32 {
    descriptor.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
}

#[async_trait]
impl TransportPlugin for InBandTransport {
    fn namespace(&self) -> &str {
        NS_IBB_TRANSPORT
    }

    fn propose_for_initiator(&self, _content_name: &str) -> TransportElement {
        TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(self.block_size)
            .with_sid(Uuid::new_v4().simple().to_string())
    }

    fn propose_from_peer_offer(
        &self,
        remote: &TransportElement,
    ) -> Result<TransportElement, TransportError> {
        if remote.namespace != NS_IBB_TRANSPORT {
            return Err(TransportError::Incompatible(format!(
                "not an in-band transport: {}",
                remote.namespace
            )));
        }
        let Some(stream_id) = remote.sid.clone() else {
            return Err(TransportError::Incompatible("missing stream id".into()));
        };
        let remote_block = negotiated_block_size(remote);
        if remote_block == 0 {
            return Err(TransportError::Incompatible("zero block size".into()));
        }

        let block_size = remote_block.min(self.block_size).min(self.max_block_size);
        Ok(TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(block_size)
            .with_sid(stream_id))
    }

    async fn establish(&self, params: EstablishParams) -> Result<ByteChannel, TransportError> {
        let Some(stream_id) = params.descriptor.sid.as_deref() else {
            return Err(TransportError::Incompatible("missing stream id".into()));
        };
        let block_size = negotiated_block_size(&params.descriptor);
        debug!(
            sid = %params.sid,
            stream_id,
            block_size,
            role = %params.role,
            "establishing in-band bytestream"
        );

        let channel = match params.role {
            Role::Initiator => {
                self.provider
                    .connect(&params.local, &params.remote, stream_id, block_size)
                    .await?
            }
            Role::Responder => {
                self.provider
                    .accept(&params.local, &params.remote, stream_id)
                    .await?
            }
        };
        Ok(channel)
    }

    fn chunk_size(&self, descriptor: &TransportElement) -> Option<usize> {
        Some(negotiated_block_size(descriptor) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use jingle_common::protocol::SessionId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::loopback::LoopbackBytestreams;

    fn plugin() -> InBandTransport {
        InBandTransport::new(Arc::new(LoopbackBytestreams::new()))
    }

    #[test]
    fn test_initiator_proposal() {
        let proposal = plugin().propose_for_initiator("file");
        assert_eq!(proposal.namespace, NS_IBB_TRANSPORT);
        assert_eq!(proposal.block_size, Some(4096));
        assert!(proposal.sid.is_some());
    }

    #[test]
    fn test_counter_takes_minimum() {
        let plugin = plugin();
        let remote = TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(2048)
            .with_sid("s1");
        let counter = plugin.propose_from_peer_offer(&remote).unwrap();
        assert_eq!(counter.block_size, Some(2048));
        assert_eq!(counter.sid.as_deref(), Some("s1"));

        let remote = TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(60000)
            .with_sid("s2");
        let counter = plugin.propose_from_peer_offer(&remote).unwrap();
        assert_eq!(counter.block_size, Some(4096));
    }

    #[test]
    fn test_counter_defaults_missing_block_size() {
        let remote = TransportElement::new(NS_IBB_TRANSPORT).with_sid("s1");
        let counter = plugin().propose_from_peer_offer(&remote).unwrap();
        assert_eq!(counter.block_size, Some(DEFAULT_BLOCK_SIZE));
    }

    #[test]
    fn test_counter_rejects_bad_offers() {
        let plugin = plugin();
        let no_sid = TransportElement::new(NS_IBB_TRANSPORT).with_block_size(4096);
        assert!(matches!(
            plugin.propose_from_peer_offer(&no_sid),
            Err(TransportError::Incompatible(_))
        ));

        let zero = TransportElement::new(NS_IBB_TRANSPORT)
            .with_block_size(0)
            .with_sid("s");
        assert!(plugin.propose_from_peer_offer(&zero).is_err());

        let foreign = TransportElement::new("urn:xmpp:jingle:transports:s5b:1").with_sid("s");
        assert!(plugin.propose_from_peer_offer(&foreign).is_err());
    }

    #[test]
    fn test_chunk_size_follows_block_size() {
        let descriptor = TransportElement::new(NS_IBB_TRANSPORT).with_block_size(1024);
        assert_eq!(plugin().chunk_size(&descriptor), Some(1024));
    }

    #[tokio::test]
    async fn test_initiator_connects_responder_accepts() {
        let streams = Arc::new(LoopbackBytestreams::new());
        let plugin = InBandTransport::new(streams);
        let romeo = Jid::parse("romeo@montague.example/orchard").unwrap();
        let juliet = Jid::parse("juliet@capulet.example/balcony").unwrap();
        let sid = SessionId::generate();
        let descriptor = plugin.propose_for_initiator("file");

        let params = |local: &Jid, remote: &Jid, role| EstablishParams {
            local: local.clone(),
            remote: remote.clone(),
            sid: sid.clone(),
            role,
            descriptor: descriptor.clone(),
            timeout: Duration::from_secs(5),
        };

        let (connected, accepted) = tokio::join!(
            plugin.establish(params(&romeo, &juliet, Role::Initiator)),
            plugin.establish(params(&juliet, &romeo, Role::Responder)),
        );
        let mut a = connected.unwrap();
        let mut b = accepted.unwrap();

        a.write_all(b"wherefore").await.unwrap();
        a.shutdown().await.unwrap();
        let mut received = Vec::new();
        b.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"wherefore");
    }
}
