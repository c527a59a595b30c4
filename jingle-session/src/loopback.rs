//! In-process stand-ins for the IM connection
//!
//! Wires several [`SessionRegistry`] instances together inside one process:
//! signaling is a direct call into the peer's registry, discovery is a
//! shared feature table and in-band bytestreams are in-memory duplex pipes.
//! Used by the tests and handy for embedding the engine without a server.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jingle_common::protocol::{Jid, JingleMessage, JingleResponse};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tracing::debug;

use crate::capability::Discovery;
use crate::error::JingleError;
use crate::messaging::MessageSender;
use crate::registry::{SessionRegistry, WeakSessionRegistry};
use crate::transports::{ByteChannel, InBandBytestreamProvider};

/// Buffer size of each in-memory pipe (64KB)
const PIPE_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Signaling
// =============================================================================

/// Delivers Jingle requests straight into the addressed registry
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: Mutex<HashMap<Jid, WeakSessionRegistry>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `registry` reachable at its local address
    pub fn attach(&self, registry: &SessionRegistry) {
        self.endpoints
            .lock()
            .expect("endpoint lock poisoned")
            .insert(registry.local().clone(), registry.downgrade());
    }

    /// Take an address off the network; later requests to it fail
    pub fn detach(&self, jid: &Jid) -> bool {
        self.endpoints
            .lock()
            .expect("endpoint lock poisoned")
            .remove(jid)
            .is_some()
    }
}

#[async_trait]
impl MessageSender for LoopbackNetwork {
    async fn send(&self, to: &Jid, message: JingleMessage) -> Result<JingleResponse, JingleError> {
        let endpoint = self
            .endpoints
            .lock()
            .expect("endpoint lock poisoned")
            .get(to)
            .and_then(WeakSessionRegistry::upgrade);
        match endpoint {
            Some(registry) => Ok(registry.dispatch(message).await),
            None => Err(JingleError::Delivery(format!("{to} is unreachable"))),
        }
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Shared feature table for a set of loopback endpoints
#[derive(Default)]
pub struct LoopbackDirectory {
    features: Mutex<HashMap<Jid, BTreeSet<String>>>,
}

impl LoopbackDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the features advertised by `jid`
    pub fn set_features<I, S>(&self, jid: &Jid, features: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features
            .lock()
            .expect("directory lock poisoned")
            .insert(jid.clone(), features.into_iter().map(Into::into).collect());
    }

    /// Features advertised by `jid`, sorted
    pub fn features(&self, jid: &Jid) -> Vec<String> {
        self.features
            .lock()
            .expect("directory lock poisoned")
            .get(jid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Discovery service for the endpoint at `local`
    pub fn discovery(self: &Arc<Self>, local: Jid) -> Arc<dyn Discovery> {
        Arc::new(LoopbackDiscovery {
            directory: Arc::clone(self),
            local,
        })
    }
}

struct LoopbackDiscovery {
    directory: Arc<LoopbackDirectory>,
    local: Jid,
}

#[async_trait]
impl Discovery for LoopbackDiscovery {
    async fn supports(&self, peer: &Jid, namespace: &str) -> Result<bool, JingleError> {
        Ok(self
            .directory
            .features
            .lock()
            .expect("directory lock poisoned")
            .get(peer)
            .is_some_and(|set| set.contains(namespace)))
    }

    fn announce(&self, namespace: &str) {
        self.directory
            .features
            .lock()
            .expect("directory lock poisoned")
            .entry(self.local.clone())
            .or_default()
            .insert(namespace.to_string());
    }
}

// =============================================================================
// In-band bytestreams
// =============================================================================

/// Which end of a stream is waiting for its counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Connector,
    Acceptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    connector: Jid,
    acceptor: Jid,
    stream_id: String,
}

/// Pairs `connect` and `accept` calls on the same stream through
/// in-memory pipes
#[derive(Default)]
pub struct LoopbackBytestreams {
    waiting: Mutex<HashMap<StreamKey, (Side, oneshot::Sender<DuplexStream>)>>,
}

impl LoopbackBytestreams {
    pub fn new() -> Self {
        Self::default()
    }

    async fn rendezvous(&self, key: StreamKey, side: Side) -> io::Result<ByteChannel> {
        let receiver = {
            let mut waiting = self.waiting.lock().expect("bytestream lock poisoned");
            let pairable = waiting
                .get(&key)
                .is_some_and(|(waiting_side, _)| *waiting_side != side);
            if pairable && let Some((_, counterpart)) = waiting.remove(&key) {
                let (ours, theirs) = tokio::io::duplex(PIPE_BUFFER_SIZE);
                if counterpart.send(theirs).is_ok() {
                    debug!(stream_id = %key.stream_id, ?side, "bytestream paired");
                    return Ok(Box::new(ours) as ByteChannel);
                }
                // The waiting side gave up; wait in its place
            }
            let (sender, receiver) = oneshot::channel();
            waiting.insert(key, (side, sender));
            receiver
        };

        receiver
            .await
            .map(|stream| Box::new(stream) as ByteChannel)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "bytestream abandoned"))
    }
}

#[async_trait]
impl InBandBytestreamProvider for LoopbackBytestreams {
    async fn connect(
        &self,
        local: &Jid,
        peer: &Jid,
        stream_id: &str,
        _block_size: u32,
    ) -> io::Result<ByteChannel> {
        let key = StreamKey {
            connector: local.clone(),
            acceptor: peer.clone(),
            stream_id: stream_id.to_string(),
        };
        self.rendezvous(key, Side::Connector).await
    }

    async fn accept(&self, local: &Jid, peer: &Jid, stream_id: &str) -> io::Result<ByteChannel> {
        let key = StreamKey {
            connector: peer.clone(),
            acceptor: local.clone(),
            stream_id: stream_id.to_string(),
        };
        self.rendezvous(key, Side::Acceptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_accept_pair_up() {
        let streams = LoopbackBytestreams::new();
        let romeo = jid("romeo@montague.example/orchard");
        let juliet = jid("juliet@capulet.example/balcony");

        let (a, b) = tokio::join!(
            streams.connect(&romeo, &juliet, "s1", 4096),
            streams.accept(&juliet, &romeo, "s1"),
        );
        let mut a = a.unwrap();
        let mut b = b.unwrap();
        b.write_all(b"balcony").await.unwrap();
        b.shutdown().await.unwrap();
        let mut received = Vec::new();
        a.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"balcony");
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_replaced() {
        let streams = Arc::new(LoopbackBytestreams::new());
        let romeo = jid("romeo@montague.example/orchard");
        let juliet = jid("juliet@capulet.example/balcony");

        // An accept that times out leaves a dead waiter behind
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), streams.accept(&juliet, &romeo, "s1"))
                .await;
        assert!(abandoned.is_err());

        let (a, b) = tokio::join!(
            streams.connect(&romeo, &juliet, "s1", 4096),
            streams.accept(&juliet, &romeo, "s1"),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_directory_announce_and_lookup() {
        let directory = LoopbackDirectory::new();
        let romeo = jid("romeo@montague.example/orchard");
        let juliet = jid("juliet@capulet.example/balcony");

        let discovery = directory.discovery(romeo.clone());
        discovery.announce("urn:xmpp:jingle:1");
        assert_eq!(directory.features(&romeo), vec!["urn:xmpp:jingle:1"]);

        let juliet_view = directory.discovery(juliet);
        assert!(
            juliet_view
                .supports(&romeo, "urn:xmpp:jingle:1")
                .await
                .unwrap()
        );
        assert!(!juliet_view.supports(&romeo, "urn:other").await.unwrap());
    }

    #[tokio::test]
    async fn test_unattached_peer_is_unreachable() {
        let network = LoopbackNetwork::new();
        let juliet = jid("juliet@capulet.example/balcony");
        let message = JingleMessage::new(
            jid("romeo@montague.example/orchard"),
            juliet.clone(),
            jingle_common::protocol::JingleAction::SessionInfo,
            jingle_common::protocol::SessionId::generate(),
        );
        let result = network.send(&juliet, message).await;
        assert!(matches!(result, Err(JingleError::Delivery(_))));
        assert!(!network.detach(&juliet));
    }
}
