//! Shared test utilities for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jingle_common::protocol::{Jid, JingleAction, JingleMessage, JingleResponse, TransportElement};
use jingle_session::loopback::{LoopbackBytestreams, LoopbackDirectory, LoopbackNetwork};
use jingle_session::transports::EstablishParams;
use jingle_session::{
    ByteChannel, EngineConfig, FileTransferManager, InBandTransport, JingleError, Listeners,
    MessageSender, SessionRegistry, TransportError, TransportPlugin,
};
use tokio::sync::mpsc;

pub const ROMEO: &str = "romeo@montague.example/orchard";
pub const JULIET: &str = "juliet@capulet.example/balcony";

/// How long a test waits for an asynchronous event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn jid(s: &str) -> Jid {
    Jid::parse(s).unwrap()
}

/// Route engine logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ============================================================================
// Message recording
// ============================================================================

/// Forwards to the loopback network and keeps a copy of every request
pub struct RecordingSender {
    network: Arc<LoopbackNetwork>,
    sent: Mutex<Vec<JingleMessage>>,
}

impl RecordingSender {
    pub fn new(network: Arc<LoopbackNetwork>) -> Arc<Self> {
        Arc::new(Self {
            network,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<JingleMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_actions(&self) -> Vec<JingleAction> {
        self.sent().iter().map(|m| m.action).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, to: &Jid, message: JingleMessage) -> Result<JingleResponse, JingleError> {
        self.sent.lock().unwrap().push(message.clone());
        self.network.send(to, message).await
    }
}

// ============================================================================
// Transports
// ============================================================================

/// Transport whose establishment always fails
pub struct FailingTransport(pub &'static str);

#[async_trait]
impl TransportPlugin for FailingTransport {
    fn namespace(&self) -> &str {
        self.0
    }

    fn propose_for_initiator(&self, _content_name: &str) -> TransportElement {
        TransportElement::new(self.0).with_sid("doomed")
    }

    fn propose_from_peer_offer(
        &self,
        remote: &TransportElement,
    ) -> Result<TransportElement, TransportError> {
        Ok(remote.clone())
    }

    async fn establish(&self, _params: EstablishParams) -> Result<ByteChannel, TransportError> {
        Err(TransportError::Rejected(format!("{} is unreachable", self.0)))
    }
}

// ============================================================================
// Peers
// ============================================================================

/// One endpoint: its registry, file-transfer layer and outbound log
pub struct Peer {
    pub jid: Jid,
    pub registry: SessionRegistry,
    pub files: FileTransferManager,
    pub sender: Arc<RecordingSender>,
}

/// Two endpoints sharing a loopback network, directory and bytestreams
pub struct Pair {
    pub romeo: Peer,
    pub juliet: Peer,
    pub network: Arc<LoopbackNetwork>,
    pub directory: Arc<LoopbackDirectory>,
}

impl Pair {
    /// Both peers with the in-band transport only
    pub fn new() -> Self {
        let bytestreams = Arc::new(LoopbackBytestreams::new());
        Self::with_transports(move || {
            vec![Arc::new(InBandTransport::new(bytestreams.clone())) as Arc<dyn TransportPlugin>]
        })
    }

    /// Both peers with the transports `plugins` builds, in that order
    pub fn with_transports<F>(plugins: F) -> Self
    where
        F: Fn() -> Vec<Arc<dyn TransportPlugin>>,
    {
        init_tracing();
        let network = LoopbackNetwork::new();
        let directory = LoopbackDirectory::new();
        let romeo = peer(jid(ROMEO), &network, &directory, plugins());
        let juliet = peer(jid(JULIET), &network, &directory, plugins());
        Self {
            romeo,
            juliet,
            network,
            directory,
        }
    }
}

fn peer(
    local: Jid,
    network: &Arc<LoopbackNetwork>,
    directory: &Arc<LoopbackDirectory>,
    plugins: Vec<Arc<dyn TransportPlugin>>,
) -> Peer {
    let sender = RecordingSender::new(network.clone());
    let mut builder = SessionRegistry::builder(
        local.clone(),
        sender.clone(),
        directory.discovery(local.clone()),
    )
    .config(EngineConfig {
        establish_timeout_secs: 5,
        // Rank transports in registration order
        transport_preference: Vec::new(),
        ..Default::default()
    });
    for plugin in plugins {
        builder = builder.transport(plugin);
    }
    let registry = builder.build().unwrap();
    network.attach(&registry);
    let files = FileTransferManager::new(registry.clone());
    Peer {
        jid: local,
        registry,
        files,
        sender,
    }
}

// ============================================================================
// Events
// ============================================================================

/// Forward every event of one kind into a channel
pub fn subscribe<E>(listeners: &Listeners<E>) -> mpsc::UnboundedReceiver<E>
where
    E: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    listeners.add(move |event: &E| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Next event, failing the test if none arrives in time
pub async fn next<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Wait until `registry` holds no sessions
pub async fn wait_until_idle(registry: &SessionRegistry) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while registry.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions did not end in time");
}
