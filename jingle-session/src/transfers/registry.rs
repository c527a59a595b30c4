//! Transfer registry for tracking running content transfers
//!
//! Every transfer task registers here while it moves bytes. The registry
//! hands out a oneshot cancel signal per transfer so a content-remove or a
//! session termination can stop it without holding any lock during I/O.
//! Progress counters are atomics shared with the running task.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jingle_common::protocol::Creator;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::session::SessionKey;

/// Unique identifier for a running transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

impl TransferId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way the bytes of a transfer flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Local file to the peer
    Send,
    /// Peer to a local file
    Receive,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Serializable view of a running transfer, for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferInfo {
    pub id: u64,
    pub peer: String,
    pub sid: String,
    pub content: String,
    pub direction: TransferDirection,
    pub path: PathBuf,
    pub total_size: u64,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
}

/// Runtime state of one transfer, shared between the registry and its task
pub struct ActiveTransfer {
    pub id: TransferId,
    pub session: SessionKey,
    pub creator: Creator,
    pub content: String,
    pub direction: TransferDirection,
    /// Local file read from or written to
    pub path: PathBuf,
    /// Bytes this transfer moves (the range length for ranged transfers)
    pub total_size: u64,
    bytes_transferred: AtomicU64,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    // Taken once, when the transfer is cancelled
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ActiveTransfer {
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Add to bytes transferred, returns the new total
    pub fn add_bytes_transferred(&self, bytes: u64) -> u64 {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_for(&self, session: &SessionKey, creator: Creator, content: &str) -> bool {
        &self.session == session && self.creator == creator && self.content == content
    }

    /// Fire the cancel signal
    ///
    /// Returns `true` if the signal was delivered, `false` if it was already
    /// sent or the task is gone.
    fn send_cancel_signal(&self) -> bool {
        let mut guard = self.cancel_tx.lock().expect("cancel_tx lock poisoned");
        match guard.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn to_info(&self) -> TransferInfo {
        TransferInfo {
            id: self.id.as_u64(),
            peer: self.session.remote.to_string(),
            sid: self.session.sid.to_string(),
            content: self.content.clone(),
            direction: self.direction,
            path: self.path.clone(),
            total_size: self.total_size,
            bytes_transferred: self.bytes_transferred(),
            started_at: self.started_wall,
        }
    }
}

impl fmt::Debug for ActiveTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTransfer")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("content", &self.content)
            .field("direction", &self.direction)
            .field("path", &self.path)
            .field("total_size", &self.total_size)
            .field("bytes_transferred", &self.bytes_transferred())
            .finish()
    }
}

/// Registration details for a new transfer
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub session: SessionKey,
    pub creator: Creator,
    pub content: String,
    pub direction: TransferDirection,
    pub path: PathBuf,
    pub total_size: u64,
}

/// Thread-safe set of running transfers
///
/// Transfers stay registered until their task unregisters them (usually via
/// [`TransferGuard`]); cancelling only signals the task.
pub struct TransferRegistry {
    transfers: Mutex<HashMap<TransferId, Arc<ActiveTransfer>>>,
    next_id: AtomicU64,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a transfer and get its shared state and cancel receiver
    pub fn register(
        &self,
        spec: TransferSpec,
    ) -> (TransferId, Arc<ActiveTransfer>, oneshot::Receiver<()>) {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let active = Arc::new(ActiveTransfer {
            id,
            session: spec.session,
            creator: spec.creator,
            content: spec.content,
            direction: spec.direction,
            path: spec.path,
            total_size: spec.total_size,
            bytes_transferred: AtomicU64::new(0),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            cancel_tx: Mutex::new(Some(cancel_tx)),
        });

        self.transfers
            .lock()
            .expect("transfer registry lock poisoned")
            .insert(id, Arc::clone(&active));

        (id, active, cancel_rx)
    }

    pub fn unregister(&self, id: TransferId) {
        self.transfers
            .lock()
            .expect("transfer registry lock poisoned")
            .remove(&id);
    }

    /// Signal every transfer the predicate selects; returns how many were signalled
    pub fn cancel_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ActiveTransfer) -> bool,
    {
        let transfers = self
            .transfers
            .lock()
            .expect("transfer registry lock poisoned");

        transfers
            .values()
            .filter(|active| predicate(active) && active.send_cancel_signal())
            .count()
    }

    /// Cancel all transfers belonging to a session
    pub fn cancel_session(&self, session: &SessionKey) -> usize {
        self.cancel_matching(|active| &active.session == session)
    }

    /// Cancel the transfer of one content
    pub fn cancel_content(&self, session: &SessionKey, creator: Creator, content: &str) -> usize {
        self.cancel_matching(|active| active.is_for(session, creator, content))
    }

    pub fn snapshot(&self) -> Vec<Arc<ActiveTransfer>> {
        self.transfers
            .lock()
            .expect("transfer registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.transfers
            .lock()
            .expect("transfer registry lock poisoned")
            .len()
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters a transfer when dropped, even if its task unwinds early
pub struct TransferGuard {
    registry: Arc<TransferRegistry>,
    id: TransferId,
}

impl TransferGuard {
    pub fn new(registry: Arc<TransferRegistry>, id: TransferId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
