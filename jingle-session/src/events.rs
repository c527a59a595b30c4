//! Event kinds and listener registration
//!
//! Each event kind has its own [`Listeners`] list. Callbacks are cloned out
//! of the list before they run, so a callback may register or remove
//! listeners without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use jingle_common::protocol::{Jid, Reason, SessionId};

use crate::error::TransferFailure;
use crate::file_transfer::{IncomingFileOffer, IncomingFileRequest};
use crate::transfers::TransferDirection;

/// Handle returned by listener registration, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registered callbacks for one event kind
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .expect("listener lock poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().expect("listener lock poisoned");
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .entries
            .lock()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("listener lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal outcome of one content's transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success { bytes: u64 },
    Failure(TransferFailure),
}

impl TransferOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Progress of a single transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub sid: SessionId,
    pub peer: Jid,
    pub content: String,
    pub kind: TransferEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEventKind {
    Started {
        direction: TransferDirection,
        total: u64,
    },
    Progress {
        bytes: u64,
        total: u64,
    },
    Finished(TransferOutcome),
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Terminated {
        sid: SessionId,
        peer: Jid,
        reason: Reason,
        /// Transport namespaces that failed during the session
        failed_transports: Vec<String>,
    },
}

/// All listener lists owned by one session registry
#[derive(Default)]
pub struct EventHub {
    pub offers: Listeners<IncomingFileOffer>,
    pub requests: Listeners<IncomingFileRequest>,
    pub transfers: Listeners<TransferEvent>,
    pub sessions: Listeners<SessionEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_add_notify_remove() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let id = listeners.add(move |n| {
            t.fetch_add(*n as usize, Ordering::SeqCst);
        });
        listeners.notify(&5);
        assert_eq!(total.load(Ordering::SeqCst), 5);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.notify(&5);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_unique_ids() {
        let listeners: Listeners<()> = Listeners::new();
        let a = listeners.add(|_| {});
        let b = listeners.add(|_| {});
        assert_ne!(a, b);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_callback_may_register_listener() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let inner = listeners.clone();
        listeners.add(move |_| {
            inner.add(|_| {});
        });
        listeners.notify(&());
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_outcome_is_success() {
        assert!(TransferOutcome::Success { bytes: 3 }.is_success());
        assert!(!TransferOutcome::Failure(TransferFailure::Cancelled).is_success());
    }
}
