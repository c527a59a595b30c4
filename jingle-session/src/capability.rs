//! Capability registry
//!
//! Tracks which namespaces this endpoint announces and answers "does the
//! peer support X" through the external discovery service.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jingle_common::protocol::Jid;
use tracing::{debug, warn};

use crate::error::JingleError;

/// Service discovery, provided by the IM connection
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Whether `peer` advertises `namespace`
    async fn supports(&self, peer: &Jid, namespace: &str) -> Result<bool, JingleError>;

    /// Advertise `namespace` as supported by the local endpoint
    fn announce(&self, namespace: &str);
}

/// Local announcements plus peer capability lookups
pub struct CapabilityRegistry {
    discovery: Arc<dyn Discovery>,
    announced: Mutex<BTreeSet<String>>,
}

impl CapabilityRegistry {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            announced: Mutex::new(BTreeSet::new()),
        }
    }

    /// Announce a namespace once
    ///
    /// Returns `true` if this call announced it, `false` if it was already
    /// announced.
    pub fn announce(&self, namespace: &str) -> bool {
        let newly = self
            .announced
            .lock()
            .expect("capability lock poisoned")
            .insert(namespace.to_string());
        if newly {
            debug!(namespace, "announcing feature");
            self.discovery.announce(namespace);
        }
        newly
    }

    pub fn is_announced(&self, namespace: &str) -> bool {
        self.announced
            .lock()
            .expect("capability lock poisoned")
            .contains(namespace)
    }

    /// Snapshot of announced namespaces
    pub fn announced(&self) -> Vec<String> {
        self.announced
            .lock()
            .expect("capability lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Whether `peer` supports `namespace`
    ///
    /// Discovery failures are logged and treated as "unsupported"; there
    /// are no retries.
    pub async fn supports(&self, peer: &Jid, namespace: &str) -> bool {
        match self.discovery.supports(peer, namespace).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(%peer, namespace, error = %e, "capability lookup failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDiscovery {
        announcements: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Discovery for CountingDiscovery {
        async fn supports(&self, _peer: &Jid, namespace: &str) -> Result<bool, JingleError> {
            if self.fail {
                return Err(JingleError::Delivery("disco timeout".into()));
            }
            Ok(namespace == "urn:test:yes")
        }

        fn announce(&self, _namespace: &str) {
            self.announcements.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry(fail: bool) -> (CapabilityRegistry, Arc<CountingDiscovery>) {
        let discovery = Arc::new(CountingDiscovery {
            announcements: AtomicUsize::new(0),
            fail,
        });
        (CapabilityRegistry::new(discovery.clone()), discovery)
    }

    #[test]
    fn test_announce_once() {
        let (caps, discovery) = registry(false);
        assert!(caps.announce("urn:test:a"));
        assert!(!caps.announce("urn:test:a"));
        assert!(caps.announce("urn:test:b"));
        assert_eq!(discovery.announcements.load(Ordering::SeqCst), 2);
        assert!(caps.is_announced("urn:test:a"));
        assert_eq!(caps.announced(), vec!["urn:test:a", "urn:test:b"]);
    }

    #[tokio::test]
    async fn test_supports_delegates() {
        let (caps, _) = registry(false);
        let peer = Jid::parse("juliet@capulet.example/balcony").unwrap();
        assert!(caps.supports(&peer, "urn:test:yes").await);
        assert!(!caps.supports(&peer, "urn:test:no").await);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_unsupported() {
        let (caps, _) = registry(true);
        let peer = Jid::parse("juliet@capulet.example/balcony").unwrap();
        assert!(!caps.supports(&peer, "urn:test:yes").await);
    }
}
