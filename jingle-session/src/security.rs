//! Pluggable content security layers
//!
//! A security layer wraps an established byte channel before the transfer
//! starts (for example, to encrypt payloads end to end). Contents name the
//! layer by namespace; an unknown namespace ends the session with
//! `security-error`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jingle_common::protocol::Role;

use crate::error::TransportError;
use crate::transports::ByteChannel;

/// A security layer that can be attached to a content
#[async_trait]
pub trait SecurityLayer: Send + Sync {
    fn namespace(&self) -> &str;

    /// Wrap a freshly established channel
    async fn wrap(&self, channel: ByteChannel, role: Role) -> Result<ByteChannel, TransportError>;
}

/// Security layers keyed by namespace
#[derive(Default)]
pub struct SecurityRegistry {
    layers: HashMap<String, Arc<dyn SecurityLayer>>,
}

impl SecurityRegistry {
    pub fn new(layers: Vec<Arc<dyn SecurityLayer>>) -> Self {
        let layers = layers
            .into_iter()
            .map(|layer| (layer.namespace().to_string(), layer))
            .collect();
        Self { layers }
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn SecurityLayer>> {
        self.layers.get(namespace).cloned()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.layers.contains_key(namespace)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.layers.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    #[async_trait]
    impl SecurityLayer for Passthrough {
        fn namespace(&self) -> &str {
            "urn:test:passthrough"
        }

        async fn wrap(
            &self,
            channel: ByteChannel,
            _role: Role,
        ) -> Result<ByteChannel, TransportError> {
            Ok(channel)
        }
    }

    #[test]
    fn test_lookup() {
        let registry = SecurityRegistry::new(vec![Arc::new(Passthrough)]);
        assert!(registry.contains("urn:test:passthrough"));
        assert!(registry.get("urn:test:other").is_none());
        assert_eq!(registry.namespaces(), vec!["urn:test:passthrough"]);
        assert!(SecurityRegistry::default().namespaces().is_empty());
    }
}
