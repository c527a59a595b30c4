//! Ranked set of transport plugins

use std::collections::BTreeSet;
use std::sync::Arc;

use jingle_common::protocol::Jid;
use tracing::{debug, warn};

use super::TransportPlugin;
use crate::capability::CapabilityRegistry;

/// Transport plugins ordered by local preference
pub struct TransportManager {
    plugins: Vec<Arc<dyn TransportPlugin>>,
}

impl TransportManager {
    /// Rank `plugins` by their position in `preference`
    ///
    /// Unlisted plugins keep registration order after the listed ones. A
    /// second plugin for an already registered namespace is ignored.
    pub fn new(plugins: Vec<Arc<dyn TransportPlugin>>, preference: &[String]) -> Self {
        let mut ranked: Vec<Arc<dyn TransportPlugin>> = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            if ranked.iter().any(|p| p.namespace() == plugin.namespace()) {
                warn!(
                    namespace = plugin.namespace(),
                    "duplicate transport plugin ignored"
                );
                continue;
            }
            ranked.push(plugin);
        }
        ranked.sort_by_key(|plugin| {
            preference
                .iter()
                .position(|ns| ns == plugin.namespace())
                .unwrap_or(usize::MAX)
        });
        Self { plugins: ranked }
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn TransportPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.namespace() == namespace)
            .cloned()
    }

    /// Plugins in preference order
    pub fn ranked(&self) -> &[Arc<dyn TransportPlugin>] {
        &self.plugins
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.plugins
            .iter()
            .map(|p| p.namespace().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Most preferred plugin that `peer` supports and that is not excluded
    pub async fn best_for(
        &self,
        peer: &Jid,
        capabilities: &CapabilityRegistry,
        excluded: &BTreeSet<String>,
    ) -> Option<Arc<dyn TransportPlugin>> {
        for plugin in &self.plugins {
            let namespace = plugin.namespace();
            if excluded.contains(namespace) {
                continue;
            }
            if capabilities.supports(peer, namespace).await {
                return Some(Arc::clone(plugin));
            }
            debug!(%peer, namespace, "peer does not support transport");
        }
        None
    }
}
