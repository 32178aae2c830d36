//! Transport registry: the platform adapters the gateway talks to.
//!
//! Outbound packets are dispatched to the transport named by the session's
//! platform.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use conduit_core::{Transport, TransportError};
use tracing::{info, warn};

/// Central registry holding all registered transports.
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Register a transport under its platform name, replacing any previous one.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        let name = transport.name().to_string();
        info!(transport = %name, "Registered transport");
        self.transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, transport);
    }

    /// Get a transport by platform name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Like [`get`](Self::get), but a missing transport is an error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.get(name).ok_or_else(|| {
            TransportError::NotConfigured(format!("Transport '{name}' not registered"))
        })
    }

    /// List all registered platform names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.transports.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Transport>)> {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Stop all transports gracefully. Failures are logged.
    pub async fn stop_all(&self) {
        for (name, transport) in self.snapshot() {
            if let Err(e) = transport.stop().await {
                warn!(transport = %name, error = %e, "Failed to stop transport");
            }
        }
    }

    /// Run health checks on all transports.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, transport) in self.snapshot() {
            results.insert(name, transport.health_check().await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_core::Packet;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockTransport {
        name: String,
        healthy: bool,
        stopped: AtomicBool,
    }

    impl MockTransport {
        fn new(name: &str, healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                healthy,
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _packet: Packet) -> Result<bool, TransportError> {
            Ok(true)
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }

        async fn stop(&self) -> Result<(), TransportError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn empty_registry() {
        let reg = TransportRegistry::new();
        assert!(reg.is_empty());
        assert!(matches!(
            reg.require("telegram"),
            Err(TransportError::NotConfigured(_))
        ));
    }

    #[test]
    fn register_and_list() {
        let reg = TransportRegistry::new();
        reg.register(MockTransport::new("telegram", true));
        reg.register(MockTransport::new("discord", true));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.list(), vec!["discord", "telegram"]);
        assert!(reg.get("telegram").is_some());
    }

    #[tokio::test]
    async fn health_and_stop_all() {
        let reg = TransportRegistry::new();
        let up = MockTransport::new("web", true);
        let down = MockTransport::new("slack", false);
        reg.register(up.clone());
        reg.register(down.clone());

        let health = reg.health_check_all().await;
        assert_eq!(health["web"], true);
        assert_eq!(health["slack"], false);

        reg.stop_all().await;
        assert!(up.stopped.load(Ordering::SeqCst));
        assert!(down.stopped.load(Ordering::SeqCst));
    }
}
