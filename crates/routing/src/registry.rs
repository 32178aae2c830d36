//! Handler registry: route targets and their static profiles.
//!
//! Routes refer to handlers by id. The registry resolves those ids to the
//! handler capability plus the profile the strategies and filters read
//! (static weight, descriptive attributes).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use conduit_core::{HandlerStatus, MessageHandler};
use tracing::info;

/// Static properties of a registered handler.
#[derive(Debug, Clone)]
pub struct HandlerProfile {
    /// Used by Priority (highest wins) and WeightedRandom (proportional)
    pub weight: f64,
    /// Matched by ContextAware scoring and `HandlerTag` filters
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Default for HandlerProfile {
    fn default() -> Self {
        Self {
            weight: 1.0,
            attributes: serde_json::Map::new(),
        }
    }
}

impl HandlerProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A handler together with its profile. Cheap to clone.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn MessageHandler>,
    pub profile: Arc<HandlerProfile>,
}

impl RegisteredHandler {
    pub fn id(&self) -> &str {
        self.handler.id()
    }

    pub fn status(&self) -> HandlerStatus {
        self.handler.status()
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("id", &self.id())
            .field("profile", &self.profile)
            .finish()
    }
}

/// Central registry of message handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a handler under its own id.
    pub fn register(&self, handler: Arc<dyn MessageHandler>, profile: HandlerProfile) {
        let id = handler.id().to_string();
        info!(handler = %id, weight = profile.weight, "Registered handler");
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                RegisteredHandler {
                    handler,
                    profile: Arc::new(profile),
                },
            );
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn get(&self, id: &str) -> Option<RegisteredHandler> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// All registered handler ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubHandler;

    #[test]
    fn register_and_lookup() {
        let registry = HandlerRegistry::new();
        registry.register(
            StubHandler::ok("echo"),
            HandlerProfile::new().with_weight(2.0).with_attribute("lang", "en"),
        );
        registry.register(StubHandler::ok("audit"), HandlerProfile::default());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list(), vec!["audit", "echo"]);
        let echo = registry.get("echo").unwrap();
        assert_eq!(echo.id(), "echo");
        assert_eq!(echo.profile.weight, 2.0);
        assert_eq!(echo.profile.attributes["lang"], "en");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let registry = HandlerRegistry::new();
        registry.register(StubHandler::ok("echo"), HandlerProfile::new().with_weight(1.0));
        registry.register(StubHandler::ok("echo"), HandlerProfile::new().with_weight(3.0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().profile.weight, 3.0);

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.is_empty());
    }
}
