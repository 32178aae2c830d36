//! Routed message: what the router matches and handlers receive.
//!
//! A message is the routing view of an event: a routing key matched against
//! route patterns, the opaque payload, and the metadata that filters and the
//! context-aware strategy inspect.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// A message being routed to handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Key matched against route patterns
    pub routing_key: String,

    /// Opaque payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Routing context attributes
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Session the message belongs to (if it came through the gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Correlation id carried over from the originating event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(routing_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            metadata: serde_json::Map::new(),
            session_id: None,
            correlation_id: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Derive a message from an event.
    ///
    /// The routing key is the payload's `routing_key` string when present,
    /// otherwise the dotted event type. The payload's `payload` field (or the
    /// whole event payload) becomes the message payload; its `metadata` object
    /// becomes the routing context, extended with `source`, `platform`, and
    /// `origin` when the event carries them.
    pub fn from_event(event: &Event) -> Self {
        let routing_key = event
            .payload_str("routing_key")
            .map(str::to_string)
            .unwrap_or_else(|| event.event_type.as_str().to_string());

        let payload = event
            .payload
            .get("payload")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(event.payload.clone()));

        let mut metadata = event
            .payload
            .get("metadata")
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_default();
        metadata
            .entry("source")
            .or_insert_with(|| event.source.clone().into());
        for key in ["platform", "origin"] {
            if let Some(v) = event.payload.get(key) {
                metadata.entry(key).or_insert_with(|| v.clone());
            }
        }

        Self {
            routing_key,
            payload,
            metadata,
            session_id: event.payload_str("session_id").map(str::to_string),
            correlation_id: event
                .correlation_id
                .clone()
                .or_else(|| Some(event.id.0.clone())),
        }
    }

    /// Look up a named field: metadata first, then top-level payload fields.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.metadata
            .get(name)
            .or_else(|| self.payload.as_object().and_then(|p| p.get(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    #[test]
    fn from_event_defaults_key_to_event_type() {
        let event = Event::new(EventType::CommunicationReceived, "gateway")
            .with_field("session_id", "s-7")
            .with_field("platform", "discord")
            .with_field("payload", serde_json::json!({"text": "hello"}));

        let msg = Message::from_event(&event);
        assert_eq!(msg.routing_key, "communication.received");
        assert_eq!(msg.session_id.as_deref(), Some("s-7"));
        assert_eq!(msg.payload["text"], "hello");
        assert_eq!(msg.metadata["platform"], "discord");
        assert_eq!(msg.metadata["source"], "gateway");
        assert_eq!(msg.correlation_id.as_deref(), Some(event.id.0.as_str()));
    }

    #[test]
    fn from_event_honors_explicit_routing_key() {
        let event = Event::new(EventType::ProcessingStart, "scheduler")
            .with_field("routing_key", "jobs.nightly")
            .with_field("metadata", serde_json::json!({"lang": "en"}));

        let msg = Message::from_event(&event);
        assert_eq!(msg.routing_key, "jobs.nightly");
        assert_eq!(msg.metadata["lang"], "en");
        assert_eq!(msg.payload["routing_key"], "jobs.nightly");
    }

    #[test]
    fn field_prefers_metadata() {
        let msg = Message::new("k", serde_json::json!({"lang": "fr", "size": 3}))
            .with_metadata("lang", "en");
        assert_eq!(msg.field("lang").unwrap(), "en");
        assert_eq!(msg.field("size").unwrap(), 3);
        assert!(msg.field("missing").is_none());
    }
}
