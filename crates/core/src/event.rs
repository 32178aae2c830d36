//! Event types: the immutable unit flowing through the event hub.
//!
//! Events are created by producers (gateway, schedulers, reasoning
//! components), handed to the hub by value, and delivered to subscribers
//! behind an `Arc` so no subscriber can mutate what another one sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All event types known to the runtime.
///
/// The set is closed: adding a type means recompiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "lifecycle.boot")]
    LifecycleBoot,
    #[serde(rename = "lifecycle.shutdown")]
    LifecycleShutdown,
    #[serde(rename = "communication.received")]
    CommunicationReceived,
    #[serde(rename = "communication.sent")]
    CommunicationSent,
    #[serde(rename = "processing.start")]
    ProcessingStart,
    #[serde(rename = "processing.complete")]
    ProcessingComplete,
    #[serde(rename = "error.occurred")]
    ErrorOccurred,
    #[serde(rename = "capability.loaded")]
    CapabilityLoaded,
    #[serde(rename = "capability.failed")]
    CapabilityFailed,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.closed")]
    SessionClosed,
    #[serde(rename = "session.expired")]
    SessionExpired,
    #[serde(rename = "gateway.state_changed")]
    GatewayStateChanged,
}

impl EventType {
    /// Dotted name, also used as the default routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LifecycleBoot => "lifecycle.boot",
            EventType::LifecycleShutdown => "lifecycle.shutdown",
            EventType::CommunicationReceived => "communication.received",
            EventType::CommunicationSent => "communication.sent",
            EventType::ProcessingStart => "processing.start",
            EventType::ProcessingComplete => "processing.complete",
            EventType::ErrorOccurred => "error.occurred",
            EventType::CapabilityLoaded => "capability.loaded",
            EventType::CapabilityFailed => "capability.failed",
            EventType::SessionCreated => "session.created",
            EventType::SessionClosed => "session.closed",
            EventType::SessionExpired => "session.expired",
            EventType::GatewayStateChanged => "gateway.state_changed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which events a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSelector {
    /// Wildcard: every event.
    All,
    /// Exactly one event type.
    Type(EventType),
}

impl EventSelector {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventSelector::All => true,
            EventSelector::Type(t) => *t == event_type,
        }
    }
}

impl From<EventType> for EventSelector {
    fn from(t: EventType) -> Self {
        EventSelector::Type(t)
    }
}

/// An immutable event.
///
/// Build one with [`Event::new`] and the `with_*` methods, then hand it to the
/// hub. Once emitted it is only ever shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: EventId,

    /// What kind of event this is
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Component that produced the event
    pub source: String,

    /// Opaque payload; the runtime never interprets it
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,

    /// Higher = more urgent
    #[serde(default)]
    pub priority: i32,

    /// Creation instant
    pub timestamp: DateTime<Utc>,

    /// Links a response to the request that caused it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    /// Create an event with an empty payload and priority 0.
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            source: source.into(),
            payload: serde_json::Map::new(),
            priority: 0,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Insert a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Error events and anything above priority 10 are critical.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.event_type,
            EventType::ErrorOccurred | EventType::CapabilityFailed
        ) || self.priority > 10
    }

    /// Convenience accessor for string payload fields.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_builder_sets_fields() {
        let event = Event::new(EventType::CommunicationReceived, "gateway")
            .with_field("session_id", "s-1")
            .with_priority(5)
            .with_correlation_id("pkt-9");

        assert_eq!(event.source, "gateway");
        assert_eq!(event.priority, 5);
        assert_eq!(event.payload_str("session_id"), Some("s-1"));
        assert_eq!(event.correlation_id.as_deref(), Some("pkt-9"));
    }

    #[test]
    fn critical_events() {
        assert!(Event::new(EventType::ErrorOccurred, "x").is_critical());
        assert!(Event::new(EventType::ProcessingStart, "x").with_priority(11).is_critical());
        assert!(!Event::new(EventType::ProcessingStart, "x").with_priority(10).is_critical());
    }

    #[test]
    fn event_type_serializes_dotted() {
        let event = Event::new(EventType::SessionExpired, "gateway");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"session.expired\""));
        assert!(!json.contains("correlation_id"));
        assert_eq!(EventType::SessionExpired.to_string(), "session.expired");
    }

    #[test]
    fn selector_matching() {
        assert!(EventSelector::All.matches(EventType::LifecycleBoot));
        let sel: EventSelector = EventType::LifecycleBoot.into();
        assert!(sel.matches(EventType::LifecycleBoot));
        assert!(!sel.matches(EventType::LifecycleShutdown));
    }
}
