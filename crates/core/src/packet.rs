//! Packet: the boundary data unit exchanged with transport adapters.
//!
//! Inbound packets arrive from a platform adapter and are turned into events
//! by the gateway. Outbound packets are built by the gateway and handed to the
//! adapter, which owns them from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A packet crossing the gateway boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Unique packet ID (used as the correlation id of derived events)
    pub id: String,

    /// Transport the packet arrived on or must leave through
    pub platform: String,

    /// Sender: the participant on inbound packets, the gateway on outbound ones
    pub origin: String,

    /// Receiver: the gateway on inbound packets, the participant on outbound ones
    #[serde(default)]
    pub destination: String,

    /// Opaque payload
    pub payload: serde_json::Value,

    /// Platform-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// When the platform produced the packet (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Packet {
    /// A packet received from `origin` on `platform`.
    pub fn inbound(
        platform: impl Into<String>,
        origin: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform: platform.into(),
            origin: origin.into(),
            destination: String::new(),
            payload,
            metadata: serde_json::Map::new(),
            timestamp: Some(Utc::now()),
        }
    }

    /// A packet the gateway sends to `destination` on `platform`.
    pub fn outbound(
        platform: impl Into<String>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform: platform.into(),
            origin: origin.into(),
            destination: destination.into(),
            payload,
            metadata: serde_json::Map::new(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Serialize to JSON.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a packet from JSON.
    pub fn deserialize(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_packet_fields() {
        let packet = Packet::inbound("telegram", "user-42", serde_json::json!({"text": "hi"}))
            .with_metadata("chat_id", "c-1");
        assert_eq!(packet.platform, "telegram");
        assert_eq!(packet.origin, "user-42");
        assert!(packet.destination.is_empty());
        assert_eq!(packet.metadata["chat_id"], "c-1");
        assert!(packet.timestamp.is_some());
    }

    #[test]
    fn packet_json_omits_empty_metadata() {
        let packet = Packet::outbound("slack", "conduit", "u-1", serde_json::json!("pong"));
        let json = packet.serialize().unwrap();
        assert!(!json.contains("metadata"));

        let parsed = Packet::deserialize(&json).unwrap();
        assert_eq!(parsed.destination, "u-1");
        assert_eq!(parsed.payload, serde_json::json!("pong"));
    }

    #[test]
    fn packet_accepts_minimal_json() {
        let parsed =
            Packet::deserialize(r#"{"id":"p1","platform":"web","origin":"a","payload":null}"#)
                .unwrap();
        assert_eq!(parsed.id, "p1");
        assert!(parsed.destination.is_empty());
        assert!(parsed.timestamp.is_none());
    }
}
