//! Transport trait: the abstraction over platform adapters.
//!
//! A Transport connects Conduit to a messaging platform (chat network,
//! webhook, socket, ...). The runtime never implements one itself: adapters
//! are supplied by the embedding application and registered with the gateway.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::packet::Packet;

/// The transport capability consumed by the gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Platform name (e.g., "telegram", "web"); sessions are keyed by it.
    fn name(&self) -> &str;

    /// Send a packet. `Ok(false)` means the platform refused it.
    ///
    /// Retry policy belongs to the adapter; the gateway calls this once.
    async fn send(&self, packet: Packet) -> Result<bool, TransportError>;

    /// Poll for the next inbound packet, `None` when nothing is pending.
    async fn receive(&self) -> Result<Option<Packet>, TransportError> {
        Ok(None)
    }

    /// Health check: is the transport connected and operational?
    async fn health_check(&self) -> bool {
        true
    }

    /// Stop the transport gracefully.
    async fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
