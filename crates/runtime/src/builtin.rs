//! Built-in message handlers available to every runtime.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{HandlerError, InvocationContext, Message, MessageHandler};
use conduit_routing::{HandlerProfile, HandlerRegistry};

/// Replies with the message payload unchanged.
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    fn id(&self) -> &str {
        "echo"
    }

    async fn handle(
        &self,
        message: &Message,
        _cx: InvocationContext,
    ) -> Result<serde_json::Value, HandlerError> {
        Ok(message.payload.clone())
    }
}

/// Accepts everything and replies with nothing. Useful as a route fallback.
pub struct DiscardHandler;

#[async_trait]
impl MessageHandler for DiscardHandler {
    fn id(&self) -> &str {
        "discard"
    }

    async fn handle(
        &self,
        _message: &Message,
        _cx: InvocationContext,
    ) -> Result<serde_json::Value, HandlerError> {
        Ok(serde_json::Value::Null)
    }
}

/// Register the built-in handlers.
pub fn register_builtins(registry: &HandlerRegistry) {
    registry.register(Arc::new(EchoHandler), HandlerProfile::new());
    registry.register(Arc::new(DiscardHandler), HandlerProfile::new());
}
