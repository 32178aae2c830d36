//! Handler capabilities: the callables the hub and router invoke.
//!
//! Two narrow traits:
//! - [`EventHandler`] subscribes to the event hub and receives events.
//! - [`MessageHandler`] is a route target: it receives routed messages and
//!   returns an output value the gateway may send back to the participant.
//!
//! Every invocation gets an [`InvocationContext`] carrying an explicit
//! cancellation token and the timeout it is bound by.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::event::{Event, EventSelector};
use crate::message::Message;

/// Per-invocation context handed to every handler.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Cancelled when the caller gives up (timeout or shutdown).
    pub cancel: CancellationToken,
    /// The bound the caller enforces on this invocation.
    pub timeout: Duration,
}

impl InvocationContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout,
        }
    }

    /// A context whose token is cancelled together with `parent`.
    pub fn child_of(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: parent.child_token(),
            timeout,
        }
    }
}

/// A subscriber on the event hub.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and delivery reports.
    fn name(&self) -> &str;

    /// Whether this handler can take events matched by `selector`.
    ///
    /// The hub refuses subscriptions for selectors a handler does not accept.
    fn accepts(&self, _selector: &EventSelector) -> bool {
        true
    }

    /// Handle one event.
    async fn on_event(&self, event: Arc<Event>, cx: InvocationContext) -> Result<(), HandlerError>;
}

/// Health and load a message handler reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStatus {
    pub healthy: bool,
    pub load: u64,
}

impl Default for HandlerStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            load: 0,
        }
    }
}

/// A route target.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable identifier; routes refer to handlers by this id.
    fn id(&self) -> &str;

    /// Current health and load (used by load-balanced selection).
    fn status(&self) -> HandlerStatus {
        HandlerStatus::default()
    }

    /// Handle a routed message. A non-null output is sent back to the
    /// participant when the message belongs to a session.
    async fn handle(
        &self,
        message: &Message,
        cx: InvocationContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// An [`EventHandler`] backed by an async closure.
pub struct FnEventHandler<F> {
    name: String,
    selector: Option<EventSelector>,
    f: F,
}

impl<F> FnEventHandler<F> {
    /// Restrict the handler to one selector; subscribing it elsewhere fails.
    pub fn only(mut self, selector: EventSelector) -> Self {
        self.selector = Some(selector);
        self
    }
}

/// Wrap an async closure as an event handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> FnEventHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnEventHandler {
        name: name.into(),
        selector: None,
        f,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, selector: &EventSelector) -> bool {
        self.selector.is_none_or(|s| s == *selector)
    }

    async fn on_event(&self, event: Arc<Event>, _cx: InvocationContext) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}
