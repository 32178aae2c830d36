//! Error types for the Conduit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context (hub, routing, dispatch, sessions, gateway, transport)
//! has its own error enum, folded into the top-level [`Error`].

use std::time::Duration;

use thiserror::Error;

/// The top-level error type for all Conduit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Event hub errors ---
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    // --- Routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Delivery errors ---
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Handler failures ---

/// What went wrong inside a single handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// The handler returned an error.
    Failed,
    /// The invocation exceeded its timeout.
    TimedOut,
    /// The handler task panicked.
    Panicked,
    /// The invocation was cancelled before completion.
    Cancelled,
}

/// A failure attributed to one specific handler.
#[derive(Debug, Clone, Error)]
#[error("Handler '{handler_id}' failed: {reason}")]
pub struct HandlerError {
    pub handler_id: String,
    pub reason: String,
    pub kind: HandlerErrorKind,
}

impl HandlerError {
    /// A plain handler failure.
    pub fn new(handler_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            reason: reason.into(),
            kind: HandlerErrorKind::Failed,
        }
    }

    /// The invocation did not complete within `after`.
    pub fn timed_out(handler_id: impl Into<String>, after: Duration) -> Self {
        Self {
            handler_id: handler_id.into(),
            reason: format!("timed out after {}ms", after.as_millis()),
            kind: HandlerErrorKind::TimedOut,
        }
    }

    /// The handler task panicked.
    pub fn panicked(handler_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            reason: detail.into(),
            kind: HandlerErrorKind::Panicked,
        }
    }

    /// The invocation was cancelled.
    pub fn cancelled(handler_id: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            reason: "cancelled".into(),
            kind: HandlerErrorKind::Cancelled,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == HandlerErrorKind::TimedOut
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum HubError {
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Event hub is not running")]
    NotRunning,

    #[error("Event {event_id} was dropped before dispatch")]
    Dropped { event_id: String },
}

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Duplicate route: pattern '{pattern}' with filters [{filters}] already registered")]
    DuplicatePattern { pattern: String, filters: String },

    #[error("No route for key '{key}'")]
    NoRoute { key: String },

    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Route id already registered: {0}")]
    DuplicateRouteId(String),
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("All {attempted} handlers failed")]
    AllHandlersFailed {
        attempted: usize,
        errors: Vec<HandlerError>,
    },

    #[error("Dispatch to '{target}' timed out after {}ms", .after.as_millis())]
    Timeout { target: String, after: Duration },

    #[error("No delivery targets")]
    NoTargets,
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session is closed: {0}")]
    Closed(String),

    #[error("Session expired: {session_id} (idle {idle_ms}ms > ttl {ttl_ms}ms)")]
    Expired {
        session_id: String,
        idle_ms: u128,
        ttl_ms: u128,
    },

    #[error("Invalid session transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Session capacity exceeded ({max})")]
    CapacityExceeded { max: usize },

    #[error("New sessions are not being accepted")]
    NotAccepting,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Invalid gateway transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Gateway is not accepting traffic in state {0}")]
    NotAccepting(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport not configured: {0}")]
    NotConfigured(String),

    #[error("Send failed on {transport}: {reason}")]
    SendFailed { transport: String, reason: String },

    #[error("Receive failed on {transport}: {reason}")]
    ReceiveFailed { transport: String, reason: String },

    #[error("Transport connection lost: {0}")]
    ConnectionLost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_carries_handler_id() {
        let err = Error::Dispatch(DispatchError::Handler(HandlerError::new(
            "summarizer",
            "model unavailable",
        )));
        assert!(err.to_string().contains("summarizer"));
        assert!(err.to_string().contains("model unavailable"));
    }

    #[test]
    fn timeout_error_displays_millis() {
        let err = DispatchError::Timeout {
            target: "echo".into(),
            after: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));

        let handler = HandlerError::timed_out("echo", Duration::from_secs(2));
        assert!(handler.is_timeout());
        assert!(handler.to_string().contains("2000ms"));
    }

    #[test]
    fn duplicate_pattern_mentions_pattern() {
        let err = Error::from(RoutingError::DuplicatePattern {
            pattern: "chat.*".into(),
            filters: "attr(lang=en)".into(),
        });
        assert!(err.to_string().contains("chat.*"));
        assert!(err.to_string().contains("lang=en"));
    }
}
