//! Delivery reports returned by `EventHub::emit`.

use conduit_core::{EventId, EventType, HandlerError};

/// Identifier of a hub subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to one subscriber for one event.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The handler completed successfully.
    Delivered,
    /// The handler was started in the background; its result is only logged.
    Detached,
    /// The handler failed, panicked, or timed out.
    Failed(HandlerError),
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscription_id: SubscriptionId,
    pub handler: String,
    pub outcome: DeliveryOutcome,
}

impl Delivery {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Failed(_))
    }
}

/// Per-subscriber results for one emitted event, in invocation order.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: EventId,
    pub event_type: EventType,
    pub sequence: u64,
    pub deliveries: Vec<Delivery>,
}

impl DeliveryReport {
    /// Number of subscribers that completed (or were detached) without error.
    pub fn succeeded(&self) -> usize {
        self.deliveries.iter().filter(|d| !d.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_failure()).count()
    }

    /// The captured handler errors.
    pub fn errors(&self) -> impl Iterator<Item = &HandlerError> {
        self.deliveries.iter().filter_map(|d| match &d.outcome {
            DeliveryOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Handler names in the order they were invoked.
    pub fn handler_order(&self) -> Vec<&str> {
        self.deliveries.iter().map(|d| d.handler.as_str()).collect()
    }
}
