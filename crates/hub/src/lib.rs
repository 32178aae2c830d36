//! Event hub: priority-ordered publish/subscribe.
//!
//! Producers hand events to [`EventHub::emit`] (await the delivery report) or
//! [`EventHub::publish`] (fire and forget). Every event passes through a
//! single bounded admission queue that orders by priority, then by arrival
//! sequence. One dispatch loop drains it and invokes the matching
//! subscribers in descending subscription priority, ties broken by
//! registration order.
//!
//! A failing, panicking, or slow subscriber never stops delivery to the
//! others: its error is captured in the [`DeliveryReport`].

mod queue;
mod report;

pub use report::{Delivery, DeliveryOutcome, DeliveryReport, SubscriptionId};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use conduit_config::HubConfig;
use conduit_core::{
    Event, EventHandler, EventSelector, EventType, HandlerError, HubError, InvocationContext,
};
use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use queue::{AdmissionQueue, Queued};

/// How the dispatch loop waits on a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// The loop waits for the handler (bounded by its timeout) before
    /// invoking the next subscriber.
    #[default]
    Awaited,
    /// The handler runs in its own task; the loop moves on immediately.
    Detached,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Higher runs first
    pub priority: i32,
    pub mode: DispatchMode,
    /// Overrides the hub's default handler timeout
    pub timeout: Option<Duration>,
}

impl SubscriptionOptions {
    pub fn priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn detached(mut self) -> Self {
        self.mode = DispatchMode::Detached;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Subscription {
    id: SubscriptionId,
    selector: EventSelector,
    handler: Arc<dyn EventHandler>,
    priority: i32,
    mode: DispatchMode,
    timeout: Duration,
}

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub emitted: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
    pub queue_depth: usize,
    pub subscriptions: usize,
}

struct HubInner {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    queue: Mutex<AdmissionQueue>,
    wake: Notify,
    /// Cancelled when shutdown gives up on draining.
    cancel: CancellationToken,
    /// Cancelled by the dispatch loop when it exits.
    stopped: CancellationToken,
    started: AtomicBool,
    /// Written only while holding the queue lock.
    closing: AtomicBool,
    default_timeout: Duration,
    counters: Arc<Counters>,
}

/// The event hub. Cheap to clone; clones share the same queue and loop.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new(queue_capacity: usize, handler_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscriptions: RwLock::new(Vec::new()),
                queue: Mutex::new(AdmissionQueue::new(queue_capacity)),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                stopped: CancellationToken::new(),
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                default_timeout: handler_timeout,
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.queue_capacity, config.handler_timeout())
    }

    /// Subscribe an awaited handler with the hub's default timeout.
    pub fn subscribe(
        &self,
        selector: impl Into<EventSelector>,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> Result<SubscriptionId, HubError> {
        self.subscribe_with(selector, handler, SubscriptionOptions::priority(priority))
    }

    pub fn subscribe_with(
        &self,
        selector: impl Into<EventSelector>,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId, HubError> {
        let selector = selector.into();
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(HubError::InvalidSubscription(
                "event hub has been shut down".into(),
            ));
        }
        if !handler.accepts(&selector) {
            return Err(HubError::InvalidSubscription(format!(
                "handler '{}' does not accept {:?}",
                handler.name(),
                selector
            )));
        }

        let subscription = Arc::new(Subscription {
            id: SubscriptionId::new(),
            selector,
            priority: options.priority,
            mode: options.mode,
            timeout: options.timeout.unwrap_or(self.inner.default_timeout),
            handler,
        });
        let id = subscription.id.clone();

        debug!(
            subscription = %id,
            handler = subscription.handler.name(),
            selector = ?selector,
            priority = options.priority,
            "Subscribed"
        );
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscription);
        Ok(id)
    }

    /// Remove a subscription. Returns whether it existed; removing twice is a no-op.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut subs = self
            .inner
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| &s.id != id);
        before != subs.len()
    }

    /// Start the dispatch loop.
    ///
    /// Only the first call spawns a loop; the hub has exactly one consumer.
    pub fn start(&self) -> JoinHandle<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Event hub already started");
            return tokio::spawn(async {});
        }
        info!("Event hub started");
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await })
    }

    /// Whether events are currently admitted.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.closing.load(Ordering::SeqCst)
    }

    /// Emit an event and wait for its delivery report.
    ///
    /// Calling this from inside an awaited subscriber waits for the loop that
    /// is running that subscriber; use [`EventHub::publish`] there instead.
    pub async fn emit(&self, event: Event) -> Result<DeliveryReport, HubError> {
        let event_id = event.id.to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.admit(event, Some(tx))?;
        rx.await.unwrap_or(Err(HubError::Dropped { event_id }))
    }

    /// Enqueue an event without waiting. Returns its arrival sequence number.
    pub fn publish(&self, event: Event) -> Result<u64, HubError> {
        self.inner.admit(event, None)
    }

    /// Stop admitting events, drain the queue for up to `grace`, then stop the
    /// loop. Producers whose events were never dispatched get `Dropped`.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        {
            let _queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closing.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        inner.wake.notify_one();

        if inner.started.load(Ordering::SeqCst) {
            if tokio::time::timeout(grace, inner.stopped.cancelled())
                .await
                .is_err()
            {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    pending = inner.queue_depth(),
                    "Event hub did not drain within grace period, abandoning remaining events"
                );
            }
            inner.cancel.cancel();
            inner.stopped.cancelled().await;
        } else {
            inner.cancel.cancel();
        }

        let abandoned = inner
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Dropping undelivered events");
        }
        for queued in abandoned {
            queued.drop_undelivered();
        }
        info!("Event hub stopped");
    }

    pub fn stats(&self) -> HubStats {
        let c = &self.inner.counters;
        HubStats {
            emitted: c.emitted.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
            queue_depth: self.inner.queue_depth(),
            subscriptions: self
                .inner
                .subscriptions
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
        }
    }
}

impl HubInner {
    fn admit(&self, event: Event, reply: Option<queue::ReportSender>) -> Result<u64, HubError> {
        let sequence = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if !self.started.load(Ordering::SeqCst) || self.closing.load(Ordering::SeqCst) {
                return Err(HubError::NotRunning);
            }
            queue.admit(event, reply)?
        };
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        self.wake.notify_one();
        Ok(sequence)
    }

    fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn run(&self) {
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                match queue.pop() {
                    Some(queued) => Some(queued),
                    None if self.closing.load(Ordering::SeqCst) => break,
                    None => None,
                }
            };

            let Queued {
                event,
                sequence,
                reply,
            } = match next {
                Some(queued) => queued,
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = self.cancel.cancelled() => break,
                    }
                    continue;
                }
            };

            let event_id = event.id.to_string();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(event_id = %event_id, "Dispatch abandoned during shutdown");
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(HubError::Dropped { event_id }));
                    }
                    break;
                }
                report = self.dispatch(event, sequence) => {
                    self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(report));
                    }
                }
            }
        }
        self.stopped.cancel();
        debug!("Event hub dispatch loop exited");
    }

    fn matching(&self, event_type: EventType) -> Vec<Arc<Subscription>> {
        let mut matched: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.selector.matches(event_type))
            .cloned()
            .collect();
        // Stable: equal priorities keep registration order.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    async fn dispatch(&self, event: Event, sequence: u64) -> DeliveryReport {
        let event = Arc::new(event);
        let subscribers = self.matching(event.event_type);
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            sequence,
            subscribers = subscribers.len(),
            "Dispatching event"
        );

        let mut deliveries = Vec::with_capacity(subscribers.len());
        for sub in subscribers {
            let cx = InvocationContext::child_of(&self.cancel, sub.timeout);
            let outcome = match sub.mode {
                DispatchMode::Awaited => match invoke(&sub, event.clone(), cx).await {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(e) => {
                        self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            handler = %e.handler_id,
                            subscription = %sub.id,
                            event_id = %event.id,
                            error = %e.reason,
                            "Subscriber failed"
                        );
                        DeliveryOutcome::Failed(e)
                    }
                },
                DispatchMode::Detached => {
                    let sub = sub.clone();
                    let event = event.clone();
                    let counters = self.counters.clone();
                    tokio::spawn(async move {
                        if let Err(e) = invoke(&sub, event, cx).await {
                            counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                handler = %e.handler_id,
                                subscription = %sub.id,
                                error = %e.reason,
                                "Detached subscriber failed"
                            );
                        }
                    });
                    DeliveryOutcome::Detached
                }
            };
            deliveries.push(Delivery {
                subscription_id: sub.id.clone(),
                handler: sub.handler.name().to_string(),
                outcome,
            });
        }

        DeliveryReport {
            event_id: event.id.clone(),
            event_type: event.event_type,
            sequence,
            deliveries,
        }
    }
}

/// Run one handler in its own task, bounded by the subscription timeout.
async fn invoke(
    sub: &Subscription,
    event: Arc<Event>,
    cx: InvocationContext,
) -> Result<(), HandlerError> {
    let name = sub.handler.name().to_string();
    let handler = sub.handler.clone();
    let token = cx.cancel.clone();
    let limit = cx.timeout;

    let mut task = tokio::spawn(async move { handler.on_event(event, cx).await });
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => Err(HandlerError::panicked(
            name,
            panic_message(join_err.into_panic()),
        )),
        Ok(Err(_)) => Err(HandlerError::cancelled(name)),
        Err(_) => {
            token.cancel();
            task.abort();
            Err(HandlerError::timed_out(name, limit))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".into()
    }
}
