//! # Conduit Gateway
//!
//! The boundary between platform transports and the event hub.
//!
//! Inbound packets are resolved to a participant [`Session`] and emitted as
//! `communication.received` events; handler output is sent back through the
//! transport that owns the session's platform. A background task sweeps
//! sessions past their TTL.
//!
//! ```text
//! INITIALIZING ─▶ READY ─▶ RUNNING ⇄ DEGRADED
//!                            ⇅
//!                       MAINTENANCE            (any) ─▶ SHUTDOWN
//! ```

pub mod health;
pub mod registry;
pub mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit_config::{AppConfig, GatewayConfig, SessionConfig};
use conduit_core::{
    DispatchError, Event, EventType, GatewayError, HubError, Packet, Result, SessionError,
    Transport,
};
use conduit_hub::{DeliveryReport, EventHub};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use health::{HealthMonitor, HealthVerdict};
pub use registry::TransportRegistry;
pub use session::{Resolved, Session, SessionManager, SessionState, SessionStats, SweepOutcome};

/// Operational mode of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Initializing,
    Ready,
    Running,
    Degraded,
    Maintenance,
    Shutdown,
}

impl GatewayState {
    pub fn can_transition_to(self, to: GatewayState) -> bool {
        use GatewayState::*;
        matches!(
            (self, to),
            (Initializing, Ready)
                | (Ready, Running)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Running, Maintenance)
                | (Maintenance, Running)
        ) || (to == Shutdown && self != Shutdown)
    }

    /// Whether inbound packets and outbound sends are processed.
    pub fn accepts_traffic(self) -> bool {
        matches!(
            self,
            GatewayState::Running | GatewayState::Degraded | GatewayState::Maintenance
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Initializing => "initializing",
            GatewayState::Ready => "ready",
            GatewayState::Running => "running",
            GatewayState::Degraded => "degraded",
            GatewayState::Maintenance => "maintenance",
            GatewayState::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub idled: Vec<String>,
    pub expired: Vec<String>,
    /// Expiry notifications from earlier passes delivered this time
    pub retried: usize,
    /// Notifications still waiting for room in the hub
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub id: String,
    pub state: GatewayState,
    pub uptime_secs: u64,
    pub sessions: SessionStats,
    pub transports: Vec<String>,
    pub inbound: u64,
    pub outbound: u64,
    pub outbound_failed: u64,
    pub errors: u64,
    pub failure_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealth {
    pub healthy: bool,
    pub state: GatewayState,
    pub transports: HashMap<String, bool>,
}

#[derive(Default)]
struct Counters {
    inbound: AtomicU64,
    outbound: AtomicU64,
    outbound_failed: AtomicU64,
    errors: AtomicU64,
}

struct GatewayInner {
    config: GatewayConfig,
    hub: EventHub,
    sessions: Arc<SessionManager>,
    transports: TransportRegistry,
    health: HealthMonitor,
    state: Mutex<GatewayState>,
    started_at: Mutex<Option<Instant>>,
    sweep_interval: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
    /// Expiry events the hub could not take yet
    pending: Mutex<Vec<Event>>,
    counters: Counters,
}

/// Session gateway. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, sessions: &SessionConfig, hub: EventHub) -> Self {
        let health = HealthMonitor::new(&config.health);
        Self {
            inner: Arc::new(GatewayInner {
                hub,
                sessions: Arc::new(SessionManager::new(sessions)),
                transports: TransportRegistry::new(),
                health,
                state: Mutex::new(GatewayState::Initializing),
                started_at: Mutex::new(None),
                sweep_interval: sessions.sweep_interval(),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                pending: Mutex::new(Vec::new()),
                counters: Counters::default(),
                config,
            }),
        }
    }

    pub fn from_config(config: &AppConfig, hub: EventHub) -> Self {
        Self::new(config.gateway.clone(), &config.sessions, hub)
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn state(&self) -> GatewayState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.inner.transports
    }

    pub fn hub(&self) -> &EventHub {
        &self.inner.hub
    }

    // --- Lifecycle ---

    /// INITIALIZING -> READY.
    pub fn initialize(&self) -> Result<()> {
        self.transition(GatewayState::Ready)?;
        self.notify(self.event(EventType::LifecycleBoot));
        Ok(())
    }

    /// READY -> RUNNING. Starts the TTL sweep.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.transition(GatewayState::Running)?;
        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        let gateway = self.clone();
        let period = self.inner.sweep_interval;
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = gateway.inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        gateway.sweep_once();
                    }
                }
            }
            debug!("Session sweeper stopped");
        });

        info!(
            gateway = %self.id(),
            sweep_interval_ms = period.as_millis() as u64,
            transports = self.inner.transports.len(),
            "Gateway running"
        );
        Ok(())
    }

    /// RUNNING -> MAINTENANCE. Existing sessions keep working; no new ones
    /// are created.
    pub fn enter_maintenance(&self) -> Result<()> {
        self.transition(GatewayState::Maintenance)?;
        self.inner.sessions.set_accepting(false);
        Ok(())
    }

    /// MAINTENANCE -> RUNNING.
    pub fn exit_maintenance(&self) -> Result<()> {
        self.transition(GatewayState::Running)?;
        self.inner.sessions.set_accepting(true);
        Ok(())
    }

    /// Stop the gateway. Background tasks get the configured grace period,
    /// then every live session is closed and transports are stopped.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let from = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == GatewayState::Shutdown {
                return;
            }
            std::mem::replace(&mut *state, GatewayState::Shutdown)
        };
        self.state_changed(from, GatewayState::Shutdown);

        let inner = &self.inner;
        inner.sessions.set_accepting(false);
        inner.cancel.cancel();
        inner.tasks.close();

        let grace = inner.config.shutdown_grace();
        if tokio::time::timeout(grace, inner.tasks.wait()).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                remaining = inner.tasks.len(),
                "Gateway tasks did not finish within grace period, abandoning"
            );
        }

        let closed = inner.sessions.close_all();
        for session in &closed {
            self.notify(
                self.session_event(EventType::SessionClosed, session)
                    .with_field("reason", "shutdown"),
            );
        }
        self.flush_pending();

        if tokio::time::timeout(grace, inner.transports.stop_all())
            .await
            .is_err()
        {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Transports did not stop within grace period"
            );
        }

        self.notify(self.event(EventType::LifecycleShutdown));
        info!(gateway = %self.id(), sessions_closed = closed.len(), "Gateway stopped");
    }

    // --- Traffic ---

    /// Resolve the packet's session and emit it into the hub.
    ///
    /// Returns the hub's delivery report. The emit is bounded by the
    /// configured emit timeout.
    pub async fn handle_inbound(&self, packet: Packet) -> Result<DeliveryReport> {
        let state = self.state();
        if !state.accepts_traffic() {
            return Err(GatewayError::NotAccepting(state.to_string()).into());
        }
        let counters = &self.inner.counters;
        counters.inbound.fetch_add(1, Ordering::Relaxed);

        let resolved = self
            .inner
            .sessions
            .resolve(&packet.platform, &packet.origin)
            .inspect_err(|_| {
                counters.errors.fetch_add(1, Ordering::Relaxed);
            })?;
        let session = resolved.session;
        if resolved.created {
            self.notify(self.session_event(EventType::SessionCreated, &session));
        }

        debug!(
            packet_id = %packet.id,
            session_id = %session.id,
            platform = %packet.platform,
            "Inbound packet"
        );

        let mut event = Event::new(EventType::CommunicationReceived, self.id())
            .with_field("session_id", session.id.clone())
            .with_field("platform", packet.platform.clone())
            .with_field("origin", packet.origin.clone())
            .with_field("packet_id", packet.id.clone())
            .with_correlation_id(packet.id.clone());
        if let Some(key) = packet.metadata.get("routing_key").and_then(|v| v.as_str()) {
            event = event.with_field("routing_key", key);
        }
        let event = event
            .with_field("payload", packet.payload)
            .with_field("metadata", serde_json::Value::Object(packet.metadata));

        let after = self.inner.config.emit_timeout();
        let report = match tokio::time::timeout(after, self.inner.hub.emit(event)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                self.record_health(false);
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    packet_id = %packet.id,
                    timeout_ms = after.as_millis() as u64,
                    "Inbound emit timed out"
                );
                counters.errors.fetch_add(1, Ordering::Relaxed);
                self.record_health(false);
                return Err(DispatchError::Timeout {
                    target: "event_hub".into(),
                    after,
                }
                .into());
            }
        };

        self.record_health(report.failed() == 0);
        Ok(report)
    }

    /// Send `payload` to the participant of `session_id` through the
    /// transport for the session's platform.
    ///
    /// `Ok(false)` when the transport refused, failed, or timed out. The send
    /// is attempted once.
    pub async fn dispatch_outbound(
        &self,
        session_id: &str,
        payload: serde_json::Value,
    ) -> Result<bool> {
        let state = self.state();
        if !state.accepts_traffic() {
            return Err(GatewayError::NotAccepting(state.to_string()).into());
        }
        self.send_to_session(session_id, payload).await
    }

    /// Queue `payload` for the participant of `session_id` and return at
    /// once. The send runs as a gateway task bounded by the send timeout, so
    /// it never counts against the caller's own deadline. Shutdown waits for
    /// queued replies before sessions are closed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn reply(&self, session_id: &str, payload: serde_json::Value) {
        let gateway = self.clone();
        let session_id = session_id.to_string();
        self.inner.tasks.spawn(async move {
            match gateway.send_to_session(&session_id, payload).await {
                Ok(true) => {}
                Ok(false) => warn!(session_id = %session_id, "Reply was not delivered"),
                Err(e) => warn!(
                    session_id = %session_id,
                    error = %e,
                    "Reply could not be dispatched"
                ),
            }
        });
    }

    async fn send_to_session(&self, session_id: &str, payload: serde_json::Value) -> Result<bool> {
        let session = self.inner.sessions.get(session_id).map_err(|e| match e {
            SessionError::Closed(id) => SessionError::NotFound(id),
            other => other,
        })?;
        let transport = self.inner.transports.require(&session.platform)?;

        let packet = Packet::outbound(
            &session.platform,
            self.id(),
            &session.participant_id,
            payload,
        )
        .with_metadata("session_id", session.id.clone());
        let packet_id = packet.id.clone();

        let after = self.inner.config.send_timeout();
        let sent = match tokio::time::timeout(after, transport.send(packet)).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                warn!(transport = %session.platform, packet_id = %packet_id, "Transport refused packet");
                false
            }
            Ok(Err(e)) => {
                warn!(transport = %session.platform, packet_id = %packet_id, error = %e, "Transport send failed");
                false
            }
            Err(_) => {
                warn!(
                    transport = %session.platform,
                    packet_id = %packet_id,
                    timeout_ms = after.as_millis() as u64,
                    "Transport send timed out"
                );
                false
            }
        };

        self.record_health(sent);
        let counters = &self.inner.counters;
        if sent {
            counters.outbound.fetch_add(1, Ordering::Relaxed);
            self.notify(
                self.session_event(EventType::CommunicationSent, &session)
                    .with_field("packet_id", packet_id.clone())
                    .with_correlation_id(packet_id),
            );
        } else {
            counters.outbound_failed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(sent)
    }

    // --- Sessions ---

    /// Open (or return the live) session for a participant.
    pub fn create_session(&self, platform: &str, participant_id: &str) -> Result<Session> {
        if self.state() == GatewayState::Shutdown {
            return Err(GatewayError::NotAccepting(GatewayState::Shutdown.to_string()).into());
        }
        let resolved = self.inner.sessions.create_session(platform, participant_id)?;
        if resolved.created {
            self.notify(self.session_event(EventType::SessionCreated, &resolved.session));
        }
        Ok(resolved.session)
    }

    /// Close a session. `Ok(false)` when it was already closed.
    pub fn close_session(&self, session_id: &str) -> Result<bool> {
        match self.inner.sessions.close(session_id)? {
            Some(session) => {
                self.notify(
                    self.session_event(EventType::SessionClosed, &session)
                        .with_field("reason", "closed"),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn suspend_session(&self, session_id: &str) -> Result<Session> {
        Ok(self.inner.sessions.suspend(session_id)?)
    }

    pub fn resume_session(&self, session_id: &str) -> Result<Session> {
        Ok(self.inner.sessions.resume(session_id)?)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        Ok(self.inner.sessions.get(session_id)?)
    }

    /// Run one TTL sweep now. The background sweeper calls this on every
    /// tick.
    pub fn sweep_once(&self) -> SweepReport {
        let retried = self.flush_pending();
        let now = Instant::now();
        let outcome = self.inner.sessions.sweep(now);

        for session in &outcome.expired {
            let reason = SessionError::Expired {
                session_id: session.id.clone(),
                idle_ms: session.idle_for(now).as_millis(),
                ttl_ms: session.ttl.as_millis(),
            };
            let event = self
                .session_event(EventType::SessionExpired, session)
                .with_field("reason", reason.to_string())
                .with_field("message_count", session.message_count);
            self.notify_or_defer(event);
        }

        SweepReport {
            idled: outcome.idled,
            expired: outcome.expired.into_iter().map(|s| s.id).collect(),
            retried,
            pending: self.pending_len(),
        }
    }

    // --- Transports ---

    /// Register a transport for outbound sends only.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.transports.register(transport);
    }

    /// Register a transport and poll it for inbound packets until shutdown.
    ///
    /// Must be called within a Tokio runtime. Packets are only taken while
    /// the gateway accepts traffic.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.transports.register(transport.clone());
        let gateway = self.clone();
        self.inner
            .tasks
            .spawn(async move { gateway.poll_transport(transport).await });
    }

    async fn poll_transport(self, transport: Arc<dyn Transport>) {
        let name = transport.name().to_string();
        let idle = self.inner.config.receive_poll();
        let cancel = self.inner.cancel.clone();

        while !cancel.is_cancelled() {
            let received = if self.state().accepts_traffic() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = transport.receive() => r,
                }
            } else {
                Ok(None)
            };

            match received {
                Ok(Some(packet)) => {
                    if let Err(e) = self.handle_inbound(packet).await {
                        warn!(transport = %name, error = %e, "Inbound packet rejected");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(transport = %name, error = %e, "Transport receive failed");
                    self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
        debug!(transport = %name, "Transport poller stopped");
    }

    // --- Introspection ---

    pub fn status(&self) -> GatewayStatus {
        let uptime_secs = self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let c = &self.inner.counters;
        GatewayStatus {
            id: self.id().to_string(),
            state: self.state(),
            uptime_secs,
            sessions: self.inner.sessions.stats(),
            transports: self.inner.transports.list(),
            inbound: c.inbound.load(Ordering::Relaxed),
            outbound: c.outbound.load(Ordering::Relaxed),
            outbound_failed: c.outbound_failed.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            failure_ratio: self.inner.health.failure_ratio(),
        }
    }

    /// Healthy while READY or RUNNING; includes per-transport health.
    pub async fn health_check(&self) -> GatewayHealth {
        let state = self.state();
        GatewayHealth {
            healthy: matches!(state, GatewayState::Ready | GatewayState::Running),
            state,
            transports: self.inner.transports.health_check_all().await,
        }
    }

    // --- Internals ---

    fn transition(&self, to: GatewayState) -> std::result::Result<(), GatewayError> {
        let from = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.can_transition_to(to) {
                return Err(GatewayError::InvalidTransition {
                    from: state.to_string(),
                    to: to.to_string(),
                });
            }
            std::mem::replace(&mut *state, to)
        };
        self.state_changed(from, to);
        Ok(())
    }

    /// Transition only if the gateway is still in `from`.
    fn transition_from(&self, from: GatewayState, to: GatewayState) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.state_changed(from, to);
        true
    }

    fn state_changed(&self, from: GatewayState, to: GatewayState) {
        info!(gateway = %self.id(), from = %from, to = %to, "Gateway state changed");
        self.notify(
            self.event(EventType::GatewayStateChanged)
                .with_field("from", from.as_str())
                .with_field("to", to.as_str()),
        );
    }

    fn record_health(&self, success: bool) {
        let health = &self.inner.health;
        health.record(success);
        match health.assess() {
            HealthVerdict::Degraded => {
                if self.transition_from(GatewayState::Running, GatewayState::Degraded) {
                    warn!(
                        failure_ratio = health.failure_ratio().unwrap_or_default(),
                        "Gateway degraded"
                    );
                }
            }
            HealthVerdict::Healthy => {
                if self.transition_from(GatewayState::Degraded, GatewayState::Running) {
                    info!("Gateway recovered");
                }
            }
            HealthVerdict::Unchanged => {}
        }
    }

    fn event(&self, event_type: EventType) -> Event {
        Event::new(event_type, self.id())
    }

    fn session_event(&self, event_type: EventType, session: &Session) -> Event {
        self.event(event_type)
            .with_field("session_id", session.id.clone())
            .with_field("platform", session.platform.clone())
            .with_field("participant_id", session.participant_id.clone())
    }

    /// Publish without waiting. Internal notifications never block traffic.
    fn notify(&self, event: Event) -> bool {
        match self.inner.hub.publish(event) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Gateway event not published");
                false
            }
        }
    }

    /// Publish, keeping the event for the next sweep if the hub is full.
    fn notify_or_defer(&self, event: Event) {
        match self.inner.hub.publish(event.clone()) {
            Ok(_) => {}
            Err(HubError::QueueFull { capacity }) => {
                warn!(
                    event_id = %event.id,
                    capacity,
                    "Hub full, expiry notification deferred to next sweep"
                );
                self.inner
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(event);
            }
            Err(e) => debug!(error = %e, "Gateway event not published"),
        }
    }

    /// Retry deferred notifications. Returns how many went through.
    fn flush_pending(&self) -> usize {
        let pending =
            std::mem::take(&mut *self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()));
        let total = pending.len();
        for event in pending {
            self.notify_or_defer(event);
        }
        total.saturating_sub(self.pending_len())
    }

    fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_config::HealthConfig;
    use conduit_core::{Error, EventHandler, EventSelector, TransportError, handler_fn};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    type Seen = Arc<Mutex<Vec<Arc<Event>>>>;

    struct MockTransport {
        name: String,
        accept: AtomicBool,
        delay: Option<Duration>,
        sent: Mutex<Vec<Packet>>,
        inbox: Mutex<VecDeque<Packet>>,
        stopped: AtomicBool,
    }

    impl MockTransport {
        fn new(name: &str) -> Arc<Self> {
            Self::build(name, None)
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Self::build(name, Some(delay))
        }

        fn build(name: &str, delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                accept: AtomicBool::new(true),
                delay,
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                stopped: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<Packet> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, packet: Packet) -> std::result::Result<bool, TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if !self.accept.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.sent.lock().unwrap().push(packet);
            Ok(true)
        }

        async fn receive(&self) -> std::result::Result<Option<Packet>, TransportError> {
            Ok(self.inbox.lock().unwrap().pop_front())
        }

        async fn stop(&self) -> std::result::Result<(), TransportError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recorder(seen: Seen) -> Arc<dyn EventHandler> {
        Arc::new(handler_fn("recorder", move |event: Arc<Event>| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(event);
                Ok(())
            }
        }))
    }

    fn session_config(ttl_secs: u64) -> SessionConfig {
        SessionConfig {
            ttl_secs,
            idle_timeout_secs: ttl_secs,
            sweep_interval_secs: 3600,
            max_sessions: 100,
            tombstone_capacity: 16,
        }
    }

    fn gateway_with(config: GatewayConfig, sessions: SessionConfig) -> (Gateway, Seen) {
        let hub = EventHub::new(100, Duration::from_secs(5));
        hub.start();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(EventSelector::All, recorder(seen.clone()), 0)
            .unwrap();
        (Gateway::new(config, &sessions, hub), seen)
    }

    fn gateway() -> (Gateway, Seen) {
        gateway_with(GatewayConfig::default(), session_config(60))
    }

    async fn running() -> (Gateway, Seen) {
        let (gw, seen) = gateway();
        gw.initialize().unwrap();
        gw.start().unwrap();
        (gw, seen)
    }

    /// Wait until every event published so far has been dispatched.
    async fn flush(gw: &Gateway) {
        gw.hub()
            .emit(Event::new(EventType::ProcessingComplete, "test").with_priority(i32::MIN))
            .await
            .unwrap();
    }

    fn of_type(seen: &Seen, event_type: EventType) -> Vec<Arc<Event>> {
        seen.lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    #[test]
    fn state_edges() {
        use GatewayState::*;
        assert!(Initializing.can_transition_to(Ready));
        assert!(!Initializing.can_transition_to(Running));
        assert!(Running.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Running));
        assert!(Maintenance.can_transition_to(Running));
        assert!(!Degraded.can_transition_to(Maintenance));
        assert!(Ready.can_transition_to(Shutdown));
        assert!(!Shutdown.can_transition_to(Shutdown));
        assert!(!Shutdown.can_transition_to(Running));
    }

    #[tokio::test]
    async fn lifecycle_rejects_illegal_transitions() {
        let (gw, seen) = gateway();
        assert!(matches!(
            gw.start(),
            Err(Error::Gateway(GatewayError::InvalidTransition { .. }))
        ));
        gw.initialize().unwrap();
        assert!(gw.initialize().is_err());
        assert!(gw.enter_maintenance().is_err());
        gw.start().unwrap();
        assert_eq!(gw.state(), GatewayState::Running);

        flush(&gw).await;
        assert_eq!(of_type(&seen, EventType::LifecycleBoot).len(), 1);
        let changes = of_type(&seen, EventType::GatewayStateChanged);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].payload_str("to"), Some("running"));
    }

    #[tokio::test]
    async fn inbound_before_start_is_rejected() {
        let (gw, _) = gateway();
        let err = gw
            .handle_inbound(Packet::inbound("web", "alice", "hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::NotAccepting(_))));
    }

    #[tokio::test]
    async fn inbound_packets_share_one_session_per_participant() {
        let (gw, seen) = running().await;
        let packet = Packet::inbound("web", "alice", serde_json::json!({"text": "hi"}))
            .with_metadata("routing_key", "chat.greeting");
        let packet_id = packet.id.clone();

        let report = gw.handle_inbound(packet).await.unwrap();
        assert_eq!(report.failed(), 0);
        gw.handle_inbound(Packet::inbound("web", "alice", "again".into()))
            .await
            .unwrap();

        let received = of_type(&seen, EventType::CommunicationReceived);
        assert_eq!(received.len(), 2);
        let first = &received[0];
        let session_id = first.payload_str("session_id").unwrap();
        assert_eq!(received[1].payload_str("session_id"), Some(session_id));
        assert_eq!(first.correlation_id.as_deref(), Some(packet_id.as_str()));
        assert_eq!(first.payload_str("routing_key"), Some("chat.greeting"));
        assert_eq!(first.payload["payload"]["text"], "hi");

        let session = gw.get_session(session_id).unwrap();
        assert_eq!(session.message_count, 2);
        assert_eq!(session.participant_id, "alice");

        flush(&gw).await;
        assert_eq!(of_type(&seen, EventType::SessionCreated).len(), 1);
        assert_eq!(gw.status().inbound, 2);
    }

    #[tokio::test]
    async fn outbound_goes_through_session_transport() {
        let (gw, seen) = running().await;
        let transport = MockTransport::new("web");
        gw.register_transport(transport.clone());
        let session = gw.create_session("web", "bob").unwrap();

        assert!(gw
            .dispatch_outbound(&session.id, serde_json::json!("hello"))
            .await
            .unwrap());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "bob");
        assert_eq!(sent[0].origin, "conduit");
        assert_eq!(sent[0].metadata["session_id"], session.id.as_str());

        flush(&gw).await;
        let events = of_type(&seen, EventType::CommunicationSent);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload_str("session_id"), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn outbound_errors() {
        let (gw, _) = running().await;
        assert!(matches!(
            gw.dispatch_outbound("missing", serde_json::Value::Null).await,
            Err(Error::Session(SessionError::NotFound(_)))
        ));

        let session = gw.create_session("sms", "carol").unwrap();
        assert!(matches!(
            gw.dispatch_outbound(&session.id, serde_json::Value::Null).await,
            Err(Error::Transport(TransportError::NotConfigured(_)))
        ));

        assert!(gw.close_session(&session.id).unwrap());
        assert!(!gw.close_session(&session.id).unwrap());
        assert!(matches!(
            gw.dispatch_outbound(&session.id, serde_json::Value::Null).await,
            Err(Error::Session(SessionError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn refused_send_returns_false() {
        let (gw, _) = running().await;
        let transport = MockTransport::new("web");
        transport.accept.store(false, Ordering::SeqCst);
        gw.register_transport(transport);
        let session = gw.create_session("web", "dave").unwrap();

        assert!(!gw
            .dispatch_outbound(&session.id, "x".into())
            .await
            .unwrap());
        assert_eq!(gw.status().outbound_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out() {
        let config = GatewayConfig {
            send_timeout_ms: 100,
            ..Default::default()
        };
        let (gw, _) = gateway_with(config, session_config(60));
        gw.initialize().unwrap();
        gw.start().unwrap();
        gw.register_transport(MockTransport::slow("web", Duration::from_secs(10)));
        let session = gw.create_session("web", "erin").unwrap();

        assert!(!gw
            .dispatch_outbound(&session.id, "x".into())
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_sends_in_background() {
        let (gw, _) = running().await;
        let transport = MockTransport::slow("web", Duration::from_secs(2));
        gw.register_transport(transport.clone());
        let session = gw.create_session("web", "gus").unwrap();

        let started = tokio::time::Instant::now();
        gw.reply(&session.id, serde_json::json!("later"));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(transport.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, "later");
        assert_eq!(gw.status().outbound, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_queued_replies() {
        let (gw, _) = running().await;
        let transport = MockTransport::slow("web", Duration::from_secs(1));
        gw.register_transport(transport.clone());
        let session = gw.create_session("web", "hal").unwrap();

        gw.reply(&session.id, serde_json::json!("bye"));
        gw.shutdown().await;
        assert_eq!(transport.sent().len(), 1);
        assert!(gw.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_emits_one_event() {
        let (gw, seen) = gateway_with(GatewayConfig::default(), session_config(1));
        gw.initialize().unwrap();
        gw.start().unwrap();
        let session = gw.create_session("web", "frank").unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;
        let report = gw.sweep_once();
        assert_eq!(report.expired, vec![session.id.clone()]);
        assert!(gw.sweep_once().expired.is_empty());

        flush(&gw).await;
        let expired = of_type(&seen, EventType::SessionExpired);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].payload_str("session_id"), Some(session.id.as_str()));
        assert!(expired[0].payload_str("reason").unwrap().contains("expired"));
        assert!(matches!(
            gw.get_session(&session.id),
            Err(Error::Session(SessionError::Closed(_)))
        ));
        assert!(!gw.close_session(&session.id).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_runs_on_interval() {
        let sessions = SessionConfig {
            sweep_interval_secs: 1,
            ..session_config(1)
        };
        let (gw, _) = gateway_with(GatewayConfig::default(), sessions);
        gw.initialize().unwrap();
        gw.start().unwrap();
        let session = gw.create_session("web", "gina").unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(gw.get_session(&session.id).is_err());
        assert_eq!(gw.status().sessions.expired, 1);
    }

    #[tokio::test]
    async fn maintenance_blocks_new_sessions_only() {
        let (gw, _) = running().await;
        gw.handle_inbound(Packet::inbound("web", "hank", "a".into()))
            .await
            .unwrap();

        gw.enter_maintenance().unwrap();
        assert!(gw
            .handle_inbound(Packet::inbound("web", "hank", "b".into()))
            .await
            .is_ok());
        assert!(matches!(
            gw.handle_inbound(Packet::inbound("web", "ivy", "c".into())).await,
            Err(Error::Session(SessionError::NotAccepting))
        ));

        gw.exit_maintenance().unwrap();
        assert!(gw
            .handle_inbound(Packet::inbound("web", "ivy", "c".into()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn degrades_and_recovers_on_send_health() {
        let config = GatewayConfig {
            health: HealthConfig {
                window: 4,
                min_samples: 2,
                degrade_failure_ratio: 0.5,
                recover_failure_ratio: 0.2,
            },
            ..Default::default()
        };
        let (gw, _) = gateway_with(config, session_config(60));
        gw.initialize().unwrap();
        gw.start().unwrap();
        let transport = MockTransport::new("web");
        gw.register_transport(transport.clone());
        let session = gw.create_session("web", "jack").unwrap();

        transport.accept.store(false, Ordering::SeqCst);
        for _ in 0..2 {
            gw.dispatch_outbound(&session.id, "x".into()).await.unwrap();
        }
        assert_eq!(gw.state(), GatewayState::Degraded);
        assert!(!gw.health_check().await.healthy);

        transport.accept.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            assert!(gw.dispatch_outbound(&session.id, "x".into()).await.unwrap());
        }
        assert_eq!(gw.state(), GatewayState::Running);
        assert!(gw.health_check().await.healthy);
    }

    #[tokio::test]
    async fn attached_transport_is_polled() {
        let config = GatewayConfig {
            receive_poll_ms: 5,
            ..Default::default()
        };
        let (gw, seen) = gateway_with(config, session_config(60));
        let transport = MockTransport::new("web");
        transport
            .inbox
            .lock()
            .unwrap()
            .push_back(Packet::inbound("web", "kim", "polled".into()));
        gw.attach_transport(transport.clone());
        gw.initialize().unwrap();
        gw.start().unwrap();

        for _ in 0..200 {
            if !of_type(&seen, EventType::CommunicationReceived).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let received = of_type(&seen, EventType::CommunicationReceived);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload["payload"], "polled");

        gw.shutdown().await;
        assert!(transport.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_closes_sessions() {
        let (gw, seen) = running().await;
        gw.create_session("web", "liz").unwrap();
        gw.create_session("web", "max").unwrap();

        gw.shutdown().await;
        gw.shutdown().await;
        assert_eq!(gw.state(), GatewayState::Shutdown);
        assert!(gw.sessions().is_empty());
        assert!(matches!(
            gw.handle_inbound(Packet::inbound("web", "liz", "late".into())).await,
            Err(Error::Gateway(GatewayError::NotAccepting(_)))
        ));
        assert!(gw.create_session("web", "ned").is_err());

        flush(&gw).await;
        assert_eq!(of_type(&seen, EventType::SessionClosed).len(), 2);
        assert_eq!(of_type(&seen, EventType::LifecycleShutdown).len(), 1);
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let (gw, _) = running().await;
        gw.register_transport(MockTransport::new("web"));
        let session = gw.create_session("web", "oli").unwrap();
        gw.suspend_session(&session.id).unwrap();

        let status = gw.status();
        assert_eq!(status.state, GatewayState::Running);
        assert_eq!(status.sessions.suspended, 1);
        assert_eq!(status.transports, vec!["web"]);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");

        gw.resume_session(&session.id).unwrap();
        assert_eq!(gw.status().sessions.active, 1);
    }
}
