//! # Conduit Runtime
//!
//! The process-scoped context that owns the event hub, the handler
//! registry, the router, the distributor, and the gateway. Build it once at
//! startup, register handlers and routes, [`Runtime::start`] it, and tear it
//! down with [`Runtime::shutdown`].
//!
//! Inbound traffic flows:
//!
//! ```text
//! Transport ─▶ Gateway ─emit─▶ EventHub ─▶ RouterSubscriber
//!                                            │ Router::route
//!                                            │ MessageDistributor::dispatch
//!                                            ▼
//!                                  Gateway::reply ─▶ Transport
//! ```

pub mod builtin;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_config::{AppConfig, FilterConfig, RouteConfig};
use conduit_core::{
    DispatchError, Error, Event, EventSelector, EventHandler, EventType, HandlerError,
    InvocationContext, Message, MessageHandler, Result,
};
use conduit_gateway::{Gateway, GatewayStatus, SessionManager};
use conduit_hub::{EventHub, HubStats, SubscriptionId};
use conduit_routing::{
    DistributionPolicy, Filter, HandlerProfile, HandlerRegistry, MessageDistributor, Route, Router,
    RouterStats, RoutingStrategy,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot of every subsystem's counters.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub hub: HubStats,
    pub router: RouterStats,
    pub gateway: GatewayStatus,
}

pub struct Runtime {
    config: AppConfig,
    hub: EventHub,
    registry: Arc<HandlerRegistry>,
    router: Arc<Router>,
    distributor: Arc<MessageDistributor>,
    gateway: Gateway,
    hub_task: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Runtime {
    /// Validate `config` and construct every subsystem. Nothing runs until
    /// [`start`](Self::start).
    pub fn build(config: AppConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let hub = EventHub::from_config(&config.hub);
        let registry = Arc::new(HandlerRegistry::new());
        let router = Arc::new(Router::from_config(registry.clone(), &config.router));
        let distributor = Arc::new(MessageDistributor::from_config(&config.distributor));
        let gateway = Gateway::from_config(&config, hub.clone());

        Ok(Self {
            config,
            hub,
            registry,
            router,
            distributor,
            gateway,
            hub_task: Mutex::new(None),
            subscription: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn distributor(&self) -> &Arc<MessageDistributor> {
        &self.distributor
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.gateway.sessions()
    }

    /// Make a handler available to routes.
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>, profile: HandlerProfile) {
        self.registry.register(handler, profile);
    }

    /// Register declarative routes in order. Returns one error string per
    /// route that could not be registered; the others are kept.
    pub fn load_routes(&self, routes: &[RouteConfig]) -> Vec<String> {
        let mut errors = Vec::new();
        for config in routes {
            let registered = self
                .check_budget(config)
                .and_then(|()| route_from_config(config))
                .and_then(|route| self.router.register_route(route).map_err(Error::from));
            match registered {
                Ok(id) => debug!(route_id = %id, pattern = %config.pattern, "Route loaded"),
                Err(e) => errors.push(format!("Route '{}': {e}", config.pattern)),
            }
        }
        errors
    }

    /// A route's worst-case delivery must finish inside the hub's subscriber
    /// timeout, or the router subscriber is cut off mid-delivery.
    fn check_budget(&self, config: &RouteConfig) -> Result<()> {
        let budget = config.delivery_budget(self.config.distributor.timeout());
        let limit = self.config.hub.handler_timeout();
        if budget >= limit {
            return Err(Error::Config {
                message: format!(
                    "worst-case delivery of {}ms does not fit hub.handler_timeout_ms ({}ms)",
                    budget.as_millis(),
                    limit.as_millis()
                ),
            });
        }
        Ok(())
    }

    /// Load the routes from the runtime's own configuration.
    pub fn load_configured_routes(&self) -> Vec<String> {
        self.load_routes(&self.config.routes)
    }

    /// Start the hub loop, subscribe the router to inbound traffic, and bring
    /// the gateway to RUNNING.
    pub fn start(&self) -> Result<()> {
        let handle = self.hub.start();
        *self.hub_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let subscriber = Arc::new(RouterSubscriber {
            router: self.router.clone(),
            distributor: self.distributor.clone(),
            gateway: self.gateway.clone(),
        });
        let id = self
            .hub
            .subscribe(EventType::CommunicationReceived, subscriber, 0)?;
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        self.gateway.initialize()?;
        self.gateway.start()?;

        info!(
            handlers = self.registry.len(),
            routes = self.router.len(),
            "Conduit runtime started"
        );
        Ok(())
    }

    /// Shut the gateway down, then the hub, each within its grace period.
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;

        if let Some(id) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            self.hub.unsubscribe(&id);
        }
        self.hub.shutdown(self.config.hub.shutdown_grace()).await;
        self.distributor.cancel_all();

        let handle = self.hub_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event hub task ended abnormally");
            }
        }
        info!("Conduit runtime stopped");
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            hub: self.hub.stats(),
            router: self.router.stats(),
            gateway: self.gateway.status(),
        }
    }
}

/// Build a [`Route`] from its declarative form.
pub fn route_from_config(config: &RouteConfig) -> Result<Route> {
    let strategy = RoutingStrategy::from_name(&config.strategy).ok_or_else(|| Error::Config {
        message: format!("unknown strategy '{}'", config.strategy),
    })?;
    let mut route = Route::new(&config.pattern, config.handlers.iter().cloned())?
        .with_strategy(strategy);

    if let Some(name) = &config.distribution {
        let policy = DistributionPolicy::from_name(name).ok_or_else(|| Error::Config {
            message: format!("unknown distribution '{name}'"),
        })?;
        route = route.with_distribution(policy);
    }
    if let Some(fallback) = &config.fallback {
        route = route.with_fallback(fallback.clone());
    }
    for filter in &config.filters {
        route = route.with_filter(filter_from_config(filter)?);
    }
    if !config.exclusive {
        route = route.non_exclusive();
    }
    if !config.enabled {
        route = route.disabled();
    }
    route = route.with_max_attempts(config.max_attempts);
    if let Some(timeout) = config.timeout() {
        route = route.with_timeout(timeout);
    }
    Ok(route)
}

fn filter_from_config(config: &FilterConfig) -> Result<Filter> {
    Ok(match config {
        FilterConfig::Attribute { key, value } => Filter::attribute(key.clone(), value.clone()),
        FilterConfig::Pattern { field, regex } => Filter::pattern(field.clone(), regex)?,
        FilterConfig::Range { field, min, max } => Filter::range(field.clone(), *min, *max),
        FilterConfig::HandlerTag { key, value } => Filter::handler_tag(key.clone(), value.clone()),
        FilterConfig::Healthy => Filter::Healthy,
    })
}

/// Routes `communication.received` events and queues handler output for
/// the session's participant.
struct RouterSubscriber {
    router: Arc<Router>,
    distributor: Arc<MessageDistributor>,
    gateway: Gateway,
}

#[async_trait]
impl EventHandler for RouterSubscriber {
    fn name(&self) -> &str {
        "router"
    }

    fn accepts(&self, selector: &EventSelector) -> bool {
        *selector == EventSelector::Type(EventType::CommunicationReceived)
    }

    async fn on_event(
        &self,
        event: Arc<Event>,
        _cx: InvocationContext,
    ) -> std::result::Result<(), HandlerError> {
        let message = Message::from_event(&event);
        let resolved = self
            .router
            .route(&message)
            .map_err(|e| HandlerError::new("router", e.to_string()))?;

        let report = self
            .distributor
            .dispatch(&message, &resolved)
            .await
            .map_err(|e| match e {
                DispatchError::Handler(err) => err,
                other => HandlerError::new("router", other.to_string()),
            })?;

        let Some(session_id) = message.session_id.as_deref() else {
            return Ok(());
        };
        // Replies leave through gateway tasks so transport latency does not
        // count against this subscriber's hub timeout.
        for (handler_id, output) in report.outputs() {
            if output.is_null() {
                continue;
            }
            debug!(session_id = %session_id, handler = %handler_id, "Queueing reply");
            self.gateway.reply(session_id, output.clone());
        }
        Ok(())
    }
}
