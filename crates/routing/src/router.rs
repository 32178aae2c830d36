//! Router: resolves a message to handlers through ordered routes.
//!
//! Routes are scanned in registration order. For each enabled route whose
//! pattern matches the routing key, the route's filter chain narrows its
//! handler set and its strategy picks one. The first exclusive route that
//! yields a selection wins. Non-exclusive routes keep the scan going: their
//! candidates are merged (route order, then handler order, first occurrence
//! kept) and the strategy of the first contributing route selects over the
//! union.
//!
//! When nothing is selectable, the fallback of the first matching route that
//! has one is used, then the router-wide fallback, and otherwise the message
//! is unroutable. A route's fallback is also carried in the resolution so the
//! distributor can hand it a message the selected handler failed on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use conduit_config::RouterConfig;
use conduit_core::{Message, RoutingError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::distributor::DistributionPolicy;
use crate::filter::{Filter, FilterChain};
use crate::pattern::RoutePattern;
use crate::registry::{HandlerRegistry, RegisteredHandler};
use crate::strategy::{RoutingStrategy, StrategyState};

/// A pattern-to-handler binding.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub pattern: RoutePattern,
    pub filters: FilterChain,
    pub strategy: RoutingStrategy,
    /// Handler ids in preference order
    pub handlers: Vec<String>,
    pub fallback: Option<String>,
    pub exclusive: bool,
    pub enabled: bool,
    /// When set, the message goes to every candidate under this policy
    pub distribution: Option<DistributionPolicy>,
    /// Invocations of the selected handler before the fallback takes over
    pub max_attempts: u32,
    /// Per-invocation bound; the distributor default when unset
    pub timeout: Option<Duration>,
}

impl Route {
    pub fn new<I, S>(pattern: &str, handlers: I) -> Result<Self, RoutingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern: RoutePattern::parse(pattern)?,
            filters: FilterChain::new(),
            strategy: RoutingStrategy::default(),
            handlers: handlers.into_iter().map(Into::into).collect(),
            fallback: None,
            exclusive: true,
            enabled: true,
            distribution: None,
            max_attempts: 1,
            timeout: None,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fallback(mut self, handler_id: impl Into<String>) -> Self {
        self.fallback = Some(handler_id.into());
        self
    }

    pub fn with_distribution(mut self, policy: DistributionPolicy) -> Self {
        self.distribution = Some(policy);
        self
    }

    /// Retry the selected handler up to `attempts` times in total.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let later matching routes contribute candidates too.
    pub fn non_exclusive(mut self) -> Self {
        self.exclusive = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn same_signature(&self, other: &Route) -> bool {
        self.pattern.as_str() == other.pattern.as_str()
            && self.filters.signature() == other.filters.signature()
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone)]
pub struct ResolvedHandlers {
    /// Route that produced the selection; `None` for the router-wide fallback
    pub route_id: Option<String>,
    /// The strategy-selected (or fallback) handler
    pub selected: RegisteredHandler,
    /// Every candidate that survived filtering (the union for merged routes)
    pub candidates: Vec<RegisteredHandler>,
    pub via_fallback: bool,
    pub distribution: Option<DistributionPolicy>,
    /// Attempt budget for direct delivery to `selected`
    pub max_attempts: u32,
    pub timeout: Option<Duration>,
    /// Takes the message when `selected` fails every attempt
    pub fallback: Option<RegisteredHandler>,
}

struct RouteEntry {
    route: Route,
    state: StrategyState,
    enabled: AtomicBool,
    matches: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    pub id: String,
    pub pattern: String,
    pub strategy: &'static str,
    pub enabled: bool,
    pub exclusive: bool,
    pub matches: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub total_routed: u64,
    pub unrouted: u64,
    pub fallback_used: u64,
    pub routes: Vec<RouteStats>,
}

pub struct Router {
    registry: Arc<HandlerRegistry>,
    routes: RwLock<Vec<Arc<RouteEntry>>>,
    fallback: Option<String>,
    seed: Option<u64>,
    registrations: AtomicU64,
    total_routed: AtomicU64,
    unrouted: AtomicU64,
    fallback_used: AtomicU64,
}

impl Router {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            routes: RwLock::new(Vec::new()),
            fallback: None,
            seed: None,
            registrations: AtomicU64::new(0),
            total_routed: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
            fallback_used: AtomicU64::new(0),
        }
    }

    pub fn from_config(registry: Arc<HandlerRegistry>, config: &RouterConfig) -> Self {
        let mut router = Self::new(registry);
        router.seed = config.seed;
        router.fallback = config.fallback.clone();
        router
    }

    /// Seed the per-route RNGs: route *n* (in registration order) uses `seed + n`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Handler used when no route yields a selection.
    pub fn with_fallback(mut self, handler_id: impl Into<String>) -> Self {
        self.fallback = Some(handler_id.into());
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Append a route. Returns its id.
    pub fn register_route(&self, route: Route) -> Result<String, RoutingError> {
        for id in route.handlers.iter().chain(route.fallback.iter()) {
            if !self.registry.contains(id) {
                return Err(RoutingError::UnknownHandler(id.clone()));
            }
        }

        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        for existing in routes.iter() {
            if existing.route.same_signature(&route) {
                return Err(RoutingError::DuplicatePattern {
                    pattern: route.pattern.to_string(),
                    filters: route.filters.signature(),
                });
            }
            if existing.route.id == route.id {
                return Err(RoutingError::DuplicateRouteId(route.id));
            }
        }

        let n = self.registrations.fetch_add(1, Ordering::Relaxed);
        let state = StrategyState::new(self.seed.map(|s| s.wrapping_add(n)));
        info!(
            route_id = %route.id,
            pattern = %route.pattern,
            strategy = route.strategy.name(),
            handlers = route.handlers.len(),
            exclusive = route.exclusive,
            "Route registered"
        );
        let id = route.id.clone();
        routes.push(Arc::new(RouteEntry {
            enabled: AtomicBool::new(route.enabled),
            matches: AtomicU64::new(0),
            route,
            state,
        }));
        Ok(id)
    }

    pub fn unregister_route(&self, route_id: &str) -> Result<(), RoutingError> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let before = routes.len();
        routes.retain(|e| e.route.id != route_id);
        if routes.len() == before {
            return Err(RoutingError::UnknownRoute(route_id.to_string()));
        }
        info!(route_id = %route_id, "Route unregistered");
        Ok(())
    }

    pub fn set_enabled(&self, route_id: &str, enabled: bool) -> Result<(), RoutingError> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        let entry = routes
            .iter()
            .find(|e| e.route.id == route_id)
            .ok_or_else(|| RoutingError::UnknownRoute(route_id.to_string()))?;
        entry.enabled.store(enabled, Ordering::SeqCst);
        info!(route_id = %route_id, enabled, "Route toggled");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn route(&self, message: &Message) -> Result<ResolvedHandlers, RoutingError> {
        let routes: Vec<Arc<RouteEntry>> = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let key = message.routing_key.as_str();

        let mut union: Vec<RegisteredHandler> = Vec::new();
        let mut lead: Option<Arc<RouteEntry>> = None;
        let mut fallback_route: Option<Arc<RouteEntry>> = None;

        for entry in routes {
            if !entry.enabled.load(Ordering::SeqCst) || !entry.route.pattern.matches(key) {
                continue;
            }
            entry.matches.fetch_add(1, Ordering::Relaxed);

            let candidates = self.candidates(&entry, message);
            if candidates.is_empty() {
                if fallback_route.is_none() && entry.route.fallback.is_some() {
                    fallback_route = Some(entry.clone());
                }
                continue;
            }

            if entry.route.exclusive && union.is_empty() {
                if let Some(index) = entry.state.select(&entry.route.strategy, message, &candidates) {
                    return Ok(self.resolved(&entry, index, candidates));
                }
                if fallback_route.is_none() && entry.route.fallback.is_some() {
                    fallback_route = Some(entry.clone());
                }
                continue;
            }

            if lead.is_none() {
                lead = Some(entry.clone());
            }
            for candidate in candidates {
                if !union.iter().any(|c| c.id() == candidate.id()) {
                    union.push(candidate);
                }
            }
            if entry.route.exclusive {
                break;
            }
        }

        if let Some(lead) = lead {
            if let Some(index) = lead.state.select(&lead.route.strategy, message, &union) {
                return Ok(self.resolved(&lead, index, union));
            }
            if fallback_route.is_none() && lead.route.fallback.is_some() {
                fallback_route = Some(lead);
            }
        }

        if let Some(entry) = fallback_route {
            if let Some(resolved) = entry
                .route
                .fallback
                .as_deref()
                .and_then(|id| self.fallback_to(id, Some(&entry.route)))
            {
                return Ok(resolved);
            }
        }
        if let Some(resolved) = self.fallback.as_deref().and_then(|id| self.fallback_to(id, None)) {
            return Ok(resolved);
        }

        self.unrouted.fetch_add(1, Ordering::Relaxed);
        debug!(routing_key = %key, "No route");
        Err(RoutingError::NoRoute {
            key: key.to_string(),
        })
    }

    /// The route's registered handlers that pass its filters.
    fn candidates(&self, entry: &RouteEntry, message: &Message) -> Vec<RegisteredHandler> {
        let handlers = entry
            .route
            .handlers
            .iter()
            .filter_map(|id| {
                let found = self.registry.get(id);
                if found.is_none() {
                    warn!(route_id = %entry.route.id, handler = %id, "Route references unregistered handler");
                }
                found
            })
            .collect();
        entry.route.filters.apply(message, handlers)
    }

    fn resolved(
        &self,
        entry: &RouteEntry,
        index: usize,
        candidates: Vec<RegisteredHandler>,
    ) -> ResolvedHandlers {
        self.total_routed.fetch_add(1, Ordering::Relaxed);
        let selected = candidates[index].clone();
        debug!(
            route_id = %entry.route.id,
            handler = %selected.id(),
            candidates = candidates.len(),
            "Message routed"
        );
        let fallback = entry
            .route
            .fallback
            .as_deref()
            .filter(|id| *id != selected.id())
            .and_then(|id| self.registry.get(id));
        ResolvedHandlers {
            route_id: Some(entry.route.id.clone()),
            selected,
            candidates,
            via_fallback: false,
            distribution: entry.route.distribution,
            max_attempts: entry.route.max_attempts,
            timeout: entry.route.timeout,
            fallback,
        }
    }

    fn fallback_to(&self, handler_id: &str, route: Option<&Route>) -> Option<ResolvedHandlers> {
        let Some(handler) = self.registry.get(handler_id) else {
            warn!(handler = %handler_id, "Fallback handler is not registered");
            return None;
        };
        self.total_routed.fetch_add(1, Ordering::Relaxed);
        self.fallback_used.fetch_add(1, Ordering::Relaxed);
        debug!(handler = %handler_id, "Using fallback handler");
        Some(ResolvedHandlers {
            route_id: route.map(|r| r.id.clone()),
            selected: handler.clone(),
            candidates: vec![handler],
            via_fallback: true,
            distribution: None,
            max_attempts: 1,
            timeout: route.and_then(|r| r.timeout),
            fallback: None,
        })
    }

    pub fn stats(&self) -> RouterStats {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        RouterStats {
            total_routed: self.total_routed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
            routes: routes
                .iter()
                .map(|e| RouteStats {
                    id: e.route.id.clone(),
                    pattern: e.route.pattern.to_string(),
                    strategy: e.route.strategy.name(),
                    enabled: e.enabled.load(Ordering::SeqCst),
                    exclusive: e.route.exclusive,
                    matches: e.matches.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}
