//! Message distributor: delivers a routed message per a distribution policy.
//!
//! Aggregate policies (Broadcast, Fanout, Scatter) collect a per-handler
//! result and only fail when every handler failed. Single-target policies
//! (RoundRobin, Random, Balanced) invoke one handler and return its error
//! directly. Every invocation is bounded by a caller-supplied timeout;
//! [`MessageDistributor::dispatch`] uses the route's timeout when it has one
//! and the distributor default otherwise.
//!
//! Direct delivery to a route's selected handler is retried up to the
//! route's `max_attempts`, then handed to the route fallback.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

use conduit_config::DistributorConfig;
use conduit_core::{DispatchError, HandlerError, HandlerErrorKind, InvocationContext, Message};
use futures::FutureExt;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::RegisteredHandler;
use crate::router::ResolvedHandlers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// Every handler, one after another, in candidate order.
    Broadcast,
    /// Every handler, concurrently.
    Fanout,
    /// A random subset of `scatter_size` handlers, concurrently.
    Scatter,
    /// One handler, cycling per handler set.
    RoundRobin,
    /// One handler, uniformly at random.
    Random,
    /// The healthy handler with the fewest in-flight plus reported load.
    Balanced,
}

impl DistributionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            DistributionPolicy::Broadcast => "broadcast",
            DistributionPolicy::Fanout => "fanout",
            DistributionPolicy::Scatter => "scatter",
            DistributionPolicy::RoundRobin => "round_robin",
            DistributionPolicy::Random => "random",
            DistributionPolicy::Balanced => "balanced",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "broadcast" => Some(DistributionPolicy::Broadcast),
            "fanout" => Some(DistributionPolicy::Fanout),
            "scatter" => Some(DistributionPolicy::Scatter),
            "round_robin" => Some(DistributionPolicy::RoundRobin),
            "random" => Some(DistributionPolicy::Random),
            "balanced" => Some(DistributionPolicy::Balanced),
            _ => None,
        }
    }

    /// Whether the policy aggregates results over several handlers.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            DistributionPolicy::Broadcast | DistributionPolicy::Fanout | DistributionPolicy::Scatter
        )
    }
}

impl std::fmt::Display for DistributionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub handler_id: String,
    pub result: Result<serde_json::Value, HandlerError>,
}

/// Aggregate result of a delivery.
#[derive(Debug, Clone)]
pub struct DistributionReport {
    /// `None` when the selected handler was invoked directly.
    pub policy: Option<DistributionPolicy>,
    pub outcomes: Vec<HandlerOutcome>,
    pub successful: usize,
    pub failed: usize,
}

impl DistributionReport {
    fn from_outcomes(policy: Option<DistributionPolicy>, outcomes: Vec<HandlerOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let failed = outcomes.len() - successful;
        Self {
            policy,
            outcomes,
            successful,
            failed,
        }
    }

    /// Successful outputs, in invocation order.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(v) => Some((o.handler_id.as_str(), v)),
            Err(_) => None,
        })
    }
}

/// Decrements a handler's in-flight count when the invocation ends.
struct InFlightGuard<'a> {
    counts: &'a Mutex<HashMap<String, u64>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(n) = counts.get_mut(&self.id) {
            *n = n.saturating_sub(1);
        }
    }
}

pub struct MessageDistributor {
    timeout: Duration,
    scatter_size: usize,
    rng: Mutex<StdRng>,
    /// Round-robin cursors keyed by handler set.
    cursors: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashMap<String, u64>>,
    cancel: CancellationToken,
}

impl MessageDistributor {
    pub fn new(timeout: Duration, scatter_size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            timeout,
            scatter_size,
            rng: Mutex::new(rng),
            cursors: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &DistributorConfig) -> Self {
        Self::new(config.timeout(), config.scatter_size, config.seed)
    }

    /// Cancel the contexts of all in-flight invocations.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Current in-flight invocations for a handler.
    pub fn in_flight(&self, handler_id: &str) -> u64 {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handler_id)
            .copied()
            .unwrap_or(0)
    }

    /// Deliver a resolved message: through the route's policy when it has
    /// one, otherwise to the strategy-selected handler alone.
    pub async fn dispatch(
        &self,
        message: &Message,
        resolved: &ResolvedHandlers,
    ) -> Result<DistributionReport, DispatchError> {
        let timeout = resolved.timeout.unwrap_or(self.timeout);
        match resolved.distribution {
            Some(policy) => {
                self.distribute(message, &resolved.candidates, policy, timeout)
                    .await
            }
            None => self.deliver(message, resolved, timeout).await,
        }
    }

    /// Invoke the selected handler, retrying failures up to the route's
    /// attempt budget. When every attempt failed the route fallback gets
    /// the message; its failure is logged and the handler's error returned.
    async fn deliver(
        &self,
        message: &Message,
        resolved: &ResolvedHandlers,
        timeout: Duration,
    ) -> Result<DistributionReport, DispatchError> {
        let attempts = resolved.max_attempts.max(1);
        let mut outcomes = Vec::new();
        for attempt in 1..=attempts {
            let outcome = self.invoke(&resolved.selected, message, timeout).await;
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if !failed {
                return Ok(DistributionReport::from_outcomes(None, outcomes));
            }
            if attempt < attempts {
                debug!(
                    handler = %resolved.selected.id(),
                    attempt,
                    max_attempts = attempts,
                    "Retrying handler"
                );
            }
        }

        if let Some(fallback) = &resolved.fallback {
            let rescue = self.invoke(fallback, message, timeout).await;
            if rescue.result.is_ok() {
                info!(
                    handler = %resolved.selected.id(),
                    fallback = %fallback.id(),
                    attempts,
                    "Handler failed, delivered to fallback"
                );
                outcomes.push(rescue);
                return Ok(DistributionReport::from_outcomes(None, outcomes));
            }
            warn!(
                handler = %resolved.selected.id(),
                fallback = %fallback.id(),
                "Fallback handler failed too"
            );
        }

        match outcomes.pop() {
            Some(last) => single(None, last, timeout),
            None => Err(DispatchError::NoTargets),
        }
    }

    pub async fn distribute(
        &self,
        message: &Message,
        handlers: &[RegisteredHandler],
        policy: DistributionPolicy,
        timeout: Duration,
    ) -> Result<DistributionReport, DispatchError> {
        if handlers.is_empty() {
            return Err(DispatchError::NoTargets);
        }
        debug!(
            policy = %policy,
            routing_key = %message.routing_key,
            handlers = handlers.len(),
            "Distributing message"
        );

        match policy {
            DistributionPolicy::Broadcast => {
                let mut outcomes = Vec::with_capacity(handlers.len());
                for handler in handlers {
                    outcomes.push(self.invoke(handler, message, timeout).await);
                }
                aggregate(policy, outcomes)
            }
            DistributionPolicy::Fanout => {
                let outcomes =
                    join_all(handlers.iter().map(|h| self.invoke(h, message, timeout))).await;
                aggregate(policy, outcomes)
            }
            DistributionPolicy::Scatter => {
                let size = self.scatter_size.clamp(1, handlers.len());
                let mut picks = {
                    let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                    rand::seq::index::sample(&mut *rng, handlers.len(), size).into_vec()
                };
                picks.sort_unstable();
                let calls = picks
                    .into_iter()
                    .map(|i| self.invoke(&handlers[i], message, timeout));
                let outcomes = join_all(calls).await;
                aggregate(policy, outcomes)
            }
            DistributionPolicy::RoundRobin => {
                let index = {
                    let key = handlers.iter().map(|h| h.id()).collect::<Vec<_>>().join(",");
                    let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
                    let cursor = cursors.entry(key).or_insert(0);
                    let index = *cursor % handlers.len();
                    *cursor = (index + 1) % handlers.len();
                    index
                };
                let outcome = self.invoke(&handlers[index], message, timeout).await;
                single(Some(policy), outcome, timeout)
            }
            DistributionPolicy::Random => {
                let index = self
                    .rng
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .random_range(0..handlers.len());
                let outcome = self.invoke(&handlers[index], message, timeout).await;
                single(Some(policy), outcome, timeout)
            }
            DistributionPolicy::Balanced => {
                let Some(index) = self.least_loaded(handlers) else {
                    return Err(DispatchError::NoTargets);
                };
                let outcome = self.invoke(&handlers[index], message, timeout).await;
                single(Some(policy), outcome, timeout)
            }
        }
    }

    fn least_loaded(&self, handlers: &[RegisteredHandler]) -> Option<usize> {
        let counts = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<(usize, u64)> = None;
        for (i, handler) in handlers.iter().enumerate() {
            let status = handler.status();
            if !status.healthy {
                continue;
            }
            let load = counts.get(handler.id()).copied().unwrap_or(0) + status.load;
            if best.is_none_or(|(_, b)| load < b) {
                best = Some((i, load));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Invoke one handler with timeout and panic capture.
    async fn invoke(
        &self,
        handler: &RegisteredHandler,
        message: &Message,
        timeout: Duration,
    ) -> HandlerOutcome {
        let id = handler.id().to_string();
        let _guard = {
            let mut counts = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            *counts.entry(id.clone()).or_insert(0) += 1;
            InFlightGuard {
                counts: &self.in_flight,
                id: id.clone(),
            }
        };

        let cx = InvocationContext::child_of(&self.cancel, timeout);
        let token = cx.cancel.clone();
        let call = AssertUnwindSafe(handler.handler.handle(message, cx)).catch_unwind();

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(HandlerError::panicked(&id, panic_message(panic))),
            Err(_) => {
                token.cancel();
                Err(HandlerError::timed_out(&id, timeout))
            }
        };

        if let Err(e) = &result {
            warn!(handler = %id, kind = ?e.kind, error = %e.reason, "Handler failed");
        }
        HandlerOutcome {
            handler_id: id,
            result,
        }
    }
}

fn aggregate(
    policy: DistributionPolicy,
    outcomes: Vec<HandlerOutcome>,
) -> Result<DistributionReport, DispatchError> {
    let report = DistributionReport::from_outcomes(Some(policy), outcomes);
    if report.successful == 0 {
        let errors = report
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.err())
            .collect::<Vec<_>>();
        return Err(DispatchError::AllHandlersFailed {
            attempted: errors.len(),
            errors,
        });
    }
    if report.failed > 0 {
        debug!(
            policy = %policy,
            successful = report.successful,
            failed = report.failed,
            "Partial delivery"
        );
    }
    Ok(report)
}

/// Single-target result: the handler's error is the dispatch error.
fn single(
    policy: Option<DistributionPolicy>,
    outcome: HandlerOutcome,
    timeout: Duration,
) -> Result<DistributionReport, DispatchError> {
    match outcome.result {
        Ok(_) => Ok(DistributionReport::from_outcomes(policy, vec![outcome])),
        Err(e) if e.kind == HandlerErrorKind::TimedOut => Err(DispatchError::Timeout {
            target: e.handler_id,
            after: timeout,
        }),
        Err(e) => Err(DispatchError::Handler(e)),
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
