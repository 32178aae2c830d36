//! Selection strategies: pick one handler among a route's candidates.
//!
//! Every strategy is deterministic given its state: ties always go to the
//! earliest candidate, WeightedRandom draws from a seedable per-route RNG, and
//! RoundRobin keeps a per-route cursor.

use std::sync::{Arc, Mutex};

use conduit_core::Message;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::registry::RegisteredHandler;

/// Custom scoring function for context-aware selection.
pub type ScoreFn = Arc<dyn Fn(&Message, &RegisteredHandler) -> f64 + Send + Sync>;

/// How ContextAware scores a candidate against the routing context.
#[derive(Clone, Default)]
pub enum ContextScorer {
    /// Number of candidate attributes whose value equals the message
    /// metadata value under the same key.
    #[default]
    AttributeOverlap,
    Custom { name: String, f: ScoreFn },
}

impl ContextScorer {
    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Message, &RegisteredHandler) -> f64 + Send + Sync + 'static,
    {
        ContextScorer::Custom {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn score(&self, message: &Message, candidate: &RegisteredHandler) -> f64 {
        match self {
            ContextScorer::AttributeOverlap => candidate
                .profile
                .attributes
                .iter()
                .filter(|(k, v)| message.metadata.get(*k) == Some(*v))
                .count() as f64,
            ContextScorer::Custom { f, .. } => f(message, candidate),
        }
    }
}

impl std::fmt::Debug for ContextScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextScorer::AttributeOverlap => f.write_str("AttributeOverlap"),
            ContextScorer::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RoutingStrategy {
    /// Highest static weight.
    #[default]
    Priority,
    /// Lowest reported load among healthy candidates.
    LoadBalanced,
    /// Probability proportional to static weight.
    WeightedRandom,
    /// Cycle through candidates, one step per call.
    RoundRobin,
    /// Highest context score.
    ContextAware(ContextScorer),
}

impl RoutingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RoutingStrategy::Priority => "priority",
            RoutingStrategy::LoadBalanced => "load_balanced",
            RoutingStrategy::WeightedRandom => "weighted_random",
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::ContextAware(_) => "context_aware",
        }
    }

    /// Parse a configured strategy name; context-aware uses attribute overlap.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "priority" => Some(RoutingStrategy::Priority),
            "load_balanced" => Some(RoutingStrategy::LoadBalanced),
            "weighted_random" => Some(RoutingStrategy::WeightedRandom),
            "round_robin" => Some(RoutingStrategy::RoundRobin),
            "context_aware" => Some(RoutingStrategy::ContextAware(ContextScorer::default())),
            _ => None,
        }
    }
}

/// Mutable selection state owned by one route.
pub struct StrategyState {
    cursor: Mutex<usize>,
    rng: Mutex<StdRng>,
}

impl StrategyState {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            cursor: Mutex::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Index of the selected candidate, or `None` when the strategy finds
    /// nothing selectable (no candidates, or none healthy for LoadBalanced).
    pub fn select(
        &self,
        strategy: &RoutingStrategy,
        message: &Message,
        candidates: &[RegisteredHandler],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            RoutingStrategy::Priority => argmax(candidates.iter().map(|c| c.profile.weight)),
            RoutingStrategy::LoadBalanced => {
                let mut best: Option<(usize, u64)> = None;
                for (i, c) in candidates.iter().enumerate() {
                    let status = c.status();
                    if !status.healthy {
                        continue;
                    }
                    if best.is_none_or(|(_, load)| status.load < load) {
                        best = Some((i, status.load));
                    }
                }
                best.map(|(i, _)| i)
            }
            RoutingStrategy::WeightedRandom => {
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|c| c.profile.weight.max(0.0))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                if total <= 0.0 {
                    return Some(rng.random_range(0..candidates.len()));
                }
                let mut point = rng.random::<f64>() * total;
                for (i, w) in weights.iter().enumerate() {
                    if point < *w {
                        return Some(i);
                    }
                    point -= w;
                }
                // Float rounding can leave `point` just past the last bucket.
                weights.iter().rposition(|w| *w > 0.0)
            }
            RoutingStrategy::RoundRobin => {
                let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
                let index = *cursor % candidates.len();
                *cursor = (index + 1) % candidates.len();
                Some(index)
            }
            RoutingStrategy::ContextAware(scorer) => {
                argmax(candidates.iter().map(|c| scorer.score(message, c)))
            }
        }
    }
}

/// Index of the first maximum.
fn argmax(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
