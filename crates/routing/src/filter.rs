//! Filters: predicates that narrow a route's candidate handlers.
//!
//! Message filters (`Attribute`, `Pattern`, `Range`) look at the message
//! being routed; candidate filters (`HandlerTag`, `Healthy`) look at the
//! handler being considered. `Any`, `All`, and `Not` compose them.

use std::sync::Arc;

use conduit_core::{Message, RoutingError};
use regex_lite::Regex;

use crate::registry::RegisteredHandler;

/// Custom predicate over a message and a candidate.
pub type PredicateFn = Arc<dyn Fn(&Message, &RegisteredHandler) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Filter {
    /// Message metadata `key` equals `value`.
    Attribute {
        key: String,
        value: serde_json::Value,
    },
    /// Message field (metadata, then payload) matches `regex`.
    /// Non-string values are matched against their JSON text.
    Pattern { field: String, regex: Regex },
    /// Numeric message field within the inclusive bounds.
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Candidate profile attribute `key` equals `value`.
    HandlerTag {
        key: String,
        value: serde_json::Value,
    },
    /// Candidate reports itself healthy.
    Healthy,
    /// Named custom predicate; the name is its signature.
    Predicate { name: String, f: PredicateFn },
    Any(Vec<Filter>),
    All(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn attribute(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Attribute {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn pattern(field: impl Into<String>, regex: &str) -> Result<Self, RoutingError> {
        let compiled = Regex::new(regex).map_err(|e| RoutingError::InvalidPattern {
            pattern: regex.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Filter::Pattern {
            field: field.into(),
            regex: compiled,
        })
    }

    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Filter::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn handler_tag(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::HandlerTag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn predicate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Message, &RegisteredHandler) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, message: &Message, candidate: &RegisteredHandler) -> bool {
        match self {
            Filter::Attribute { key, value } => message.metadata.get(key) == Some(value),
            Filter::Pattern { field, regex } => match message.field(field) {
                Some(serde_json::Value::String(s)) => regex.is_match(s),
                Some(other) => regex.is_match(&other.to_string()),
                None => false,
            },
            Filter::Range { field, min, max } => {
                let Some(n) = message.field(field).and_then(|v| v.as_f64()) else {
                    return false;
                };
                min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)
            }
            Filter::HandlerTag { key, value } => candidate.profile.attributes.get(key) == Some(value),
            Filter::Healthy => candidate.status().healthy,
            Filter::Predicate { f, .. } => f(message, candidate),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(message, candidate)),
            Filter::All(filters) => filters.iter().all(|f| f.matches(message, candidate)),
            Filter::Not(inner) => !inner.matches(message, candidate),
        }
    }

    /// Deterministic text form; two filters with equal signatures are
    /// considered the same filter.
    pub fn signature(&self) -> String {
        match self {
            Filter::Attribute { key, value } => format!("attr({key}={})", render(value)),
            Filter::Pattern { field, regex } => format!("pattern({field}~{})", regex.as_str()),
            Filter::Range { field, min, max } => format!(
                "range({field}:{}..{})",
                min.map(|v| v.to_string()).unwrap_or_default(),
                max.map(|v| v.to_string()).unwrap_or_default()
            ),
            Filter::HandlerTag { key, value } => format!("tag({key}={})", render(value)),
            Filter::Healthy => "healthy".into(),
            Filter::Predicate { name, .. } => format!("pred({name})"),
            Filter::Any(filters) => format!("any({})", join(filters, "|")),
            Filter::All(filters) => format!("all({})", join(filters, "&")),
            Filter::Not(inner) => format!("not({})", inner.signature()),
        }
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.signature())
    }
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join(filters: &[Filter], sep: &str) -> String {
    filters
        .iter()
        .map(Filter::signature)
        .collect::<Vec<_>>()
        .join(sep)
}

/// Filters applied together (logical AND). Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, message: &Message, candidate: &RegisteredHandler) -> bool {
        self.filters.iter().all(|f| f.matches(message, candidate))
    }

    /// Candidates that pass every filter, in their original order.
    pub fn apply(&self, message: &Message, candidates: Vec<RegisteredHandler>) -> Vec<RegisteredHandler> {
        if self.filters.is_empty() {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|c| self.matches(message, c))
            .collect()
    }

    pub fn signature(&self) -> String {
        join(&self.filters, ",")
    }
}

impl From<Vec<Filter>> for FilterChain {
    fn from(filters: Vec<Filter>) -> Self {
        Self { filters }
    }
}
