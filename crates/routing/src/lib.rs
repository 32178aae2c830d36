//! # Conduit Routing
//!
//! Resolves routed messages to handlers and delivers them.
//!
//! - [`HandlerRegistry`] holds route targets and their profiles.
//! - [`Router`] scans [`Route`]s in registration order, narrows candidates
//!   with a [`FilterChain`], and selects with a [`RoutingStrategy`].
//! - [`MessageDistributor`] delivers to the resolved handlers under a
//!   [`DistributionPolicy`], isolating per-handler failures.

pub mod distributor;
pub mod filter;
pub mod pattern;
pub mod registry;
pub mod router;
pub mod strategy;

pub use distributor::{DistributionPolicy, DistributionReport, HandlerOutcome, MessageDistributor};
pub use filter::{Filter, FilterChain, PredicateFn};
pub use pattern::RoutePattern;
pub use registry::{HandlerProfile, HandlerRegistry, RegisteredHandler};
pub use router::{ResolvedHandlers, Route, RouteStats, Router, RouterStats};
pub use strategy::{ContextScorer, RoutingStrategy, ScoreFn, StrategyState};
