//! Configuration loading, validation, and management for Conduit.
//!
//! Loads configuration from `~/.conduit/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Strategy names accepted in `[[routes]]`.
pub const STRATEGIES: &[&str] = &[
    "priority",
    "load_balanced",
    "weighted_random",
    "round_robin",
    "context_aware",
];

/// Distribution policy names accepted in `[[routes]]`.
pub const DISTRIBUTIONS: &[&str] = &[
    "broadcast",
    "fanout",
    "scatter",
    "round_robin",
    "random",
    "balanced",
];

/// The root configuration structure.
///
/// Maps directly to `~/.conduit/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Event hub settings
    #[serde(default)]
    pub hub: HubConfig,

    /// Router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Message distributor settings
    #[serde(default)]
    pub distributor: DistributorConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Declarative routes, registered at startup
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum number of events waiting for dispatch
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Default bound on a single subscriber invocation. Must leave room for
    /// the router subscriber's worst-case delivery.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// How long shutdown waits for queued events to drain
    #[serde(default = "default_timeout_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_queue_capacity() -> usize {
    1000
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_handler_timeout_ms() -> u64 {
    15_000
}
fn default_emit_timeout_ms() -> u64 {
    20_000
}
fn default_max_attempts() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

impl HubConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            handler_timeout_ms: default_handler_timeout_ms(),
            shutdown_grace_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Seed for weighted-random selection (random when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Handler used when no route produces candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Bound on each handler invocation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of handlers a scatter delivery reaches
    #[serde(default = "default_scatter_size")]
    pub scatter_size: usize,

    /// Seed for scatter/random policies (random when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_scatter_size() -> usize {
    2
}

impl DistributorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            scatter_size: default_scatter_size(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity after which a session is closed by the sweep
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Inactivity after which an active session becomes idle
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Period of the background TTL sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// How many closed session ids are remembered for idempotent close
    #[serde(default = "default_tombstone_capacity")]
    pub tombstone_capacity: usize,
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    1000
}
fn default_tombstone_capacity() -> usize {
    1024
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sessions: default_max_sessions(),
            tombstone_capacity: default_tombstone_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Origin written on outbound packets and source of gateway events
    #[serde(default = "default_gateway_id")]
    pub id: String,

    /// Bound on a single transport send
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Bound on emitting an inbound event into the hub; longer than
    /// `hub.handler_timeout_ms`
    #[serde(default = "default_emit_timeout_ms")]
    pub emit_timeout_ms: u64,

    /// How long shutdown waits for in-flight work
    #[serde(default = "default_timeout_ms")]
    pub shutdown_grace_ms: u64,

    /// Delay between polls of an idle transport
    #[serde(default = "default_receive_poll_ms")]
    pub receive_poll_ms: u64,

    /// Thresholds for automatic degraded mode
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_gateway_id() -> String {
    "conduit".into()
}
fn default_receive_poll_ms() -> u64 {
    250
}

impl GatewayConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn emit_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: default_gateway_id(),
            send_timeout_ms: default_timeout_ms(),
            emit_timeout_ms: default_emit_timeout_ms(),
            shutdown_grace_ms: default_timeout_ms(),
            receive_poll_ms: default_receive_poll_ms(),
            health: HealthConfig::default(),
        }
    }
}

/// Sliding-window failure thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Number of recent deliveries considered
    #[serde(default = "default_health_window")]
    pub window: usize,

    /// Deliveries required before health is judged
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Failure ratio that enters degraded mode
    #[serde(default = "default_degrade_ratio")]
    pub degrade_failure_ratio: f64,

    /// Failure ratio at or below which degraded mode is left
    #[serde(default = "default_recover_ratio")]
    pub recover_failure_ratio: f64,
}

fn default_health_window() -> usize {
    50
}
fn default_min_samples() -> usize {
    10
}
fn default_degrade_ratio() -> f64 {
    0.5
}
fn default_recover_ratio() -> f64 {
    0.2
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: default_health_window(),
            min_samples: default_min_samples(),
            degrade_failure_ratio: default_degrade_ratio(),
            recover_failure_ratio: default_recover_ratio(),
        }
    }
}

/// A declarative route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Routing-key pattern: exact, dotted glob (`chat.*`, `chat.**`), or `re:<regex>`
    pub pattern: String,

    /// Handler ids, in preference order
    pub handlers: Vec<String>,

    /// Selection strategy (see [`STRATEGIES`])
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// First-match-wins when true; merged with other matches when false
    #[serde(default = "default_true")]
    pub exclusive: bool,

    /// Handler used when filters eliminate every candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    /// Deliver to all candidates with this policy instead of the selected one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,

    /// Candidate filters (all must pass)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterConfig>,

    /// Whether the route takes part in matching
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Invocations of the selected handler before the fallback takes over
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-invocation bound (distributor default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RouteConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Longest a delivery through this route can take when each invocation
    /// is bounded by `default_timeout` unless the route sets its own.
    pub fn delivery_budget(&self, default_timeout: Duration) -> Duration {
        let per_call = self.timeout().unwrap_or(default_timeout);
        let calls = match self.distribution.as_deref() {
            Some("broadcast") => self.handlers.len() as u32,
            Some(_) => 1,
            None => self.max_attempts.max(1) + u32::from(self.fallback.is_some()),
        };
        per_call * calls
    }
}

fn default_strategy() -> String {
    "priority".into()
}

/// A declarative candidate filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Message metadata `key` equals `value`
    Attribute {
        key: String,
        value: serde_json::Value,
    },
    /// Message field matches a regular expression
    Pattern { field: String, regex: String },
    /// Numeric message field within bounds
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Candidate handler carries attribute `key` = `value`
    HandlerTag {
        key: String,
        value: serde_json::Value,
    },
    /// Candidate handler reports healthy
    Healthy,
}

impl AppConfig {
    /// Load configuration from the default path (~/.conduit/config.toml).
    ///
    /// Also applies environment variable overrides:
    /// - `CONDUIT_SESSION_TTL_SECS`
    /// - `CONDUIT_SEED` (router and distributor)
    /// - `CONDUIT_QUEUE_CAPACITY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(&Self::config_dir().join("config.toml"))
    }

    /// Like [`load`](Self::load), for an explicit file path.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conduit")
    }

    fn apply_env_overrides(&mut self) {
        if let Some(ttl) = env_parse::<u64>("CONDUIT_SESSION_TTL_SECS") {
            self.sessions.ttl_secs = ttl;
        }
        if let Some(seed) = env_parse::<u64>("CONDUIT_SEED") {
            self.router.seed = Some(seed);
            self.distributor.seed = Some(seed);
        }
        if let Some(capacity) = env_parse::<usize>("CONDUIT_QUEUE_CAPACITY") {
            self.hub.queue_capacity = capacity;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "hub.queue_capacity must be > 0".into(),
            ));
        }

        let required = [
            ("hub.handler_timeout_ms", self.hub.handler_timeout_ms),
            ("distributor.timeout_ms", self.distributor.timeout_ms),
            ("gateway.send_timeout_ms", self.gateway.send_timeout_ms),
            ("gateway.emit_timeout_ms", self.gateway.emit_timeout_ms),
            ("sessions.max_sessions", self.sessions.max_sessions as u64),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
        }

        if self.distributor.timeout_ms >= self.hub.handler_timeout_ms {
            return Err(ConfigError::ValidationError(
                "distributor.timeout_ms must be shorter than hub.handler_timeout_ms".into(),
            ));
        }
        if self.hub.handler_timeout_ms >= self.gateway.emit_timeout_ms {
            return Err(ConfigError::ValidationError(
                "hub.handler_timeout_ms must be shorter than gateway.emit_timeout_ms".into(),
            ));
        }

        if self.sessions.ttl_secs == 0 || self.sessions.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.ttl_secs and sessions.sweep_interval_secs must be > 0".into(),
            ));
        }

        if self.sessions.idle_timeout_secs >= self.sessions.ttl_secs {
            return Err(ConfigError::ValidationError(
                "sessions.idle_timeout_secs must be shorter than sessions.ttl_secs".into(),
            ));
        }

        let health = &self.gateway.health;
        let in_unit = |r: f64| (0.0..=1.0).contains(&r);
        if !in_unit(health.degrade_failure_ratio) || !in_unit(health.recover_failure_ratio) {
            return Err(ConfigError::ValidationError(
                "gateway.health ratios must be between 0.0 and 1.0".into(),
            ));
        }
        if health.recover_failure_ratio > health.degrade_failure_ratio {
            return Err(ConfigError::ValidationError(
                "gateway.health.recover_failure_ratio must not exceed degrade_failure_ratio".into(),
            ));
        }
        if health.window == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.health.window must be > 0".into(),
            ));
        }

        for (i, route) in self.routes.iter().enumerate() {
            if route.pattern.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{i}]: pattern must not be empty"
                )));
            }
            if route.handlers.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{i}] ({}): at least one handler is required",
                    route.pattern
                )));
            }
            if !STRATEGIES.contains(&route.strategy.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{i}] ({}): unknown strategy '{}'",
                    route.pattern, route.strategy
                )));
            }
            if let Some(policy) = &route.distribution {
                if !DISTRIBUTIONS.contains(&policy.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "routes[{i}] ({}): unknown distribution '{policy}'",
                        route.pattern
                    )));
                }
            }
            if route.max_attempts == 0 || route.timeout_ms == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{i}] ({}): max_attempts and timeout_ms must be > 0",
                    route.pattern
                )));
            }
            let budget = route.delivery_budget(self.distributor.timeout());
            if budget >= self.hub.handler_timeout() {
                return Err(ConfigError::ValidationError(format!(
                    "routes[{i}] ({}): worst-case delivery of {}ms does not fit hub.handler_timeout_ms",
                    route.pattern,
                    budget.as_millis()
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hub.queue_capacity, 1000);
        assert_eq!(config.sessions.ttl(), Duration::from_secs(3600));
        assert_eq!(config.gateway.id, "conduit");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.sessions.ttl_secs, config.sessions.ttl_secs);
        assert_eq!(parsed.gateway.send_timeout_ms, config.gateway.send_timeout_ms);
    }

    #[test]
    fn idle_timeout_must_be_shorter_than_ttl() {
        let mut config = AppConfig::default();
        config.sessions.idle_timeout_secs = config.sessions.ttl_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_health_ratios_rejected() {
        let mut config = AppConfig::default();
        config.gateway.health.recover_failure_ratio = 0.9;
        config.gateway.health.degrade_failure_ratio = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.hub.handler_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("queue_capacity"));
        assert!(toml_str.contains("3600"));
    }

    #[test]
    fn route_config_parsing() {
        let toml_str = r#"
[router]
seed = 7

[[routes]]
pattern = "communication.received"
handlers = ["assistant", "echo"]
strategy = "round_robin"
fallback = "echo"

[[routes.filters]]
type = "attribute"
key = "platform"
value = "telegram"

[[routes.filters]]
type = "healthy"

[[routes]]
pattern = "alerts.**"
handlers = ["pager", "audit"]
exclusive = false
distribution = "fanout"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.seed, Some(7));
        assert_eq!(config.routes.len(), 2);

        let first = &config.routes[0];
        assert_eq!(first.strategy, "round_robin");
        assert!(first.exclusive);
        assert_eq!(first.fallback.as_deref(), Some("echo"));
        assert_eq!(first.filters.len(), 2);
        assert!(matches!(first.filters[1], FilterConfig::Healthy));

        let second = &config.routes[1];
        assert_eq!(second.strategy, "priority");
        assert!(!second.exclusive);
        assert_eq!(second.distribution.as_deref(), Some("fanout"));
    }

    #[test]
    fn unknown_strategy_rejected() {
        let toml_str = r#"
[[routes]]
pattern = "x"
handlers = ["h"]
strategy = "fastest"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fastest"));
    }

    #[test]
    fn route_without_handlers_rejected() {
        let mut config = AppConfig::default();
        config.routes.push(RouteConfig {
            pattern: "x".into(),
            handlers: vec![],
            strategy: default_strategy(),
            exclusive: true,
            fallback: None,
            distribution: None,
            filters: vec![],
            enabled: true,
            max_attempts: 1,
            timeout_ms: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_bounds_rejected() {
        let cases: [fn(&mut AppConfig); 5] = [
            |c| c.hub.handler_timeout_ms = 0,
            |c| c.distributor.timeout_ms = 0,
            |c| c.gateway.send_timeout_ms = 0,
            |c| c.gateway.emit_timeout_ms = 0,
            |c| c.sessions.max_sessions = 0,
        ];
        for apply in cases {
            let mut config = AppConfig::default();
            apply(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("must be > 0"), "{err}");
        }
    }

    #[test]
    fn timeouts_must_nest() {
        let mut config = AppConfig::default();
        config.distributor.timeout_ms = config.hub.handler_timeout_ms;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.emit_timeout_ms = config.hub.handler_timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn route_delivery_budget_must_fit_handler_timeout() {
        let toml_str = r#"
[distributor]
timeout_ms = 4000

[[routes]]
pattern = "chat.**"
handlers = ["assistant"]
max_attempts = 3
fallback = "echo"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let route = &config.routes[0];
        assert_eq!(route.delivery_budget(config.distributor.timeout()), Duration::from_secs(16));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chat.**"));

        // A tighter per-route bound brings it back inside.
        let mut config = config;
        config.routes[0].timeout_ms = Some(2000);
        assert!(config.validate().is_ok());

        let mut broadcast = config.routes[0].clone();
        broadcast.distribution = Some("broadcast".into());
        broadcast.handlers = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(broadcast.delivery_budget(Duration::from_secs(1)), Duration::from_secs(6));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions]\nttl_secs = 60\nidle_timeout_secs = 10").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.sessions.ttl_secs, 60);
        assert_eq!(config.sessions.idle_timeout(), Duration::from_secs(10));
        assert_eq!(config.sessions.max_sessions, 1000);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions\nttl_secs = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
