pub mod check;
pub mod config_cmd;
pub mod run;

use std::path::Path;

use conduit_config::{AppConfig, ConfigError};

/// Load from `path` when given, otherwise from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_path(path),
        None => AppConfig::load(),
    }
}
