//! `conduit config`: Print configuration defaults.

use conduit_config::AppConfig;

pub fn show() {
    println!("{}", AppConfig::default_toml());
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}
