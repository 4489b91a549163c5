pub mod check;
pub mod config_cmd;
pub mod query;
pub mod serve;

use std::path::Path;

use graphchat_config::{AppConfig, ConfigError};

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_overrides(path),
        None => AppConfig::load(),
    }
}
