//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LECTERN_BACK_CONFIG_PATH";

const DEFAULT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_EVENT_BUS_CAPACITY: usize = 64;
const DEFAULT_RANK_LIMIT: usize = 10;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Broadcast buffer size of each room/role/participant channel.
    pub channel_capacity: usize,
    /// Broadcast buffer size of the domain event bus.
    pub event_bus_capacity: usize,
    /// Number of entries included in ranking broadcasts and the default
    /// `get_activity_score_rank` response.
    pub default_rank_limit: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in
    /// defaults when the file is absent or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration from file");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            default_rank_limit: DEFAULT_RANK_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    channel_capacity: Option<usize>,
    event_bus_capacity: Option<usize>,
    default_rank_limit: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            channel_capacity: value.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            event_bus_capacity: value
                .event_bus_capacity
                .unwrap_or(DEFAULT_EVENT_BUS_CAPACITY),
            default_rank_limit: value.default_rank_limit.unwrap_or(DEFAULT_RANK_LIMIT),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_raw_config_keeps_defaults_for_missing_fields() {
        let raw: RawConfig = serde_json::from_str(r#"{"default_rank_limit": 3}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.default_rank_limit, 3);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.event_bus_capacity, DEFAULT_EVENT_BUS_CAPACITY);
    }
}
