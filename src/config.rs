//! Runtime configuration.
//!
//! ```rust
//! use flight_search::Config;
//! use std::time::Duration;
//!
//! let config = Config {
//!     request_timeout: Duration::from_secs(3),
//!     ..Default::default()
//! };
//! assert_eq!(config.history_capacity, 10);
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Delay between a notification leaving `Visible` and being removed.
pub const EXIT_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the flight provider, without the trailing `/flights`.
    pub api_base_url: String,

    /// Per-request timeout for provider calls.
    pub request_timeout: Duration,

    /// Directory holding the file-backed key-value store.
    pub history_dir: PathBuf,

    /// Maximum number of remembered searches.
    pub history_capacity: usize,

    /// Lifetime of a notification shown without an explicit duration.
    pub notification_duration: Duration,

    /// Cap on simultaneously visible notifications. `None` means unbounded.
    pub max_visible_notifications: Option<usize>,

    /// Serve searches from canned data instead of the remote provider.
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            request_timeout: Duration::from_millis(10_000),
            history_dir: PathBuf::from("./.flight_search"),
            history_capacity: 10,
            notification_duration: Duration::from_millis(5_000),
            max_visible_notifications: None,
            offline: false,
        }
    }
}

impl Config {
    /// Builds a config from `FLIGHT_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            api_base_url: env::var("FLIGHT_API_URL").unwrap_or(defaults.api_base_url),
            request_timeout: parse_var("FLIGHT_API_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            history_dir: env::var("FLIGHT_HISTORY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.history_dir),
            history_capacity: parse_var("FLIGHT_HISTORY_CAPACITY")?
                .unwrap_or(defaults.history_capacity),
            notification_duration: parse_var("FLIGHT_TOAST_DURATION_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.notification_duration),
            max_visible_notifications: parse_var("FLIGHT_TOAST_MAX_VISIBLE")?
                .or(defaults.max_visible_notifications),
            offline: parse_flag("FLIGHT_OFFLINE")?.unwrap_or(defaults.offline),
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(key: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid { key, value }),
        },
        Err(_) => Ok(None),
    }
}
