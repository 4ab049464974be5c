//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Route of the dedicated getting-started view.
pub const DEFAULT_GETTING_STARTED_PATH: &str = "/get-started";

/// Settings key holding the list of onboarded addresses.
pub const DEFAULT_COMPLETION_KEY: &str = "df.onboarded";

/// Onboarding engine and service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingConfig {
    /// Route on which the onboarding banner is never shown (the route is the flow itself).
    pub getting_started_path: String,
    /// Key under which completed addresses are persisted.
    pub completion_key: String,
    /// Path of the libSQL database backing the completion store.
    pub db_path: PathBuf,
    /// Port for the onboarding HTTP surface.
    pub http_port: u16,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            getting_started_path: DEFAULT_GETTING_STARTED_PATH.to_string(),
            completion_key: DEFAULT_COMPLETION_KEY.to_string(),
            db_path: PathBuf::from("./data/onboarding.db"),
            http_port: 8080,
        }
    }
}

impl OnboardingConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let getting_started_path = lookup("ONBOARDING_GETTING_STARTED_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.getting_started_path);
        if !getting_started_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARDING_GETTING_STARTED_PATH".to_string(),
                message: format!("route must start with '/', got {getting_started_path:?}"),
            });
        }

        let completion_key = lookup("ONBOARDING_COMPLETION_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.completion_key);

        let db_path = lookup("ONBOARDING_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let http_port = match lookup("ONBOARDING_HTTP_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARDING_HTTP_PORT".to_string(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => defaults.http_port,
        };

        Ok(Self {
            getting_started_path,
            completion_key,
            db_path,
            http_port,
        })
    }
}
