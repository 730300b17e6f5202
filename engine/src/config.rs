//! Engine configuration loaded from environment variables.

use crate::reconcile::SyncLimits;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Owner of workouts and weight entries
    pub user_id: String,
    /// Base URL of the document server
    pub remote_url: String,
    /// Bearer token for the document server
    pub api_token: Option<String>,
    pub limits: SyncLimits,
    /// How often to probe the server; `None` disables probing
    pub probe_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("gymsync.db"),
            user_id: "local".to_string(),
            remote_url: "http://localhost:3000".to_string(),
            api_token: None,
            limits: SyncLimits::default(),
            probe_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup("GYMSYNC_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let user_id = lookup("GYMSYNC_USER_ID").ok_or(ConfigError::MissingUserId)?;
        if user_id.trim().is_empty() {
            return Err(ConfigError::MissingUserId);
        }

        let remote_url = lookup("GYMSYNC_REMOTE_URL").unwrap_or(defaults.remote_url);
        let api_token = lookup("GYMSYNC_API_TOKEN").filter(|t| !t.is_empty());

        let recent_workouts = parse_count(&lookup, "GYMSYNC_RECENT_WORKOUTS")?
            .unwrap_or(defaults.limits.recent_workouts);
        let weight_history = parse_count(&lookup, "GYMSYNC_WEIGHT_HISTORY")?
            .unwrap_or(defaults.limits.weight_history);

        let probe_interval = match parse_count(&lookup, "GYMSYNC_PROBE_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs as u64)),
            None => defaults.probe_interval,
        };

        Ok(Self {
            database_path,
            user_id,
            remote_url,
            api_token,
            limits: SyncLimits {
                recent_workouts,
                weight_history,
            },
            probe_interval,
        })
    }
}

fn parse_count<F>(lookup: &F, key: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GYMSYNC_USER_ID environment variable is required")]
    MissingUserId,

    #[error("Invalid value for {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = EngineConfig::from_lookup(lookup(&[("GYMSYNC_USER_ID", "u1")])).unwrap();

        assert_eq!(config.user_id, "u1");
        assert_eq!(config.limits, SyncLimits::default());
        assert_eq!(config.database_path, PathBuf::from("gymsync.db"));
        assert_eq!(config.probe_interval, Some(Duration::from_secs(30)));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("GYMSYNC_USER_ID", "u1"),
            ("GYMSYNC_DATABASE_PATH", "/tmp/gym.db"),
            ("GYMSYNC_REMOTE_URL", "https://sync.example.com"),
            ("GYMSYNC_API_TOKEN", "secret"),
            ("GYMSYNC_RECENT_WORKOUTS", "10"),
            ("GYMSYNC_WEIGHT_HISTORY", "30"),
            ("GYMSYNC_PROBE_INTERVAL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.limits.recent_workouts, 10);
        assert_eq!(config.limits.weight_history, 30);
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.probe_interval, None);
    }

    #[test]
    fn missing_user_is_an_error() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingUserId)
        ));
    }

    #[test]
    fn invalid_number_is_an_error() {
        let result = EngineConfig::from_lookup(lookup(&[
            ("GYMSYNC_USER_ID", "u1"),
            ("GYMSYNC_RECENT_WORKOUTS", "many"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber { key: "GYMSYNC_RECENT_WORKOUTS", .. })
        ));
    }
}
