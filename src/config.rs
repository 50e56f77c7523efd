//! Client configuration loading: server endpoints and every retry, polling and session tunable.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use thiserror::Error;
use tracing::{info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    state::ConnectionPolicy,
    transport::{heartbeat::HighTrafficPolicy, poll::PollSettings, push::PushSettings},
};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";
/// Environment variable that overrides [`ServerConfig::base_url`].
const SERVER_URL_ENV: &str = "QUIZ_SERVER_URL";

/// Reasons a configuration document is refused.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config")]
    Parse(#[source] serde_json::Error),
    #[error("config failed validation: {0}")]
    Invalid(#[source] ValidationErrors),
}

/// Immutable runtime configuration of a sync session.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SyncConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub push: PushConfig,
    #[validate(nested)]
    pub reconnect: ReconnectConfig,
    pub fallback: FallbackConfig,
    #[validate(nested)]
    pub poll: PollConfig,
    #[validate(nested)]
    pub high_traffic: HighTrafficConfig,
    #[validate(nested)]
    pub session: SessionConfig,
}

/// Where the quiz server lives.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP base URL used by the poll transport.
    #[validate(url)]
    pub base_url: String,
    /// Explicit push URL; derived from `base_url` when absent.
    pub push_url: Option<String>,
    /// Path appended to the derived push URL.
    pub push_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            push_url: None,
            push_path: "/ws".into(),
        }
    }
}

/// Push channel timing.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Cadence of client pings; must stay below `idle_timeout`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    /// Silence after which the channel is considered dead.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Minimum spacing of answers to server keep-alives.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub keep_alive_throttle: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(8),
            idle_timeout: Duration::from_secs(25),
            keep_alive_throttle: Duration::from_secs(2),
        }
    }
}

impl Validate for PushConfig {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.idle_timeout {
            let mut err = ValidationError::new("heartbeat_interval");
            err.message = Some(
                "Heartbeat interval must be non-zero and shorter than the idle timeout".into(),
            );
            errors.add("heartbeat_interval", err);
        }
        if self.connect_timeout.is_zero() {
            errors.add("connect_timeout", ValidationError::new("zero_duration"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Reconnect backoff for the push channel.
#[serde_as]
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ReconnectConfig {
    #[validate(range(min = 1, max = 20))]
    pub retry_ceiling: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    /// Random spread applied to each delay, as a fraction of it.
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_ratio: f64,
    pub fast_retry_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fast_retry_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.1,
            fast_retry_attempts: 3,
            fast_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Probing for push while polling.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_retry_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_connect_timeout: Duration::from_secs(5),
            probe_retry_interval: Duration::from_secs(60),
        }
    }
}

/// Poll cadence and load shedding.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub state_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub chat_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ranking_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    pub widen_after_failures: u32,
    pub escalate_after_failures: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub widened_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cooldown: Duration,
    pub ranking_skip_after_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            state_interval: Duration::from_secs(3),
            chat_interval: Duration::from_secs(5),
            ranking_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            widen_after_failures: 6,
            escalate_after_failures: 7,
            widened_interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(10),
            ranking_skip_after_failures: 3,
        }
    }
}

impl Validate for PollConfig {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let durations = [
            ("state_interval", self.state_interval),
            ("chat_interval", self.chat_interval),
            ("ranking_interval", self.ranking_interval),
            ("request_timeout", self.request_timeout),
            ("widened_interval", self.widened_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                errors.add(field, ValidationError::new("zero_duration"));
            }
        }
        if self.widen_after_failures == 0 {
            errors.add("widen_after_failures", ValidationError::new("range"));
        }
        if self.escalate_after_failures == 0 {
            errors.add("escalate_after_failures", ValidationError::new("range"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Heightened keep-alive around busy questions.
#[serde_as]
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct HighTrafficConfig {
    /// Question numbers treated as high-traffic.
    pub question_indices: Vec<u32>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[validate(range(max = 50))]
    pub max_critical_pings: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub http_keep_alive_throttle: Duration,
    /// Delay before re-requesting the tally after a vote update.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub votes_refresh_delay: Duration,
}

impl Default for HighTrafficConfig {
    fn default() -> Self {
        Self {
            question_indices: vec![3],
            heartbeat_interval: Duration::from_secs(3),
            max_critical_pings: 5,
            http_keep_alive_throttle: Duration::from_secs(3),
            votes_refresh_delay: Duration::from_secs(2),
        }
    }
}

/// Session-level limits and persistence.
#[serde_as]
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum age of a persisted record that may still be restored.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub freshness_window: Duration,
    #[validate(range(min = 1))]
    pub leaderboard_size: usize,
    #[validate(range(min = 1))]
    pub chat_history: usize,
    /// Capacity of the update broadcast channel.
    #[validate(range(min = 1))]
    pub update_capacity: usize,
    pub state_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(5 * 60),
            leaderboard_size: 10,
            chat_history: 100,
            update_capacity: 64,
            state_path: PathBuf::from("quiz-state.json"),
        }
    }
}

impl SyncConfig {
    /// Load the configuration from disk and the environment, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded sync config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "rejected config; falling back to defaults"
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
        };

        if let Some(url) = env::var(SERVER_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
        {
            info!(url = %url, "server URL taken from environment");
            config.server.base_url = url;
        }
        config
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// URL of the push channel.
    ///
    /// Derived from the base URL by swapping `http` for `ws` unless set explicitly.
    pub fn push_url(&self) -> String {
        if let Some(url) = &self.server.push_url {
            return url.clone();
        }
        let base = self.server.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{}", self.server.push_path)
    }

    pub fn connection_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            retry_ceiling: self.reconnect.retry_ceiling,
            initial_delay: self.reconnect.initial_delay,
            max_delay: self.reconnect.max_delay,
            fast_retry_attempts: self.reconnect.fast_retry_attempts,
            fast_retry_delay: self.reconnect.fast_retry_delay,
            probe_interval: self.fallback.probe_interval,
            probe_retry_interval: self.fallback.probe_retry_interval,
        }
    }

    pub fn high_traffic_policy(&self) -> HighTrafficPolicy {
        HighTrafficPolicy {
            question_indices: self.high_traffic.question_indices.clone(),
            heartbeat_interval: self.high_traffic.heartbeat_interval,
            max_critical_pings: self.high_traffic.max_critical_pings,
            http_keep_alive_throttle: self.high_traffic.http_keep_alive_throttle,
            votes_refresh_delay: self.high_traffic.votes_refresh_delay,
        }
    }

    /// Settings for the regular push adapter.
    pub fn push_settings(&self) -> PushSettings {
        PushSettings {
            connect_timeout: self.push.connect_timeout,
            heartbeat_interval: self.push.heartbeat_interval,
            idle_timeout: self.push.idle_timeout,
            keep_alive_throttle: self.push.keep_alive_throttle,
            http_keep_alive_timeout: self.poll.request_timeout,
            high_traffic: self.high_traffic_policy(),
        }
    }

    /// Settings for a probe adapter launched while polling.
    pub fn probe_settings(&self) -> PushSettings {
        PushSettings {
            connect_timeout: self.fallback.probe_connect_timeout,
            ..self.push_settings()
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            state_interval: self.poll.state_interval,
            chat_interval: self.poll.chat_interval,
            ranking_interval: self.poll.ranking_interval,
            request_timeout: self.poll.request_timeout,
            widen_after_failures: self.poll.widen_after_failures,
            escalate_after_failures: self.poll.escalate_after_failures,
            widened_interval: self.poll.widened_interval,
            cooldown: self.poll.cooldown,
            ranking_skip_after_failures: self.poll.ranking_skip_after_failures,
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
