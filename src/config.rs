//! Sync configuration parsed from environment variables.
//!
//! All values have defaults matching the broker's expectations, so an empty
//! environment yields a usable local-development config.

use std::time::Duration;

use crate::reconciler::RollbackPolicy;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_HEARTBEAT_MS: u64 = 4000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 60;

/// Tuning for the transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Broker websocket endpoint.
    pub ws_url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Attempts before the connection gives up and enters `Failed`.
    pub max_reconnect_attempts: u32,
    /// Outgoing heart-beat interval. Zero disables heart-beats.
    pub heartbeat: Duration,
    /// Upper bound on waiting for the broker's `CONNECTED` frame.
    pub handshake_timeout: Duration,
}

impl TransportConfig {
    /// Host part of the websocket URL, used for the STOMP `host` header.
    #[must_use]
    pub fn host(&self) -> &str {
        let rest = self
            .ws_url
            .split_once("://")
            .map_or(self.ws_url.as_str(), |(_, rest)| rest);
        let authority = rest.split('/').next().unwrap_or(rest);
        authority.split(':').next().unwrap_or(authority)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_owned(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Full session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub transport: TransportConfig,
    /// Base URL of the REST collaborator, including the `/api` prefix.
    pub api_url: String,
    /// Presence entries not refreshed within this window are pruned.
    /// `None` keeps entries until an explicit leave.
    pub presence_ttl: Option<Duration>,
    /// What to do with an optimistic mutation whose request failed.
    pub rollback: RollbackPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            api_url: DEFAULT_API_URL.to_owned(),
            presence_ttl: Some(Duration::from_secs(DEFAULT_PRESENCE_TTL_SECS)),
            rollback: RollbackPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `TASKBOARD_WS_URL`: default `ws://localhost:8080/ws`
    /// - `TASKBOARD_API_URL`: default `http://localhost:8080/api`
    /// - `TASKBOARD_RECONNECT_DELAY_MS`: default 3000
    /// - `TASKBOARD_MAX_RECONNECT_ATTEMPTS`: default 5
    /// - `TASKBOARD_HEARTBEAT_MS`: default 4000, 0 disables
    /// - `TASKBOARD_HANDSHAKE_TIMEOUT_SECS`: default 10
    /// - `TASKBOARD_PRESENCE_TTL_SECS`: default 60, 0 disables pruning
    /// - `TASKBOARD_ROLLBACK`: `restore` (default) or `keep`
    #[must_use]
    pub fn from_env() -> Self {
        let presence_ttl_secs = env_parse("TASKBOARD_PRESENCE_TTL_SECS", DEFAULT_PRESENCE_TTL_SECS);
        let rollback = std::env::var("TASKBOARD_ROLLBACK")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring TASKBOARD_ROLLBACK");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            transport: TransportConfig {
                ws_url: std::env::var("TASKBOARD_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_owned()),
                reconnect_delay: Duration::from_millis(env_parse(
                    "TASKBOARD_RECONNECT_DELAY_MS",
                    DEFAULT_RECONNECT_DELAY_MS,
                )),
                max_reconnect_attempts: env_parse("TASKBOARD_MAX_RECONNECT_ATTEMPTS", DEFAULT_MAX_RECONNECT_ATTEMPTS),
                heartbeat: Duration::from_millis(env_parse("TASKBOARD_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS)),
                handshake_timeout: Duration::from_secs(env_parse(
                    "TASKBOARD_HANDSHAKE_TIMEOUT_SECS",
                    DEFAULT_HANDSHAKE_TIMEOUT_SECS,
                )),
            },
            api_url: std::env::var("TASKBOARD_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned()),
            presence_ttl: (presence_ttl_secs > 0).then(|| Duration::from_secs(presence_ttl_secs)),
            rollback,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
