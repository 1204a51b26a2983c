//! Transport configuration.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str = "@fbl-plugins/http (https://fbl.fireblink.com)";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT_ENV: &str = "HTTP_ACTIONS_USER_AGENT";
const TIMEOUT_ENV: &str = "HTTP_ACTIONS_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Sent when the request does not carry its own `user-agent`.
    pub user_agent: String,
    /// Applied when the request options omit `timeout`.
    pub default_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `HTTP_ACTIONS_USER_AGENT` and
    /// `HTTP_ACTIONS_TIMEOUT_SECS`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(agent) = lookup(USER_AGENT_ENV).filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent;
        }
        match lookup(TIMEOUT_ENV).map(|v| v.trim().parse::<u64>()) {
            Some(Ok(secs)) => config.default_timeout_secs = secs,
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring {TIMEOUT_ENV}"),
            None => {}
        }
        config
    }

    /// Per-request timeout in seconds, or the configured default when the
    /// request leaves it out or sets it to zero. Values too large for a
    /// `Duration` saturate.
    pub fn timeout(&self, requested: Option<f64>) -> Duration {
        match requested.filter(|secs| *secs > 0.0) {
            Some(secs) => Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX),
            None => Duration::from_secs(self.default_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> TransportConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TransportConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.timeout(None), Duration::from_secs(60));
        assert_eq!(config.timeout(Some(0.5)), Duration::from_millis(500));
        assert_eq!(config.timeout(Some(0.0)), Duration::from_secs(60));
    }

    #[test]
    fn oversized_timeout_saturates() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout(Some(1e20)), Duration::MAX);
        assert_eq!(config.timeout(Some(f64::INFINITY)), Duration::MAX);
        assert_eq!(config.timeout(Some(f64::NAN)), Duration::from_secs(60));
    }

    #[test]
    fn environment_overrides() {
        let config = env(&[(USER_AGENT_ENV, "agent/1"), (TIMEOUT_ENV, "5")]);
        assert_eq!(config.user_agent, "agent/1");
        assert_eq!(config.default_timeout_secs, 5);
    }

    #[test]
    fn bad_timeout_keeps_default() {
        let config = env(&[(TIMEOUT_ENV, "soon")]);
        assert_eq!(config.default_timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn partial_config_deserializes() {
        let config: TransportConfig =
            serde_json::from_value(serde_json::json!({ "default_timeout_secs": 3 })).unwrap();
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.default_timeout_secs, 3);
    }
}
