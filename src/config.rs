//! Client configuration

use crate::error::{ClientError, Result};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the API client and its session supervisor
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,

    /// Transport-level timeout applied to every request.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Inactivity window after which a proactive session check refreshes.
    /// Default: 30 minutes
    pub session_timeout: Duration,

    /// Period of the supervisor's session check.
    /// Default: 60 seconds
    pub session_check_interval: Duration,

    /// Where the navigator sends the user on terminal auth failure
    pub login_path: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_session_check_interval(mut self, interval: Duration) -> Self {
        self.session_check_interval = interval;
        self
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Load configuration from environment variables
    ///
    /// `CRM_API_BASE_URL`, `CRM_API_TIMEOUT_SECS`, `CRM_SESSION_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CRM_API_BASE_URL") {
            config.base_url = normalize_base_url(&url);
        }
        if let Some(secs) = lookup("CRM_API_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("CRM_API_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("CRM_SESSION_TIMEOUT_SECS") {
            config.session_timeout = parse_secs("CRM_SESSION_TIMEOUT_SECS", &secs)?;
        }

        if config.base_url.is_empty() {
            return Err(ClientError::Configuration(
                "CRM_API_BASE_URL must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    /// Absolute URL for an API path, joined with exactly one slash.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            session_check_interval: DEFAULT_SESSION_CHECK_INTERVAL,
            login_path: "/login".to_string(),
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| {
            ClientError::Configuration(format!("{key}={value:?} is not a number of seconds: {e}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.session_timeout, Duration::from_secs(1800));
        assert_eq!(config.session_check_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("CRM_API_BASE_URL", "https://crm.example.com/api//"),
            ("CRM_API_TIMEOUT_SECS", "5"),
            ("CRM_SESSION_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://crm.example.com/api");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.session_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let err = ClientConfig::from_lookup(lookup_from(&[("CRM_API_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_url_join() {
        let config = ClientConfig::new("http://host/api/");
        assert_eq!(config.url_for("/auth/login"), "http://host/api/auth/login");
        assert_eq!(config.url_for("contacts"), "http://host/api/contacts");
    }
}
