//! Client configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default REST API version.
pub const DEFAULT_API_VERSION: &str = "1.0";

/// Default URL scheme.
pub const DEFAULT_SCHEME: &str = "https";

/// Default name prefix of worker threads.
pub const DEFAULT_WORKER_NAME: &str = "remora-worker";

/// Application credentials sent with every request.
///
/// `Debug` output hides the application key and the access token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API host, without scheme (`api.example.com`).
    pub domain: String,
    /// Application id.
    pub app_id: String,
    /// Application key.
    pub app_key: String,
    /// Member access token; omitted from requests when empty.
    #[serde(default)]
    pub access_token: String,
}

impl Credentials {
    /// Creates credentials without an access token.
    pub fn new(
        domain: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            access_token: String::new(),
        }
    }

    /// Sets the access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token: &dyn fmt::Debug = if self.access_token.is_empty() {
            &""
        } else {
            &"[REDACTED]"
        };
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("app_id", &self.app_id)
            .field("app_key", &"[REDACTED]")
            .field("access_token", token)
            .finish()
    }
}

/// Configuration for the scheduler and the HTTP adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long synchronous calls wait for their worker; `None` waits
    /// forever.
    pub wait_timeout: Option<Duration>,
    /// Name prefix of worker threads.
    pub worker_name: String,
    /// REST API version in the URL (`rest_api=1.0`).
    pub api_version: String,
    /// URL scheme.
    pub scheme: String,
}

impl ClientConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            wait_timeout: None,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    /// Sets the synchronous wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the URL scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new()
            .with_wait_timeout(Duration::from_secs(5))
            .with_worker_name("blog-sync")
            .with_api_version("2.0")
            .with_scheme("http");

        assert_eq!(config.wait_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.worker_name, "blog-sync");
        assert_eq!(config.api_version, "2.0");
        assert_eq!(config.scheme, "http");
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.wait_timeout, None);
        assert_eq!(config.worker_name, "remora-worker");
        assert_eq!(config.api_version, "1.0");
        assert_eq!(config.scheme, "https");
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let credentials = Credentials::new("api.example.com", "app", "key-secret")
            .with_access_token("token-secret");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("api.example.com"));
        assert!(debug.contains("app"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("key-secret"));
        assert!(!debug.contains("token-secret"));
    }

    #[test]
    fn credentials_from_json() {
        let credentials: Credentials = serde_json::from_str(
            r#"{"domain": "api.example.com", "app_id": "app", "app_key": "key"}"#,
        )
        .unwrap();
        assert_eq!(credentials, Credentials::new("api.example.com", "app", "key"));
        assert!(credentials.access_token.is_empty());
    }
}
