//! Backend endpoint and timing configuration for the session manager.
//!
//! Fields with defaults can be omitted when loading from environment
//! variables; only the base URL is required.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::role::Portal;

/// Configuration for talking to the RAVA backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// API root, e.g. "https://rava.example.edu/api".
    base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    /// An access token expiring within this many seconds is refreshed
    /// before it is sent.
    #[serde(default = "default_expiry_leeway_seconds")]
    expiry_leeway_seconds: i64,
    /// Token issuance endpoint for the research portal.
    #[serde(default = "default_token_path")]
    token_path: String,
    /// Token issuance endpoint for the developer portal.
    #[serde(default = "default_developer_token_path")]
    developer_token_path: String,
    /// Access token refresh endpoint.
    #[serde(default = "default_refresh_path")]
    refresh_path: String,
    /// Current-user profile endpoint.
    #[serde(default = "default_profile_path")]
    profile_path: String,
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_expiry_leeway_seconds() -> i64 {
    30
}

fn default_token_path() -> String {
    "/token/".to_string()
}

fn default_developer_token_path() -> String {
    "/token/developer/".to_string()
}

fn default_refresh_path() -> String {
    "/token/refresh/".to_string()
}

fn default_profile_path() -> String {
    "/users/me/".to_string()
}

impl SessionConfig {
    /// Creates a configuration with defaults for everything but the base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: default_timeout_seconds(),
            expiry_leeway_seconds: default_expiry_leeway_seconds(),
            token_path: default_token_path(),
            developer_token_path: default_developer_token_path(),
            refresh_path: default_refresh_path(),
            profile_path: default_profile_path(),
        }
    }

    /// Uses a different profile endpoint (some deployments expose
    /// `/users/profile/` instead of `/users/me/`).
    #[must_use]
    pub fn with_profile_path(mut self, path: impl Into<String>) -> Self {
        self.profile_path = path.into();
        self
    }

    #[must_use]
    pub fn with_expiry_leeway_seconds(mut self, seconds: i64) -> Self {
        self.expiry_leeway_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn expiry_leeway(&self) -> Duration {
        Duration::seconds(self.expiry_leeway_seconds)
    }

    /// Token issuance endpoint for the given portal.
    #[must_use]
    pub fn token_path(&self, portal: Portal) -> &str {
        match portal {
            Portal::Research => &self.token_path,
            Portal::Developer => &self.developer_token_path,
        }
    }

    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    #[must_use]
    pub fn profile_path(&self) -> &str {
        &self.profile_path
    }
}
