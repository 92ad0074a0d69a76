//! CLI configuration.
//!
//! Loaded via the `config` crate from `RAVA__`-prefixed environment
//! variables, e.g. `RAVA__SESSION__BASE_URL` or `RAVA__CREDENTIAL_FILE`.

use rava_session::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// CLI configuration composed from the session library config.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// Backend endpoints and timing.
    pub session: SessionConfig,

    /// Where the credential is kept between invocations.
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
}

fn default_credential_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config/rava/session.json"),
        None => PathBuf::from(".rava-session.json"),
    }
}

impl CliConfig {
    /// Loads configuration from environment variables, letting
    /// `base_url` (from the command line) take precedence when given.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env(base_url: Option<String>) -> Result<Self, config::ConfigError> {
        Self::load(
            config::Environment::with_prefix("RAVA")
                .separator("__")
                .try_parsing(true),
            base_url,
        )
    }

    fn load<S>(source: S, base_url: Option<String>) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .set_override_option("session.base_url", base_url)?
            .build()?
            .try_deserialize()
    }
}
