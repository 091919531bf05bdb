//! Stream connection configuration.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Delay applied before every reconnect attempt unless overridden.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Immutable settings for one [`StreamConnection`](crate::stream::connection::StreamConnection).
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream service base URL. Endpoint paths are appended to it.
    pub base_url: Url,
    /// Environment (client-side id) the stream is scoped to.
    pub environment_id: String,
    /// Secure-mode hash for the identity, appended as `h=<hash>` on plain
    /// GET eval requests.
    pub secure_mode_hash: Option<SecretString>,
    /// Prefer sending the identity in a REPORT body instead of the URL.
    pub use_report: bool,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Ask the service to include evaluation reasons.
    pub evaluation_reasons: bool,
    /// Extra headers sent with every stream request.
    pub headers: Vec<(String, String)>,
}

impl StreamConfig {
    /// Creates a configuration for `environment_id` served from `base_url`.
    ///
    /// The base URL must be absolute and able to carry path segments.
    pub fn new(base_url: &str, environment_id: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url.trim_end())?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::CannotBeABase(base_url.to_string()));
        }

        let config = Self {
            base_url,
            environment_id: environment_id.into(),
            secure_mode_hash: None,
            use_report: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            evaluation_reasons: false,
            headers: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the secure-mode hash for the identity being streamed.
    pub fn with_secure_mode_hash(mut self, hash: SecretString) -> Self {
        self.secure_mode_hash = Some(hash);
        self
    }

    /// Enables or disables REPORT requests when the platform supports them.
    pub fn with_report(mut self, use_report: bool) -> Self {
        self.use_report = use_report;
        self
    }

    /// Sets the delay applied before every reconnect attempt.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Requests evaluation reasons alongside flag values.
    pub fn with_evaluation_reasons(mut self, enabled: bool) -> Self {
        self.evaluation_reasons = enabled;
        self
    }

    /// Adds a header forwarded on every stream request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Checks values that cannot be expressed through the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment_id.trim().is_empty() {
            return Err(ConfigError::EmptyEnvironment);
        }
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        Ok(())
    }
}

/// Errors produced while building a [`StreamConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Base URL failed to parse.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// Base URL cannot have path segments appended (eg `mailto:`).
    #[error("base url cannot carry a path: {0}")]
    CannotBeABase(String),

    /// Environment id is empty or whitespace.
    #[error("environment id must not be empty")]
    EmptyEnvironment,

    /// Reconnect delay of zero would spin on a failing endpoint.
    #[error("reconnect delay must be > 0")]
    ZeroReconnectDelay,
}
