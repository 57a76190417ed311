use std::time::Duration;

use crate::{token::DEFAULT_IDLE_TIMEOUT, Credentials, GuacError, RetryPolicy};

/// Connection settings for one Guacamole deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct GuacamoleConfig {
    /// Base URL of the Guacamole web application, e.g. `http://host:8080/guacamole`.
    pub host: String,
    pub username: String,
    pub password: String,
    /// Authentication provider identifier, e.g. `postgresql`.
    pub data_source: String,
    /// Client-side idle window; zero disables time-based expiry.
    pub idle_timeout: Duration,
}

impl std::fmt::Debug for GuacamoleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuacamoleConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("data_source", &self.data_source)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl GuacamoleConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        data_source: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            data_source: data_source.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Reads configuration from the environment.
    ///
    /// Reads:
    /// - `GUACAMOLE_HOST`: web application base URL
    /// - `GUACAMOLE_USERNAME`, `GUACAMOLE_PASSWORD`
    /// - `GUACAMOLE_DATA_SOURCE`: defaults to `postgresql`
    /// - `GUACAMOLE_IDLE_TIMEOUT_SECS`: optional, defaults to 300
    pub fn from_env() -> Result<Self, GuacError> {
        let host = required_env("GUACAMOLE_HOST")?;
        let username = required_env("GUACAMOLE_USERNAME")?;
        let password = required_env("GUACAMOLE_PASSWORD")?;
        let data_source = std::env::var("GUACAMOLE_DATA_SOURCE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "postgresql".to_owned());

        let mut config = Self::new(host, username, password, data_source);
        if let Ok(raw) = std::env::var("GUACAMOLE_IDLE_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                GuacError::Config(format!("GUACAMOLE_IDLE_TIMEOUT_SECS is not a number: '{raw}'"))
            })?;
            config.idle_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

fn required_env(name: &str) -> Result<String, GuacError> {
    let value = std::env::var(name)
        .map_err(|_| GuacError::Config(format!("missing {name} environment variable")))?;
    if value.trim().is_empty() {
        return Err(GuacError::Config(format!("{name} is set but empty")));
    }
    Ok(value)
}

/// Configures HTTP timeout and retry behavior.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientOptions, GuacamoleConfig};

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout(), Duration::from_secs(10));
        assert_eq!(options.retry.max_attempts, 3);

        let config = GuacamoleConfig::new("http://guac", "u", "p", "mysql");
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.credentials().identifier(), "u");
    }

    #[test]
    fn debug_redacts_password() {
        let config = GuacamoleConfig::new("http://guac", "guacadmin", "hunter2", "mysql");
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
