//! Provisioning settings.

use std::time::Duration;

use crate::endpoint::Credentials;

/// How an environment is launched and gated.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Interface the store binds and clients connect to
    pub host: String,
    /// Deadline for the readiness probe to pass, per launch
    pub startup_timeout: Duration,
    pub probe_interval: Duration,
    /// Time a lifeline-holding store gets to exit on its own before it is killed
    pub shutdown_grace: Duration,
    pub credentials: Option<Credentials>,
    /// Keep one data directory across restarts, exposed as `{volume}`
    pub persistent_volume: bool,
    /// Pipe the store's stdin and close it on teardown
    pub lifeline: bool,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            startup_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            credentials: None,
            persistent_volume: false,
            lifeline: false,
        }
    }
}

impl ProvisionOptions {
    /// Defaults overridden by `HARNESS_STARTUP_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var("HARNESS_STARTUP_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => options.startup_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable HARNESS_STARTUP_TIMEOUT_MS"),
            }
        }
        options
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_persistent_volume(mut self) -> Self {
        self.persistent_volume = true;
        self
    }

    pub fn with_lifeline(mut self) -> Self {
        self.lifeline = true;
        self
    }
}
