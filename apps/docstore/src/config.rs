//! Server configuration.

use std::path::PathBuf;

/// Runtime settings of one store instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Snapshot directory; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Basic credentials required on collection routes
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request body read timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            username: None,
            password: None,
            request_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// Expected `Authorization` header value, when credentials are configured.
    pub fn authorization(&self) -> Option<String> {
        use base64::Engine;

        let username = self.username.as_deref()?;
        let password = self.password.as_deref().unwrap_or_default();
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password))
        ))
    }
}
