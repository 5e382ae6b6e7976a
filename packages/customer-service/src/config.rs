//! Service configuration.

use std::time::Duration;

/// Service and API settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Store collection holding customers
    pub collection: String,
    /// Deadline for one store round trip
    pub store_timeout: Duration,
    /// Request body read timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            collection: "customer".to_string(),
            store_timeout: Duration::from_secs(5),
            request_timeout_ms: 5000,
        }
    }
}

impl ServiceConfig {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}
