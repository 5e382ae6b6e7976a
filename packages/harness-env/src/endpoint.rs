//! Connection endpoints and their generations.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use harness_core::{Error, Result};
use tokio::sync::watch;

/// Store login, passed to the image and to clients.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Immutable address of one Ready generation of an environment.
///
/// Every restart or stop moves the environment to a new generation; an
/// endpoint from an older generation reports itself stale.
#[derive(Debug, Clone)]
pub struct ConnectionEndpoint {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    generation: u64,
    current: watch::Receiver<u64>,
}

impl ConnectionEndpoint {
    pub(crate) fn new(
        host: String,
        port: u16,
        credentials: Option<Credentials>,
        current: watch::Receiver<u64>,
    ) -> Self {
        let generation = *current.borrow();
        Self {
            host,
            port,
            credentials,
            generation,
            current,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Invalid endpoint {}: {}", self, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("Endpoint {} resolved to no address", self)))
    }

    /// Generation the owning environment is at now. Reads `u64::MAX` once
    /// the environment is gone.
    pub fn current_generation(&self) -> u64 {
        match self.current.has_changed() {
            Err(_) => u64::MAX,
            Ok(_) => *self.current.borrow(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.current_generation() != self.generation
    }

    /// Fails with `StaleEndpoint` when a restart or stop superseded this endpoint.
    pub fn ensure_current(&self) -> Result<()> {
        let current = self.current_generation();
        if current == self.generation {
            Ok(())
        } else {
            Err(Error::StaleEndpoint {
                endpoint: self.to_string(),
                generation: self.generation,
                current,
            })
        }
    }

    /// Resolves once this endpoint is superseded.
    pub async fn invalidated(&self) {
        let generation = self.generation;
        let mut current = self.current.clone();
        // a closed channel means the environment was dropped
        let _ = current.wait_for(|g| *g != generation).await;
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::ErrorKind;
    use std::time::Duration;

    fn endpoint(tx: &watch::Sender<u64>) -> ConnectionEndpoint {
        ConnectionEndpoint::new("127.0.0.1".to_string(), 27017, None, tx.subscribe())
    }

    #[test]
    fn test_generation_bump_makes_endpoint_stale() {
        let (tx, _rx) = watch::channel(3);
        let endpoint = endpoint(&tx);
        assert_eq!(endpoint.generation(), 3);
        assert!(endpoint.ensure_current().is_ok());

        tx.send_replace(4);

        assert!(endpoint.is_stale());
        let err = endpoint.ensure_current().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleEndpoint);
        assert!(err.to_string().contains("127.0.0.1:27017#3"));
    }

    #[test]
    fn test_dropped_environment_makes_endpoint_stale() {
        let (tx, rx) = watch::channel(0);
        let endpoint = endpoint(&tx);
        drop(rx);
        drop(tx);
        assert!(endpoint.is_stale());
        assert_eq!(endpoint.current_generation(), u64::MAX);
    }

    #[tokio::test]
    async fn test_invalidated_resolves_on_bump() {
        let (tx, _rx) = watch::channel(0);
        let endpoint = endpoint(&tx);

        let waiter = tokio::spawn({
            let endpoint = endpoint.clone();
            async move { endpoint.invalidated().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_credentials_are_redacted() {
        let creds = Credentials::new("root", "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_socket_addr() {
        let (tx, _rx) = watch::channel(0);
        let addr = endpoint(&tx).socket_addr().unwrap();
        assert_eq!(addr.port(), 27017);
        assert_eq!(endpoint(&tx).base_url(), "http://127.0.0.1:27017");
    }
}
