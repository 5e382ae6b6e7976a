//! Readiness probes.
//!
//! A probe is polled until it succeeds or the startup timeout elapses. Its
//! failure reason is only used for diagnostics.

use std::net::TcpStream;
use std::time::Duration;

use harness_core::guard;

use crate::endpoint::ConnectionEndpoint;

pub trait ReadinessProbe: Send + Sync {
    fn describe(&self) -> String;

    /// One attempt. Blocking.
    fn probe(&self, endpoint: &ConnectionEndpoint) -> Result<(), String>;
}

impl<F> ReadinessProbe for F
where
    F: Fn(&ConnectionEndpoint) -> Result<(), String> + Send + Sync,
{
    fn describe(&self) -> String {
        "custom probe".to_string()
    }

    fn probe(&self, endpoint: &ConnectionEndpoint) -> Result<(), String> {
        self(endpoint)
    }
}

/// Ready once the port accepts a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub connect_timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
        }
    }
}

impl ReadinessProbe for TcpProbe {
    fn describe(&self) -> String {
        "tcp connect".to_string()
    }

    fn probe(&self, endpoint: &ConnectionEndpoint) -> Result<(), String> {
        let addr = endpoint.socket_addr().map_err(|e| e.to_string())?;
        guard::blocking_io("TcpStream::connect_timeout", || {
            TcpStream::connect_timeout(&addr, self.connect_timeout)
        })
        .map(drop)
        .map_err(|e| e.to_string())
    }
}

/// Ready once `GET path` answers with a success status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    pub path: String,
    pub timeout: Duration,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(1),
        }
    }
}

impl ReadinessProbe for HttpProbe {
    fn describe(&self) -> String {
        format!("GET {}", self.path)
    }

    fn probe(&self, endpoint: &ConnectionEndpoint) -> Result<(), String> {
        let url = format!("{}{}", endpoint.base_url(), self.path);
        let response = guard::blocking_io("ureq::get", || {
            ureq::get(&url).timeout(self.timeout).call()
        });
        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(format!("{} answered {}", url, code)),
            Err(ureq::Error::Transport(transport)) => Err(transport.to_string()),
        }
    }
}
