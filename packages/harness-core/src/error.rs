//! Harness error types.

use std::time::Duration;

use thiserror::Error;

use crate::guard::Violation;

/// Result alias used across the harness.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminant of [`Error`], used to script expected sequence errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ProvisionTimeout,
    ProvisionFailure,
    BlockingOperationDetected,
    VerificationTimeout,
    AssertionMismatch,
    StaleEndpoint,
    Aborted,
    Store,
    Transport,
    Serialization,
    Config,
    Io,
}

/// Harness operation errors.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Environment never passed its readiness probe
    #[error("Environment '{environment}' not ready after {waited:?}")]
    ProvisionTimeout {
        environment: String,
        waited: Duration,
    },

    /// Environment process could not be launched or exited early
    #[error("Environment '{environment}' failed to start: {reason}")]
    ProvisionFailure {
        environment: String,
        reason: String,
        stderr_tail: Vec<String>,
    },

    /// Blocking call on a non-blocking thread
    #[error("{0}")]
    BlockingOperationDetected(Violation),

    /// Sequence did not terminate as scripted within the window
    #[error("Verification timed out after {timeout:?} at expectation #{index} {expectation}\n{transcript}")]
    VerificationTimeout {
        index: usize,
        expectation: String,
        timeout: Duration,
        transcript: String,
    },

    /// Sequence terminated but diverged from the script
    #[error("Expectation #{index} {expected} failed, observed {observed}\n{transcript}")]
    AssertionMismatch {
        index: usize,
        expected: String,
        observed: String,
        transcript: String,
    },

    /// Operation issued against an endpoint invalidated by a restart or stop
    #[error("Endpoint {endpoint} (generation {generation}) is stale, environment is at generation {current}")]
    StaleEndpoint {
        endpoint: String,
        generation: u64,
        current: u64,
    },

    /// Execution unit ended without producing a result
    #[error("Execution unit aborted: {0}")]
    Aborted(String),

    /// Store answered with a non-success status
    #[error("Store rejected request with status {status}: {message}")]
    Store { status: u16, message: String },

    /// Connection-level failure talking to a collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid harness configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// Returns the discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ProvisionTimeout { .. } => ErrorKind::ProvisionTimeout,
            Error::ProvisionFailure { .. } => ErrorKind::ProvisionFailure,
            Error::BlockingOperationDetected(_) => ErrorKind::BlockingOperationDetected,
            Error::VerificationTimeout { .. } => ErrorKind::VerificationTimeout,
            Error::AssertionMismatch { .. } => ErrorKind::AssertionMismatch,
            Error::StaleEndpoint { .. } => ErrorKind::StaleEndpoint,
            Error::Aborted(_) => ErrorKind::Aborted,
            Error::Store { .. } => ErrorKind::Store,
            Error::Transport(_) => ErrorKind::Transport,
            Error::SerializationError(_) => ErrorKind::Serialization,
            Error::Config(_) => ErrorKind::Config,
            Error::IoError(_) => ErrorKind::Io,
        }
    }

    /// Returns the guard violation carried by this error, if any.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::BlockingOperationDetected(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        Error::BlockingOperationDetected(violation)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error.to_string())
    }
}
