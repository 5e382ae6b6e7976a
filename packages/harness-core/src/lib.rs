//! Test harness primitives for non-blocking CRUD pipelines.
//!
//! Provides the blocking-call guard, the two-pool scheduler, cold
//! asynchronous sequences and the step verifier the end-to-end suites
//! are written against.

pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod reactive;
pub mod scheduler;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, ErrorKind, Result};
pub use reactive::{Flux, Mono, Signal, Subscription};
pub use scheduler::{Scheduler, SchedulerHandle, UnitError, UnitHandle};
pub use verifier::{StepVerifier, VerificationReport};
