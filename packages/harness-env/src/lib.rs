//! Environment provisioner for disposable backing stores.
//!
//! Brings up one store process per suite, gates it on a readiness probe,
//! remaps its port on every launch and restarts it on demand. Connection
//! endpoints carry the generation they were issued in, so work aimed at a
//! pre-restart address fails with `StaleEndpoint` instead of hanging.

pub mod config;
pub mod endpoint;
pub mod environment;
pub mod image;
pub mod probe;
pub mod suite;

pub use config::ProvisionOptions;
pub use endpoint::{ConnectionEndpoint, Credentials};
pub use environment::{EnvState, Environment};
pub use image::ImageSpec;
pub use probe::{HttpProbe, ReadinessProbe, TcpProbe};
pub use suite::{SharedEnvironment, SuiteEnvironments, SuiteLease};
