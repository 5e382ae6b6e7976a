//! End-to-end suites against a real docstore process.
//!
//! Each suite provisions its own store through the environment provisioner:
//! 1. Container repository: save/find/delete through the customer repository
//! 2. Controller: the `/customer` HTTP API in front of the repository
//! 3. Restarted container: generation bump, stale endpoints, volumes
//! 4. Provisioning: startup failures, readiness gating, credentials

mod container_repo;
mod controller;
mod helpers;
mod provisioning;
mod restarted_container;
