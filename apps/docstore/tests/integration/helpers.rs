//! Shared fixtures for the end-to-end suites.

use std::sync::OnceLock;
use std::time::Duration;

use customer_service::{CustomerService, ServiceConfig};
use harness_core::config::{HarnessConfig, SchedulerConfig};
use harness_core::guard::{self, Guard};
use harness_core::logging::init_test_logging;
use harness_core::{Result, Scheduler, SchedulerHandle};
use harness_env::{
    ConnectionEndpoint, Credentials, Environment, HttpProbe, ImageSpec, ProvisionOptions,
    SuiteEnvironments, SuiteLease,
};

pub const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    guard: &'static Guard,
    scheduler: Scheduler,
    suites: SuiteEnvironments,
}

fn harness() -> &'static Harness {
    static HARNESS: OnceLock<Harness> = OnceLock::new();
    HARNESS.get_or_init(|| {
        init_test_logging();
        let config = HarnessConfig::from_env();
        let guard = guard::install(config.guard);
        let scheduler = Scheduler::new(SchedulerConfig {
            non_blocking_workers: config.scheduler.non_blocking_workers.max(2),
            ..config.scheduler
        })
        .expect("scheduler should start");
        Harness {
            guard,
            scheduler,
            suites: SuiteEnvironments::new(),
        }
    })
}

pub fn guard() -> &'static Guard {
    harness().guard
}

pub fn scheduler() -> SchedulerHandle {
    harness().scheduler.handle()
}

pub fn credentials() -> Credentials {
    Credentials::new("harness", "harness-secret")
}

/// The docstore binary, bound to the allocated port and tied to the test
/// process through its stdin.
pub fn docstore_image() -> ImageSpec {
    ImageSpec::process(env!("CARGO_BIN_EXE_docstore")).args([
        "--host",
        "{host}",
        "--port",
        "{port}",
        "--username",
        "{username}",
        "--password",
        "{password}",
        "--lifeline",
    ])
}

pub fn options() -> ProvisionOptions {
    ProvisionOptions::from_env()
        .with_credentials(credentials())
        .with_lifeline()
}

pub fn start_docstore(name: &str) -> Result<Environment> {
    Environment::start(name, docstore_image(), HttpProbe::new("/health"), options())
}

/// A store that keeps its data in a volume across restarts.
pub fn start_persistent_docstore(name: &str) -> Result<Environment> {
    Environment::start(
        name,
        docstore_image().args(["--data-dir", "{volume}"]),
        HttpProbe::new("/health"),
        options().with_persistent_volume(),
    )
}

/// The environment shared by the `planned` tests of `suite`, started on
/// first use and stopped when the last of them finishes.
pub fn suite_environment(suite: &str, planned: usize) -> SuiteLease<'static> {
    harness()
        .suites
        .enter(suite, planned, || start_docstore(suite))
        .unwrap_or_else(|e| panic!("suite '{}' has no environment: {}", suite, e))
}

pub fn service_for(endpoint: ConnectionEndpoint) -> CustomerService {
    CustomerService::connect(&scheduler(), endpoint, &ServiceConfig::default())
}

/// Sends `signal` to `pid` through `kill`; `"0"` only checks the process exists.
#[cfg(unix)]
pub fn signal(pid: u32, signal: &str) -> bool {
    std::process::Command::new("kill")
        .args([format!("-{}", signal), pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Empties the customer collection so a test starts from a known state.
pub fn clear(service: &CustomerService) {
    service
        .delete_all()
        .block(WAIT)
        .expect("delete_all should complete");
}
