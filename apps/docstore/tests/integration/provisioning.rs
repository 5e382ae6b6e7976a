//! Startup failures, readiness gating and store credentials.

use std::time::Duration;

use harness_core::{Error, ErrorKind, StepVerifier};
use harness_env::{Environment, HttpProbe, ImageSpec, ProvisionOptions, SuiteEnvironments, TcpProbe};
use ntest::timeout;

use super::helpers::{credentials, docstore_image, options, service_for, start_docstore, WAIT};

#[timeout(60000)]
#[test]
fn test_bad_arguments_are_provision_failure() {
    let image = docstore_image().args(["--request-timeout-ms", "soon"]);

    let err = Environment::start("bad-args", image, HttpProbe::new("/health"), options()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProvisionFailure);
    match err {
        Error::ProvisionFailure { stderr_tail, .. } => {
            assert!(
                stderr_tail.iter().any(|line| line.contains("invalid value")),
                "{:?}",
                stderr_tail
            );
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[timeout(60000)]
#[test]
fn test_readiness_timeout() {
    // the probe targets a path the store never serves successfully
    let image = docstore_image();
    let options = options().with_startup_timeout(Duration::from_millis(800));

    let err = Environment::start("never-healthy", image, HttpProbe::new("/nope"), options)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProvisionTimeout);
}

#[timeout(60000)]
#[test]
fn test_tcp_probe_gates_startup() {
    let env = Environment::start("tcp-gated", docstore_image(), TcpProbe::default(), options())
        .unwrap();
    assert!(env.is_running());
    assert!(env.pid().is_some());
}

#[timeout(60000)]
#[test]
fn test_wrong_credentials_are_rejected() {
    let env = start_docstore("credentials").unwrap();
    let endpoint = env.endpoint().unwrap();

    let health = ureq::get(&format!("{}/health", endpoint.base_url())).call();
    assert_eq!(health.unwrap().status(), 200);

    match ureq::get(&format!("{}/collections/customer/documents", endpoint.base_url())).call() {
        Err(ureq::Error::Status(401, _)) => {}
        other => panic!("expected 401, got {:?}", other.map(|r| r.status())),
    }
}

#[timeout(60000)]
#[test]
fn test_credential_mismatch_is_store_error() {
    // the store expects a password the endpoint does not carry
    let image = ImageSpec::process(env!("CARGO_BIN_EXE_docstore")).args([
        "--host",
        "{host}",
        "--port",
        "{port}",
        "--username",
        "{username}",
        "--password",
        "not-the-harness-secret",
        "--lifeline",
    ]);
    let env = Environment::start("credentials-mismatch", image, HttpProbe::new("/health"), options())
        .unwrap();
    let endpoint = env.endpoint().unwrap();
    assert_eq!(endpoint.credentials(), Some(&credentials()));

    let service = service_for(endpoint);
    StepVerifier::create(service.delete_all())
        .verify_error_of_kind(ErrorKind::Store)
        .unwrap();
    match service.delete_all().block(WAIT).unwrap_err() {
        Error::Store { status, .. } => assert_eq!(status, 401),
        other => panic!("unexpected error: {}", other),
    }
}

#[timeout(60000)]
#[test]
fn test_failed_suite_start_is_reported_to_every_test() {
    let suites = SuiteEnvironments::new();
    let start = || {
        Environment::start(
            "broken-suite",
            docstore_image().args(["--port", "not-a-port"]),
            HttpProbe::new("/health"),
            options(),
        )
    };

    let first = suites.get_or_start("broken", start).unwrap_err();
    let second = suites.get_or_start("broken", || unreachable!("start is not retried")).unwrap_err();

    assert_eq!(first.kind(), ErrorKind::ProvisionFailure);
    assert_eq!(first.to_string(), second.to_string());
}

#[cfg(unix)]
#[timeout(60000)]
#[test]
fn test_suite_store_is_stopped_after_last_test() {
    use super::helpers::signal;

    let suites = SuiteEnvironments::new();
    // no lifeline, so only the suite teardown can stop this store
    let start = || {
        Environment::start(
            "suite-teardown",
            ImageSpec::process(env!("CARGO_BIN_EXE_docstore")).args([
                "--host",
                "{host}",
                "--port",
                "{port}",
                "--username",
                "{username}",
                "--password",
                "{password}",
            ]),
            HttpProbe::new("/health"),
            ProvisionOptions::from_env().with_credentials(credentials()),
        )
    };

    let first = suites.enter("teardown", 2, start).unwrap();
    let pid = first.lock().pid().unwrap();
    let endpoint = first.lock().endpoint().unwrap();
    drop(first);
    assert!(signal(pid, "0"), "store stopped before the suite finished");

    let second = suites.enter("teardown", 2, start).unwrap();
    let service = service_for(second.lock().endpoint().unwrap());
    service.delete_all().block(WAIT).unwrap();
    drop(second);

    assert!(endpoint.is_stale());
    assert!(!signal(pid, "0"), "store {} outlived its suite", pid);
    assert!(suites.suites().is_empty());
}
