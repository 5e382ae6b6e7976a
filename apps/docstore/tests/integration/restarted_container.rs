//! Restarting the store mid-suite.
//!
//! Every test owns its environment, so a restart never pulls the store out
//! from under another suite.

use std::time::{Duration, Instant};

use customer_service::{Customer, CustomerBuilder, CustomerService, ServiceConfig};
use harness_core::{ErrorKind, StepVerifier};
use harness_env::EnvState;
use ntest::timeout;

use super::helpers::{scheduler, service_for, start_docstore, start_persistent_docstore, WAIT};

#[timeout(90000)]
#[test]
fn test_restart_issues_new_endpoint() {
    let mut env = start_docstore("restart-endpoint").unwrap();
    let before = env.endpoint().unwrap();
    let first_pid = env.pid();
    let stale_service = service_for(before.clone());

    let after = env.restart().unwrap();

    // a fresh port is allocated, but the OS may hand back the old one, so
    // the new process is what tells the generations apart
    assert_ne!(env.pid(), first_pid);

    assert_eq!(env.state(), EnvState::Ready);
    assert_eq!(env.restart_count(), 1);
    assert!(env.is_running());
    assert!(after.generation() > before.generation());
    assert!(before.is_stale());
    assert!(!after.is_stale());

    // old endpoint fails fast instead of hanging
    StepVerifier::create(stale_service.save(CustomerBuilder::customer_with_name().create()))
        .verify_error_of_kind(ErrorKind::StaleEndpoint)
        .unwrap();
    StepVerifier::create(stale_service.find_all())
        .verify_error_of_kind(ErrorKind::StaleEndpoint)
        .unwrap();

    let customer = CustomerBuilder::customer_with_name().create();
    StepVerifier::create(service_for(after).save(customer.clone()))
        .expect_next(customer)
        .verify_complete()
        .unwrap();
}

#[timeout(90000)]
#[test]
fn test_restart_is_repeatable() {
    let mut env = start_docstore("restart-repeat").unwrap();

    for round in 1..=3 {
        let endpoint = env.restart().unwrap();
        assert_eq!(env.restart_count(), round);

        let service = service_for(endpoint);
        let customer = CustomerBuilder::customer_with_name().create();
        service.save(customer.clone()).block(WAIT).unwrap();
        // without a volume each generation starts empty
        assert_eq!(service.find_all().block_collect(WAIT).unwrap(), vec![customer]);
    }
}

#[timeout(90000)]
#[test]
fn test_volume_keeps_data_across_restart() {
    let mut env = start_persistent_docstore("restart-volume").unwrap();
    let service = service_for(env.endpoint().unwrap());

    let saved: Vec<Customer> = (0..3)
        .map(|_| CustomerBuilder::customer_with_name().create())
        .collect();
    for customer in &saved {
        service.save(customer.clone()).block(WAIT).unwrap();
    }

    let service = service_for(env.restart().unwrap());
    let mut restored = service.find_all().block_collect(WAIT).unwrap();
    restored.sort_by(|a, b| a.id.cmp(&b.id));
    let mut expected = saved;
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(restored, expected);
}

#[timeout(60000)]
#[test]
fn test_stop_invalidates_endpoint() {
    let mut env = start_docstore("stop").unwrap();
    let endpoint = env.endpoint().unwrap();
    let service = service_for(endpoint.clone());

    env.stop();

    assert_eq!(env.state(), EnvState::Stopped);
    assert!(!env.is_running());
    assert!(endpoint.is_stale());
    StepVerifier::create(service.delete_all())
        .verify_error_of_kind(ErrorKind::StaleEndpoint)
        .unwrap();
}

#[cfg(unix)]
#[timeout(60000)]
#[test]
fn test_in_flight_request_fails_when_store_stops() {
    use super::helpers::signal;

    let mut env = start_docstore("in-flight").unwrap();
    let store_timeout = Duration::from_secs(30);
    let service = CustomerService::connect(
        &scheduler(),
        env.endpoint().unwrap(),
        &ServiceConfig::default().with_store_timeout(store_timeout),
    );

    // a frozen store still accepts connections but never answers
    let pid = env.pid().unwrap();
    assert!(signal(pid, "STOP"));

    let pending = std::thread::spawn(move || {
        let started = Instant::now();
        let outcome = service.find_all().block_collect(Duration::from_secs(45));
        (outcome, started.elapsed())
    });
    std::thread::sleep(Duration::from_millis(300));
    env.stop();

    let (outcome, elapsed) = pending.join().unwrap();
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::StaleEndpoint);
    assert!(
        elapsed < Duration::from_secs(5),
        "in-flight request took {:?} with a {:?} store timeout",
        elapsed,
        store_timeout
    );
}
