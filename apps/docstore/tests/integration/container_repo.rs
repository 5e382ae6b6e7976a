//! Repository operations against the suite's store.

use std::collections::HashSet;
use std::time::Duration;

use customer_service::{Customer, CustomerBuilder};
use harness_core::{guard, ErrorKind, StepVerifier};
use ntest::timeout;

use super::helpers::{self, clear, service_for, suite_environment, WAIT};

const SUITE: &str = "container-repository";
/// Tests below that share the suite environment
const SUITE_TESTS: usize = 9;

#[timeout(60000)]
#[test]
fn test_container_is_running() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    assert!(env.is_running());
    assert!(env.endpoint().is_ok());
}

#[timeout(60000)]
#[test]
fn test_save_customer_with_null_email() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    clear(&service);

    let customer = CustomerBuilder::customer_with_name_but_email_is_null().create();
    let id = customer.id.clone();

    StepVerifier::create(service.save(customer.clone()))
        .expect_subscription()
        .expect_next_matches("same id, no email", move |saved: &Customer| {
            saved.id == id && saved.email.is_none()
        })
        .verify_complete()
        .unwrap();

    let stored = service.find_all().block_collect(WAIT).unwrap();
    assert!(stored.iter().any(|c| c == &customer), "{:?}", stored);
}

#[timeout(60000)]
#[test]
fn test_save_customer() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());

    let customer = CustomerBuilder::customer_with_name().create();
    StepVerifier::create(service.save(customer.clone()))
        .expect_subscription()
        .expect_next(customer)
        .verify_complete()
        .unwrap();
}

#[timeout(60000)]
#[test]
fn test_find_all_emits_every_saved_customer() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    clear(&service);

    let first = CustomerBuilder::customer_with_id_and_name("first").create();
    let second = CustomerBuilder::customer_with_name().create();
    service.save(first.clone()).block(WAIT).unwrap();
    service.save(second.clone()).block(WAIT).unwrap();

    StepVerifier::create(service.find_all())
        .expect_subscription()
        .expect_next_count(2)
        .verify_complete()
        .unwrap();

    // order is up to the store
    let ids: HashSet<String> = [first.id, second.id].into_iter().collect();
    let report = StepVerifier::create(service.find_all())
        .then_consume_while("id is one of the saved ids", move |c: &Customer| {
            ids.contains(&c.id)
        })
        .verify_complete()
        .unwrap();
    assert_eq!(report.items, 2);
}

#[timeout(60000)]
#[test]
fn test_delete_all_leaves_store_empty() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());

    service
        .save(CustomerBuilder::customer_with_name().create())
        .block(WAIT)
        .unwrap();

    StepVerifier::create(service.delete_all())
        .expect_subscription()
        .verify_complete()
        .unwrap();
    StepVerifier::create(service.find_all())
        .expect_subscription()
        .verify_complete()
        .unwrap();
}

#[timeout(60000)]
#[test]
fn test_delete_on_empty_store_completes() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    clear(&service);

    StepVerifier::create(service.delete_all()).verify_complete().unwrap();
    StepVerifier::create(service.find_all()).verify_complete().unwrap();
}

#[timeout(60000)]
#[test]
fn test_delete_then_recreate() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());

    service
        .save(CustomerBuilder::customer_with_name().create())
        .block(WAIT)
        .unwrap();
    clear(&service);

    let customer = CustomerBuilder::customer_with_name().create();
    service.save(customer.clone()).block(WAIT).unwrap();

    StepVerifier::create(service.find_all())
        .expect_next(customer)
        .verify_complete()
        .unwrap();
}

#[timeout(60000)]
#[test]
fn test_save_is_cold() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    clear(&service);

    let customer = CustomerBuilder::customer_with_name().create();
    let save = service.save(customer.clone());
    assert!(service.find_all().block_collect(WAIT).unwrap().is_empty());

    // every subscription writes again; the same id is replaced in place
    for _ in 0..2 {
        StepVerifier::create(save.clone())
            .expect_next(customer.clone())
            .verify_complete()
            .unwrap();
    }
    assert_eq!(service.find_all().block_collect(WAIT).unwrap(), vec![customer]);
}

#[timeout(30000)]
#[test]
fn test_guard_detects_sleep_on_non_blocking_pool() {
    let before = helpers::guard().violation_count();

    let unit = helpers::scheduler().schedule(|| {
        guard::sleep(Duration::ZERO);
        ""
    });

    let err = unit.get(WAIT).unwrap_err();
    let violation = err.violation().expect("the violation should be the cause");
    assert_eq!(violation.call_site, "std::thread::sleep");
    assert!(violation.thread.name.as_deref().is_some_and(|n| n.starts_with("harness-worker")));
    assert!(helpers::guard().violation_count() > before);
}

#[timeout(60000)]
#[test]
fn test_blocking_stage_fails_the_pipeline() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    service
        .save(CustomerBuilder::customer_with_name().create())
        .block(WAIT)
        .unwrap();

    let slow = service.find_all().map(|customer| {
        guard::sleep(Duration::from_millis(1));
        customer
    });

    StepVerifier::create(slow)
        .verify_error_of_kind(ErrorKind::BlockingOperationDetected)
        .unwrap();
}
