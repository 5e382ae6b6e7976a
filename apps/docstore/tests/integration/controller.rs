//! The `/customer` HTTP API in front of the suite's store.

use customer_service::{ApiServer, Customer, CustomerBuilder, ServiceConfig};
use ntest::timeout;

use super::helpers::{clear, scheduler, service_for, suite_environment, WAIT};

const SUITE: &str = "controller";
/// Tests below that share the suite environment
const SUITE_TESTS: usize = 3;

fn start_api(service: customer_service::CustomerService) -> ApiServer {
    ApiServer::start(
        &scheduler(),
        "127.0.0.1:0".parse().unwrap(),
        service,
        ServiceConfig::default(),
    )
    .unwrap()
}

#[timeout(60000)]
#[test]
fn test_post_returns_created_customer() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let api = start_api(service_for(env.endpoint().unwrap()));

    let customer = CustomerBuilder::customer_with_name().create();
    let response = ureq::post(&format!("{}/customer", api.base_url()))
        .send_json(&customer)
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(body["id"], customer.id.as_str());
    assert_eq!(body["email"], customer.email.as_deref().unwrap());
    assert_eq!(body["rating"], customer.rating.unwrap());
}

#[timeout(60000)]
#[test]
fn test_get_lists_saved_customers() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    clear(&service);

    let known = CustomerBuilder::customer_with_id_and_name("known-id").create();
    service.save(known.clone()).block(WAIT).unwrap();
    service
        .save(CustomerBuilder::customer_with_name().create())
        .block(WAIT)
        .unwrap();

    let api = start_api(service);
    let response = ureq::get(&format!("{}/customer", api.base_url()))
        .call()
        .unwrap();

    assert_eq!(response.status(), 200);
    let customers: Vec<Customer> = response.into_json().unwrap();
    assert_eq!(customers.len(), 2);
    assert!(customers.contains(&known));
}

#[timeout(60000)]
#[test]
fn test_delete_returns_no_content() {
    let env = suite_environment(SUITE, SUITE_TESTS);
    let env = env.lock();
    let service = service_for(env.endpoint().unwrap());
    service
        .save(CustomerBuilder::customer_with_name().create())
        .block(WAIT)
        .unwrap();

    let api = start_api(service.clone());
    let response = ureq::delete(&format!("{}/customer", api.base_url()))
        .call()
        .unwrap();

    assert_eq!(response.status(), 204);
    assert!(service.find_all().block_collect(WAIT).unwrap().is_empty());
    api.shutdown();
}
