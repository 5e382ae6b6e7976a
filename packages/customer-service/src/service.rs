//! Customer service.

use std::sync::Arc;

use harness_core::{Flux, Mono, SchedulerHandle};
use harness_env::ConnectionEndpoint;

use crate::config::ServiceConfig;
use crate::customer::Customer;
use crate::repository::{CustomerRepository, DocumentCustomerRepository};
use crate::store_client::DocStoreClient;

/// The save/find/delete surface, delegating to a repository.
#[derive(Clone)]
pub struct CustomerService {
    repository: Arc<dyn CustomerRepository>,
}

impl CustomerService {
    pub fn new(repository: Arc<dyn CustomerRepository>) -> Self {
        Self { repository }
    }

    /// Service over the store behind `endpoint`.
    ///
    /// Bound to the endpoint's generation; build a new service after the
    /// store restarts.
    pub fn connect(
        scheduler: &SchedulerHandle,
        endpoint: ConnectionEndpoint,
        config: &ServiceConfig,
    ) -> Self {
        let client = DocStoreClient::new(endpoint).with_request_timeout(config.store_timeout);
        tracing::debug!(endpoint = %client.endpoint(), collection = %config.collection, "Customer service connected");
        Self::new(Arc::new(DocumentCustomerRepository::new(
            scheduler,
            client,
            &config.collection,
        )))
    }

    pub fn save(&self, customer: Customer) -> Mono<Customer> {
        self.repository.save(customer)
    }

    pub fn find_all(&self) -> Flux<Customer> {
        self.repository.find_all()
    }

    pub fn delete_all(&self) -> Mono<()> {
        self.repository.delete_all()
    }
}
