//! Customer persistence.

use std::sync::Arc;

use futures::{future, stream, StreamExt};
use harness_core::{Error, Flux, Mono, Result, SchedulerHandle};

use crate::customer::Customer;
use crate::store_client::DocStoreClient;

/// Non-blocking customer store.
///
/// Every returned sequence is cold: nothing happens until it is subscribed,
/// and each subscription repeats the operation. Subscribing to the same
/// `save` twice writes twice.
pub trait CustomerRepository: Send + Sync {
    fn save(&self, customer: Customer) -> Mono<Customer>;

    /// Every stored customer. Order is whatever the store returns.
    fn find_all(&self) -> Flux<Customer>;

    /// Completes without a value once the collection is empty.
    fn delete_all(&self) -> Mono<()>;
}

/// Repository over one collection of the document store.
#[derive(Clone)]
pub struct DocumentCustomerRepository {
    scheduler: SchedulerHandle,
    client: Arc<DocStoreClient>,
    collection: Arc<str>,
}

impl DocumentCustomerRepository {
    pub fn new(scheduler: &SchedulerHandle, client: DocStoreClient, collection: &str) -> Self {
        Self {
            scheduler: scheduler.clone(),
            client: Arc::new(client),
            collection: Arc::from(collection),
        }
    }

    pub fn client(&self) -> &DocStoreClient {
        &self.client
    }
}

impl CustomerRepository for DocumentCustomerRepository {
    fn save(&self, customer: Customer) -> Mono<Customer> {
        let client = Arc::clone(&self.client);
        let collection = Arc::clone(&self.collection);
        Mono::from_future(&self.scheduler, move || {
            let client = Arc::clone(&client);
            let collection = Arc::clone(&collection);
            let customer = customer.clone();
            async move {
                let stored = client.insert(&collection, &customer).await?;
                tracing::debug!(id = %customer.id, collection = %collection, "Customer saved");
                decode(stored)
            }
        })
    }

    fn find_all(&self) -> Flux<Customer> {
        let client = Arc::clone(&self.client);
        let collection = Arc::clone(&self.collection);
        Flux::from_stream(&self.scheduler, move || {
            let client = Arc::clone(&client);
            let collection = Arc::clone(&collection);
            stream::once(async move { client.find_all(&collection).await }).flat_map(
                |scan| match scan {
                    Ok(documents) => stream::iter(documents.into_iter().map(decode)).boxed(),
                    Err(err) => stream::once(future::ready(Err(err))).boxed(),
                },
            )
        })
    }

    fn delete_all(&self) -> Mono<()> {
        let client = Arc::clone(&self.client);
        let collection = Arc::clone(&self.collection);
        Mono::completion(&self.scheduler, move || {
            let client = Arc::clone(&client);
            let collection = Arc::clone(&collection);
            async move {
                let deleted = client.delete_all(&collection).await?;
                tracing::debug!(deleted, collection = %collection, "Customers deleted");
                Ok(())
            }
        })
    }
}

fn decode(document: serde_json::Value) -> Result<Customer> {
    serde_json::from_value(document)
        .map_err(|e| Error::SerializationError(format!("Stored document is not a customer: {}", e)))
}
