//! Customer CRUD service under test.
//!
//! `save`, `find_all` and `delete_all` are cold sequences running on the
//! harness scheduler's non-blocking pool, backed by the document store's
//! HTTP wire protocol. The `api` module exposes them as `/customer`.

pub mod api;
pub mod config;
pub mod customer;
pub mod fixtures;
pub mod repository;
pub mod service;
pub mod store_client;

pub use api::ApiServer;
pub use config::ServiceConfig;
pub use customer::Customer;
pub use fixtures::CustomerBuilder;
pub use repository::{CustomerRepository, DocumentCustomerRepository};
pub use service::CustomerService;
pub use store_client::DocStoreClient;
