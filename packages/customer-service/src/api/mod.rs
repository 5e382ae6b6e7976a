//! HTTP API for the customer service.
//!
//! `POST /customer` answers 201 with the stored customer, `GET /customer`
//! answers 200 with every customer, `DELETE /customer` answers 204.

pub mod handlers;
pub mod response;
pub mod router;
pub mod server;

pub use router::{AppState, Router, RouterError};
pub use server::ApiServer;
