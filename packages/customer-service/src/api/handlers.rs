//! `/customer` endpoint implementations.

use http_body_util::BodyExt;
use hyper::{body::Bytes, Request, Response};
use tokio::time;

use super::response::{build_empty_response, json_response};
use super::router::{AppState, RouterError};
use crate::customer::Customer;

/// Creates a customer.
///
/// # Endpoint
/// `POST /customer`
///
/// # Response
/// - **201 Created**: the stored customer
/// - **400 Bad Request**: body is not a customer
pub async fn create_customer(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body = read_request_body_with_timeout(req, state.config.request_timeout_ms).await?;
    let customer: Customer = serde_json::from_slice(&body)
        .map_err(|e| RouterError::BadRequest(format!("Failed to parse customer: {}", e)))?;

    let stored = state
        .service
        .save(customer)
        .await_single()
        .await?
        .ok_or_else(|| RouterError::InternalError("Save completed without a customer".to_string()))?;

    json_response(201, &stored)
}

/// Lists every customer.
///
/// # Endpoint
/// `GET /customer`
pub async fn list_customers(state: AppState) -> Result<Response<Bytes>, RouterError> {
    let customers = state.service.find_all().collect_all().await?;
    json_response(200, &customers)
}

/// Deletes every customer.
///
/// # Endpoint
/// `DELETE /customer`
pub async fn delete_customers(state: AppState) -> Result<Response<Bytes>, RouterError> {
    state.service.delete_all().await_single().await?;
    build_empty_response(204)
}

async fn read_request_body_with_timeout(
    req: Request<hyper::body::Incoming>,
    timeout_ms: u64,
) -> Result<Bytes, RouterError> {
    let timeout_duration = time::Duration::from_millis(timeout_ms);
    let body = time::timeout(timeout_duration, req.collect())
        .await
        .map_err(|_| RouterError::Timeout)?
        .map_err(|e| RouterError::InternalError(format!("Failed to read request body: {}", e)))?;
    Ok(body.to_bytes())
}
