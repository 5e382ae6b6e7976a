//! Endpoint implementations.

use http_body_util::BodyExt;
use hyper::{body::Bytes, Request, Response};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tokio::time;

use crate::error::StoreError;
use crate::response::envelope_response;
use crate::router::{AppState, RouterError};

type MatchitParams<'a, 'b> = matchit::Params<'a, 'b>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub collections: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

/// Liveness check, used as the readiness probe.
///
/// # Endpoint
/// `GET /health`
pub async fn health(state: AppState) -> Result<Response<Bytes>, RouterError> {
    envelope_response(
        200,
        HealthResponse {
            status: "ok",
            collections: state.store.collection_names().len(),
        },
    )
}

/// # Endpoint
/// `GET /collections`
pub async fn list_collections(state: AppState) -> Result<Response<Bytes>, RouterError> {
    envelope_response(200, state.store.collection_names())
}

/// Inserts or replaces a document by id.
///
/// # Endpoint
/// `POST /collections/{name}/documents`
///
/// # Response
/// - **201 Created**: the stored document, with its id
/// - **400 Bad Request**: body is not a JSON object or its id is unusable
pub async fn insert_document(
    req: Request<hyper::body::Incoming>,
    params: MatchitParams<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let collection = collection_param(&params)?;
    let body = read_request_body_with_timeout(req, state.config.request_timeout_ms).await?;
    let document: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| RouterError::BadRequest(format!("Failed to parse document: {}", e)))?;

    let stored = state
        .store
        .upsert(&collection, document)
        .map_err(map_store_error)?;
    envelope_response(201, stored)
}

/// Returns every document of the collection in insertion order.
///
/// # Endpoint
/// `GET /collections/{name}/documents`
pub async fn scan_documents(
    params: MatchitParams<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let collection = collection_param(&params)?;
    let documents = state.store.scan(&collection);
    envelope_response(200, documents.as_slice())
}

/// # Endpoint
/// `DELETE /collections/{name}/documents`
pub async fn delete_documents(
    params: MatchitParams<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let collection = collection_param(&params)?;
    let deleted = state
        .store
        .delete_all(&collection)
        .map_err(map_store_error)?;
    envelope_response(200, DeleteResponse { deleted })
}

fn collection_param(params: &MatchitParams<'_, '_>) -> Result<String, RouterError> {
    let raw = params
        .get("name")
        .ok_or_else(|| RouterError::BadRequest("Missing collection name".to_string()))?;
    let name = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| RouterError::BadRequest(format!("Invalid collection name: {}", e)))?;
    if name.is_empty() {
        return Err(RouterError::BadRequest("Empty collection name".to_string()));
    }
    Ok(name.into_owned())
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

fn map_store_error(e: StoreError) -> RouterError {
    match e {
        StoreError::InvalidDocument(_) => RouterError::BadRequest(e.to_string()),
        _ => RouterError::InternalError(format!("Store error: {}", e)),
    }
}
