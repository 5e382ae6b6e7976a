//! Response construction.

use hyper::{body::Bytes, Response};
use serde::Serialize;

use super::router::RouterError;

/// Consistent API error response wrapper
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    pub error: ApiError,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    /// HTTP status code as string
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub fn error_response(code: u16, message: String, details: Option<String>) -> ErrorResponse {
    ErrorResponse {
        success: false,
        error: ApiError {
            code: code.to_string(),
            message,
            details,
        },
    }
}

/// Serializes `value` as the JSON body of a `status` response.
pub fn json_response<T: Serialize>(status: u16, value: &T) -> Result<Response<Bytes>, RouterError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| RouterError::InternalError(format!("Failed to serialize response: {}", e)))?;
    build_response(status, json)
}

pub fn build_response(status: u16, json: Vec<u8>) -> Result<Response<Bytes>, RouterError> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Bytes::from(json))
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}

/// Empty response, for 204 No Content
pub fn build_empty_response(status: u16) -> Result<Response<Bytes>, RouterError> {
    Response::builder()
        .status(status)
        .body(Bytes::new())
        .map_err(|e| RouterError::InternalError(format!("Failed to build response: {}", e)))
}
