//! Document store wire client.
//!
//! Speaks the store's HTTP protocol:
//!
//! | Operation  | Request                                   | Success             |
//! |------------|-------------------------------------------|---------------------|
//! | health     | `GET /health`                             | 200                 |
//! | insert     | `POST /collections/{name}/documents`      | 201, stored document |
//! | scan       | `GET /collections/{name}/documents`       | 200, document array |
//! | delete all | `DELETE /collections/{name}/documents`    | 200, deleted count  |
//!
//! Bodies use the `{"success": true, "data": ...}` envelope. Every request
//! is bound to the endpoint generation the client was built for.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use harness_core::{Error, Result};
use harness_env::ConnectionEndpoint;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    message: String,
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Deleted {
    deleted: u64,
}

/// Client for one generation of a store endpoint.
#[derive(Clone)]
pub struct DocStoreClient {
    endpoint: ConnectionEndpoint,
    http: Client<HttpConnector, Full<Bytes>>,
    authorization: Option<String>,
    request_timeout: Duration,
}

impl DocStoreClient {
    pub fn new(endpoint: ConnectionEndpoint) -> Self {
        let authorization = endpoint.credentials().map(|c| {
            format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", c.username, c.password))
            )
        });
        Self {
            endpoint,
            http: Client::builder(TokioExecutor::new()).build_http(),
            authorization,
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    pub async fn health(&self) -> Result<()> {
        self.send(Method::GET, "/health", None).await.map(drop)
    }

    /// Inserts or replaces a document by `id`, returning it as stored.
    pub async fn insert<D: Serialize>(&self, collection: &str, document: &D) -> Result<serde_json::Value> {
        let body = serde_json::to_vec(document)
            .map_err(|e| Error::SerializationError(format!("Failed to encode document: {}", e)))?;
        let bytes = self
            .send(Method::POST, &documents_path(collection), Some(body))
            .await?;
        decode_data(&bytes)
    }

    pub async fn find_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let bytes = self
            .send(Method::GET, &documents_path(collection), None)
            .await?;
        decode_data(&bytes)
    }

    /// Removes every document of the collection, returning how many were removed.
    pub async fn delete_all(&self, collection: &str) -> Result<u64> {
        let bytes = self
            .send(Method::DELETE, &documents_path(collection), None)
            .await?;
        decode_data::<Deleted>(&bytes).map(|d| d.deleted)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Bytes> {
        self.endpoint.ensure_current()?;

        let uri = format!("{}{}", self.endpoint.base_url(), path);
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| Error::Transport(format!("Failed to build request: {}", e)))?;

        let exchange = async {
            let response = self
                .http
                .request(request)
                .await
                .map_err(|e| Error::Transport(format!("{} {} failed: {}", method, uri, e)))?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?
                .to_bytes();
            Ok::<_, Error>((status, bytes))
        };

        let outcome = tokio::select! {
            biased;
            _ = self.endpoint.invalidated() => return Err(self.stale()),
            outcome = tokio::time::timeout(self.request_timeout, exchange) => outcome,
        };

        let (status, bytes) = match outcome {
            Ok(Ok(response)) => response,
            // the old store is gone once its endpoint is superseded
            Ok(Err(_)) if self.endpoint.is_stale() => return Err(self.stale()),
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::Transport(format!(
                    "{} {} timed out after {:?}",
                    method, uri, self.request_timeout
                )))
            }
        };

        tracing::trace!(%method, %uri, status = status.as_u16(), "Store request finished");
        if status.is_success() {
            Ok(bytes)
        } else {
            Err(store_error(status, &bytes))
        }
    }

    fn stale(&self) -> Error {
        Error::StaleEndpoint {
            endpoint: self.endpoint.to_string(),
            generation: self.endpoint.generation(),
            current: self.endpoint.current_generation(),
        }
    }
}

impl std::fmt::Debug for DocStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStoreClient")
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn documents_path(collection: &str) -> String {
    format!(
        "/collections/{}/documents",
        utf8_percent_encode(collection, NON_ALPHANUMERIC)
    )
}

fn decode_data<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_slice(bytes)
        .map_err(|e| Error::SerializationError(format!("Failed to decode store response: {}", e)))?;
    match envelope {
        Envelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope { error, .. } => Err(Error::Store {
            status: 200,
            message: error
                .map(|e| e.message)
                .unwrap_or_else(|| "Store response carried no data".to_string()),
        }),
    }
}

fn store_error(status: StatusCode, bytes: &[u8]) -> Error {
    let message = match serde_json::from_slice::<Envelope<serde_json::Value>>(bytes) {
        Ok(Envelope {
            error: Some(error), ..
        }) => match error.details {
            Some(details) => format!("{}: {}", error.message, details),
            None => error.message,
        },
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    Error::Store {
        status: status.as_u16(),
        message,
    }
}
