//! Matchit routing configuration.

use std::sync::Arc;

use harness_core::{Error, ErrorKind};
use hyper::{body::Bytes, Method, Request, Response};
use matchit::Router as MatchitRouter;

use super::handlers;
use super::response::error_response;
use crate::config::ServiceConfig;
use crate::service::CustomerService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: CustomerService,
    pub config: Arc<ServiceConfig>,
}

/// HTTP request router.
pub struct Router {
    inner: MatchitRouter<RouteHandler>,
    state: AppState,
}

impl Router {
    pub fn new(service: CustomerService, config: ServiceConfig) -> Self {
        let mut router = MatchitRouter::new();
        router
            .insert("/customer", RouteHandler::Customer)
            .expect("Failed to insert /customer route");

        Self {
            inner: router,
            state: AppState {
                service,
                config: Arc::new(config),
            },
        }
    }

    /// Routes an incoming request to its handler.
    pub async fn route(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Bytes>, RouterError> {
        let path = req.uri().path().to_string();
        match self.inner.at(&path) {
            Ok(matched) => matched.value.handle(req, self.state.clone()).await,
            Err(_) => Err(RouterError::NotFound(format!("No route found for {}", path))),
        }
    }
}

enum RouteHandler {
    Customer,
}

impl RouteHandler {
    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
        state: AppState,
    ) -> Result<Response<Bytes>, RouterError> {
        match self {
            RouteHandler::Customer => {
                if req.method() == Method::POST {
                    handlers::create_customer(req, state).await
                } else if req.method() == Method::GET {
                    handlers::list_customers(state).await
                } else if req.method() == Method::DELETE {
                    handlers::delete_customers(state).await
                } else {
                    Err(RouterError::MethodNotAllowed)
                }
            }
        }
    }
}

/// Router error type.
#[derive(Debug)]
pub enum RouterError {
    MethodNotAllowed,
    InternalError(String),
    Timeout,
    BadRequest(String),
    NotFound(String),
    /// The store behind the service is unreachable or was replaced
    Unavailable(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::MethodNotAllowed => write!(f, "Method Not Allowed"),
            RouterError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
            RouterError::Timeout => write!(f, "Request Timeout"),
            RouterError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            RouterError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            RouterError::Unavailable(msg) => write!(f, "Service Unavailable: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<Error> for RouterError {
    fn from(err: Error) -> Self {
        match err.kind() {
            ErrorKind::StaleEndpoint | ErrorKind::Transport => RouterError::Unavailable(err.to_string()),
            ErrorKind::Store | ErrorKind::Serialization => {
                RouterError::InternalError(format!("Store error: {}", err))
            }
            _ => RouterError::InternalError(err.to_string()),
        }
    }
}

impl From<RouterError> for Response<Bytes> {
    fn from(err: RouterError) -> Self {
        let (status, message) = match &err {
            RouterError::MethodNotAllowed => (405, "Method Not Allowed"),
            RouterError::InternalError(msg) => (500, msg.as_str()),
            RouterError::Timeout => (408, "Request Timeout"),
            RouterError::BadRequest(msg) => (400, msg.as_str()),
            RouterError::NotFound(msg) => (404, msg.as_str()),
            RouterError::Unavailable(msg) => (503, msg.as_str()),
        };

        let error_response = error_response(status, message.to_string(), None);
        let body = serde_json::to_vec(&error_response)
            .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":{{\"code\":\"500\",\"message\":\"Failed to serialize error: {}\"}}}}", e).into_bytes());

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() =
            hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        response
    }
}
