//! Matchit routing configuration.

use std::sync::Arc;

use hyper::header::AUTHORIZATION;
use hyper::{body::Bytes, Method, Request, Response};
use matchit::Router as MatchitRouter;

use crate::config::StoreConfig;
use crate::handlers;
use crate::response::error_response;
use crate::store::DocumentStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub config: Arc<StoreConfig>,
}

/// HTTP request router.
pub struct Router {
    inner: MatchitRouter<RouteHandler>,
    state: AppState,
    authorization: Option<String>,
}

impl Router {
    pub fn new(store: Arc<DocumentStore>, config: StoreConfig) -> Self {
        let mut router = MatchitRouter::new();

        router
            .insert("/health", RouteHandler::Health)
            .expect("Failed to insert /health route");
        router
            .insert("/collections", RouteHandler::Collections)
            .expect("Failed to insert /collections route");
        router
            .insert("/collections/{name}/documents", RouteHandler::Documents)
            .expect("Failed to insert /collections/{name}/documents route");

        Self {
            inner: router,
            authorization: config.authorization(),
            state: AppState {
                store,
                config: Arc::new(config),
            },
        }
    }

    /// Routes an incoming request to the appropriate handler.
    pub async fn route(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Bytes>, RouterError> {
        let path = req.uri().path().to_string();

        match self.inner.at(&path) {
            Ok(matched) => {
                let handler = matched.value;
                if handler.requires_auth() {
                    self.authorize(&req)?;
                }
                handler
                    .handle(req, matched.params, self.state.clone())
                    .await
            }
            Err(_) => Err(RouterError::NotFound(format!("No route found for {}", path))),
        }
    }

    fn authorize(&self, req: &Request<hyper::body::Incoming>) -> Result<(), RouterError> {
        let Some(expected) = &self.authorization else {
            return Ok(());
        };
        let presented = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(RouterError::Unauthorized)
        }
    }
}

/// Route handler function.
enum RouteHandler {
    Health,
    Collections,
    Documents,
}

impl RouteHandler {
    fn requires_auth(&self) -> bool {
        !matches!(self, RouteHandler::Health)
    }

    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
        params: matchit::Params<'_, '_>,
        state: AppState,
    ) -> Result<Response<Bytes>, RouterError> {
        match self {
            RouteHandler::Health => {
                if req.method() == Method::GET {
                    handlers::health(state).await
                } else {
                    Err(RouterError::MethodNotAllowed)
                }
            }
            RouteHandler::Collections => {
                if req.method() == Method::GET {
                    handlers::list_collections(state).await
                } else {
                    Err(RouterError::MethodNotAllowed)
                }
            }
            RouteHandler::Documents => {
                if req.method() == Method::POST {
                    handlers::insert_document(req, params, state).await
                } else if req.method() == Method::GET {
                    handlers::scan_documents(params, state).await
                } else if req.method() == Method::DELETE {
                    handlers::delete_documents(params, state).await
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
    Unauthorized,
    InternalError(String),
    Timeout,
    BadRequest(String),
    NotFound(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::MethodNotAllowed => write!(f, "Method Not Allowed"),
            RouterError::Unauthorized => write!(f, "Unauthorized"),
            RouterError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
            RouterError::Timeout => write!(f, "Request Timeout"),
            RouterError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            RouterError::NotFound(msg) => write!(f, "Not Found: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<RouterError> for Response<Bytes> {
    fn from(err: RouterError) -> Self {
        let (status, message, details) = match &err {
            RouterError::MethodNotAllowed => (405, "Method Not Allowed", None),
            RouterError::Unauthorized => (401, "Unauthorized", Some("bad credentials")),
            RouterError::InternalError(msg) => (500, msg.as_str(), None),
            RouterError::Timeout => (408, "Request Timeout", None),
            RouterError::BadRequest(msg) => (400, msg.as_str(), None),
            RouterError::NotFound(msg) => (404, msg.as_str(), None),
        };

        let error_response =
            error_response(status, message.to_string(), details.map(str::to_string));
        let body = serde_json::to_vec(&error_response)
            .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":{{\"code\":\"500\",\"message\":\"Failed to serialize error: {}\"}}}}", e).into_bytes());

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() =
            hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        if status == 401 {
            response.headers_mut().insert(
                hyper::header::WWW_AUTHENTICATE,
                hyper::header::HeaderValue::from_static("Basic realm=\"docstore\""),
            );
        }
        response
    }
}
