//! The WebDAV HTTP service implementing hyper's `Service` trait.
//!
//! [`WebDavService`] runs every request through one pipeline:
//!
//! 1. Health check interception (`GET {prefix}/_health`)
//! 2. Authentication, except for `OPTIONS` so clients can discover DAV
//! 3. Read-only enforcement for mutating methods
//! 4. Dispatch to dav-server with the in-memory lock system

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use dav_server::body::Body;
use dav_server::memls::MemLs;
use dav_server::{DavConfig, DavHandler};
use http::{Method, Response, StatusCode, header};
use hyper::service::Service;
use storegate_core::{Context, Storage};
use tracing::{debug, warn};

use crate::auth::{WebDavAuth, challenge};
use crate::config::WebDavConfig;
use crate::fs::StoreFs;

/// Methods rejected up front in read-only mode.
const MUTATING_METHODS: &[&str] = &["PUT", "PATCH", "DELETE", "MKCOL", "COPY", "MOVE", "PROPPATCH"];

/// Hyper service serving WebDAV over a [`Storage`].
#[derive(Clone)]
pub struct WebDavService {
    dav: DavHandler,
    auth: WebDavAuth,
    config: Arc<WebDavConfig>,
    health_path: String,
}

impl fmt::Debug for WebDavService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavService")
            .field("auth", &self.auth)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WebDavService {
    /// Build a service over `storage`. Backend calls run under a background
    /// context.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, config: WebDavConfig) -> Self {
        Self::with_context(storage, config, Context::background())
    }

    /// Build a service whose backend calls are cancelled with `ctx`.
    #[must_use]
    pub fn with_context(storage: Arc<dyn Storage>, config: WebDavConfig, ctx: Context) -> Self {
        let prefix = config.normalized_prefix();
        let fs = StoreFs::new(storage, &config, ctx);

        let mut builder = DavHandler::builder()
            .filesystem(Box::new(fs))
            .locksystem(MemLs::new());
        if !prefix.is_empty() {
            builder = builder.strip_prefix(prefix.clone());
        }

        Self {
            dav: builder.build_handler(),
            auth: WebDavAuth::from_config(&config),
            health_path: format!("{prefix}/_health"),
            config: Arc::new(config),
        }
    }

    /// The configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &WebDavConfig {
        &self.config
    }

    /// Process one request.
    pub async fn handle<B>(&self, req: http::Request<B>) -> Response<Body>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        if method == Method::GET && path == self.health_path {
            return health_check_response();
        }

        let principal = if method == Method::OPTIONS {
            None
        } else {
            match self.auth.authorize(req.headers()) {
                Some(principal) => Some(principal).filter(|p| !p.is_empty()),
                None => {
                    warn!(method = %method, path = %path, "webdav request rejected: bad credentials");
                    return challenge();
                }
            }
        };

        if self.config.read_only && MUTATING_METHODS.contains(&method.as_str()) {
            debug!(method = %method, path = %path, "webdav write rejected: read-only");
            return status_response(StatusCode::FORBIDDEN, "read-only\n");
        }

        let resp = match principal {
            Some(user) => {
                self.dav
                    .handle_with(DavConfig::new().principal(user), req)
                    .await
            }
            None => self.dav.handle(req).await,
        };
        debug!(method = %method, path = %path, status = resp.status().as_u16(), "webdav request");
        resp
    }
}

impl<B> Service<http::Request<B>> for WebDavService
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

fn status_response(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::from(text));
    *resp.status_mut() = status;
    resp
}

fn health_check_response() -> Response<Body> {
    let mut resp = status_response(StatusCode::OK, r#"{"status":"running","service":"webdav"}"#);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    resp
}
