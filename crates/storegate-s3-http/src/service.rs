//! The S3 HTTP service implementing hyper's `Service` trait.
//!
//! [`S3HttpService`] runs every request through one pipeline:
//!
//! 1. Health check interception (`GET /_health`)
//! 2. S3 request routing via [`S3Router`]
//! 3. Read-only enforcement for mutating operations
//! 4. Body collection, bounded by the configured object size
//! 5. `x-amz-content-sha256` validation
//! 6. SigV4 authentication when credentials are configured
//! 7. `aws-chunked` decoding, see [`crate::codec`]
//! 8. Dispatch to the [`S3Handler`]
//! 9. Common response headers (`x-amz-request-id`, `x-amz-id-2`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::service::Service;
use sha2::{Digest, Sha256};
use storegate_core::utils::generate_request_id;
use storegate_core::{Context, Storage};
use storegate_s3_auth::{SigV4Verifier, StaticCredentialProvider, hash_payload};
use tracing::{debug, info, warn};

use crate::body::S3ResponseBody;
use crate::codec;
use crate::config::S3Config;
use crate::error::{S3Error, S3ErrorCode};
use crate::handlers::S3Handler;
use crate::request::{content_length, header_str};
use crate::response::{S3Response, error_to_response, set_header, with_status};
use crate::router::{RoutingContext, S3Router};

const SERVER_NAME: &str = "storegate";

/// Payload placeholders that carry no digest to check.
const UNVERIFIABLE_PAYLOADS: &[&str] = &[
    "UNSIGNED-PAYLOAD",
    "STREAMING-AWS4-HMAC-SHA256-PAYLOAD",
    "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER",
    "STREAMING-UNSIGNED-PAYLOAD-TRAILER",
];

/// Hyper service serving the S3 REST API over a [`Storage`].
#[derive(Debug, Clone)]
pub struct S3HttpService {
    handler: Arc<S3Handler>,
    router: S3Router,
    config: Arc<S3Config>,
    verifier: Option<SigV4Verifier>,
}

impl S3HttpService {
    /// Build a service. Signature checks are enabled only when `config`
    /// carries both an access key and a secret key.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, config: S3Config) -> Self {
        let config = Arc::new(config);
        let verifier = config
            .credentials()
            .map(|(ak, sk)| SigV4Verifier::new(StaticCredentialProvider::single(ak, sk)));
        Self {
            handler: Arc::new(S3Handler::new(storage, Arc::clone(&config))),
            router: S3Router::new(),
            config,
            verifier,
        }
    }

    /// The configuration this service was built with.
    #[must_use]
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    async fn process<B>(&self, req: http::Request<B>, request_id: &str) -> S3Response
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!(%method, %uri, request_id, "processing S3 request");

        if method == http::Method::GET && uri.path() == "/_health" {
            return health_check_response();
        }

        let route = match self.router.resolve(&req) {
            Ok(route) => route,
            Err(err) => {
                warn!(%method, %uri, error = %err, request_id, "failed to route S3 request");
                return error_to_response(&err, request_id);
            }
        };
        info!(
            operation = %route.operation,
            bucket = ?route.bucket,
            key = ?route.key,
            request_id,
            "routed S3 request"
        );

        match self.execute(req, &route).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!(error = %err, operation = %route.operation, request_id, "S3 operation failed");
                error_to_response(&err, request_id)
            }
        }
    }

    async fn execute<B>(
        &self,
        req: http::Request<B>,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.config.read_only && route.operation.is_write() {
            return Err(S3Error::access_denied("the gateway is read-only"));
        }

        let (mut parts, incoming) = req.into_parts();
        let chunked = codec::is_aws_chunked(&parts.headers);
        let limit = if route.operation.carries_object_data() && self.config.max_object_size > 0 {
            let declared = if chunked {
                codec::decoded_content_length(&parts.headers)
            } else {
                content_length(&parts.headers)
            };
            if let Some(declared) = declared {
                if self.config.exceeds_max_size(declared) {
                    return Err(S3Error::entity_too_large(declared, self.config.max_object_size));
                }
            }
            Some(self.config.max_object_size)
        } else {
            None
        };
        let raw_limit = if chunked {
            limit.map(codec::framed_limit)
        } else {
            limit
        };
        let body = collect_body(incoming, raw_limit).await?;

        validate_content_sha256(&parts, &body)?;

        if let Some(verifier) = &self.verifier {
            let payload_hash = header_str(&parts.headers, "x-amz-content-sha256")
                .map_or_else(|| hash_payload(&body), str::to_owned);
            verifier.verify(&parts, &payload_hash).map_err(|err| {
                warn!(error = %err, "authentication failed");
                let code = if matches!(err, storegate_s3_auth::AuthError::SignatureDoesNotMatch) {
                    S3ErrorCode::SignatureDoesNotMatch
                } else {
                    S3ErrorCode::AccessDenied
                };
                S3Error::with_message(code, err.to_string())
            })?;
        }

        let body = if chunked {
            let payload = codec::decode_request(&mut parts.headers, &body)?;
            let size = payload.len() as u64;
            if limit.is_some() && self.config.exceeds_max_size(size) {
                return Err(S3Error::entity_too_large(size, self.config.max_object_size));
            }
            payload
        } else {
            body
        };

        self.handler
            .dispatch(&Context::background(), &parts, body, route)
            .await
    }
}

impl<B> Service<http::Request<B>> for S3HttpService
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = S3Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let request_id = generate_request_id();
            let response = service.process(req, &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

/// Collect the body, failing with `EntityTooLarge` past `limit` bytes.
async fn collect_body<B>(body: B, limit: Option<u64>) -> Result<Bytes, S3Error>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let cap = limit.map_or(usize::MAX, |max| usize::try_from(max).unwrap_or(usize::MAX));
    match Limited::new(body, cap).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(S3Error::with_message(
            S3ErrorCode::EntityTooLarge,
            format!("request body exceeds the maximum of {cap} bytes"),
        )),
        Err(err) => Err(S3Error::internal_error(format!(
            "failed to read request body: {err}"
        ))),
    }
}

/// Check a concrete `x-amz-content-sha256` digest against the body.
fn validate_content_sha256(parts: &http::request::Parts, body: &[u8]) -> Result<(), S3Error> {
    let Some(value) = parts.headers.get("x-amz-content-sha256") else {
        return Ok(());
    };
    let claimed = value.to_str().map_err(|_| {
        S3Error::with_message(
            S3ErrorCode::XAmzContentSHA256Mismatch,
            "Invalid X-Amz-Content-Sha256 header encoding",
        )
    })?;
    if UNVERIFIABLE_PAYLOADS.contains(&claimed) {
        return Ok(());
    }
    if claimed.len() != 64 || !claimed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(S3Error::with_message(
            S3ErrorCode::XAmzContentSHA256Mismatch,
            format!("The provided 'x-amz-content-sha256' header is not valid: {claimed}"),
        ));
    }
    if !hex::encode(Sha256::digest(body)).eq_ignore_ascii_case(claimed) {
        return Err(S3Error::with_message(
            S3ErrorCode::XAmzContentSHA256Mismatch,
            "The provided 'x-amz-content-sha256' header does not match what was computed",
        ));
    }
    Ok(())
}

fn health_check_response() -> S3Response {
    let mut resp = with_status(
        StatusCode::OK,
        S3ResponseBody::from_string(r#"{"status":"running","service":"s3"}"#),
    );
    set_header(&mut resp, "content-type", "application/json");
    resp
}

fn add_common_headers(mut response: S3Response, request_id: &str) -> S3Response {
    set_header(&mut response, "x-amz-request-id", request_id);
    set_header(&mut response, "x-amz-id-2", request_id);
    set_header(&mut response, "server", SERVER_NAME);
    response
}
