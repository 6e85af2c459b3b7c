//! Signature verification failures.

/// Errors raised while verifying a SigV4-signed request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header.
    #[error("missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header could not be parsed.
    #[error("invalid Authorization header format")]
    InvalidAuthHeader,

    /// Only `AWS4-HMAC-SHA256` is accepted.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A header named in `SignedHeaders` is absent or not valid UTF-8.
    #[error("missing required header: {0}")]
    MissingHeader(String),

    /// The credential scope is not `AKID/date/region/service/aws4_request`.
    #[error("invalid credential format")]
    InvalidCredential,

    /// The access key id is unknown.
    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    /// The computed signature differs from the provided one.
    #[error("signature does not match")]
    SignatureDoesNotMatch,

    /// `x-amz-date` is malformed or too far from the server clock.
    #[error("request time too skewed: {0}")]
    RequestTimeTooSkewed(String),
}
