//! End-to-end tests for a running storegate server.
//!
//! Every transport serves the same backend, so several tests write through
//! one protocol and read through another. They are marked `#[ignore]`; start
//! a server first:
//!
//! ```text
//! STOREGATE_DSN=mem:// storegate-server &
//! cargo test -p storegate-integration -- --ignored
//! ```
//!
//! `S3_ENDPOINT_URL` (default `http://localhost:9000`) and
//! `WEBDAV_ENDPOINT_URL` (default `http://localhost:8080`) point the tests
//! elsewhere. `ACCESS_KEY` / `SECRET_KEY` are used for signing when set.

use std::sync::Once;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

/// An S3 client for the gateway, path-style.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new(
        env_or("ACCESS_KEY", "test"),
        env_or("SECRET_KEY", "test"),
        None,
        None,
        "storegate-integration",
    );

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(env_or("S3_ENDPOINT_URL", "http://localhost:9000"))
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// Absolute WebDAV URL for `path` (which starts with `/`).
#[must_use]
pub fn webdav_url(path: &str) -> String {
    let base = env_or("WEBDAV_ENDPOINT_URL", "http://localhost:8080");
    format!("{}{path}", base.trim_end_matches('/'))
}

/// An HTTP client for WebDAV requests.
#[must_use]
pub fn http_client() -> reqwest::Client {
    init_tracing();
    reqwest::Client::new()
}

/// A WebDAV extension method such as `PROPFIND` or `MKCOL`.
#[must_use]
pub fn dav_method(name: &str) -> reqwest::Method {
    reqwest::Method::from_bytes(name.as_bytes())
        .unwrap_or_else(|e| panic!("invalid method {name}: {e}"))
}

/// A fresh bucket name for one test.
#[must_use]
pub fn unique_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("it-{prefix}-{}", &id[..8])
}

/// Create a bucket and return its name.
pub async fn create_test_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = unique_bucket_name(prefix);
    client
        .create_bucket()
        .bucket(&name)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Store `body` at `bucket/key` through S3.
pub async fn put_text(client: &aws_sdk_s3::Client, bucket: &str, key: &str, body: &'static str) {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from_static(body.as_bytes()))
        .send()
        .await
        .unwrap_or_else(|e| panic!("put {bucket}/{key}: {e}"));
}

/// Read `bucket/key` through S3.
pub async fn get_bytes(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> bytes::Bytes {
    client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .unwrap_or_else(|e| panic!("get {bucket}/{key}: {e}"))
        .body
        .collect()
        .await
        .unwrap_or_else(|e| panic!("read body of {bucket}/{key}: {e}"))
        .into_bytes()
}

/// Delete every object and pending upload in `bucket`, then the bucket.
pub async fn cleanup_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    let mut continuation_token = None;
    loop {
        let mut req = client.list_objects_v2().bucket(bucket);
        if let Some(token) = continuation_token.take() {
            req = req.continuation_token(token);
        }
        let Ok(resp) = req.send().await else {
            return;
        };

        for key in resp.contents().iter().filter_map(|o| o.key()) {
            let _ = client.delete_object().bucket(bucket).key(key).send().await;
        }

        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
        } else {
            break;
        }
    }

    if let Ok(uploads) = client.list_multipart_uploads().bucket(bucket).send().await {
        for upload in uploads.uploads() {
            if let (Some(key), Some(id)) = (upload.key(), upload.upload_id()) {
                let _ = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(id)
                    .send()
                    .await;
            }
        }
    }

    let _ = client.delete_bucket().bucket(bucket).send().await;
}

mod test_bucket;
mod test_error;
mod test_list;
mod test_multipart;
mod test_object;
mod test_webdav;
