//! WebDAV requests cross-checked against the S3 view of the same backend.

#[cfg(test)]
mod tests {
    use reqwest::{Method, StatusCode};

    use crate::{
        cleanup_bucket, create_test_bucket, dav_method, get_bytes, http_client, put_text,
        s3_client, unique_bucket_name, webdav_url,
    };

    /// A request with Basic credentials from `WEBDAV_USER` / `WEBDAV_PASSWORD` when set.
    fn dav(client: &reqwest::Client, method: Method, path: &str) -> reqwest::RequestBuilder {
        let req = client.request(method, webdav_url(path));
        match std::env::var("WEBDAV_USER") {
            Ok(user) if !user.is_empty() => {
                req.basic_auth(user, std::env::var("WEBDAV_PASSWORD").ok())
            }
            _ => req,
        }
    }

    async fn send(req: reqwest::RequestBuilder) -> reqwest::Response {
        req.send()
            .await
            .unwrap_or_else(|e| panic!("webdav request failed: {e}"))
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_advertise_dav_compliance() {
        let http = http_client();
        let resp = send(dav(&http, Method::OPTIONS, "/")).await;
        assert!(resp.status().is_success(), "{}", resp.status());
        assert!(resp.headers().contains_key("dav"));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_create_bucket_with_mkcol() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = unique_bucket_name("dav");

        let resp = send(dav(&http, dav_method("MKCOL"), &format!("/{bucket}/"))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        s3.head_bucket()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("bucket created over WebDAV is not visible over S3: {e}"));

        cleanup_bucket(&s3, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_expose_webdav_uploads_over_s3() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = create_test_bucket(&s3, "davput").await;

        let resp = send(
            dav(&http, Method::PUT, &format!("/{bucket}/docs/plan.txt")).body("ship it"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        assert_eq!(get_bytes(&s3, &bucket, "docs/plan.txt").await.as_ref(), b"ship it");
        let head = s3
            .head_object()
            .bucket(&bucket)
            .key("docs/plan.txt")
            .send()
            .await
            .unwrap_or_else(|e| panic!("head_object: {e}"));
        assert_eq!(head.content_type(), Some("text/plain"));

        let fetched = send(dav(&http, Method::GET, &format!("/{bucket}/docs/plan.txt"))).await;
        assert_eq!(fetched.status(), StatusCode::OK);
        let body = fetched
            .text()
            .await
            .unwrap_or_else(|e| panic!("read body: {e}"));
        assert_eq!(body, "ship it");

        cleanup_bucket(&s3, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_s3_objects_with_propfind() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = create_test_bucket(&s3, "davls").await;
        put_text(&s3, &bucket, "top.txt", "top").await;
        put_text(&s3, &bucket, "nested/inner.txt", "inner").await;

        let resp = send(
            dav(&http, dav_method("PROPFIND"), &format!("/{bucket}/")).header("Depth", "1"),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 207);
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| panic!("read multistatus: {e}"));
        assert!(body.contains("top.txt"), "{body}");
        assert!(body.contains("nested/"), "{body}");
        assert!(!body.contains("inner.txt"), "depth 1 must not descend: {body}");

        cleanup_bucket(&s3, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_move_object_within_bucket() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = create_test_bucket(&s3, "davmv").await;
        put_text(&s3, &bucket, "draft.txt", "final words").await;

        let resp = send(
            dav(&http, dav_method("MOVE"), &format!("/{bucket}/draft.txt"))
                .header("Destination", webdav_url(&format!("/{bucket}/final.txt"))),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        assert_eq!(get_bytes(&s3, &bucket, "final.txt").await.as_ref(), b"final words");
        let old = s3.head_object().bucket(&bucket).key("draft.txt").send().await;
        assert!(old.is_err(), "source must be gone after MOVE");

        cleanup_bucket(&s3, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_delete_virtual_directory_recursively() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = create_test_bucket(&s3, "davrm").await;
        put_text(&s3, &bucket, "tmp/a.txt", "a").await;
        put_text(&s3, &bucket, "tmp/deep/b.txt", "b").await;
        put_text(&s3, &bucket, "keep.txt", "keep").await;

        let resp = send(dav(&http, Method::DELETE, &format!("/{bucket}/tmp/"))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let listed = s3
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_objects_v2: {e}"));
        let keys: Vec<&str> = listed.contents().iter().filter_map(|o| o.key()).collect();
        assert_eq!(keys, vec!["keep.txt"]);

        cleanup_bucket(&s3, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_answer_missing_resource_with_not_found() {
        let http = http_client();
        let s3 = s3_client();
        let bucket = create_test_bucket(&s3, "dav404").await;

        let resp = send(dav(&http, Method::GET, &format!("/{bucket}/absent.txt"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        cleanup_bucket(&s3, &bucket).await;
    }
}
