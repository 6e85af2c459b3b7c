//! Object reads and writes over S3.

#[cfg(test)]
mod tests {
    use aws_sdk_s3::primitives::ByteStream;
    use bytes::Bytes;

    use crate::{cleanup_bucket, create_test_bucket, get_bytes, put_text, s3_client};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_round_trip_object_with_content_type() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "obj").await;

        client
            .put_object()
            .bucket(&bucket)
            .key("notes/today.md")
            .body(ByteStream::from_static(b"# storegate"))
            .content_type("text/markdown")
            .send()
            .await
            .unwrap_or_else(|e| panic!("put_object: {e}"));

        let resp = client
            .get_object()
            .bucket(&bucket)
            .key("notes/today.md")
            .send()
            .await
            .unwrap_or_else(|e| panic!("get_object: {e}"));
        assert_eq!(resp.content_type(), Some("text/markdown"));
        assert_eq!(resp.content_length(), Some(11));
        assert!(resp.e_tag().is_some());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_keep_user_metadata() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "meta").await;

        client
            .put_object()
            .bucket(&bucket)
            .key("tagged.bin")
            .body(ByteStream::from_static(b"data"))
            .metadata("owner", "ops")
            .send()
            .await
            .unwrap_or_else(|e| panic!("put_object: {e}"));

        let head = client
            .head_object()
            .bucket(&bucket)
            .key("tagged.bin")
            .send()
            .await
            .unwrap_or_else(|e| panic!("head_object: {e}"));
        assert_eq!(head.content_length(), Some(4));
        assert_eq!(
            head.metadata().and_then(|m| m.get("owner")).map(String::as_str),
            Some("ops")
        );

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_serve_byte_ranges() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "range").await;
        put_text(&client, &bucket, "digits.txt", "0123456789").await;

        let resp = client
            .get_object()
            .bucket(&bucket)
            .key("digits.txt")
            .range("bytes=2-5")
            .send()
            .await
            .unwrap_or_else(|e| panic!("ranged get: {e}"));
        assert_eq!(resp.content_length(), Some(4));
        assert_eq!(resp.content_range(), Some("bytes 2-5/10"));
        let data = resp
            .body
            .collect()
            .await
            .unwrap_or_else(|e| panic!("collect: {e}"))
            .into_bytes();
        assert_eq!(data.as_ref(), b"2345");

        let suffix = client
            .get_object()
            .bucket(&bucket)
            .key("digits.txt")
            .range("bytes=-3")
            .send()
            .await
            .unwrap_or_else(|e| panic!("suffix get: {e}"))
            .body
            .collect()
            .await
            .unwrap_or_else(|e| panic!("collect: {e}"))
            .into_bytes();
        assert_eq!(suffix.as_ref(), b"789");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_copy_between_buckets() {
        let client = s3_client();
        let src = create_test_bucket(&client, "csrc").await;
        let dst = create_test_bucket(&client, "cdst").await;
        put_text(&client, &src, "origin.txt", "copied bytes").await;

        client
            .copy_object()
            .bucket(&dst)
            .key("copy.txt")
            .copy_source(format!("{src}/origin.txt"))
            .send()
            .await
            .unwrap_or_else(|e| panic!("copy_object: {e}"));

        assert_eq!(get_bytes(&client, &dst, "copy.txt").await.as_ref(), b"copied bytes");
        assert_eq!(get_bytes(&client, &src, "origin.txt").await.as_ref(), b"copied bytes");

        cleanup_bucket(&client, &src).await;
        cleanup_bucket(&client, &dst).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_overwrite_and_delete() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "ovr").await;
        put_text(&client, &bucket, "file.txt", "first").await;
        put_text(&client, &bucket, "file.txt", "second").await;
        assert_eq!(get_bytes(&client, &bucket, "file.txt").await.as_ref(), b"second");

        client
            .delete_object()
            .bucket(&bucket)
            .key("file.txt")
            .send()
            .await
            .unwrap_or_else(|e| panic!("delete_object: {e}"));
        // Deleting again is still a success.
        client
            .delete_object()
            .bucket(&bucket)
            .key("file.txt")
            .send()
            .await
            .unwrap_or_else(|e| panic!("second delete_object: {e}"));

        let gone = client.get_object().bucket(&bucket).key("file.txt").send().await;
        assert!(gone.is_err());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_store_objects_larger_than_one_chunk() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "large").await;

        let data = Bytes::from(vec![0x5Au8; 3 * 1024 * 1024]);
        client
            .put_object()
            .bucket(&bucket)
            .key("large.bin")
            .body(ByteStream::from(data.clone()))
            .send()
            .await
            .unwrap_or_else(|e| panic!("put large object: {e}"));

        let got = get_bytes(&client, &bucket, "large.bin").await;
        assert_eq!(got.len(), data.len());
        assert!(got.iter().all(|&b| b == 0x5A));

        cleanup_bucket(&client, &bucket).await;
    }
}
