//! Multipart uploads over S3.

#[cfg(test)]
mod tests {
    use aws_sdk_s3::error::ProvideErrorMetadata;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};

    use crate::{cleanup_bucket, create_test_bucket, get_bytes, put_text, s3_client};

    async fn initiate(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> String {
        client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type("application/x-tar")
            .send()
            .await
            .unwrap_or_else(|e| panic!("create_multipart_upload: {e}"))
            .upload_id()
            .unwrap_or_else(|| panic!("upload id missing"))
            .to_owned()
    }

    async fn send_part(
        client: &aws_sdk_s3::Client,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> CompletedPart {
        let etag = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .unwrap_or_else(|e| panic!("upload_part {number}: {e}"))
            .e_tag()
            .map(ToOwned::to_owned);
        CompletedPart::builder()
            .part_number(number)
            .set_e_tag(etag)
            .build()
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_assemble_parts_in_order() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "mpu").await;
        let key = "backup/archive.tar";
        let id = initiate(&client, &bucket, key).await;

        let first = send_part(&client, &bucket, key, &id, 1, vec![b'a'; 2048]).await;
        let second = send_part(&client, &bucket, key, &id, 2, vec![b'b'; 512]).await;

        let done = client
            .complete_multipart_upload()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .parts(first)
                    .parts(second)
                    .build(),
            )
            .send()
            .await
            .unwrap_or_else(|e| panic!("complete_multipart_upload: {e}"));
        assert!(done.e_tag().is_some());

        let data = get_bytes(&client, &bucket, key).await;
        assert_eq!(data.len(), 2560);
        assert!(data[..2048].iter().all(|&b| b == b'a'));
        assert!(data[2048..].iter().all(|&b| b == b'b'));

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("head_object: {e}"));
        assert_eq!(head.content_type(), Some("application/x-tar"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_uploads_and_parts() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "mpulist").await;
        let key = "video.mp4";
        let id = initiate(&client, &bucket, key).await;
        send_part(&client, &bucket, key, &id, 1, vec![1; 100]).await;
        send_part(&client, &bucket, key, &id, 3, vec![3; 300]).await;

        let uploads = client
            .list_multipart_uploads()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_multipart_uploads: {e}"));
        let ids: Vec<&str> = uploads.uploads().iter().filter_map(|u| u.upload_id()).collect();
        assert_eq!(ids, vec![id.as_str()]);

        let parts = client
            .list_parts()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_parts: {e}"));
        let listed: Vec<(Option<i32>, Option<i64>)> = parts
            .parts()
            .iter()
            .map(|p| (p.part_number(), p.size()))
            .collect();
        assert_eq!(listed, vec![(Some(1), Some(100)), (Some(3), Some(300))]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_abort_upload_without_creating_object() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "mpuabort").await;
        let key = "discarded.bin";
        let id = initiate(&client, &bucket, key).await;
        send_part(&client, &bucket, key, &id, 1, vec![0; 64]).await;

        client
            .abort_multipart_upload()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .send()
            .await
            .unwrap_or_else(|e| panic!("abort_multipart_upload: {e}"));

        let head = client.head_object().bucket(&bucket).key(key).send().await;
        assert!(head.is_err(), "aborted upload must not leave an object");

        let uploads = client
            .list_multipart_uploads()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_multipart_uploads: {e}"));
        assert!(uploads.uploads().is_empty());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_copy_object_range_into_part() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "mpucopy").await;
        put_text(&client, &bucket, "source.txt", "0123456789").await;

        let key = "assembled.txt";
        let id = initiate(&client, &bucket, key).await;
        let copied = client
            .upload_part_copy()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .part_number(1)
            .copy_source(format!("{bucket}/source.txt"))
            .copy_source_range("bytes=3-6")
            .send()
            .await
            .unwrap_or_else(|e| panic!("upload_part_copy: {e}"));
        let etag = copied
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(ToOwned::to_owned);

        client
            .complete_multipart_upload()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .parts(CompletedPart::builder().part_number(1).set_e_tag(etag).build())
                    .build(),
            )
            .send()
            .await
            .unwrap_or_else(|e| panic!("complete_multipart_upload: {e}"));

        assert_eq!(get_bytes(&client, &bucket, key).await.as_ref(), b"3456");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_unknown_part_on_complete() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "mpubad").await;
        let key = "partial.bin";
        let id = initiate(&client, &bucket, key).await;
        let first = send_part(&client, &bucket, key, &id, 1, vec![7; 10]).await;

        let err = client
            .complete_multipart_upload()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .parts(first)
                    .parts(CompletedPart::builder().part_number(2).e_tag("\"nope\"").build())
                    .build(),
            )
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("completing with a missing part should fail"));
        assert_eq!(err.code(), Some("InvalidPart"));

        // The upload stays open after a failed completion.
        let parts = client
            .list_parts()
            .bucket(&bucket)
            .key(key)
            .upload_id(&id)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_parts: {e}"));
        assert_eq!(parts.parts().len(), 1);

        cleanup_bucket(&client, &bucket).await;
    }
}
