//! S3 error codes for missing resources and bad requests.

#[cfg(test)]
mod tests {
    use aws_sdk_s3::error::ProvideErrorMetadata;
    use aws_sdk_s3::primitives::ByteStream;

    use crate::{cleanup_bucket, create_test_bucket, s3_client, unique_bucket_name};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_no_such_key() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "nokey").await;

        let err = client
            .get_object()
            .bucket(&bucket)
            .key("missing.txt")
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("get of a missing key should fail"))
            .into_service_error();
        assert!(err.is_no_such_key(), "{err:?}");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_no_such_bucket() {
        let client = s3_client();
        let bucket = unique_bucket_name("ghost");

        let put = client
            .put_object()
            .bucket(&bucket)
            .key("file.txt")
            .body(ByteStream::from_static(b"data"))
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("put into a missing bucket should fail"));
        assert_eq!(put.code(), Some("NoSuchBucket"));

        let list = client
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("list of a missing bucket should fail"))
            .into_service_error();
        assert!(list.is_no_such_bucket(), "{list:?}");
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_bucket_not_empty() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "busy").await;
        crate::put_text(&client, &bucket, "blocker.txt", "still here").await;

        let err = client
            .delete_bucket()
            .bucket(&bucket)
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("delete of a non-empty bucket should fail"));
        assert_eq!(err.code(), Some("BucketNotEmpty"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_no_such_upload() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "noupload").await;

        let err = client
            .upload_part()
            .bucket(&bucket)
            .key("file.bin")
            .upload_id("not-an-upload")
            .part_number(1)
            .body(ByteStream::from_static(b"part"))
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("upload to an unknown upload id should fail"));
        assert_eq!(err.code(), Some("NoSuchUpload"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_invalid_copy_source() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "badcopy").await;

        let err = client
            .copy_object()
            .bucket(&bucket)
            .key("dst.txt")
            .copy_source(format!("{bucket}/absent.txt"))
            .send()
            .await
            .err()
            .unwrap_or_else(|| panic!("copy of a missing source should fail"));
        assert_eq!(err.code(), Some("NoSuchKey"));

        cleanup_bucket(&client, &bucket).await;
    }
}
