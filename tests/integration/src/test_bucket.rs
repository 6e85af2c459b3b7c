//! Bucket lifecycle over S3.

#[cfg(test)]
mod tests {
    use crate::{cleanup_bucket, create_test_bucket, put_text, s3_client, unique_bucket_name};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_create_head_and_delete_bucket() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "life").await;

        client
            .head_bucket()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("head_bucket: {e}"));

        client
            .delete_bucket()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("delete_bucket: {e}"));

        let head = client.head_bucket().bucket(&bucket).send().await;
        assert!(head.is_err(), "bucket should be gone");
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_created_buckets() {
        let client = s3_client();
        let first = create_test_bucket(&client, "lsa").await;
        let second = create_test_bucket(&client, "lsb").await;

        let resp = client
            .list_buckets()
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_buckets: {e}"));
        let names: Vec<&str> = resp.buckets().iter().filter_map(|b| b.name()).collect();
        assert!(names.contains(&first.as_str()), "missing {first} in {names:?}");
        assert!(names.contains(&second.as_str()), "missing {second} in {names:?}");

        cleanup_bucket(&client, &first).await;
        cleanup_bucket(&client, &second).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_default_region_as_empty_location() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "loc").await;

        let resp = client
            .get_bucket_location()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("get_bucket_location: {e}"));
        let location = resp
            .location_constraint()
            .map(|c| c.as_str().to_owned())
            .unwrap_or_default();
        assert!(location.is_empty(), "unexpected location {location:?}");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_refuse_duplicate_and_nonempty_bucket_operations() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "dup").await;

        let duplicate = client.create_bucket().bucket(&bucket).send().await;
        assert!(duplicate.is_err(), "duplicate create should fail");

        put_text(&client, &bucket, "keep.txt", "keep").await;
        let delete = client.delete_bucket().bucket(&bucket).send().await;
        assert!(delete.is_err(), "non-empty bucket must not be deleted");

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_fail_head_for_unknown_bucket() {
        let client = s3_client();
        let result = client
            .head_bucket()
            .bucket(unique_bucket_name("ghost"))
            .send()
            .await;
        assert!(result.is_err());
    }
}
