//! Bucket listings over S3.

#[cfg(test)]
mod tests {
    use crate::{cleanup_bucket, create_test_bucket, put_text, s3_client};

    const TREE: [&str; 6] = [
        "logs/2026/01/app.log",
        "logs/2026/01/db.log",
        "logs/2026/02/app.log",
        "media/cover.png",
        "media/intro.mp4",
        "README",
    ];

    async fn seeded_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
        let bucket = create_test_bucket(client, prefix).await;
        for key in TREE {
            put_text(client, &bucket, key, "x").await;
        }
        bucket
    }

    fn keys(resp: &aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output) -> Vec<&str> {
        resp.contents().iter().filter_map(|o| o.key()).collect()
    }

    fn prefixes(resp: &aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output) -> Vec<&str> {
        resp.common_prefixes().iter().filter_map(|p| p.prefix()).collect()
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_every_key_in_order() {
        let client = s3_client();
        let bucket = seeded_bucket(&client, "all").await;

        let resp = client
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list_objects_v2: {e}"));

        let mut expected = TREE.to_vec();
        expected.sort_unstable();
        assert_eq!(keys(&resp), expected);
        assert_eq!(resp.key_count(), Some(6));
        assert_eq!(resp.is_truncated(), Some(false));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_group_keys_by_delimiter() {
        let client = s3_client();
        let bucket = seeded_bucket(&client, "delim").await;

        let top = client
            .list_objects_v2()
            .bucket(&bucket)
            .delimiter("/")
            .send()
            .await
            .unwrap_or_else(|e| panic!("top-level list: {e}"));
        assert_eq!(keys(&top), vec!["README"]);
        assert_eq!(prefixes(&top), vec!["logs/", "media/"]);

        let nested = client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix("logs/2026/")
            .delimiter("/")
            .send()
            .await
            .unwrap_or_else(|e| panic!("nested list: {e}"));
        assert!(keys(&nested).is_empty());
        assert_eq!(prefixes(&nested), vec!["logs/2026/01/", "logs/2026/02/"]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_filter_by_prefix() {
        let client = s3_client();
        let bucket = seeded_bucket(&client, "prefix").await;

        let resp = client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix("media/")
            .send()
            .await
            .unwrap_or_else(|e| panic!("prefix list: {e}"));
        assert_eq!(keys(&resp), vec!["media/cover.png", "media/intro.mp4"]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_page_with_continuation_tokens() {
        let client = s3_client();
        let bucket = seeded_bucket(&client, "pages").await;

        let mut seen = Vec::new();
        let mut pages = 0;
        let mut token: Option<String> = None;
        loop {
            let resp = client
                .list_objects_v2()
                .bucket(&bucket)
                .max_keys(4)
                .set_continuation_token(token.take())
                .send()
                .await
                .unwrap_or_else(|e| panic!("list page {pages}: {e}"));
            pages += 1;
            assert!(resp.contents().len() <= 4);
            seen.extend(keys(&resp).into_iter().map(ToOwned::to_owned));

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated() == Some(true) => token = Some(next.to_owned()),
                _ => break,
            }
        }

        let mut expected: Vec<String> = TREE.iter().map(|k| (*k).to_owned()).collect();
        expected.sort_unstable();
        assert_eq!(pages, 2);
        assert_eq!(seen, expected);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_resume_after_start_key() {
        let client = s3_client();
        let bucket = seeded_bucket(&client, "after").await;

        let resp = client
            .list_objects_v2()
            .bucket(&bucket)
            .start_after("logs/2026/02/app.log")
            .send()
            .await
            .unwrap_or_else(|e| panic!("start_after list: {e}"));
        assert_eq!(keys(&resp), vec!["media/cover.png", "media/intro.mp4"]);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_nothing_in_empty_bucket() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "void").await;

        let resp = client
            .list_objects_v2()
            .bucket(&bucket)
            .send()
            .await
            .unwrap_or_else(|e| panic!("list empty: {e}"));
        assert_eq!(resp.key_count(), Some(0));
        assert!(resp.contents().is_empty());

        cleanup_bucket(&client, &bucket).await;
    }
}
