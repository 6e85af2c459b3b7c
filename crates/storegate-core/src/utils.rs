//! Shared helpers: ID generation, content types, byte-range parsing and env
//! parsing.

use rand::RngExt;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// ID generation
// ---------------------------------------------------------------------------

/// Generate a random multipart upload ID (64 hex characters).
///
/// # Examples
///
/// ```
/// use storegate_core::utils::generate_upload_id;
///
/// let id = generate_upload_id();
/// assert_eq!(id.len(), 64);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn generate_upload_id() -> String {
    let mut rng = rand::rng();
    let mut buf = [0u8; 32];
    rng.fill(&mut buf);
    hex::encode(buf)
}

/// Generate a request ID (UUID v4 without dashes).
#[must_use]
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Guess a content type from the key's extension, falling back to
/// `application/octet-stream`.
///
/// ```
/// use storegate_core::utils::guess_content_type;
///
/// assert_eq!(guess_content_type("notes/readme.txt"), "text/plain");
/// assert_eq!(guess_content_type("blob"), "application/octet-stream");
/// ```
#[must_use]
pub fn guess_content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}

// ---------------------------------------------------------------------------
// Range parsing
// ---------------------------------------------------------------------------

/// Parse an HTTP `Range` value into an inclusive `(start, end)` byte range.
///
/// Supported forms are `bytes=a-b`, `bytes=a-` and `bytes=-n`. The end of
/// `bytes=a-b` is clamped to the last byte.
///
/// # Errors
///
/// Returns [`StorageError::InvalidArgument`] when the value is malformed or
/// cannot be satisfied for `content_length` bytes.
///
/// # Examples
///
/// ```
/// use storegate_core::utils::parse_range_header;
///
/// assert_eq!(parse_range_header("bytes=5-", 10).unwrap(), (5, 9));
/// assert_eq!(parse_range_header("bytes=-5", 10).unwrap(), (5, 9));
/// assert_eq!(parse_range_header("bytes=0-4", 10).unwrap(), (0, 4));
/// ```
pub fn parse_range_header(range: &str, content_length: u64) -> StorageResult<(u64, u64)> {
    let invalid = || StorageError::invalid_argument(format!("invalid range: {range}"));

    let bounds = range.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    if content_length == 0 || bounds.contains(',') {
        return Err(invalid());
    }

    if let Some(suffix) = bounds.strip_prefix('-') {
        let n: u64 = suffix.parse().map_err(|_| invalid())?;
        if n == 0 || n > content_length {
            return Err(invalid());
        }
        Ok((content_length - n, content_length - 1))
    } else if let Some(prefix) = bounds.strip_suffix('-') {
        let start: u64 = prefix.parse().map_err(|_| invalid())?;
        if start >= content_length {
            return Err(invalid());
        }
        Ok((start, content_length - 1))
    } else {
        let (start, end) = bounds.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        if start > end || start >= content_length {
            return Err(invalid());
        }
        Ok((start, end.min(content_length - 1)))
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

/// Interpret an environment value as a boolean (`1`/`true`/`yes`/`on`).
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Split a comma-separated list, dropping empty items.
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse a comma-separated `name:value` list (e.g. `alice:secret,bob:hunter2`).
#[must_use]
pub fn parse_pairs(value: &str) -> Vec<(String, String)> {
    parse_list(value)
        .into_iter()
        .filter_map(|item| {
            item.split_once(':')
                .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_generate_unique_upload_ids() {
        assert_ne!(generate_upload_id(), generate_upload_id());
    }

    #[test]
    fn test_should_generate_simple_request_ids() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }

    #[test]
    fn test_should_parse_ranges_over_ten_bytes() {
        assert_eq!(parse_range_header("bytes=5-", 10).ok(), Some((5, 9)));
        assert_eq!(parse_range_header("bytes=-5", 10).ok(), Some((5, 9)));
        assert_eq!(parse_range_header("bytes=0-4", 10).ok(), Some((0, 4)));
    }

    #[test]
    fn test_should_clamp_range_end() {
        assert_eq!(parse_range_header("bytes=8-100", 10).ok(), Some((8, 9)));
    }

    #[test]
    fn test_should_reject_unsatisfiable_ranges() {
        for bad in [
            "bytes=10-",
            "bytes=-0",
            "bytes=-11",
            "bytes=4-2",
            "items=0-1",
            "bytes=0-1,3-4",
            "bytes=a-b",
        ] {
            assert!(parse_range_header(bad, 10).is_err(), "{bad}");
        }
        assert!(parse_range_header("bytes=0-", 0).is_err());
    }

    #[test]
    fn test_should_parse_bool_values() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_should_parse_pairs() {
        let pairs = parse_pairs("alice:secret, bob:pw:with:colons,broken,:x");
        assert_eq!(
            pairs,
            vec![
                ("alice".to_owned(), "secret".to_owned()),
                ("bob".to_owned(), "pw:with:colons".to_owned()),
            ]
        );
    }
}
