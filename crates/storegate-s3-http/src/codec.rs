//! `aws-chunked` request body decoding.
//!
//! SDK uploads with streaming signatures or checksum trailers frame the
//! payload as
//!
//! ```text
//! <hex-size>[;chunk-signature=<sig>]\r\n
//! <data>\r\n
//! ...
//! 0[;chunk-signature=<sig>]\r\n
//! [x-amz-checksum-crc32:<base64>\r\n]
//! [x-amz-trailer-signature:<sig>\r\n]
//! \r\n
//! ```
//!
//! The service strips that envelope before dispatch so handlers only ever
//! see object bytes.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use storegate_core::checksums::{ChecksumAlgorithm, compute_checksum};
use tracing::debug;

use crate::error::{S3Error, S3ErrorCode};
use crate::request::header_str;

const DECODED_LENGTH_HEADER: &str = "x-amz-decoded-content-length";
const CHECKSUM_PREFIX: &str = "x-amz-checksum-";

/// Extra raw bytes allowed on top of the object limit for chunk headers.
const FRAMING_SLACK: u64 = 64 * 1024;

/// A decoded `aws-chunked` body.
#[derive(Debug, Clone, Default)]
pub struct ChunkedBody {
    /// The object bytes.
    pub payload: Bytes,
    /// Trailing headers sent after the final chunk, names lower-cased.
    pub trailers: Vec<(String, String)>,
}

/// Whether the request body uses `aws-chunked` framing.
///
/// Either `Content-Encoding` lists `aws-chunked` or `x-amz-content-sha256`
/// names a `STREAMING-*` payload.
#[must_use]
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    let encoded = header_str(headers, CONTENT_ENCODING.as_str()).is_some_and(|ce| {
        ce.split(',')
            .any(|v| v.trim().eq_ignore_ascii_case("aws-chunked"))
    });
    encoded
        || header_str(headers, "x-amz-content-sha256").is_some_and(|s| s.starts_with("STREAMING-"))
}

/// The size of the object inside the framing, from `x-amz-decoded-content-length`.
#[must_use]
pub fn decoded_content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, DECODED_LENGTH_HEADER).and_then(|v| v.trim().parse().ok())
}

/// Upper bound on the framed body for an object of at most `max` bytes.
#[must_use]
pub fn framed_limit(max: u64) -> u64 {
    max.saturating_add(max / 32).saturating_add(FRAMING_SLACK)
}

/// Split an `aws-chunked` body into payload and trailers.
///
/// # Errors
///
/// `InvalidArgument` when the framing is malformed: a missing size line, a
/// size that is not hex, truncated data or a chunk without its CRLF.
///
/// # Examples
///
/// ```
/// use storegate_s3_http::codec::decode_aws_chunked;
///
/// let body = decode_aws_chunked(b"5;chunk-signature=ab\r\nhello\r\n0;chunk-signature=cd\r\n\r\n")
///     .unwrap();
/// assert_eq!(body.payload.as_ref(), b"hello");
/// assert!(body.trailers.is_empty());
/// ```
pub fn decode_aws_chunked(body: &[u8]) -> Result<ChunkedBody, S3Error> {
    let malformed = |what: &str| {
        S3Error::invalid_argument(format!("Malformed aws-chunked body: {what}"))
    };

    let mut payload = BytesMut::with_capacity(body.len());
    let mut pos = 0;

    loop {
        let line_end = find_crlf(body, pos).ok_or_else(|| malformed("missing chunk size line"))?;
        let size_line = &body[pos..line_end];
        let hex = size_line
            .split(|&b| b == b';')
            .next()
            .unwrap_or_default();
        let hex = std::str::from_utf8(hex).map_err(|_| malformed("chunk size is not ASCII"))?;
        let size = usize::from_str_radix(hex.trim(), 16)
            .map_err(|_| malformed(&format!("invalid chunk size {hex:?}")))?;
        pos = line_end + 2;

        if size == 0 {
            break;
        }

        let data_end = pos
            .checked_add(size)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| malformed("chunk data truncated"))?;
        payload.extend_from_slice(&body[pos..data_end]);
        pos = data_end;

        if body.get(pos..pos + 2) != Some(b"\r\n".as_slice()) {
            return Err(malformed("missing CRLF after chunk data"));
        }
        pos += 2;
    }

    // Trailers run until an empty line or the end of the body.
    let mut trailers = Vec::new();
    while pos < body.len() {
        let line_end = find_crlf(body, pos).unwrap_or(body.len());
        let line = &body[pos..line_end];
        pos = (line_end + 2).min(body.len());
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line).map_err(|_| malformed("trailer is not UTF-8"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(&format!("invalid trailer {line:?}")))?;
        trailers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    Ok(ChunkedBody {
        payload: payload.freeze(),
        trailers,
    })
}

/// Check every `x-amz-checksum-*` trailer against the decoded payload.
///
/// Trailers naming an algorithm the gateway does not compute are ignored.
///
/// # Errors
///
/// `BadDigest` when a checksum does not match.
pub fn verify_trailing_checksums(body: &ChunkedBody) -> Result<(), S3Error> {
    for (name, claimed) in &body.trailers {
        let Some(algorithm) = name
            .strip_prefix(CHECKSUM_PREFIX)
            .and_then(|a| a.parse::<ChecksumAlgorithm>().ok())
        else {
            continue;
        };
        if compute_checksum(algorithm, &body.payload) != *claimed {
            return Err(S3Error::with_message(
                S3ErrorCode::BadDigest,
                format!("The {algorithm} you specified did not match the calculated checksum"),
            ));
        }
    }
    Ok(())
}

/// Decode a framed request body and rewrite the headers to describe the
/// payload: `aws-chunked` leaves `Content-Encoding`, `Content-Length` becomes
/// the payload size, and checksum trailers become ordinary headers.
///
/// # Errors
///
/// `InvalidArgument` for malformed framing, `IncompleteBody` when the payload
/// size differs from `x-amz-decoded-content-length`, and `BadDigest` when a
/// checksum trailer does not match.
pub fn decode_request(headers: &mut HeaderMap, raw: &[u8]) -> Result<Bytes, S3Error> {
    let body = decode_aws_chunked(raw)?;

    let size = body.payload.len() as u64;
    if let Some(declared) = decoded_content_length(headers) {
        if declared != size {
            return Err(S3Error::with_message(
                S3ErrorCode::IncompleteBody,
                format!("Expected {declared} decoded bytes but the chunks carried {size}"),
            ));
        }
    }
    verify_trailing_checksums(&body)?;

    strip_aws_chunked_encoding(headers);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    for (name, value) in &body.trailers {
        if !name.starts_with(CHECKSUM_PREFIX) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    debug!(raw = raw.len(), size, trailers = body.trailers.len(), "decoded aws-chunked body");

    Ok(body.payload)
}

/// Drop `aws-chunked` from `Content-Encoding`, removing the header when
/// nothing else is left.
pub fn strip_aws_chunked_encoding(headers: &mut HeaderMap) {
    let Some(value) = header_str(headers, CONTENT_ENCODING.as_str()) else {
        return;
    };
    let remaining: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("aws-chunked"))
        .collect();

    if remaining.is_empty() {
        headers.remove(CONTENT_ENCODING);
    } else if let Ok(value) = HeaderValue::from_str(&remaining.join(", ")) {
        headers.insert(CONTENT_ENCODING, value);
    }
}

fn find_crlf(data: &[u8], start: usize) -> Option<usize> {
    data.get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| start + p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    fn decode(body: &[u8]) -> ChunkedBody {
        decode_aws_chunked(body).unwrap_or_else(|e| panic!("decode failed: {e}"))
    }

    #[test]
    fn test_should_detect_chunked_framing() {
        assert!(is_aws_chunked(&headers(&[("content-encoding", "aws-chunked")])));
        assert!(is_aws_chunked(&headers(&[("content-encoding", "gzip, aws-chunked")])));
        assert!(is_aws_chunked(&headers(&[(
            "x-amz-content-sha256",
            "STREAMING-UNSIGNED-PAYLOAD-TRAILER"
        )])));
        assert!(!is_aws_chunked(&headers(&[("x-amz-content-sha256", "UNSIGNED-PAYLOAD")])));
        assert!(!is_aws_chunked(&HeaderMap::new()));
    }

    #[test]
    fn test_should_join_signed_chunks() {
        let body = decode(
            b"5;chunk-signature=aaa\r\nhello\r\n6;chunk-signature=bbb\r\n world\r\n0;chunk-signature=ccc\r\n\r\n",
        );
        assert_eq!(body.payload.as_ref(), b"hello world");
        assert!(body.trailers.is_empty());
    }

    #[test]
    fn test_should_decode_unsigned_chunks_without_final_crlf() {
        assert_eq!(decode(b"3\r\nabc\r\n0\r\n").payload.as_ref(), b"abc");
        assert!(decode(b"0\r\n\r\n").payload.is_empty());
    }

    #[test]
    fn test_should_collect_trailers() {
        let body = decode(
            b"5\r\nhello\r\n0\r\nx-amz-checksum-crc32:NhCmhg==\r\nx-amz-trailer-signature:abc\r\n\r\n",
        );
        assert_eq!(body.payload.as_ref(), b"hello");
        assert_eq!(
            body.trailers,
            vec![
                ("x-amz-checksum-crc32".to_owned(), "NhCmhg==".to_owned()),
                ("x-amz-trailer-signature".to_owned(), "abc".to_owned()),
            ]
        );
        assert!(verify_trailing_checksums(&body).is_ok());
    }

    #[test]
    fn test_should_reject_mismatched_trailer_checksum() {
        let body = decode(b"5\r\nhello\r\n0\r\nx-amz-checksum-crc32:AAAAAA==\r\n\r\n");
        let err = verify_trailing_checksums(&body)
            .err()
            .unwrap_or_else(|| panic!("checksum mismatch accepted"));
        assert_eq!(err.code, S3ErrorCode::BadDigest);
    }

    #[test]
    fn test_should_reject_malformed_framing() {
        for bad in [
            b"5;chunk-signature=abc".as_slice(),
            b"10;chunk-signature=abc\r\nshort\r\n",
            b"zz\r\nhello\r\n0\r\n\r\n",
            b"5\r\nhelloXX0\r\n\r\n",
            b"0\r\nnot-a-trailer\r\n\r\n",
        ] {
            let err = decode_aws_chunked(bad)
                .err()
                .unwrap_or_else(|| panic!("{bad:?} decoded"));
            assert_eq!(err.code, S3ErrorCode::InvalidArgument);
        }
    }

    #[test]
    fn test_should_rewrite_headers_for_payload() {
        let mut map = headers(&[
            ("content-encoding", "aws-chunked"),
            ("content-length", "57"),
            ("x-amz-decoded-content-length", "5"),
        ]);
        let payload = decode_request(&mut map, b"5\r\nhello\r\n0\r\nx-amz-checksum-crc32:NhCmhg==\r\n\r\n")
            .unwrap_or_else(|e| panic!("decode_request: {e}"));
        assert_eq!(payload.as_ref(), b"hello");
        assert!(map.get(CONTENT_ENCODING).is_none());
        assert_eq!(header_str(&map, "content-length"), Some("5"));
        assert_eq!(header_str(&map, "x-amz-checksum-crc32"), Some("NhCmhg=="));
    }

    #[test]
    fn test_should_reject_decoded_length_mismatch() {
        let mut map = headers(&[("x-amz-decoded-content-length", "9")]);
        let err = decode_request(&mut map, b"5\r\nhello\r\n0\r\n\r\n")
            .err()
            .unwrap_or_else(|| panic!("short body accepted"));
        assert_eq!(err.code, S3ErrorCode::IncompleteBody);
    }

    #[test]
    fn test_should_keep_other_content_encodings() {
        let mut map = headers(&[("content-encoding", "gzip, aws-chunked")]);
        strip_aws_chunked_encoding(&mut map);
        assert_eq!(header_str(&map, "content-encoding"), Some("gzip"));
    }

    #[test]
    fn test_should_allow_room_for_chunk_headers() {
        assert!(framed_limit(4) > 4);
        assert_eq!(framed_limit(u64::MAX), u64::MAX);
    }
}
