//! Response body: buffered XML, streamed object data, or nothing.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body_util::Full;
use storegate_core::ObjectReader;
use tokio_util::io::ReaderStream;

/// S3 response body.
///
/// Implements [`http_body::Body`] so it can be used directly with hyper responses.
#[derive(Default)]
pub enum S3ResponseBody {
    /// XML payloads, error bodies and other small responses.
    Buffered(Full<Bytes>),
    /// Object content read from the storage backend.
    Streaming {
        /// Chunked reader over the object.
        stream: ReaderStream<ObjectReader>,
        /// Bytes still expected from `stream`.
        remaining: u64,
    },
    /// 204 responses, HEAD responses and the like.
    #[default]
    Empty,
}

impl fmt::Debug for S3ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(full) => f.debug_tuple("Buffered").field(full).finish(),
            Self::Streaming { remaining, .. } => f
                .debug_struct("Streaming")
                .field("remaining", remaining)
                .finish_non_exhaustive(),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

impl S3ResponseBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Stream `length` bytes from `reader`.
    #[must_use]
    pub fn from_reader(reader: ObjectReader, length: u64) -> Self {
        Self::Streaming {
            stream: ReaderStream::new(reader),
            remaining: length,
        }
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }
}

impl http_body::Body for S3ResponseBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Streaming { stream, remaining } => match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    *remaining = remaining.saturating_sub(chunk.len() as u64);
                    Poll::Ready(Some(Ok(http_body::Frame::data(chunk))))
                }
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            Self::Empty => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Streaming { remaining, .. } => *remaining == 0,
            Self::Empty => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Streaming { remaining, .. } => http_body::SizeHint::with_exact(*remaining),
            Self::Empty => http_body::SizeHint::with_exact(0),
        }
    }
}
