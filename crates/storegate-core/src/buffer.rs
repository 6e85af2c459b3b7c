//! Upload buffering with spill to a private temporary file.
//!
//! File-oriented transports (SFTP, WebDAV) receive uploads as a sequence of
//! positioned writes and only know the object is complete when the client
//! closes the handle. [`WriteBuffer`] collects those writes:
//!
//! ```text
//! Memory(BytesMut) ──write past threshold──> Disk(temp file) ──finish──> Finished
//!        └────────────────────finish─────────────────────────────────────┘
//! ```
//!
//! Spilling copies the already-buffered bytes into the file first. A write
//! beyond the current end zero-fills the gap. [`WriteBuffer::commit`] hands
//! the active store to the backend as a single write; the temp file is
//! removed once the backend has consumed it, and a second commit is a no-op.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tracing::trace;
use typed_builder::TypedBuilder;

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::object::{ByteSource, Object, bytes_source};
use crate::options::Options;
use crate::storage::Bucket;

/// Default in-memory threshold for upload buffers (32 MiB).
pub const DEFAULT_BUFFER_THRESHOLD: usize = 32 * 1024 * 1024;

const ZERO_CHUNK: usize = 64 * 1024;

/// Buffering limits shared by the file-oriented transports.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Bytes kept in memory before spilling to disk.
    #[builder(default = DEFAULT_BUFFER_THRESHOLD)]
    pub threshold: usize,
    /// Directory for spill files; the OS default when `None`.
    #[builder(default)]
    pub temp_dir: Option<PathBuf>,
    /// Largest object accepted; unlimited when `None`.
    #[builder(default)]
    pub max_size: Option<u64>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

enum BufferState {
    Memory(BytesMut),
    Disk {
        file: tokio::fs::File,
        path: TempPath,
    },
    Finished,
}

/// Collects positioned writes for one upload handle.
pub struct WriteBuffer {
    config: BufferConfig,
    state: BufferState,
    len: u64,
}

impl std::fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            BufferState::Memory(_) => "memory",
            BufferState::Disk { .. } => "disk",
            BufferState::Finished => "finished",
        };
        f.debug_struct("WriteBuffer")
            .field("state", &state)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl WriteBuffer {
    /// Create an empty in-memory buffer.
    #[must_use]
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            state: BufferState::Memory(BytesMut::new()),
            len: 0,
        }
    }

    /// Logical length (highest byte written + 1).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer has moved to a temporary file.
    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(self.state, BufferState::Disk { .. })
    }

    /// Whether the buffer has been finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, BufferState::Finished)
    }

    /// Write `data` at `offset`, zero-filling any gap after the current end.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ResourceExhausted`] when the write would exceed
    ///   `max_size`.
    /// - [`StorageError::InvalidArgument`] after the buffer was finished.
    /// - I/O errors from the spill file.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| StorageError::invalid_argument("write offset overflows"))?;
        if let Some(max) = self.config.max_size {
            if end > max {
                return Err(StorageError::resource_exhausted(format!(
                    "upload of {end} bytes exceeds limit of {max}"
                )));
            }
        }

        if matches!(self.state, BufferState::Memory(_)) && end > self.config.threshold as u64 {
            self.spill().await?;
        }

        match &mut self.state {
            BufferState::Memory(buf) => {
                let start = to_usize(offset)?;
                let end = to_usize(end)?;
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(data);
            }
            BufferState::Disk { file, .. } => {
                if offset > self.len {
                    file.seek(SeekFrom::Start(self.len)).await?;
                    let zeros = vec![0u8; ZERO_CHUNK];
                    let mut remaining = offset - self.len;
                    while remaining > 0 {
                        let n = usize::try_from(remaining).map_or(ZERO_CHUNK, |r| r.min(ZERO_CHUNK));
                        file.write_all(&zeros[..n]).await?;
                        remaining -= n as u64;
                    }
                }
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(data).await?;
            }
            BufferState::Finished => {
                return Err(StorageError::invalid_argument("write to a closed upload"));
            }
        }
        self.len = self.len.max(end);
        Ok(data.len())
    }

    /// Move buffered bytes into a fresh temporary file.
    async fn spill(&mut self) -> StorageResult<()> {
        let BufferState::Memory(buf) = &self.state else {
            return Ok(());
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("storegate-upload-");
        let temp = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| StorageError::Internal(anyhow::anyhow!("failed to create spill file: {e}")))?;
        let (std_file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);
        file.write_all(buf).await?;

        trace!(path = %path.display(), buffered = buf.len(), "spilled upload buffer to disk");
        self.state = BufferState::Disk { file, path };
        Ok(())
    }

    /// Stop accepting writes and return the content, or `None` if the buffer
    /// was already finished.
    pub async fn finish(&mut self) -> StorageResult<Option<(ByteSource, u64)>> {
        let len = self.len;
        match std::mem::replace(&mut self.state, BufferState::Finished) {
            BufferState::Memory(buf) => Ok(Some((bytes_source(buf.freeze()), len))),
            BufferState::Disk { mut file, path } => {
                file.flush().await?;
                file.seek(SeekFrom::Start(0)).await?;
                Ok(Some((Box::new(SpillReader { file, _path: path }), len)))
            }
            BufferState::Finished => Ok(None),
        }
    }

    /// Write the buffered content to `bucket/key` as one backend write.
    /// Returns `None` when the buffer was already committed.
    pub async fn commit(
        &mut self,
        ctx: &Context,
        bucket: &dyn Bucket,
        key: &str,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<Option<Object>> {
        let Some((src, size)) = self.finish().await? else {
            return Ok(None);
        };
        let object = bucket
            .write(ctx, key, src, Some(size), content_type, opts)
            .await?;
        Ok(Some(object))
    }
}

fn to_usize(n: u64) -> StorageResult<usize> {
    usize::try_from(n).map_err(|_| StorageError::invalid_argument(format!("offset {n} too large")))
}

/// Reader over a finished spill file; the file is deleted on drop.
struct SpillReader {
    file: tokio::fs::File,
    _path: TempPath,
}

impl AsyncRead for SpillReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::error::ErrorKind;

    fn config(threshold: usize, dir: &tempfile::TempDir) -> BufferConfig {
        BufferConfig::builder()
            .threshold(threshold)
            .temp_dir(Some(dir.path().to_path_buf()))
            .build()
    }

    async fn drain(buffer: &mut WriteBuffer) -> Vec<u8> {
        let (mut src, size) = buffer
            .finish()
            .await
            .unwrap_or_else(|e| panic!("finish failed: {e}"))
            .unwrap_or_else(|| panic!("already finished"));
        let mut out = Vec::new();
        src.read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(out.len() as u64, size);
        out
    }

    fn spill_files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).map_or(0, Iterator::count)
    }

    #[tokio::test]
    async fn test_should_zero_fill_gaps_in_memory() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut buffer = WriteBuffer::new(config(1024, &dir));
        buffer.write_at(0, b"ab").await.unwrap_or_else(|e| panic!("{e}"));
        buffer.write_at(5, b"cd").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(!buffer.is_spilled());
        assert_eq!(drain(&mut buffer).await, b"ab\0\0\0cd");
    }

    #[tokio::test]
    async fn test_should_spill_and_keep_buffered_prefix() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut buffer = WriteBuffer::new(config(4, &dir));
        buffer.write_at(0, b"abc").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(!buffer.is_spilled());
        buffer.write_at(3, b"defgh").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(buffer.is_spilled());
        assert_eq!(spill_files(&dir), 1);

        buffer.write_at(10, b"XY").await.unwrap_or_else(|e| panic!("{e}"));
        buffer.write_at(1, b"B").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(buffer.len(), 12);
        assert_eq!(drain(&mut buffer).await, b"aBcdefgh\0\0XY");
        assert_eq!(spill_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_should_enforce_max_size() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut buffer = WriteBuffer::new(
            BufferConfig::builder()
                .threshold(1024)
                .temp_dir(Some(dir.path().to_path_buf()))
                .max_size(Some(4))
                .build(),
        );
        let err = buffer
            .write_at(2, b"xyz")
            .await
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_should_finish_only_once() {
        let mut buffer = WriteBuffer::new(BufferConfig::default());
        buffer.write_at(0, b"x").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(buffer.finish().await.unwrap_or_else(|e| panic!("{e}")).is_some());
        assert!(buffer.finish().await.unwrap_or_else(|e| panic!("{e}")).is_none());
        assert!(buffer.write_at(1, b"y").await.is_err());
    }

    #[tokio::test]
    async fn test_should_remove_spill_file_when_dropped_uncommitted() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut buffer = WriteBuffer::new(config(2, &dir));
        buffer.write_at(0, b"abcdef").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(spill_files(&dir), 1);
        drop(buffer);
        assert_eq!(spill_files(&dir), 0);
    }
}
