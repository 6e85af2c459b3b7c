//! Byte storage with automatic spill to temporary files.
//!
//! Bodies at or below [`SpillPolicy::threshold`] are kept in memory as
//! [`Bytes`]. Larger bodies are written to a temporary file which is removed
//! when the owning [`StoredData`] is dropped.

use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{trace, warn};
use typed_builder::TypedBuilder;

use crate::error::{StorageError, StorageResult};
use crate::object::{ObjectReader, bytes_source};

/// Default in-memory threshold (512 KiB).
pub const DEFAULT_SPILL_THRESHOLD: usize = 524_288;

/// Where and when to spill.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct SpillPolicy {
    /// Largest body kept in memory.
    #[builder(default = DEFAULT_SPILL_THRESHOLD)]
    pub threshold: usize,
    /// Directory for temporary files; the OS default when `None`.
    #[builder(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for SpillPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SpillPolicy {
    /// Store `data`, spilling to disk above the threshold.
    pub async fn store(&self, data: Bytes) -> StorageResult<StoredData> {
        if data.len() > self.threshold {
            self.spill_to_disk(&data).await
        } else {
            Ok(StoredData::InMemory { data })
        }
    }

    async fn spill_to_disk(&self, data: &[u8]) -> StorageResult<StoredData> {
        let size = data.len() as u64;

        let temp = match &self.temp_dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir),
            None => tempfile::NamedTempFile::new(),
        }
        .map_err(|e| StorageError::Internal(anyhow::anyhow!("failed to create temp file: {e}")))?;
        let path = temp.path().to_path_buf();

        // Cleanup is owned by StoredData's Drop from here on.
        temp.persist(&path).map_err(|e| {
            StorageError::Internal(anyhow::anyhow!(
                "failed to persist temp file {}: {e}",
                path.display()
            ))
        })?;

        let stored = StoredData::OnDisk {
            path: path.clone(),
            size,
        };
        tokio::fs::write(&path, data).await.map_err(|e| {
            StorageError::Internal(anyhow::anyhow!(
                "failed to write temp file {}: {e}",
                path.display()
            ))
        })?;
        trace!(path = %path.display(), size, "spilled data to disk");
        Ok(stored)
    }
}

// ---------------------------------------------------------------------------
// StoredData
// ---------------------------------------------------------------------------

/// A stored body, in memory or in a temporary file.
pub enum StoredData {
    /// Small bodies kept entirely in memory.
    InMemory {
        /// The raw bytes.
        data: Bytes,
    },
    /// Large bodies spilled to a temp file.
    OnDisk {
        /// Path to the temporary file.
        path: PathBuf,
        /// Size in bytes.
        size: u64,
    },
}

impl std::fmt::Debug for StoredData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory { data } => f
                .debug_struct("InMemory")
                .field("size", &data.len())
                .finish(),
            Self::OnDisk { path, size } => f
                .debug_struct("OnDisk")
                .field("path", path)
                .field("size", size)
                .finish(),
        }
    }
}

impl Drop for StoredData {
    fn drop(&mut self) {
        if let Self::OnDisk { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove temp file");
                }
            } else {
                trace!(path = %path.display(), "removed temp file");
            }
        }
    }
}

impl StoredData {
    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::InMemory { data } => data.len() as u64,
            Self::OnDisk { size, .. } => *size,
        }
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body.
    pub async fn read_all(&self) -> StorageResult<Bytes> {
        match self {
            Self::InMemory { data } => Ok(data.clone()),
            Self::OnDisk { path, size } => {
                let mut file = tokio::fs::File::open(path).await.map_err(|e| {
                    StorageError::Internal(anyhow::anyhow!(
                        "failed to open temp file {}: {e}",
                        path.display()
                    ))
                })?;
                let capacity = usize::try_from(*size).unwrap_or(usize::MAX);
                let mut buf = BytesMut::with_capacity(capacity);
                while buf.len() < capacity {
                    let n = file.read_buf(&mut buf).await.map_err(|e| {
                        StorageError::Internal(anyhow::anyhow!(
                            "failed to read temp file {}: {e}",
                            path.display()
                        ))
                    })?;
                    if n == 0 {
                        break;
                    }
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Read `length` bytes (to the end when `None`) starting at `offset`.
    /// The window is clamped to the body.
    pub async fn read_range(&self, offset: u64, length: Option<u64>) -> StorageResult<Bytes> {
        let (start, end) = clamp_window(self.len(), offset, length);
        match self {
            Self::InMemory { data } => Ok(data.slice(to_usize(start)?..to_usize(end)?)),
            Self::OnDisk { .. } => {
                let all = self.read_all().await?;
                Ok(all.slice(to_usize(start)?..to_usize(end)?))
            }
        }
    }

    /// Open a reader over a window of the body without loading a spilled
    /// file into memory.
    pub async fn open_reader(&self, offset: u64, length: Option<u64>) -> StorageResult<ObjectReader> {
        let (start, end) = clamp_window(self.len(), offset, length);
        match self {
            Self::InMemory { data } => Ok(bytes_source(
                data.slice(to_usize(start)?..to_usize(end)?),
            )),
            Self::OnDisk { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                Ok(Box::new(file.take(end - start)))
            }
        }
    }
}

fn clamp_window(len: u64, offset: u64, length: Option<u64>) -> (u64, u64) {
    let start = offset.min(len);
    let end = match length {
        Some(n) if n > 0 => start.saturating_add(n).min(len),
        _ => len,
    };
    (start, end)
}

fn to_usize(n: u64) -> StorageResult<usize> {
    usize::try_from(n).map_err(|_| StorageError::invalid_argument(format!("offset {n} too large")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn small_policy(dir: &tempfile::TempDir) -> SpillPolicy {
        SpillPolicy::builder()
            .threshold(4)
            .temp_dir(Some(dir.path().to_path_buf()))
            .build()
    }

    #[tokio::test]
    async fn test_should_keep_small_bodies_in_memory() {
        let stored = SpillPolicy::default()
            .store(Bytes::from_static(b"abc"))
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));
        assert!(matches!(stored, StoredData::InMemory { .. }));
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_should_spill_and_remove_temp_file_on_drop() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let stored = small_policy(&dir)
            .store(Bytes::from_static(b"0123456789"))
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));
        let path = match &stored {
            StoredData::OnDisk { path, .. } => path.clone(),
            StoredData::InMemory { .. } => panic!("expected spill"),
        };
        assert!(path.exists());
        assert_eq!(
            stored.read_all().await.unwrap_or_else(|e| panic!("{e}")).as_ref(),
            b"0123456789"
        );
        drop(stored);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_should_read_window_from_spilled_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let stored = small_policy(&dir)
            .store(Bytes::from_static(b"0123456789"))
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));

        let mut reader = stored
            .open_reader(5, Some(3))
            .await
            .unwrap_or_else(|e| panic!("open failed: {e}"));
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(out, b"567");

        let tail = stored
            .read_range(7, None)
            .await
            .unwrap_or_else(|e| panic!("range failed: {e}"));
        assert_eq!(tail.as_ref(), b"789");
    }

    #[test]
    fn test_should_clamp_windows() {
        assert_eq!(clamp_window(10, 12, None), (10, 10));
        assert_eq!(clamp_window(10, 8, Some(5)), (8, 10));
        assert_eq!(clamp_window(10, 2, Some(0)), (2, 10));
    }
}
