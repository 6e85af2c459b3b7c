//! Open files handed to dav-server.
//!
//! A reading [`StoreFile`] keeps one backend stream and reopens it at the new
//! offset after a seek. A writing one collects the request body in a
//! [`WriteBuffer`] and commits it as a single backend write on `flush`,
//! which dav-server calls once the body is complete.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use storegate_core::{Bucket, Context, Object, ObjectReader, Options, WriteBuffer};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::to_fs_error;

/// Metadata reported to dav-server.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub(crate) len: u64,
    pub(crate) is_dir: bool,
    pub(crate) created: SystemTime,
    pub(crate) modified: SystemTime,
}

impl StoreMeta {
    pub(crate) fn of_object(object: &Object) -> Self {
        Self {
            len: object.size,
            is_dir: object.is_dir,
            created: object.created.into(),
            modified: object.updated.into(),
        }
    }
}

impl DavMetaData for StoreMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.created)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

enum Mode {
    Read {
        object: Object,
        /// Open backend stream and the offset it is positioned at.
        stream: Mutex<Option<(u64, ObjectReader)>>,
    },
    Write {
        buffer: Mutex<WriteBuffer>,
        content_type: String,
        opened: SystemTime,
    },
}

/// A file opened through [`StoreFs`](crate::fs::StoreFs).
pub struct StoreFile {
    bucket: Arc<dyn Bucket>,
    ctx: Context,
    key: String,
    pos: u64,
    mode: Mode,
}

impl fmt::Debug for StoreFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Read { .. } => "read",
            Mode::Write { .. } => "write",
        };
        f.debug_struct("StoreFile")
            .field("bucket", &self.bucket.name())
            .field("key", &self.key)
            .field("pos", &self.pos)
            .field("mode", &mode)
            .finish()
    }
}

impl StoreFile {
    pub(crate) fn reader(bucket: Arc<dyn Bucket>, ctx: Context, object: Object) -> Self {
        Self {
            bucket,
            ctx,
            key: object.key.clone(),
            pos: 0,
            mode: Mode::Read {
                object,
                stream: Mutex::new(None),
            },
        }
    }

    pub(crate) fn writer(
        bucket: Arc<dyn Bucket>,
        ctx: Context,
        key: String,
        buffer: WriteBuffer,
        content_type: String,
    ) -> Self {
        Self {
            bucket,
            ctx,
            key,
            pos: 0,
            mode: Mode::Write {
                buffer: Mutex::new(buffer),
                content_type,
                opened: SystemTime::now(),
            },
        }
    }

    fn size(&mut self) -> u64 {
        match &mut self.mode {
            Mode::Read { object, .. } => object.size,
            Mode::Write { buffer, .. } => buffer.get_mut().len(),
        }
    }

    async fn write_data(&mut self, data: &[u8]) -> Result<(), FsError> {
        let Mode::Write { buffer, .. } = &mut self.mode else {
            return Err(FsError::Forbidden);
        };
        buffer
            .get_mut()
            .write_at(self.pos, data)
            .await
            .map_err(|e| to_fs_error("write", &self.key, &e))?;
        self.pos += data.len() as u64;
        Ok(())
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_full(reader: &mut ObjectReader, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl DavFile for StoreFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let meta = match &mut self.mode {
                Mode::Read { object, .. } => StoreMeta::of_object(object),
                Mode::Write { buffer, opened, .. } => StoreMeta {
                    len: buffer.get_mut().len(),
                    is_dir: false,
                    created: *opened,
                    modified: SystemTime::now(),
                },
            };
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let data = buf.copy_to_bytes(buf.remaining());
            self.write_data(&data).await
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move { self.write_data(&buf).await })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let pos = self.pos;
            let Mode::Read { object, stream } = &mut self.mode else {
                return Err(FsError::Forbidden);
            };
            if pos >= object.size {
                return Ok(Bytes::new());
            }
            let want = count.min(usize::try_from(object.size - pos).unwrap_or(usize::MAX));

            let stream = stream.get_mut();
            if !matches!(stream, Some((at, _)) if *at == pos) {
                let (reader, _) = self
                    .bucket
                    .open(&self.ctx, &self.key, pos, None, &Options::new())
                    .await
                    .map_err(|e| to_fs_error("read", &self.key, &e))?;
                *stream = Some((pos, reader));
            }
            let Some((at, reader)) = stream.as_mut() else {
                return Err(FsError::GeneralFailure);
            };

            let mut data = vec![0; want];
            let filled = match read_full(reader, &mut data).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(key = %self.key, error = %e, "webdav read failed");
                    *stream = None;
                    return Err(FsError::GeneralFailure);
                }
            };
            *at += filled as u64;
            self.pos += filled as u64;
            data.truncate(filled);
            Ok(Bytes::from(data))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let target = match pos {
                SeekFrom::Start(n) => Some(n),
                SeekFrom::End(delta) => self.size().checked_add_signed(delta),
                SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            };
            let target = target.ok_or(FsError::GeneralFailure)?;
            self.pos = target;
            Ok(target)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let Mode::Write {
                buffer,
                content_type,
                ..
            } = &mut self.mode
            else {
                return Ok(());
            };
            let committed = buffer
                .get_mut()
                .commit(
                    &self.ctx,
                    self.bucket.as_ref(),
                    &self.key,
                    content_type,
                    &Options::new(),
                )
                .await
                .map_err(|e| to_fs_error("flush", &self.key, &e))?;
            if let Some(object) = committed {
                info!(bucket = %self.bucket.name(), key = %self.key, size = object.size, "webdav upload committed");
            }
            Ok(())
        })
    }
}
