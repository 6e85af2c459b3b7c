//! SFTP v3 request handler.
//!
//! One [`SftpHandler`] serves one SFTP subsystem channel. Paths go through a
//! [`VirtualFs`], so the root lists buckets (or a user's home bucket when
//! chrooted) and deeper segments are virtual directories. Upload handles
//! collect writes in a [`WriteBuffer`] that is committed as one backend write
//! on close. Read handles keep the backend stream open across sequential
//! reads and reopen it only when the client seeks.

use std::collections::HashMap;

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use storegate_core::utils::guess_content_type;
use storegate_core::vfs::clean_path;
use storegate_core::{
    BufferConfig, Context, ErrorKind, Location, ObjectReader, Options, VfsEntry, VirtualFs,
    WriteBuffer,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::to_status;

/// Entries returned per READDIR response.
const READDIR_CHUNK: usize = 128;

/// Largest READ answered in one response.
const MAX_READ: usize = 256 * 1024;

const DIR_MODE: u32 = 0o040_755;
const FILE_MODE: u32 = 0o100_644;

enum HandleState {
    Read {
        path: String,
        bucket: String,
        key: String,
        size: u64,
        /// Open backend stream and the offset it is positioned at.
        stream: Option<(u64, ObjectReader)>,
    },
    Write {
        path: String,
        bucket: String,
        key: String,
        buffer: WriteBuffer,
    },
    Dir {
        path: String,
        entries: Vec<File>,
        sent: usize,
    },
}

impl HandleState {
    fn path(&self) -> &str {
        match self {
            Self::Read { path, .. } | Self::Write { path, .. } | Self::Dir { path, .. } => path,
        }
    }
}

/// Serves SFTP requests for one authenticated session.
pub struct SftpHandler {
    vfs: VirtualFs,
    ctx: Context,
    buffer: BufferConfig,
    uid: u32,
    gid: u32,
    handles: HashMap<String, HandleState>,
    next_handle: u64,
}

impl std::fmt::Debug for SftpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpHandler")
            .field("vfs", &self.vfs)
            .field("open_handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl SftpHandler {
    /// Create a handler over `vfs`. Every storage call runs under `ctx`.
    #[must_use]
    pub fn new(vfs: VirtualFs, ctx: Context, buffer: BufferConfig) -> Self {
        Self {
            vfs,
            ctx,
            buffer,
            uid: 0,
            gid: 0,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Owner and group reported for every entry.
    #[must_use]
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    fn insert_handle(&mut self, state: HandleState) -> String {
        self.next_handle += 1;
        let handle = format!("h{}", self.next_handle);
        self.handles.insert(handle.clone(), state);
        handle
    }

    fn attrs(&self, entry: &VfsEntry) -> FileAttributes {
        let mtime = u32::try_from(entry.modified.timestamp()).unwrap_or_default();
        FileAttributes {
            size: Some(entry.size),
            uid: Some(self.uid),
            gid: Some(self.gid),
            permissions: Some(if entry.is_dir { DIR_MODE } else { FILE_MODE }),
            atime: Some(mtime),
            mtime: Some(mtime),
            ..FileAttributes::default()
        }
    }

    fn file(&self, entry: &VfsEntry) -> File {
        let mode = if entry.is_dir {
            "drwxr-xr-x"
        } else {
            "-rw-r--r--"
        };
        File {
            filename: entry.name.clone(),
            longname: format!(
                "{mode} 1 {} {} {:>12} {} {}",
                self.uid,
                self.gid,
                entry.size,
                entry.modified.format("%b %e %H:%M"),
                entry.name
            ),
            attrs: self.attrs(entry),
        }
    }

    async fn stat_path(&mut self, op: &'static str, path: &str) -> Result<FileAttributes, StatusCode> {
        let loc = self.vfs.resolve(path);
        let entry = self
            .vfs
            .stat(&self.ctx, &loc)
            .await
            .map_err(|e| to_status(op, path, &e))?;
        Ok(self.attrs(&entry))
    }

    fn writable(&self, op: &'static str, path: &str) -> Result<(), StatusCode> {
        self.vfs
            .ensure_writable()
            .map_err(|e| to_status(op, path, &e))
    }

    /// Move every object below `src_key/` to `dst_key/`.
    async fn rename_tree(
        &mut self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Result<usize, StatusCode> {
        let handle = self.vfs.bucket(bucket);
        let prefix = format!("{src_key}/");
        let objects = handle
            .list(&self.ctx, &prefix, 0, 0, &Options::recursive())
            .await
            .map_err(|e| to_status("rename", src_key, &e))?;

        let mut moved = 0;
        for obj in objects.iter().filter(|o| !o.is_dir) {
            let Some(rest) = obj.key.strip_prefix(&prefix) else {
                continue;
            };
            handle
                .move_object(&self.ctx, &format!("{dst_key}/{rest}"), bucket, &obj.key, &Options::new())
                .await
                .map_err(|e| to_status("rename", &obj.key, &e))?;
            moved += 1;
        }
        Ok(moved)
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_owned(),
        language_tag: "en-US".to_owned(),
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

impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        debug!(version, "sftp session initialised");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let writing = pflags.contains(OpenFlags::WRITE)
            || pflags.contains(OpenFlags::CREATE)
            || pflags.contains(OpenFlags::TRUNCATE)
            || pflags.contains(OpenFlags::APPEND);

        let Location::Object { bucket, key } = self.vfs.resolve(&filename) else {
            return Err(if writing {
                StatusCode::PermissionDenied
            } else {
                StatusCode::NoSuchFile
            });
        };

        let state = if writing {
            self.writable("open", &filename)?;
            if pflags.contains(OpenFlags::APPEND) {
                return Err(StatusCode::OpUnsupported);
            }
            if pflags.contains(OpenFlags::EXCLUDE)
                && self
                    .vfs
                    .bucket(&bucket)
                    .stat(&self.ctx, &key, &Options::new())
                    .await
                    .is_ok()
            {
                return Err(StatusCode::Failure);
            }
            HandleState::Write {
                path: filename,
                bucket,
                key,
                buffer: WriteBuffer::new(self.buffer.clone()),
            }
        } else {
            let object = self
                .vfs
                .bucket(&bucket)
                .stat(&self.ctx, &key, &Options::new())
                .await
                .map_err(|e| to_status("open", &filename, &e))?;
            if object.is_dir {
                return Err(StatusCode::NoSuchFile);
            }
            HandleState::Read {
                path: filename,
                bucket,
                key,
                size: object.size,
                stream: None,
            }
        };

        let handle = self.insert_handle(state);
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        // Unknown handles are treated as already closed.
        if let Some(HandleState::Write {
            path,
            bucket,
            key,
            mut buffer,
        }) = self.handles.remove(&handle)
        {
            let content_type = guess_content_type(&key);
            let committed = buffer
                .commit(
                    &self.ctx,
                    self.vfs.bucket(&bucket).as_ref(),
                    &key,
                    &content_type,
                    &Options::new(),
                )
                .await
                .map_err(|e| to_status("close", &path, &e))?;
            if let Some(object) = committed {
                info!(bucket = %bucket, key = %key, size = object.size, "sftp upload committed");
            }
        }
        Ok(ok_status(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let ctx = self.ctx.clone();
        let vfs = self.vfs.clone();
        let Some(state) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::NoSuchFile);
        };
        let HandleState::Read {
            path,
            bucket,
            key,
            size,
            stream,
        } = state
        else {
            return Err(StatusCode::Failure);
        };
        if offset >= *size {
            return Err(StatusCode::Eof);
        }

        let remaining = usize::try_from(*size - offset).unwrap_or(MAX_READ);
        let want = usize::try_from(len).unwrap_or(MAX_READ).min(MAX_READ).min(remaining);

        if !matches!(stream, Some((pos, _)) if *pos == offset) {
            let (reader, _) = vfs
                .bucket(bucket)
                .open(&ctx, key, offset, None, &Options::new())
                .await
                .map_err(|e| to_status("read", path, &e))?;
            *stream = Some((offset, reader));
        }
        let Some((pos, reader)) = stream.as_mut() else {
            return Err(StatusCode::Failure);
        };

        let mut data = vec![0; want];
        let filled = match read_full(reader, &mut data).await {
            Ok(n) => n,
            Err(e) => {
                debug!(path = %path, error = %e, "sftp read failed");
                *stream = None;
                return Err(StatusCode::Failure);
            }
        };
        if filled == 0 {
            return Err(StatusCode::Eof);
        }
        *pos += filled as u64;
        data.truncate(filled);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(HandleState::Write { path, buffer, .. }) => {
                buffer
                    .write_at(offset, &data)
                    .await
                    .map_err(|e| to_status("write", path, &e))?;
                Ok(ok_status(id))
            }
            Some(_) => Err(StatusCode::PermissionDenied),
            None => Err(StatusCode::NoSuchFile),
        }
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.stat_path("lstat", &path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let path = match self.handles.get(&handle) {
            Some(HandleState::Write { buffer, .. }) => {
                let now = chrono::Utc::now();
                let entry = VfsEntry {
                    name: String::new(),
                    is_dir: false,
                    size: buffer.len(),
                    created: now,
                    modified: now,
                    content_type: String::new(),
                    etag: None,
                };
                return Ok(Attrs {
                    id,
                    attrs: self.attrs(&entry),
                });
            }
            Some(state) => state.path().to_owned(),
            None => return Err(StatusCode::NoSuchFile),
        };
        let attrs = self.stat_path("fstat", &path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn setstat(
        &mut self,
        id: u32,
        _path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        // Object stores have no mode, owner or times to change.
        Ok(ok_status(id))
    }

    async fn fsetstat(
        &mut self,
        id: u32,
        _handle: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        Ok(ok_status(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let loc = self.vfs.resolve(&path);
        let entries = self
            .vfs
            .read_dir(&self.ctx, &loc)
            .await
            .map_err(|e| to_status("opendir", &path, &e))?;
        let entries = entries.iter().map(|e| self.file(e)).collect();
        let handle = self.insert_handle(HandleState::Dir {
            path,
            entries,
            sent: 0,
        });
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.handles.get_mut(&handle) {
            Some(HandleState::Dir { entries, sent, .. }) => {
                if *sent >= entries.len() {
                    return Err(StatusCode::Eof);
                }
                let end = (*sent + READDIR_CHUNK).min(entries.len());
                let files = entries[*sent..end].to_vec();
                *sent = end;
                Ok(Name { id, files })
            }
            Some(_) => Err(StatusCode::Failure),
            None => Err(StatusCode::NoSuchFile),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        self.writable("remove", &filename)?;
        match self.vfs.resolve(&filename) {
            Location::Root => Err(StatusCode::NoSuchFile),
            Location::Bucket(_) => Err(StatusCode::PermissionDenied),
            Location::Object { bucket, key } => {
                self.vfs
                    .bucket(&bucket)
                    .delete(&self.ctx, &key, &Options::new())
                    .await
                    .map_err(|e| to_status("remove", &filename, &e))?;
                debug!(bucket = %bucket, key = %key, "sftp remove");
                Ok(ok_status(id))
            }
        }
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.writable("mkdir", &path)?;
        match self.vfs.resolve(&path) {
            Location::Root => Err(StatusCode::PermissionDenied),
            // The home bucket of a chrooted user always exists from their view.
            Location::Bucket(_) if self.vfs.has_root_bucket() => Ok(ok_status(id)),
            Location::Bucket(name) => {
                match self
                    .vfs
                    .storage()
                    .create_bucket(&self.ctx, &name, &Options::new())
                    .await
                {
                    Ok(_) => {
                        info!(bucket = %name, "sftp created bucket");
                        Ok(ok_status(id))
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(ok_status(id)),
                    Err(e) => Err(to_status("mkdir", &path, &e)),
                }
            }
            // Nested directories exist implicitly once they hold an object.
            Location::Object { .. } => Ok(ok_status(id)),
        }
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        self.writable("rmdir", &path)?;
        match self.vfs.resolve(&path) {
            Location::Root => Err(StatusCode::PermissionDenied),
            Location::Bucket(_) if self.vfs.has_root_bucket() => Err(StatusCode::PermissionDenied),
            Location::Bucket(name) => {
                self.vfs
                    .storage()
                    .delete_bucket(&self.ctx, &name, &Options::new())
                    .await
                    .map_err(|e| to_status("rmdir", &path, &e))?;
                info!(bucket = %name, "sftp removed bucket");
                Ok(ok_status(id))
            }
            Location::Object { bucket, key } => {
                let removed = self
                    .vfs
                    .remove_tree(&self.ctx, &bucket, &key)
                    .await
                    .map_err(|e| to_status("rmdir", &path, &e))?;
                debug!(bucket = %bucket, prefix = %key, removed, "sftp rmdir");
                Ok(ok_status(id))
            }
        }
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let cleaned = clean_path(&path);
        Ok(Name {
            id,
            files: vec![File {
                filename: cleaned.clone(),
                longname: cleaned,
                attrs: FileAttributes::default(),
            }],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let attrs = self.stat_path("stat", &path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        self.writable("rename", &oldpath)?;
        let (
            Location::Object {
                bucket: src_bucket,
                key: src_key,
            },
            Location::Object {
                bucket: dst_bucket,
                key: dst_key,
            },
        ) = (self.vfs.resolve(&oldpath), self.vfs.resolve(&newpath))
        else {
            return Err(StatusCode::PermissionDenied);
        };
        if src_bucket != dst_bucket {
            return Err(StatusCode::OpUnsupported);
        }

        match self
            .vfs
            .bucket(&dst_bucket)
            .move_object(&self.ctx, &dst_key, &src_bucket, &src_key, &Options::new())
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_exist() => {
                if self.rename_tree(&src_bucket, &src_key, &dst_key).await? == 0 {
                    return Err(StatusCode::NoSuchFile);
                }
            }
            Err(e) => return Err(to_status("rename", &oldpath, &e)),
        }
        debug!(bucket = %src_bucket, from = %src_key, to = %dst_key, "sftp rename");
        Ok(ok_status(id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use russh_sftp::server::Handler;
    use storegate_core::Storage;
    use storegate_core::driver::memory::MemoryStorage;

    use super::*;

    fn write_flags() -> OpenFlags {
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
    }

    async fn storage_with_bucket() -> Arc<dyn Storage> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        storage
            .create_bucket(&Context::background(), "b", &Options::new())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        storage
    }

    fn handler_over(storage: Arc<dyn Storage>, root: Option<&str>, read_only: bool) -> SftpHandler {
        let vfs = VirtualFs::new(storage, root.map(str::to_owned), read_only);
        SftpHandler::new(vfs, Context::background(), BufferConfig::default())
    }

    async fn put(h: &mut SftpHandler, path: &str, data: &[u8]) {
        let handle = h
            .open(1, path.to_owned(), write_flags(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("open {path}: {e:?}"))
            .handle;
        h.write(2, handle.clone(), 0, data.to_vec())
            .await
            .unwrap_or_else(|e| panic!("write {path}: {e:?}"));
        h.close(3, handle)
            .await
            .unwrap_or_else(|e| panic!("close {path}: {e:?}"));
    }

    async fn get(h: &mut SftpHandler, path: &str) -> Vec<u8> {
        let handle = h
            .open(1, path.to_owned(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("open {path}: {e:?}"))
            .handle;
        let mut out = Vec::new();
        loop {
            match h.read(2, handle.clone(), out.len() as u64, 4).await {
                Ok(data) => out.extend_from_slice(&data.data),
                Err(StatusCode::Eof) => break,
                Err(e) => panic!("read {path}: {e:?}"),
            }
        }
        h.close(3, handle)
            .await
            .unwrap_or_else(|e| panic!("close {path}: {e:?}"));
        out
    }

    async fn list(h: &mut SftpHandler, path: &str) -> Vec<String> {
        let handle = h
            .opendir(1, path.to_owned())
            .await
            .unwrap_or_else(|e| panic!("opendir {path}: {e:?}"))
            .handle;
        let mut names = Vec::new();
        loop {
            match h.readdir(2, handle.clone()).await {
                Ok(name) => names.extend(name.files.into_iter().map(|f| f.filename)),
                Err(StatusCode::Eof) => break,
                Err(e) => panic!("readdir {path}: {e:?}"),
            }
        }
        names
    }

    #[tokio::test]
    async fn test_should_write_then_read_file() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/docs/hello.txt", b"hello world").await;

        assert_eq!(get(&mut h, "/b/docs/hello.txt").await, b"hello world");
        let attrs = h
            .stat(4, "/b/docs/hello.txt".to_owned())
            .await
            .unwrap_or_else(|e| panic!("stat: {e:?}"))
            .attrs;
        assert_eq!(attrs.size, Some(11));
        assert_eq!(attrs.permissions, Some(FILE_MODE));

        let object = h
            .vfs
            .bucket("b")
            .stat(&Context::background(), "docs/hello.txt", &Options::new())
            .await
            .unwrap_or_else(|e| panic!("backend stat: {e}"));
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_should_zero_fill_sparse_writes_and_spill() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let vfs = VirtualFs::new(storage_with_bucket().await, None, false);
        let buffer = BufferConfig::builder()
            .threshold(4)
            .temp_dir(Some(dir.path().to_path_buf()))
            .build();
        let mut h = SftpHandler::new(vfs, Context::background(), buffer);

        let handle = h
            .open(1, "/b/sparse.bin".to_owned(), write_flags(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("open: {e:?}"))
            .handle;
        h.write(2, handle.clone(), 6, b"xyz".to_vec())
            .await
            .unwrap_or_else(|e| panic!("write: {e:?}"));
        h.write(3, handle.clone(), 0, b"ab".to_vec())
            .await
            .unwrap_or_else(|e| panic!("write: {e:?}"));
        let attrs = h
            .fstat(4, handle.clone())
            .await
            .unwrap_or_else(|e| panic!("fstat: {e:?}"))
            .attrs;
        assert_eq!(attrs.size, Some(9));
        h.close(5, handle.clone())
            .await
            .unwrap_or_else(|e| panic!("close: {e:?}"));
        // A second close of the same handle is harmless.
        h.close(6, handle)
            .await
            .unwrap_or_else(|e| panic!("close again: {e:?}"));

        assert_eq!(get(&mut h, "/b/sparse.bin").await, b"ab\0\0\0\0xyz");
    }

    #[tokio::test]
    async fn test_should_reopen_stream_on_seek() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/digits", b"0123456789").await;
        let handle = h
            .open(1, "/b/digits".to_owned(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("open: {e:?}"))
            .handle;

        let data = h.read(2, handle.clone(), 5, 3).await;
        assert_eq!(data.map(|d| d.data), Ok(b"567".to_vec()));
        let data = h.read(3, handle.clone(), 1, 2).await;
        assert_eq!(data.map(|d| d.data), Ok(b"12".to_vec()));
        assert_eq!(h.read(4, handle, 10, 2).await.err(), Some(StatusCode::Eof));
    }

    #[tokio::test]
    async fn test_should_list_root_buckets_and_virtual_dirs() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/top.txt", b"1").await;
        put(&mut h, "/b/dir/inner.txt", b"2").await;

        assert_eq!(list(&mut h, "/").await, vec!["b"]);
        assert_eq!(list(&mut h, "/b").await, vec!["dir", "top.txt"]);
        assert_eq!(list(&mut h, "/b/dir").await, vec!["inner.txt"]);

        let attrs = h
            .stat(1, "/b/dir".to_owned())
            .await
            .unwrap_or_else(|e| panic!("stat dir: {e:?}"))
            .attrs;
        assert_eq!(attrs.permissions, Some(DIR_MODE));
        assert_eq!(
            h.opendir(2, "/b/missing".to_owned()).await.err(),
            Some(StatusCode::NoSuchFile)
        );
    }

    #[tokio::test]
    async fn test_should_page_large_directories() {
        let storage = storage_with_bucket().await;
        let bucket = storage.bucket("b");
        for i in 0..300 {
            bucket
                .write(
                    &Context::background(),
                    &format!("many/f{i:03}"),
                    storegate_core::bytes_source(&b"x"[..]),
                    Some(1),
                    "",
                    &Options::new(),
                )
                .await
                .unwrap_or_else(|e| panic!("seed: {e}"));
        }
        let mut h = handler_over(storage, None, false);
        let handle = h
            .opendir(1, "/b/many".to_owned())
            .await
            .unwrap_or_else(|e| panic!("opendir: {e:?}"))
            .handle;
        let first = h
            .readdir(2, handle.clone())
            .await
            .unwrap_or_else(|e| panic!("readdir: {e:?}"));
        assert_eq!(first.files.len(), READDIR_CHUNK);
        assert_eq!(list(&mut h, "/b/many").await.len(), 300);
    }

    #[tokio::test]
    async fn test_should_reject_files_at_bucket_level() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        let read = h
            .open(1, "/b".to_owned(), OpenFlags::READ, FileAttributes::default())
            .await;
        assert_eq!(read.err(), Some(StatusCode::NoSuchFile));
        let write = h
            .open(2, "/b".to_owned(), write_flags(), FileAttributes::default())
            .await;
        assert_eq!(write.err(), Some(StatusCode::PermissionDenied));
        let append = h
            .open(
                3,
                "/b/log".to_owned(),
                OpenFlags::WRITE | OpenFlags::APPEND,
                FileAttributes::default(),
            )
            .await;
        assert_eq!(append.err(), Some(StatusCode::OpUnsupported));
        assert_eq!(
            h.remove(4, "/b".to_owned()).await.err(),
            Some(StatusCode::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn test_should_refuse_exclusive_create_of_existing_file() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/once", b"1").await;
        let again = h
            .open(
                1,
                "/b/once".to_owned(),
                write_flags() | OpenFlags::EXCLUDE,
                FileAttributes::default(),
            )
            .await;
        assert_eq!(again.err(), Some(StatusCode::Failure));
    }

    #[tokio::test]
    async fn test_should_create_buckets_with_mkdir() {
        let storage = storage_with_bucket().await;
        let mut h = handler_over(Arc::clone(&storage), None, false);

        h.mkdir(1, "/fresh".to_owned(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("mkdir: {e:?}"));
        h.mkdir(2, "/fresh".to_owned(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("mkdir existing: {e:?}"));
        h.mkdir(3, "/fresh/nested/deeper".to_owned(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("mkdir nested: {e:?}"));
        assert_eq!(
            h.mkdir(4, "/".to_owned(), FileAttributes::default()).await.err(),
            Some(StatusCode::PermissionDenied)
        );
        assert_eq!(list(&mut h, "/").await, vec!["b", "fresh"]);
    }

    #[tokio::test]
    async fn test_should_rmdir_prefix_recursively() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/tree/a.txt", b"a").await;
        put(&mut h, "/b/tree/sub/b.txt", b"b").await;
        put(&mut h, "/b/keep.txt", b"k").await;

        h.rmdir(1, "/b/tree".to_owned())
            .await
            .unwrap_or_else(|e| panic!("rmdir: {e:?}"));
        assert_eq!(list(&mut h, "/b").await, vec!["keep.txt"]);
        assert_eq!(
            h.rmdir(2, "/b/tree".to_owned()).await.err(),
            Some(StatusCode::NoSuchFile)
        );
    }

    #[tokio::test]
    async fn test_should_only_remove_empty_buckets() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/file", b"x").await;
        assert_eq!(
            h.rmdir(1, "/b".to_owned()).await.err(),
            Some(StatusCode::PermissionDenied)
        );
        h.remove(2, "/b/file".to_owned())
            .await
            .unwrap_or_else(|e| panic!("remove: {e:?}"));
        h.rmdir(3, "/b".to_owned())
            .await
            .unwrap_or_else(|e| panic!("rmdir bucket: {e:?}"));
        assert!(list(&mut h, "/").await.is_empty());
    }

    #[tokio::test]
    async fn test_should_rename_within_bucket_only() {
        let storage = storage_with_bucket().await;
        storage
            .create_bucket(&Context::background(), "other", &Options::new())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let mut h = handler_over(storage, None, false);
        put(&mut h, "/b/old.txt", b"data").await;

        h.rename(1, "/b/old.txt".to_owned(), "/b/new.txt".to_owned())
            .await
            .unwrap_or_else(|e| panic!("rename: {e:?}"));
        assert_eq!(get(&mut h, "/b/new.txt").await, b"data");
        assert_eq!(
            h.stat(2, "/b/old.txt".to_owned()).await.err(),
            Some(StatusCode::NoSuchFile)
        );

        let cross = h
            .rename(3, "/b/new.txt".to_owned(), "/other/new.txt".to_owned())
            .await;
        assert_eq!(cross.err(), Some(StatusCode::OpUnsupported));
        let missing = h
            .rename(4, "/b/ghost".to_owned(), "/b/still-ghost".to_owned())
            .await;
        assert_eq!(missing.err(), Some(StatusCode::NoSuchFile));
    }

    #[tokio::test]
    async fn test_should_rename_virtual_directory() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        put(&mut h, "/b/src/one", b"1").await;
        put(&mut h, "/b/src/deep/two", b"2").await;

        h.rename(1, "/b/src".to_owned(), "/b/dst".to_owned())
            .await
            .unwrap_or_else(|e| panic!("rename dir: {e:?}"));
        assert_eq!(list(&mut h, "/b").await, vec!["dst"]);
        assert_eq!(get(&mut h, "/b/dst/deep/two").await, b"2");
    }

    #[tokio::test]
    async fn test_should_reject_writes_when_read_only() {
        let storage = storage_with_bucket().await;
        let mut writer = handler_over(Arc::clone(&storage), None, false);
        put(&mut writer, "/b/file", b"x").await;

        let mut h = handler_over(storage, None, true);
        let open = h
            .open(1, "/b/new".to_owned(), write_flags(), FileAttributes::default())
            .await;
        assert_eq!(open.err(), Some(StatusCode::PermissionDenied));
        for result in [
            h.remove(2, "/b/file".to_owned()).await,
            h.mkdir(3, "/x".to_owned(), FileAttributes::default()).await,
            h.rmdir(4, "/b".to_owned()).await,
            h.rename(5, "/b/file".to_owned(), "/b/moved".to_owned()).await,
        ] {
            assert_eq!(result.err(), Some(StatusCode::PermissionDenied));
        }
        assert_eq!(get(&mut h, "/b/file").await, b"x");
    }

    #[tokio::test]
    async fn test_should_confine_user_to_home_bucket() {
        let storage = storage_with_bucket().await;
        storage
            .create_bucket(&Context::background(), "secret", &Options::new())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let mut h = handler_over(storage, Some("b"), false);

        put(&mut h, "/notes.txt", b"mine").await;
        assert_eq!(list(&mut h, "/").await, vec!["notes.txt"]);
        assert_eq!(get(&mut h, "/../notes.txt").await, b"mine");
        assert_eq!(
            h.rmdir(1, "/".to_owned()).await.err(),
            Some(StatusCode::PermissionDenied)
        );
        // "/secret" is a key inside the home bucket, not the other bucket.
        assert_eq!(
            h.opendir(2, "/secret".to_owned()).await.err(),
            Some(StatusCode::NoSuchFile)
        );
    }

    #[tokio::test]
    async fn test_should_normalize_realpath() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        let name = h
            .realpath(1, "b/./x/../y".to_owned())
            .await
            .unwrap_or_else(|e| panic!("realpath: {e:?}"));
        assert_eq!(name.files[0].filename, "/b/y");
        let root = h
            .realpath(2, ".".to_owned())
            .await
            .unwrap_or_else(|e| panic!("realpath: {e:?}"));
        assert_eq!(root.files[0].filename, "/");
    }

    #[tokio::test]
    async fn test_should_report_links_as_unsupported() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        let result = h.symlink(1, "/b/a".to_owned(), "/b/b".to_owned()).await;
        assert_eq!(result.err(), Some(StatusCode::OpUnsupported));
        let result = h.readlink(2, "/b/a".to_owned()).await;
        assert_eq!(result.err(), Some(StatusCode::OpUnsupported));
    }

    #[tokio::test]
    async fn test_should_accept_setstat_silently() {
        let mut h = handler_over(storage_with_bucket().await, None, false);
        let status = h
            .setstat(1, "/b/anything".to_owned(), FileAttributes::default())
            .await
            .unwrap_or_else(|e| panic!("setstat: {e:?}"));
        assert_eq!(status.status_code, StatusCode::Ok);
    }
}
