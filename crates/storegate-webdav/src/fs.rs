//! dav-server filesystem over a [`VirtualFs`].
//!
//! Collections map onto the root (bucket list), buckets and virtual
//! directories; everything else is an object. `MKCOL` at the top level
//! creates a bucket, deeper collections only exist while they hold objects.

use std::sync::Arc;
use std::time::SystemTime;

use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures::stream;
use storegate_core::utils::guess_content_type;
use storegate_core::{
    BufferConfig, Context, ErrorKind, Location, Options, Storage, VfsEntry, VirtualFs, WriteBuffer,
};
use tracing::{debug, error, info};

use crate::config::WebDavConfig;
use crate::error::to_fs_error;
use crate::file::{StoreFile, StoreMeta};

const OCTET_STREAM: &str = "application/octet-stream";

/// WebDAV view of a [`Storage`].
#[derive(Debug, Clone)]
pub struct StoreFs {
    vfs: VirtualFs,
    ctx: Context,
    buffer: BufferConfig,
    default_content_type: String,
}

impl StoreFs {
    /// Build a filesystem from the front-end settings. Every backend call
    /// runs under `ctx`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, config: &WebDavConfig, ctx: Context) -> Self {
        let vfs = VirtualFs::new(storage, config.bucket.clone(), config.read_only)
            .hide_dot_files(config.hide_dot_files);
        Self {
            vfs,
            ctx,
            buffer: config.buffer_config(),
            default_content_type: config.default_content_type.clone(),
        }
    }

    fn resolve(&self, path: &DavPath) -> (String, Location) {
        let raw = path.as_pathbuf().to_string_lossy().into_owned();
        let loc = self.vfs.resolve(&raw);
        (raw, loc)
    }

    fn content_type_for(&self, key: &str) -> String {
        let guessed = guess_content_type(key);
        if guessed == OCTET_STREAM {
            self.default_content_type.clone()
        } else {
            guessed
        }
    }

    fn ensure_writable(&self, path: &str) -> FsResult<()> {
        self.vfs
            .ensure_writable()
            .map_err(|e| to_fs_error("write", path, &e))
    }

    async fn open_file(
        &self,
        raw: &str,
        loc: Location,
        options: OpenOptions,
    ) -> FsResult<Box<dyn DavFile>> {
        let writing =
            options.write || options.append || options.truncate || options.create || options.create_new;
        let Location::Object { bucket, key } = loc else {
            return Err(if writing { FsError::Forbidden } else { FsError::NotFound });
        };
        let handle = self.vfs.bucket(&bucket);

        if !writing {
            let object = handle
                .stat(&self.ctx, &key, &Options::new())
                .await
                .map_err(|e| to_fs_error("open", raw, &e))?;
            if object.is_dir {
                return Err(FsError::NotFound);
            }
            return Ok(Box::new(StoreFile::reader(handle, self.ctx.clone(), object)));
        }

        self.ensure_writable(raw)?;
        if options.append {
            return Err(FsError::NotImplemented);
        }
        if let (Some(size), Some(max)) = (options.size, self.buffer.max_size) {
            if size > max {
                debug!(path = raw, size, max, "webdav upload exceeds size limit");
                return Err(FsError::TooLarge);
            }
        }
        handle
            .info(&self.ctx)
            .await
            .map_err(|e| to_fs_error("open", raw, &e))?;
        if options.create_new {
            match handle.stat(&self.ctx, &key, &Options::new()).await {
                Ok(_) => return Err(FsError::Exists),
                Err(e) if e.is_not_exist() => {}
                Err(e) => return Err(to_fs_error("open", raw, &e)),
            }
        }

        let content_type = self.content_type_for(&key);
        let buffer = WriteBuffer::new(self.buffer.clone());
        debug!(bucket = %bucket, key = %key, content_type = %content_type, "webdav upload opened");
        Ok(Box::new(StoreFile::writer(
            handle,
            self.ctx.clone(),
            key,
            buffer,
            content_type,
        )))
    }

    async fn make_dir(&self, raw: &str, loc: Location) -> FsResult<()> {
        self.ensure_writable(raw)?;
        match loc {
            Location::Root => Err(FsError::Forbidden),
            Location::Bucket(_) if self.vfs.has_root_bucket() => Err(FsError::Exists),
            Location::Bucket(name) => {
                match self
                    .vfs
                    .storage()
                    .create_bucket(&self.ctx, &name, &Options::new())
                    .await
                {
                    Ok(_) => {
                        info!(bucket = %name, "bucket created over webdav");
                        Ok(())
                    }
                    Err(e) => Err(to_fs_error("mkcol", raw, &e)),
                }
            }
            Location::Object { ref bucket, .. } => {
                self.vfs
                    .bucket(bucket)
                    .info(&self.ctx)
                    .await
                    .map_err(|e| to_fs_error("mkcol", raw, &e))?;
                match self.vfs.stat(&self.ctx, &loc).await {
                    Ok(_) => Err(FsError::Exists),
                    Err(e) if e.is_not_exist() => Ok(()),
                    Err(e) => Err(to_fs_error("mkcol", raw, &e)),
                }
            }
        }
    }

    async fn rename_location(&self, from: &str, src: Location, to: &str, dst: Location) -> FsResult<()> {
        self.ensure_writable(from)?;
        let (
            Location::Object {
                bucket: src_bucket,
                key: src_key,
            },
            Location::Object {
                bucket: dst_bucket,
                key: dst_key,
            },
        ) = (src, dst)
        else {
            return Err(FsError::Forbidden);
        };

        let pairs = self.move_plan(from, &src_bucket, &src_key, &dst_key).await?;
        let target = self.vfs.bucket(&dst_bucket);
        for (from_key, to_key) in &pairs {
            if src_bucket == dst_bucket {
                target
                    .move_object(&self.ctx, to_key, &src_bucket, from_key, &Options::new())
                    .await
                    .map_err(|e| to_fs_error("move", from, &e))?;
                continue;
            }

            target
                .copy(&self.ctx, to_key, &src_bucket, from_key, &Options::new())
                .await
                .map_err(|e| to_fs_error("move", from, &e))?;
            if let Err(e) = self
                .vfs
                .bucket(&src_bucket)
                .delete(&self.ctx, from_key, &Options::new())
                .await
            {
                error!(
                    from = %format!("{src_bucket}/{from_key}"),
                    to = %format!("{dst_bucket}/{to_key}"),
                    error = %e,
                    "copied across buckets but could not delete the source"
                );
                return Err(FsError::GeneralFailure);
            }
        }
        debug!(from, to, objects = pairs.len(), "webdav move");
        Ok(())
    }

    /// Source and destination keys for moving `src_key`: the object itself,
    /// or every object below it when it is a virtual directory.
    async fn move_plan(
        &self,
        path: &str,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> FsResult<Vec<(String, String)>> {
        let handle = self.vfs.bucket(bucket);
        match handle.stat(&self.ctx, src_key, &Options::new()).await {
            Ok(obj) if !obj.is_dir => return Ok(vec![(src_key.to_owned(), dst_key.to_owned())]),
            Ok(_) => {}
            Err(e) if e.is_not_exist() => {}
            Err(e) => return Err(to_fs_error("move", path, &e)),
        }

        let prefix = format!("{src_key}/");
        let objects = handle
            .list(&self.ctx, &prefix, 0, 0, &Options::recursive())
            .await
            .map_err(|e| to_fs_error("move", path, &e))?;
        let pairs: Vec<_> = objects
            .iter()
            .filter(|o| !o.is_dir)
            .filter_map(|o| {
                let rest = o.key.strip_prefix(&prefix)?;
                Some((o.key.clone(), format!("{dst_key}/{rest}")))
            })
            .collect();
        if pairs.is_empty() {
            return Err(FsError::NotFound);
        }
        Ok(pairs)
    }
}

impl DavFileSystem for StoreFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            self.open_file(&raw, loc, options).await
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            let entries = self
                .vfs
                .read_dir(&self.ctx, &loc)
                .await
                .map_err(|e| to_fs_error("propfind", &raw, &e))?;
            let entries: Vec<Box<dyn DavDirEntry>> = entries
                .into_iter()
                .map(|e| Box::new(StoreDirEntry::from(e)) as Box<dyn DavDirEntry>)
                .collect();
            Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))) as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            let entry = self
                .vfs
                .stat(&self.ctx, &loc)
                .await
                .map_err(|e| to_fs_error("stat", &raw, &e))?;
            Ok(Box::new(meta_of(&entry)) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            self.make_dir(&raw, loc).await
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            self.vfs
                .remove_all(&self.ctx, &loc)
                .await
                .map_err(|e| to_fs_error("delete", &raw, &e))
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (raw, loc) = self.resolve(path);
            match self.vfs.remove_all(&self.ctx, &loc).await {
                Ok(()) => Ok(()),
                // The children went first, taking the virtual directory with them.
                Err(e) if e.kind() == ErrorKind::NotExist && matches!(loc, Location::Object { .. }) => {
                    Ok(())
                }
                Err(e) => Err(to_fs_error("delete", &raw, &e)),
            }
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (from_raw, src) = self.resolve(from);
            let (to_raw, dst) = self.resolve(to);
            self.rename_location(&from_raw, src, &to_raw, dst).await
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (from_raw, src) = self.resolve(from);
            let (_, dst) = self.resolve(to);
            self.ensure_writable(&from_raw)?;
            let (
                Location::Object {
                    bucket: src_bucket,
                    key: src_key,
                },
                Location::Object {
                    bucket: dst_bucket,
                    key: dst_key,
                },
            ) = (src, dst)
            else {
                return Err(FsError::Forbidden);
            };
            self.vfs
                .bucket(&dst_bucket)
                .copy(&self.ctx, &dst_key, &src_bucket, &src_key, &Options::new())
                .await
                .map_err(|e| to_fs_error("copy", &from_raw, &e))?;
            Ok(())
        })
    }
}

fn meta_of(entry: &VfsEntry) -> StoreMeta {
    StoreMeta {
        len: entry.size,
        is_dir: entry.is_dir,
        created: SystemTime::from(entry.created),
        modified: SystemTime::from(entry.modified),
    }
}

#[derive(Debug)]
struct StoreDirEntry {
    name: String,
    meta: StoreMeta,
}

impl From<VfsEntry> for StoreDirEntry {
    fn from(entry: VfsEntry) -> Self {
        let meta = meta_of(&entry);
        Self {
            name: entry.name,
            meta,
        }
    }
}

impl DavDirEntry for StoreDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}
