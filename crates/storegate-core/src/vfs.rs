//! Two-level virtual filesystem over a flat key space.
//!
//! File-oriented transports see the storage as:
//!
//! ```text
//! /                     root: one directory per bucket
//! /<bucket>             bucket contents
//! /<bucket>/<a>/<b>     key "a/b"; "a" is a virtual directory
//! ```
//!
//! When a root bucket is configured (single-bucket mode or a per-user home
//! bucket) the bucket level disappears and `/` maps to that bucket.
//!
//! Directories below the bucket level are never stored. They are derived from
//! a live prefix scan on every request, so a directory vanishes as soon as
//! its last object is deleted. A listing that races with the deletion of
//! that last object may still show the directory once.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::object::Object;
use crate::options::Options;
use crate::storage::{Bucket, Storage};

/// Normalize a client path: collapse `//` and `.`, resolve `..` without
/// escaping the root, and return it rooted at `/`.
///
/// # Examples
///
/// ```
/// use storegate_core::vfs::clean_path;
///
/// assert_eq!(clean_path("a//b/./c/.."), "/a/b");
/// assert_eq!(clean_path("../../x"), "/x");
/// assert_eq!(clean_path(""), "/");
/// ```
#[must_use]
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Where a cleaned path points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// The list of buckets.
    Root,
    /// A bucket.
    Bucket(String),
    /// A key (file or virtual directory) inside a bucket.
    Object {
        /// Bucket name.
        bucket: String,
        /// Key without leading or trailing `/`.
        key: String,
    },
}

impl Location {
    /// The bucket name, if any.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        match self {
            Self::Root => None,
            Self::Bucket(b) | Self::Object { bucket: b, .. } => Some(b),
        }
    }
}

/// A directory entry or stat result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsEntry {
    /// Final path segment (`/` for the root).
    pub name: String,
    /// Directory flag.
    pub is_dir: bool,
    /// Size in bytes.
    pub size: u64,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Modification time.
    pub modified: DateTime<Utc>,
    /// MIME type of files.
    pub content_type: String,
    /// Entity tag of files.
    pub etag: Option<String>,
}

impl VfsEntry {
    fn dir(name: &str, created: DateTime<Utc>, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.to_owned(),
            is_dir: true,
            size: 0,
            created,
            modified,
            content_type: String::new(),
            etag: None,
        }
    }

    fn from_object(name: &str, obj: &Object) -> Self {
        Self {
            name: name.to_owned(),
            is_dir: obj.is_dir,
            size: obj.size,
            created: obj.created,
            modified: obj.updated,
            content_type: obj.content_type.clone(),
            etag: obj.etag.clone(),
        }
    }
}

/// Path resolution and directory synthesis shared by SFTP and WebDAV.
#[derive(Debug, Clone)]
pub struct VirtualFs {
    storage: Arc<dyn Storage>,
    root_bucket: Option<String>,
    read_only: bool,
    hide_dot_files: bool,
}

impl VirtualFs {
    /// Expose `storage`, optionally chrooted into `root_bucket`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, root_bucket: Option<String>, read_only: bool) -> Self {
        Self {
            storage,
            root_bucket: root_bucket.filter(|b| !b.is_empty()),
            read_only,
            hide_dot_files: false,
        }
    }

    /// Hide entries whose name starts with `.` from listings.
    #[must_use]
    pub fn hide_dot_files(mut self, hide: bool) -> Self {
        self.hide_dot_files = hide;
        self
    }

    /// The underlying storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether mutations are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the bucket level is hidden.
    #[must_use]
    pub fn has_root_bucket(&self) -> bool {
        self.root_bucket.is_some()
    }

    /// Fail with `PermissionDenied` in read-only mode.
    pub fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            Err(StorageError::permission_denied("filesystem is read-only"))
        } else {
            Ok(())
        }
    }

    /// A bucket handle.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        self.storage.bucket(name)
    }

    /// Resolve a client path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Location {
        let cleaned = clean_path(path);
        let rest = cleaned.trim_start_matches('/');

        if let Some(bucket) = &self.root_bucket {
            return if rest.is_empty() {
                Location::Bucket(bucket.clone())
            } else {
                Location::Object {
                    bucket: bucket.clone(),
                    key: rest.to_owned(),
                }
            };
        }

        match rest.split_once('/') {
            None if rest.is_empty() => Location::Root,
            None => Location::Bucket(rest.to_owned()),
            Some((bucket, key)) => Location::Object {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            },
        }
    }

    /// Describe a location. A key with no object but with children is a
    /// virtual directory.
    pub async fn stat(&self, ctx: &Context, loc: &Location) -> StorageResult<VfsEntry> {
        ctx.check()?;
        match loc {
            Location::Root => {
                let now = Utc::now();
                Ok(VfsEntry::dir("/", now, now))
            }
            Location::Bucket(name) => {
                let info = self.storage.bucket(name).info(ctx).await?;
                Ok(VfsEntry::dir(name, info.created, info.created))
            }
            Location::Object { bucket, key } => {
                let handle = self.storage.bucket(bucket);
                let name = key.rsplit('/').next().unwrap_or(key);
                match handle.stat(ctx, key, &Options::new()).await {
                    Ok(obj) => Ok(VfsEntry::from_object(name, &obj)),
                    Err(e) if e.is_not_exist() => {
                        let dir = handle.stat(ctx, &format!("{key}/"), &Options::new()).await?;
                        Ok(VfsEntry::dir(name, dir.created, dir.updated))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Direct children of a directory location, sorted by name.
    pub async fn read_dir(&self, ctx: &Context, loc: &Location) -> StorageResult<Vec<VfsEntry>> {
        ctx.check()?;
        let mut entries = match loc {
            Location::Root => self
                .storage
                .buckets(ctx, 0, 0, &Options::new())
                .await?
                .into_iter()
                .map(|b| VfsEntry::dir(&b.name, b.created, b.created))
                .collect(),
            Location::Bucket(name) => {
                let bucket = self.storage.bucket(name);
                bucket.info(ctx).await?;
                children(bucket.as_ref(), ctx, "").await?
            }
            Location::Object { bucket, key } => {
                let bucket = self.storage.bucket(bucket);
                let prefix = format!("{key}/");
                let entries = children(bucket.as_ref(), ctx, &prefix).await?;
                if entries.is_empty() {
                    return Err(StorageError::not_exist(format!("directory {key}")));
                }
                entries
            }
        };
        if self.hide_dot_files {
            entries.retain(|e| !e.name.starts_with('.'));
        }
        Ok(entries)
    }

    /// Delete every object under `key/`. Returns how many were deleted, or
    /// `NotExist` if there was nothing.
    pub async fn remove_tree(&self, ctx: &Context, bucket: &str, key: &str) -> StorageResult<usize> {
        let handle = self.storage.bucket(bucket);
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let objects = handle.list(ctx, &prefix, 0, 0, &Options::recursive()).await?;

        let mut removed = 0;
        for obj in objects.iter().filter(|o| !o.is_dir) {
            match handle.delete(ctx, &obj.key, &Options::new()).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_exist() => {}
                Err(e) => return Err(e),
            }
        }
        if removed == 0 {
            return Err(StorageError::not_exist(format!("directory {key}")));
        }
        Ok(removed)
    }

    /// Remove a location: buckets are force-deleted, a key deletes only that
    /// object, and a bare prefix deletes everything below it.
    pub async fn remove_all(&self, ctx: &Context, loc: &Location) -> StorageResult<()> {
        self.ensure_writable()?;
        match loc {
            Location::Root => Err(StorageError::permission_denied("cannot remove root")),
            Location::Bucket(name) => {
                if self.root_bucket.is_some() {
                    return Err(StorageError::permission_denied("cannot remove root bucket"));
                }
                self.storage.delete_bucket(ctx, name, &Options::force()).await
            }
            Location::Object { bucket, key } => {
                let handle = self.storage.bucket(bucket);
                match handle.delete(ctx, key, &Options::new()).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_exist() => self.remove_tree(ctx, bucket, key).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Group a recursive listing under `prefix` into files and first-level
/// virtual directories.
async fn children(bucket: &dyn Bucket, ctx: &Context, prefix: &str) -> StorageResult<Vec<VfsEntry>> {
    let objects = bucket.list(ctx, prefix, 0, 0, &Options::recursive()).await?;
    let mut entries: BTreeMap<String, VfsEntry> = BTreeMap::new();

    for obj in &objects {
        let Some(rest) = obj.key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.split_once('/') {
            Some((dir, _)) => {
                entries
                    .entry(dir.to_owned())
                    .and_modify(|e| {
                        if e.is_dir {
                            e.created = e.created.min(obj.created);
                            e.modified = e.modified.max(obj.updated);
                        }
                    })
                    .or_insert_with(|| VfsEntry::dir(dir, obj.created, obj.updated));
            }
            None if obj.is_dir => {
                entries
                    .entry(rest.to_owned())
                    .or_insert_with(|| VfsEntry::dir(rest, obj.created, obj.updated));
            }
            None => {
                entries.insert(rest.to_owned(), VfsEntry::from_object(rest, obj));
            }
        }
    }
    Ok(entries.into_values().collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
