//! Driver registry: scheme name to storage factory.
//!
//! Drivers register themselves once at startup under one or more scheme
//! names. [`open`] parses a DSN, picks the factory for its scheme and lets it
//! build a [`Storage`].
//!
//! DSNs take the form `scheme://authority/path?query` or `scheme:path`.
//!
//! # Usage
//!
//! ```
//! use storegate_core::registry::Dsn;
//!
//! let dsn = Dsn::parse("mem://scratch?bucket=uploads").unwrap();
//! assert_eq!(dsn.scheme(), "mem");
//! assert_eq!(dsn.host(), "scratch");
//! assert_eq!(dsn.query("bucket"), Some("uploads"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::storage::Storage;

/// Builds a [`Storage`] from a parsed DSN.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open a storage instance.
    async fn open(&self, ctx: &Context, dsn: &Dsn) -> StorageResult<Arc<dyn Storage>>;
}

// ---------------------------------------------------------------------------
// Dsn
// ---------------------------------------------------------------------------

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    raw: String,
    scheme: String,
    host: String,
    path: String,
    query: BTreeMap<String, String>,
}

impl Dsn {
    /// Parse `scheme://host/path?query` or `scheme:path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] for an empty DSN or one
    /// without a scheme.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StorageError::invalid_argument("empty dsn"));
        }

        let (scheme, rest, hierarchical) = if let Some((scheme, rest)) = trimmed.split_once("://")
        {
            (scheme, rest, true)
        } else if let Some((scheme, rest)) = trimmed.split_once(':') {
            (scheme, rest, false)
        } else {
            return Err(StorageError::invalid_argument(format!(
                "dsn has no scheme: {trimmed}"
            )));
        };

        let scheme = scheme.trim().to_ascii_lowercase();
        if scheme.is_empty() {
            return Err(StorageError::invalid_argument(format!(
                "dsn has no scheme: {trimmed}"
            )));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, query),
            None => (rest, ""),
        };
        let (host, path) = if hierarchical {
            match location.split_once('/') {
                Some((host, path)) => (host.to_owned(), format!("/{path}")),
                None => (location.to_owned(), String::new()),
            }
        } else {
            (String::new(), location.to_owned())
        };

        let query = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            raw: trimmed.to_owned(),
            scheme,
            host,
            path,
            query,
        })
    }

    /// The original string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lower-cased scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Authority part of a `scheme://` DSN, empty otherwise.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path part (leading `/` kept for `scheme://` DSNs).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A query parameter.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Thread-safe scheme-to-factory table.
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<HashMap<String, Arc<dyn DriverFactory>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// # Panics
    ///
    /// Panics on an empty or already registered name. Registration happens
    /// at startup, so both are programming errors.
    pub fn register(&self, name: &str, factory: Arc<dyn DriverFactory>) {
        let name = name.trim().to_ascii_lowercase();
        assert!(!name.is_empty(), "storage: register driver with empty name");

        let mut drivers = self.drivers.write();
        assert!(
            !drivers.contains_key(&name),
            "storage: register called twice for driver {name}"
        );
        debug!(scheme = %name, "registered storage driver");
        drivers.insert(name, factory);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.drivers.read().contains_key(&name.to_ascii_lowercase())
    }

    /// Registered scheme names, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve `dsn` to a storage instance.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] for an empty or schemeless DSN.
    /// - [`StorageError::NotExist`] for an unregistered scheme.
    /// - Whatever the driver returns.
    pub async fn open(&self, ctx: &Context, dsn: &str) -> StorageResult<Arc<dyn Storage>> {
        ctx.check()?;
        let dsn = Dsn::parse(dsn)?;
        let factory = self
            .drivers
            .read()
            .get(dsn.scheme())
            .cloned()
            .ok_or_else(|| {
                StorageError::not_exist(format!("unknown storage driver {:?}", dsn.scheme()))
            })?;
        let storage = factory.open(ctx, &dsn).await?;
        info!(scheme = dsn.scheme(), "opened storage");
        Ok(storage)
    }
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

/// The process-wide registry.
#[must_use]
pub fn global() -> &'static Registry {
    &GLOBAL
}

/// Register a driver in the process-wide registry. See [`Registry::register`].
pub fn register(name: &str, factory: Arc<dyn DriverFactory>) {
    GLOBAL.register(name, factory);
}

/// Open a DSN through the process-wide registry. See [`Registry::open`].
pub async fn open(ctx: &Context, dsn: &str) -> StorageResult<Arc<dyn Storage>> {
    GLOBAL.open(ctx, dsn).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
