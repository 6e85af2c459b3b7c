//! Per-call cancellation and deadlines.
//!
//! Every storage call receives a [`Context`]. Transports create one per
//! connection or request and cancel it when the peer goes away; a call may
//! derive a child with its own deadline (for example a short timeout around a
//! capability probe) without affecting sibling calls on the same connection.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Cancellation scope for a storage call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is
    /// called.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, typically a transport's shutdown token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child that additionally expires after `timeout`.
    ///
    /// Cancelling the child does not cancel `self`; cancelling `self`
    /// cancels the child. The child's deadline never extends the parent's.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child sharing the parent's deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has been cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`StorageError::Canceled`] if the context is done.
    pub fn check(&self) -> StorageResult<()> {
        if self.is_done() {
            Err(StorageError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    ///
    /// An already-finished context fails without polling `fut`.
    pub async fn run<T, F>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.check()?;
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(StorageError::Canceled),
            () = expired => Err(StorageError::Canceled),
            res = fut => res,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
