//! Lazily opened, shared access to the local store.
//!
//! The first caller triggers the open; concurrent callers await the same
//! in-flight open. The outcome is memoized, including failure, so a broken
//! store is reported as [`Error::StoreUnavailable`] without retrying the open
//! on every access.

use crate::store::{LocalStore, StoreOptions};
use crate::{error::Result, Error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

struct Inner {
    options: StoreOptions,
    cell: OnceCell<std::result::Result<LocalStore, String>>,
    open_attempts: AtomicUsize,
}

/// Shared handle to the one local store of this process.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Inner>,
}

impl StoreHandle {
    /// A handle that opens the store on first use.
    pub fn new(options: StoreOptions) -> Self {
        Self::with_cell(options, OnceCell::new())
    }

    /// A handle around an already opened store.
    pub fn from_store(store: LocalStore) -> Self {
        Self::with_cell(StoreOptions::in_memory(), OnceCell::new_with(Some(Ok(store))))
    }

    /// A handle whose store is known to be unusable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_cell(
            StoreOptions::in_memory(),
            OnceCell::new_with(Some(Err(reason.into()))),
        )
    }

    fn with_cell(
        options: StoreOptions,
        cell: OnceCell<std::result::Result<LocalStore, String>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                cell,
                open_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// The opened store, opening it if this is the first call.
    pub async fn get(&self) -> Result<LocalStore> {
        let inner = &self.inner;
        let outcome = inner
            .cell
            .get_or_init(|| async {
                inner.open_attempts.fetch_add(1, Ordering::SeqCst);
                LocalStore::open(&inner.options).await.map_err(|e| {
                    tracing::error!(error = %e, "local store failed to open, running remote-only");
                    e.to_string()
                })
            })
            .await;

        match outcome {
            Ok(store) => Ok(store.clone()),
            Err(reason) => Err(Error::StoreUnavailable(reason.clone())),
        }
    }

    /// Whether the store is usable. Opens it if needed.
    pub async fn is_available(&self) -> bool {
        self.get().await.is_ok()
    }

    /// How many times an open was actually attempted.
    pub fn open_attempts(&self) -> usize {
        self.inner.open_attempts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("path", &self.inner.options.path)
            .field("initialized", &self.inner.cell.initialized())
            .finish()
    }
}
