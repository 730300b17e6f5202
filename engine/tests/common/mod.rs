//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use gymsync_engine::{EntityId, Filter, MemoryRemote, RemoteChange, RemoteDocument, RemoteStore, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// A remote store that fails writes for chosen document ids and can hold
/// writes until released.
pub struct FlakyRemote {
    pub inner: MemoryRemote,
    failing: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self {
            inner: MemoryRemote::new(),
            failing: Mutex::new(HashSet::new()),
            attempts: AtomicUsize::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    /// Writes block until a permit is added to the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut remote = Self::new();
        remote.gate = Some(gate.clone());
        (remote, gate)
    }

    pub fn fail_id(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Write attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn before_write(&self, path: &str, id: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(gymsync_engine::Error::remote_write(path, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn upsert(&self, path: &str, id: &str, data: Value) -> Result<()> {
        self.before_write(path, id).await?;
        self.inner.upsert(path, id, data).await
    }

    async fn add(&self, path: &str, data: Value) -> Result<EntityId> {
        self.inner.add(path, data).await
    }

    async fn delete(&self, path: &str, id: &str) -> Result<()> {
        self.before_write(path, id).await?;
        self.inner.delete(path, id).await
    }

    async fn read_all(&self, path: &str) -> Result<Vec<RemoteDocument>> {
        self.inner.read_all(path).await
    }

    async fn read_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>> {
        self.inner.read_recent(path, order_field, limit).await
    }

    async fn subscribe(
        &self,
        path: &str,
        filter: Option<Filter>,
    ) -> Result<BoxStream<'static, RemoteChange>> {
        self.inner.subscribe(path, filter).await
    }
}
