//! Remote store contract and an in-process implementation.
//!
//! The remote store is a document store addressed by collection path and
//! document id. Writes are idempotent by id, so replaying a mutation simply
//! overwrites the same document.

use crate::model::new_id;
use crate::{error::Result, EntityId, Error};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::broadcast;

/// A document as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: EntityId,
    pub data: Value,
}

/// A live change to a subscribed collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteChange {
    Upserted { id: EntityId, data: Value },
    Removed { id: EntityId },
}

impl RemoteChange {
    pub fn id(&self) -> &str {
        match self {
            RemoteChange::Upserted { id, .. } | RemoteChange::Removed { id } => id,
        }
    }
}

/// Equality filter on a top-level document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub equals: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.equals)
    }
}

/// The authoritative backing store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or replace the document `id`.
    async fn upsert(&self, path: &str, id: &str, data: Value) -> Result<()>;

    /// Create a document under a store-generated id.
    async fn add(&self, path: &str, data: Value) -> Result<EntityId>;

    /// Remove the document `id`. Removing a missing document succeeds.
    async fn delete(&self, path: &str, id: &str) -> Result<()>;

    async fn read_all(&self, path: &str) -> Result<Vec<RemoteDocument>>;

    /// The `limit` documents with the greatest `order_field`, descending.
    async fn read_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>>;

    /// Live changes to the collection, optionally filtered.
    async fn subscribe(
        &self,
        path: &str,
        filter: Option<Filter>,
    ) -> Result<BoxStream<'static, RemoteChange>>;
}

/// Order two documents by a JSON field, descending. Missing values sort last.
pub fn compare_field_desc(a: &Value, b: &Value, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(x), Some(y)) => compare_values(y, x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[derive(Debug, Clone)]
struct ChangeEvent {
    path: String,
    change: RemoteChange,
    // Document body before removal, or after upsert, for filtering.
    data: Value,
}

/// In-process remote store.
///
/// Used for tests and for running the engine without a server. Availability
/// can be switched off, and a number of upcoming writes can be made to fail.
#[derive(Debug)]
pub struct MemoryRemote {
    collections: DashMap<String, BTreeMap<EntityId, Value>>,
    changes: broadcast::Sender<ChangeEvent>,
    available: AtomicBool,
    failing_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            collections: DashMap::new(),
            changes,
            available: AtomicBool::new(true),
            failing_writes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, AtomicOrdering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    /// A stored document body.
    pub fn document(&self, path: &str, id: &str) -> Option<Value> {
        self.collections
            .get(path)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Number of documents under `path`.
    pub fn len(&self, path: &str) -> usize {
        self.collections.get(path).map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, path: &str) -> bool {
        self.len(path) == 0
    }

    fn check_read(&self, path: &str) -> Result<()> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(Error::remote_read(path, "remote unavailable"))
        }
    }

    fn check_write(&self, path: &str) -> Result<()> {
        if !self.available.load(AtomicOrdering::SeqCst) {
            return Err(Error::remote_write(path, "remote unavailable"));
        }
        let injected = self
            .failing_writes
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(Error::remote_write(path, "injected failure"));
        }
        Ok(())
    }

    fn publish(&self, path: &str, change: RemoteChange, data: Value) {
        let _ = self.changes.send(ChangeEvent {
            path: path.to_string(),
            change,
            data,
        });
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, path: &str, id: &str, data: Value) -> Result<()> {
        self.check_write(path)?;
        self.collections
            .entry(path.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);

        self.publish(
            path,
            RemoteChange::Upserted {
                id: id.to_string(),
                data: data.clone(),
            },
            data,
        );
        Ok(())
    }

    async fn add(&self, path: &str, data: Value) -> Result<EntityId> {
        let id = new_id();
        self.upsert(path, &id, data).await?;
        Ok(id)
    }

    async fn delete(&self, path: &str, id: &str) -> Result<()> {
        self.check_write(path)?;
        let removed = self
            .collections
            .get_mut(path)
            .and_then(|mut docs| docs.remove(id));
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);

        if let Some(data) = removed {
            self.publish(path, RemoteChange::Removed { id: id.to_string() }, data);
        }
        Ok(())
    }

    async fn read_all(&self, path: &str) -> Result<Vec<RemoteDocument>> {
        self.check_read(path)?;
        Ok(self
            .collections
            .get(path)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| RemoteDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>> {
        let mut docs = self.read_all(path).await?;
        docs.sort_by(|a, b| compare_field_desc(&a.data, &b.data, order_field));
        docs.truncate(limit);
        Ok(docs)
    }

    async fn subscribe(
        &self,
        path: &str,
        filter: Option<Filter>,
    ) -> Result<BoxStream<'static, RemoteChange>> {
        self.check_read(path)?;
        let path = path.to_string();
        let receiver = self.changes.subscribe();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let path = path.clone();
            let filter = filter.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            let wanted = event.path == path
                                && filter.as_ref().map_or(true, |f| f.matches(&event.data));
                            if wanted {
                                return Some((event.change, receiver));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscription lagged, changes dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let remote = MemoryRemote::new();
        remote.upsert("p", "a", json!({"n": 1})).await.unwrap();
        remote.upsert("p", "a", json!({"n": 2})).await.unwrap();

        assert_eq!(remote.len("p"), 1);
        assert_eq!(remote.document("p", "a"), Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn add_generates_ids() {
        let remote = MemoryRemote::new();
        let a = remote.add("p", json!({})).await.unwrap();
        let b = remote.add("p", json!({})).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(remote.len("p"), 2);
    }

    #[tokio::test]
    async fn delete_missing_succeeds() {
        let remote = MemoryRemote::new();
        remote.delete("p", "ghost").await.unwrap();
        assert!(remote.is_empty("p"));
    }

    #[tokio::test]
    async fn read_recent_orders_descending() {
        let remote = MemoryRemote::new();
        for (id, date) in [("a", "2024-01-02"), ("b", "2024-01-09"), ("c", "2024-01-05")] {
            remote.upsert("w", id, json!({ "date": date })).await.unwrap();
        }
        remote.upsert("w", "d", json!({})).await.unwrap();

        let ids: Vec<String> = remote
            .read_recent("w", "date", 3)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_writes(1);

        assert!(remote.upsert("p", "a", json!({})).await.is_err());
        assert!(remote.upsert("p", "a", json!({})).await.is_ok());
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_fails_everything() {
        let remote = MemoryRemote::new();
        remote.set_available(false);

        assert!(matches!(
            remote.upsert("p", "a", json!({})).await,
            Err(Error::RemoteWriteFailed { .. })
        ));
        assert!(matches!(
            remote.read_all("p").await,
            Err(Error::RemoteReadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn subscribe_filters_by_path_and_field() {
        let remote = MemoryRemote::new();
        let mut changes = remote
            .subscribe("w", Some(Filter::new("date", "2024-01-01")))
            .await
            .unwrap();

        remote.upsert("other", "x", json!({"date": "2024-01-01"})).await.unwrap();
        remote.upsert("w", "skip", json!({"date": "2024-02-01"})).await.unwrap();
        remote.upsert("w", "hit", json!({"date": "2024-01-01"})).await.unwrap();
        remote.delete("w", "hit").await.unwrap();

        assert_eq!(
            changes.next().await.unwrap(),
            RemoteChange::Upserted {
                id: "hit".into(),
                data: json!({"date": "2024-01-01"})
            }
        );
        assert_eq!(
            changes.next().await.unwrap(),
            RemoteChange::Removed { id: "hit".into() }
        );
    }

    #[test]
    fn change_wire_format() {
        let change = RemoteChange::Removed { id: "a".into() };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"type": "removed", "id": "a"})
        );
    }
}
