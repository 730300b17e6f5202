//! Sync queue - the ordered log of mutations awaiting remote confirmation.
//!
//! Items are stored in the `sync_queue` table and read back in insertion
//! order. An item is removed only when its remote write has been confirmed,
//! and removal happens in the same transaction that marks the entity synced.

use crate::model::{now_millis, Collection, Entity, Exercise, WeightEntry, WorkoutSession};
use crate::store::LocalStore;
use crate::{error::Result, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reference to an entity by id, the payload of delete mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
}

/// A local change that must reach the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutation {
    CreateExercise(Exercise),
    UpdateExercise(Exercise),
    DeleteExercise(EntityRef),
    CreateWorkout(WorkoutSession),
    UpdateWorkout(WorkoutSession),
    DeleteWorkout(EntityRef),
    CreateWeightEntry(WeightEntry),
}

impl Mutation {
    /// Wire name of the mutation type.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateExercise(_) => "CREATE_EXERCISE",
            Mutation::UpdateExercise(_) => "UPDATE_EXERCISE",
            Mutation::DeleteExercise(_) => "DELETE_EXERCISE",
            Mutation::CreateWorkout(_) => "CREATE_WORKOUT",
            Mutation::UpdateWorkout(_) => "UPDATE_WORKOUT",
            Mutation::DeleteWorkout(_) => "DELETE_WORKOUT",
            Mutation::CreateWeightEntry(_) => "CREATE_WEIGHT_ENTRY",
        }
    }

    /// Id of the entity this mutation touches.
    pub fn entity_id(&self) -> &str {
        match self {
            Mutation::CreateExercise(e) | Mutation::UpdateExercise(e) => e.id(),
            Mutation::CreateWorkout(w) | Mutation::UpdateWorkout(w) => w.id(),
            Mutation::CreateWeightEntry(w) => w.id(),
            Mutation::DeleteExercise(r) | Mutation::DeleteWorkout(r) => &r.id,
        }
    }

    /// Collection of the entity this mutation touches.
    pub fn collection(&self) -> Collection {
        match self {
            Mutation::CreateExercise(_)
            | Mutation::UpdateExercise(_)
            | Mutation::DeleteExercise(_) => Collection::Exercises,
            Mutation::CreateWorkout(_)
            | Mutation::UpdateWorkout(_)
            | Mutation::DeleteWorkout(_) => Collection::Workouts,
            Mutation::CreateWeightEntry(_) => Collection::WeightEntries,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Mutation::DeleteExercise(_) | Mutation::DeleteWorkout(_)
        )
    }

    fn payload(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    fn decode(kind: &str, payload: &str) -> std::result::Result<Self, String> {
        let payload: Value =
            serde_json::from_str(payload).map_err(|e| format!("payload is not JSON: {}", e))?;
        serde_json::from_value(json!({ "type": kind, "payload": payload }))
            .map_err(|e| format!("cannot decode {}: {}", kind, e))
    }
}

/// A persisted, unconfirmed mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    #[serde(flatten)]
    pub mutation: Mutation,
    pub created_at: Timestamp,
}

/// A queue row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedItem {
    pub id: String,
    pub reason: String,
}

/// One row read back from the queue.
pub type QueueEntry = std::result::Result<SyncQueueItem, MalformedItem>;

/// Ordered view over the `sync_queue` table.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
}

impl SyncQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Append a mutation, returning the stored item.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<SyncQueueItem> {
        let item = SyncQueueItem {
            id: crate::model::new_id(),
            created_at: now_millis(),
            mutation,
        };

        sqlx::query("INSERT INTO sync_queue (id, type, payload, created_at) VALUES (?, ?, ?, ?)")
            .bind(&item.id)
            .bind(item.mutation.kind())
            .bind(item.mutation.payload()?.to_string())
            .bind(item.created_at)
            .execute(self.store.pool())
            .await?;

        tracing::debug!(
            item = %item.id,
            kind = item.mutation.kind(),
            entity = item.mutation.entity_id(),
            "mutation queued"
        );
        Ok(item)
    }

    /// Every item in insertion order.
    ///
    /// Rows that fail to decode are returned as [`MalformedItem`]s in place.
    pub async fn drain_all(&self) -> Result<Vec<QueueEntry>> {
        let rows: Vec<(String, String, String, i64)> =
            sqlx::query_as("SELECT id, type, payload, created_at FROM sync_queue ORDER BY seq ASC")
                .fetch_all(self.store.pool())
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, kind, payload, created_at)| {
                match Mutation::decode(&kind, &payload) {
                    Ok(mutation) => Ok(SyncQueueItem {
                        id,
                        mutation,
                        created_at,
                    }),
                    Err(reason) => Err(MalformedItem { id, reason }),
                }
            })
            .collect())
    }

    /// Delete exactly one item. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of queued items, malformed ones included.
    pub async fn len(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Number of queued mutations touching `entity_id`.
    pub async fn pending_for(&self, entity_id: &str) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(PENDING_FOR_SQL)
            .bind(entity_id)
            .fetch_one(self.store.pool())
            .await?;
        Ok(count as usize)
    }

    /// Dequeue a confirmed item and settle its entity, atomically.
    ///
    /// The entity is marked synced only when no other mutation for it remains
    /// queued. Returns whether the entity was marked synced.
    pub async fn confirm(&self, item: &SyncQueueItem) -> Result<bool> {
        let mut tx = self.store.pool().begin().await?;

        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        let settled = if item.mutation.is_delete() {
            false
        } else {
            settle(
                &mut tx,
                item.mutation.collection(),
                item.mutation.entity_id(),
            )
            .await?
        };

        tx.commit().await?;
        Ok(settled)
    }

    /// Mark an entity synced after a direct remote write, unless a queued
    /// mutation for it is still outstanding.
    pub async fn settle(&self, collection: Collection, entity_id: &str) -> Result<bool> {
        let mut tx = self.store.pool().begin().await?;
        let settled = settle(&mut tx, collection, entity_id).await?;
        tx.commit().await?;
        Ok(settled)
    }
}

// Malformed payloads must not break the count, so only valid JSON is inspected.
const PENDING_FOR_SQL: &str = "SELECT COUNT(*) FROM sync_queue \
     WHERE CASE WHEN json_valid(payload) THEN json_extract(payload, '$.id') END = ?";

/// Condition true while a queued mutation targets the entity bound to `?`.
pub(crate) const PENDING_EXISTS_SQL: &str = "EXISTS (SELECT 1 FROM sync_queue \
     WHERE CASE WHEN json_valid(payload) THEN json_extract(payload, '$.id') END = ?)";

async fn settle(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection: Collection,
    entity_id: &str,
) -> Result<bool> {
    let (pending,): (i64,) = sqlx::query_as(PENDING_FOR_SQL)
        .bind(entity_id)
        .fetch_one(&mut **tx)
        .await?;
    if pending > 0 {
        return Ok(false);
    }

    let sql = format!(
        "UPDATE {} SET is_synced = 1, data = json_set(data, '$.isSynced', json('true')) \
         WHERE id = ?",
        collection.table()
    );
    let result = sqlx::query(&sql)
        .bind(entity_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coefficient;
    use crate::store::StoreOptions;
    use chrono::NaiveDate;

    async fn setup() -> (LocalStore, SyncQueue) {
        let store = LocalStore::open(&StoreOptions::in_memory()).await.unwrap();
        let queue = SyncQueue::new(store.clone());
        (store, queue)
    }

    fn session() -> WorkoutSession {
        WorkoutSession::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), vec![])
    }

    #[test]
    fn item_wire_shape() {
        let mut exercise = Exercise::new("Squat", Coefficient::X1);
        exercise.id = "ex-1".into();
        let item = SyncQueueItem {
            id: "q-1".into(),
            mutation: Mutation::CreateExercise(exercise),
            created_at: 42,
        };

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["id"], "q-1");
        assert_eq!(value["type"], "CREATE_EXERCISE");
        assert_eq!(value["payload"]["id"], "ex-1");
        assert_eq!(value["createdAt"], 42);
    }

    #[test]
    fn delete_payload_is_bare_id() {
        let mutation = Mutation::DeleteWorkout(EntityRef { id: "w-1".into() });
        assert_eq!(mutation.payload().unwrap(), json!({ "id": "w-1" }));
        assert_eq!(mutation.kind(), "DELETE_WORKOUT");
        assert!(mutation.is_delete());
    }

    #[tokio::test]
    async fn drain_all_is_fifo() {
        let (_, queue) = setup().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(queue.enqueue(Mutation::CreateWorkout(session())).await.unwrap().id);
        }

        let drained: Vec<String> = queue
            .drain_all()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.unwrap().id)
            .collect();
        assert_eq!(drained, ids);
    }

    #[tokio::test]
    async fn drain_round_trips_mutation() {
        let (_, queue) = setup().await;
        let entry = WeightEntry::new(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), 79.4);
        queue
            .enqueue(Mutation::CreateWeightEntry(entry.clone()))
            .await
            .unwrap();

        let drained = queue.drain_all().await.unwrap();
        assert_eq!(
            drained[0].as_ref().unwrap().mutation,
            Mutation::CreateWeightEntry(entry)
        );
    }

    #[tokio::test]
    async fn malformed_rows_are_reported_not_fatal() {
        let (store, queue) = setup().await;
        sqlx::query("INSERT INTO sync_queue (id, type, payload, created_at) VALUES ('bad-1', 'RENAME_GYM', '{}', 0)")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO sync_queue (id, type, payload, created_at) VALUES ('bad-2', 'CREATE_WORKOUT', 'not json', 0)")
            .execute(store.pool())
            .await
            .unwrap();
        queue.enqueue(Mutation::CreateWorkout(session())).await.unwrap();

        let drained = queue.drain_all().await.unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].as_ref().unwrap_err().id, "bad-1");
        assert_eq!(drained[1].as_ref().unwrap_err().id, "bad-2");
        assert!(drained[2].is_ok());
        assert_eq!(queue.pending_for("anything").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_deletes_exactly_one() {
        let (_, queue) = setup().await;
        let first = queue.enqueue(Mutation::CreateWorkout(session())).await.unwrap();
        queue.enqueue(Mutation::CreateWorkout(session())).await.unwrap();

        assert!(queue.remove(&first.id).await.unwrap());
        assert!(!queue.remove(&first.id).await.unwrap());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn confirm_dequeues_and_marks_synced() {
        let (store, queue) = setup().await;
        let workout = session();
        store.put(&workout).await.unwrap();
        let item = queue
            .enqueue(Mutation::CreateWorkout(workout.clone()))
            .await
            .unwrap();

        assert!(queue.confirm(&item).await.unwrap());

        assert!(queue.is_empty().await.unwrap());
        let stored: WorkoutSession = store.get(&workout.id).await.unwrap().unwrap();
        assert!(stored.is_synced);
        assert!(store.unsynced::<WorkoutSession>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirm_waits_for_later_mutations() {
        let (store, queue) = setup().await;
        let mut workout = session();
        store.put(&workout).await.unwrap();
        let create = queue
            .enqueue(Mutation::CreateWorkout(workout.clone()))
            .await
            .unwrap();
        workout.exercises.push(crate::model::WorkoutExercise::new(
            "ex-1",
            vec![],
            Default::default(),
        ));
        store.put(&workout).await.unwrap();
        let update = queue
            .enqueue(Mutation::UpdateWorkout(workout.clone()))
            .await
            .unwrap();

        assert_eq!(queue.pending_for(&workout.id).await.unwrap(), 2);
        assert!(!queue.confirm(&create).await.unwrap());
        let stored: WorkoutSession = store.get(&workout.id).await.unwrap().unwrap();
        assert!(!stored.is_synced);

        assert!(queue.confirm(&update).await.unwrap());
        let stored: WorkoutSession = store.get(&workout.id).await.unwrap().unwrap();
        assert!(stored.is_synced);
        assert_eq!(stored.exercises.len(), 1);
    }
}
