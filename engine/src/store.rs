//! Local store - durable, versioned record storage on SQLite.
//!
//! Every entity collection is a table keyed by id, holding the entity's JSON
//! plus the columns its sort keys need. Writes are idempotent upserts.

use crate::model::{Collection, Entity, SortKey, SortValue};
use crate::queue::PENDING_EXISTS_SQL;
use crate::schema::{self, CURRENT_VERSION};
use crate::{error::Result, EntityId, Error, SchemaVersion};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Where and how to open the local store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Schema version to migrate to.
    pub schema_version: SchemaVersion,
}

impl StoreOptions {
    /// A file-backed store at the current schema version.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            schema_version: CURRENT_VERSION,
        }
    }

    /// A private in-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            schema_version: CURRENT_VERSION,
        }
    }

    /// Stop migrating at `version`.
    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }
}

/// Handle to the opened local store.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    schema_version: SchemaVersion,
}

impl LocalStore {
    /// Open (creating if needed) and migrate the store.
    pub async fn open(options: &StoreOptions) -> Result<Self> {
        let pool = match &options.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            Error::StoreUnavailable(format!(
                                "cannot create '{}': {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }

                let connect = SqliteConnectOptions::from_str(&format!(
                    "sqlite:{}",
                    path.display()
                ))?
                .create_if_missing(true);

                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(connect)
                    .await?
            }
            // Each in-memory connection is its own database, so keep exactly one.
            None => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect("sqlite::memory:")
                    .await?
            }
        };

        let schema_version = schema::migrate(&pool, options.schema_version).await?;

        tracing::debug!(
            path = ?options.path,
            schema_version,
            "local store opened"
        );

        Ok(Self {
            pool,
            schema_version,
        })
    }

    /// Schema version the store was migrated to.
    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the underlying pool, waiting for connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or replace an entity, keyed by its id.
    pub async fn put<E: Entity>(&self, entity: &E) -> Result<()> {
        let sql = upsert_sql(E::COLLECTION, Upsert::Always);
        bind_entity(sqlx::query(&sql), entity)?
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write an authoritative copy of an entity unless the local one has
    /// unconfirmed changes.
    ///
    /// The write is skipped when the stored record is unsynced or any queued
    /// mutation targets the id. Both checks run inside the single statement,
    /// so a local edit racing with this call is never overwritten. Returns
    /// whether the copy was written.
    pub async fn put_if_synced<E: Entity>(&self, entity: &E) -> Result<bool> {
        let sql = upsert_sql(E::COLLECTION, Upsert::IfSynced);
        let result = bind_entity(sqlx::query(&sql), entity)?
            .bind(entity.id())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch one entity by id.
    pub async fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?", E::COLLECTION.table());
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Every entity in the collection.
    ///
    /// Exercises come back ordered by name, dated collections newest first.
    pub async fn get_all<E: Entity>(&self) -> Result<Vec<E>> {
        let order = match E::COLLECTION {
            Collection::Exercises => "name COLLATE NOCASE ASC, id ASC",
            Collection::Workouts | Collection::WeightEntries => "date DESC, created_at DESC",
        };
        let sql = format!(
            "SELECT data FROM {} ORDER BY {}",
            E::COLLECTION.table(),
            order
        );
        self.fetch_entities(&sql, None).await
    }

    /// The `limit` most recent entities, descending by `key`.
    pub async fn get_recent<E: Entity>(&self, key: SortKey, limit: usize) -> Result<Vec<E>> {
        let collection = E::COLLECTION;
        if !collection.supports(key) {
            return Err(Error::UnsupportedSortKey {
                collection: collection.name(),
                key: key.field(),
            });
        }

        let sql = format!(
            "SELECT data FROM {} ORDER BY {} DESC, rowid DESC LIMIT ?",
            collection.table(),
            key.column()
        );
        self.fetch_entities(&sql, Some(limit as i64)).await
    }

    /// Entities whose latest change has not been confirmed remotely.
    pub async fn unsynced<E: Entity>(&self) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT data FROM {} WHERE is_synced = 0 ORDER BY rowid ASC",
            E::COLLECTION.table()
        );
        self.fetch_entities(&sql, None).await
    }

    /// Remove an entity. Returns whether it existed.
    pub async fn delete<E: Entity>(&self, id: &str) -> Result<bool> {
        self.delete_in(E::COLLECTION, id).await
    }

    pub(crate) async fn delete_in(&self, collection: Collection, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.table());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count of entities in a collection.
    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count as usize)
    }

    /// Delete synced entities whose id is not in `keep`.
    ///
    /// Unsynced entities are never pruned. Returns the number removed.
    pub async fn retain(&self, collection: Collection, keep: &HashSet<EntityId>) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE is_synced = 1 \
             AND id NOT IN (SELECT value FROM json_each(?))",
            collection.table()
        );
        let keep = serde_json::to_string(keep)?;
        let result = sqlx::query(&sql).bind(keep).execute(&self.pool).await?;
        let removed = result.rows_affected() as usize;

        if removed > 0 {
            tracing::debug!(%collection, removed, "pruned local records");
        }
        Ok(removed)
    }

    async fn fetch_entities<E: Entity>(&self, sql: &str, limit: Option<i64>) -> Result<Vec<E>> {
        let mut query = sqlx::query_as::<_, (String,)>(sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_str(&data).map_err(Error::from))
            .collect()
    }
}

#[derive(Clone, Copy)]
enum Upsert {
    Always,
    /// Skip unsynced rows and ids with queued mutations
    IfSynced,
}

fn upsert_sql(collection: Collection, mode: Upsert) -> String {
    let table = collection.table();
    let columns: Vec<&str> = collection.sort_keys().iter().map(|k| k.column()).collect();
    let placeholders = vec!["?"; columns.len() + 3].join(", ");
    let updates: Vec<String> = ["data", "is_synced"]
        .iter()
        .chain(columns.iter())
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    let (source, guard) = match mode {
        Upsert::Always => (format!("VALUES ({placeholders})"), String::new()),
        Upsert::IfSynced => (
            format!("SELECT {placeholders} WHERE NOT {PENDING_EXISTS_SQL}"),
            format!(" WHERE {table}.is_synced = 1"),
        ),
    };

    format!(
        "INSERT INTO {table} (id, data, is_synced, {}) {source} \
         ON CONFLICT (id) DO UPDATE SET {}{guard}",
        columns.join(", "),
        updates.join(", "),
    )
}

fn bind_entity<'q, E: Entity>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    entity: &'q E,
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
    let mut query = query
        .bind(entity.id())
        .bind(serde_json::to_string(entity)?)
        .bind(entity.is_synced());
    for key in E::COLLECTION.sort_keys() {
        query = match entity.sort_value(*key) {
            Some(SortValue::Text(text)) => query.bind(text),
            Some(SortValue::Int(int)) => query.bind(int),
            None => query.bind(Option::<String>::None),
        };
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coefficient, Exercise, WeightEntry, WorkoutSession};
    use crate::queue::{EntityRef, Mutation, SyncQueue};
    use chrono::NaiveDate;

    async fn test_store() -> LocalStore {
        LocalStore::open(&StoreOptions::in_memory()).await.unwrap()
    }

    fn workout(date: &str) -> WorkoutSession {
        WorkoutSession::new(NaiveDate::from_str(date).unwrap(), vec![])
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = test_store().await;
        let exercise = Exercise::new("Squat", Coefficient::X1);

        store.put(&exercise).await.unwrap();

        let loaded: Exercise = store.get(&exercise.id).await.unwrap().unwrap();
        assert_eq!(loaded, exercise);
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = test_store().await;
        let mut exercise = Exercise::new("Squat", Coefficient::X1);
        store.put(&exercise).await.unwrap();

        exercise.name = "Front Squat".into();
        exercise.is_synced = true;
        store.put(&exercise).await.unwrap();

        let all: Vec<Exercise> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Front Squat");
        assert!(all[0].is_synced);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = test_store().await;
        let loaded: Option<WorkoutSession> = store.get("nope").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn exercises_are_listed_by_name() {
        let store = test_store().await;
        for name in ["squat", "Bench Press", "deadlift"] {
            store.put(&Exercise::new(name, Coefficient::X1)).await.unwrap();
        }

        let names: Vec<String> = store
            .get_all::<Exercise>()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Bench Press", "deadlift", "squat"]);
    }

    #[tokio::test]
    async fn get_recent_orders_descending_and_limits() {
        let store = test_store().await;
        for date in ["2024-01-03", "2024-01-01", "2024-01-05", "2024-01-02"] {
            store.put(&workout(date)).await.unwrap();
        }

        let recent: Vec<WorkoutSession> = store.get_recent(SortKey::Date, 2).await.unwrap();
        let dates: Vec<String> = recent.iter().map(|w| w.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-01-05", "2024-01-03"]);
    }

    #[tokio::test]
    async fn get_recent_rejects_unknown_sort_key() {
        let store = test_store().await;
        let result = store.get_recent::<Exercise>(SortKey::Date, 5).await;
        assert!(matches!(result, Err(Error::UnsupportedSortKey { .. })));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = test_store().await;
        let entry = WeightEntry::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 80.0);
        store.put(&entry).await.unwrap();

        assert!(store.delete::<WeightEntry>(&entry.id).await.unwrap());
        assert!(!store.delete::<WeightEntry>(&entry.id).await.unwrap());
        assert_eq!(store.count(Collection::WeightEntries).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsynced_lists_only_pending() {
        let store = test_store().await;
        let pending = workout("2024-01-01");
        let mut confirmed = workout("2024-01-02");
        confirmed.is_synced = true;
        store.put(&pending).await.unwrap();
        store.put(&confirmed).await.unwrap();

        let unsynced: Vec<WorkoutSession> = store.unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, pending.id);
    }

    #[tokio::test]
    async fn retain_never_prunes_unsynced() {
        let store = test_store().await;
        let pending = workout("2023-01-01");
        let mut old = workout("2023-01-02");
        old.is_synced = true;
        let mut kept = workout("2024-01-01");
        kept.is_synced = true;
        for w in [&pending, &old, &kept] {
            store.put(w).await.unwrap();
        }

        let keep: HashSet<EntityId> = [kept.id.clone()].into_iter().collect();
        let removed = store.retain(Collection::Workouts, &keep).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get::<WorkoutSession>(&pending.id).await.unwrap().is_some());
        assert!(store.get::<WorkoutSession>(&kept.id).await.unwrap().is_some());
        assert!(store.get::<WorkoutSession>(&old.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retain_with_empty_keep_set_prunes_all_synced() {
        let store = test_store().await;
        let pending = workout("2024-01-01");
        store.put(&pending).await.unwrap();
        for d in 2..=9 {
            let mut synced = workout(&format!("2024-01-0{d}"));
            synced.is_synced = true;
            store.put(&synced).await.unwrap();
        }

        let removed = store
            .retain(Collection::Workouts, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(removed, 8);
        assert_eq!(store.count(Collection::Workouts).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_if_synced_skips_unsynced_records() {
        let store = test_store().await;
        let local = Exercise::new("Squat (low bar)", Coefficient::X1);
        store.put(&local).await.unwrap();

        let mut remote = local.clone();
        remote.name = "Squat".into();
        remote.is_synced = true;

        assert!(!store.put_if_synced(&remote).await.unwrap());
        let stored: Exercise = store.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored, local);
    }

    #[tokio::test]
    async fn put_if_synced_skips_ids_with_queued_mutations() {
        let store = test_store().await;
        let queue = SyncQueue::new(store.clone());

        // Synced row, but a later edit is already queued.
        let mut edited = workout("2024-01-01");
        edited.is_synced = true;
        store.put(&edited).await.unwrap();
        queue
            .enqueue(Mutation::UpdateWorkout(edited.clone()))
            .await
            .unwrap();

        // Deleted locally, delete still queued.
        let deleted = workout("2024-01-02");
        queue
            .enqueue(Mutation::DeleteWorkout(EntityRef {
                id: deleted.id.clone(),
            }))
            .await
            .unwrap();

        let mut stale = edited.clone();
        stale.date = NaiveDate::from_str("2023-12-31").unwrap();
        let mut resurrected = deleted.clone();
        resurrected.is_synced = true;

        assert!(!store.put_if_synced(&stale).await.unwrap());
        assert!(!store.put_if_synced(&resurrected).await.unwrap());

        let stored: WorkoutSession = store.get(&edited.id).await.unwrap().unwrap();
        assert_eq!(stored.date, edited.date);
        assert!(store
            .get::<WorkoutSession>(&deleted.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn put_if_synced_writes_synced_and_new_records() {
        let store = test_store().await;
        let mut synced = Exercise::new("Squat", Coefficient::X1);
        synced.is_synced = true;
        store.put(&synced).await.unwrap();

        let mut renamed = synced.clone();
        renamed.name = "Back Squat".into();
        let mut fresh = Exercise::new("Row", Coefficient::X2);
        fresh.is_synced = true;

        assert!(store.put_if_synced(&renamed).await.unwrap());
        assert!(store.put_if_synced(&fresh).await.unwrap());

        let names: Vec<String> = store
            .get_all::<Exercise>()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["Back Squat", "Row"]);
    }

    #[tokio::test]
    async fn reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::file(dir.path().join("nested").join("gym.db"));
        let session = workout("2024-01-01");

        let store = LocalStore::open(&options).await.unwrap();
        store.put(&session).await.unwrap();
        store.close().await;

        let reopened = LocalStore::open(&options).await.unwrap();
        let loaded: WorkoutSession = reopened.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert_eq!(reopened.schema_version(), CURRENT_VERSION);
    }
}
