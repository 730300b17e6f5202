//! Local store schema and forward-only migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Opening a store
//! runs exactly the migrations between the stored version and the target
//! version. Migrations only ever add tables or indexes.

use crate::{error::Result, Error, SchemaVersion};
use sqlx::SqlitePool;

/// Schema version this build writes.
pub const CURRENT_VERSION: SchemaVersion = 3;

/// One additive schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version reached after applying this step
    pub version: SchemaVersion,
    pub description: &'static str,
    statements: &'static [&'static str],
}

/// All migrations, in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "exercises, workouts and sync queue",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS exercises (
                id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workouts (
                id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                date TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "date index on workouts",
        statements: &["CREATE INDEX IF NOT EXISTS workouts_by_date ON workouts (date)"],
    },
    Migration {
        version: 3,
        description: "weight entries",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS weight_entries (
                id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                date TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS weight_entries_by_date ON weight_entries (date)",
        ],
    },
];

/// Read the schema version stored in the database.
pub async fn stored_version(pool: &SqlitePool) -> Result<SchemaVersion> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version as SchemaVersion)
}

/// Bring the database up to `target`, returning the version reached.
///
/// Each step runs in its own transaction together with the version bump, so a
/// crash mid-upgrade leaves the database at the last completed version.
pub async fn migrate(pool: &SqlitePool, target: SchemaVersion) -> Result<SchemaVersion> {
    let stored = stored_version(pool).await?;
    if stored > CURRENT_VERSION {
        return Err(Error::SchemaTooNew {
            stored,
            supported: CURRENT_VERSION,
        });
    }

    let target = target.min(CURRENT_VERSION);
    if stored >= target {
        return Ok(stored);
    }

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > stored && m.version <= target)
    {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying local store migration"
        );

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        // PRAGMA does not accept bound parameters.
        sqlx::query(&format!("PRAGMA user_version = {}", migration.version))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(target)
}
