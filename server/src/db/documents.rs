//! Database operations for the documents table.

use gymsync_engine::RemoteDocument;
use serde_json::Value;
use sqlx::{PgPool, Row};

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub collection: String,
    pub id: String,
    pub data: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            id: row.try_get("id")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// Convert a database row to the wire document.
    pub fn into_document(self) -> RemoteDocument {
        RemoteDocument {
            id: self.id,
            data: self.data,
        }
    }
}

/// Create or replace a document.
pub async fn upsert_document(
    pool: &PgPool,
    collection: &str,
    id: &str,
    data: &Value,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp_millis();

    sqlx::query(
        r#"
        INSERT INTO documents (collection, id, data, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (collection, id) DO UPDATE SET
            data = EXCLUDED.data,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(collection)
    .bind(id)
    .bind(data)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a document under a freshly generated id, returning the id.
pub async fn insert_document(
    pool: &PgPool,
    collection: &str,
    data: &Value,
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    upsert_document(pool, collection, &id, data).await?;
    Ok(id)
}

/// Delete a document, returning its last body if it existed.
pub async fn delete_document(
    pool: &PgPool,
    collection: &str,
    id: &str,
) -> Result<Option<Value>, sqlx::Error> {
    let row = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING data")
        .bind(collection)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.try_get("data")).transpose()
}

/// Every document in a collection.
pub async fn list_documents(
    pool: &PgPool,
    collection: &str,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, id, data, created_at, updated_at
        FROM documents
        WHERE collection = $1
        ORDER BY id ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await
}

/// The `limit` documents with the greatest `field`, descending.
///
/// Documents lacking the field sort last.
pub async fn list_recent_documents(
    pool: &PgPool,
    collection: &str,
    field: &str,
    limit: i64,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, id, data, created_at, updated_at
        FROM documents
        WHERE collection = $1
        ORDER BY data -> $2 DESC NULLS LAST, id ASC
        LIMIT $3
        "#,
    )
    .bind(collection)
    .bind(field)
    .bind(limit)
    .fetch_all(pool)
    .await
}
