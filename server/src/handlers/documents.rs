//! Document handlers - writes, reads and change fan-out.
//!
//! Every successful write is published to the collection's live
//! subscribers after it commits.

use gymsync_engine::{RemoteChange, RemoteDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::db;
use crate::error::{AppError, Result};
use crate::websocket::SubscriptionManager;

/// Query parameters for listing documents.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Field to order by, descending
    pub order_by: Option<String>,
    /// Maximum number of documents; requires `orderBy`
    pub limit: Option<i64>,
}

/// Response for an added document.
#[derive(Debug, Serialize)]
pub struct AddResponse {
    pub id: String,
}

/// Create or replace the document `id` in `collection`.
pub async fn handle_upsert(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    collection: &str,
    id: &str,
    data: Value,
) -> Result<()> {
    require_object(&data)?;
    db::upsert_document(pool, collection, id, &data).await?;

    tracing::debug!(collection, id, "document upserted");
    subscriptions.publish(
        collection,
        RemoteChange::Upserted {
            id: id.to_string(),
            data: data.clone(),
        },
        &data,
    );
    Ok(())
}

/// Insert a document under a server-generated id.
pub async fn handle_add(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    collection: &str,
    data: Value,
) -> Result<AddResponse> {
    require_object(&data)?;
    let id = db::insert_document(pool, collection, &data).await?;

    tracing::debug!(collection, id = %id, "document added");
    subscriptions.publish(
        collection,
        RemoteChange::Upserted {
            id: id.clone(),
            data: data.clone(),
        },
        &data,
    );
    Ok(AddResponse { id })
}

/// Delete a document. Deleting a missing document succeeds.
pub async fn handle_delete(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    collection: &str,
    id: &str,
) -> Result<()> {
    let Some(last) = db::delete_document(pool, collection, id).await? else {
        return Ok(());
    };

    tracing::debug!(collection, id, "document deleted");
    subscriptions.publish(
        collection,
        RemoteChange::Removed { id: id.to_string() },
        &last,
    );
    Ok(())
}

/// List a collection, optionally bounded to the most recent documents.
pub async fn handle_list(
    pool: &PgPool,
    collection: &str,
    query: ListQuery,
) -> Result<Vec<RemoteDocument>> {
    let rows = match (query.order_by, query.limit) {
        (None, None) => db::list_documents(pool, collection).await?,
        (Some(field), limit) => {
            validate_field(&field)?;
            let limit = limit.unwrap_or(i64::MAX);
            if limit <= 0 {
                return Err(AppError::BadRequest("limit must be positive".into()));
            }
            db::list_recent_documents(pool, collection, &field, limit).await?
        }
        (None, Some(_)) => {
            return Err(AppError::BadRequest("limit requires orderBy".into()));
        }
    };

    Ok(rows.into_iter().map(|row| row.into_document()).collect())
}

/// Parse the `equals` value of a subscription filter.
///
/// Values are JSON-encoded; anything that is not valid JSON is taken as a
/// plain string.
pub fn parse_filter_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Order fields are top-level document keys.
pub fn validate_field(field: &str) -> Result<()> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid field name: {field}")))
    }
}

fn require_object(data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(AppError::BadRequest("document body must be a JSON object".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_field() {
        assert!(validate_field("date").is_ok());
        assert!(validate_field("created_at").is_ok());
        assert!(validate_field("").is_err());
        assert!(validate_field("data'); drop").is_err());
        assert!(validate_field("a.b").is_err());
    }

    #[test]
    fn test_parse_filter_value() {
        assert_eq!(parse_filter_value("\"2024-01-01\""), json!("2024-01-01"));
        assert_eq!(parse_filter_value("42"), json!(42));
        assert_eq!(parse_filter_value("true"), json!(true));
        assert_eq!(parse_filter_value("2024-01-01"), json!("2024-01-01"));
    }

    #[test]
    fn test_require_object() {
        assert!(require_object(&json!({"name": "Squat"})).is_ok());
        assert!(require_object(&json!([1, 2])).is_err());
        assert!(require_object(&json!("Squat")).is_err());
    }
}
