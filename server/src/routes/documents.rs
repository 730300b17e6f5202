//! Document collection routes.
//!
//! Collection paths are a single percent-encoded segment, so
//! `users/u1/workouts` travels as `users%2Fu1%2Fworkouts`.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, put},
    Json, Router,
};
use gymsync_engine::{Filter, RemoteDocument};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_add, handle_delete, handle_list, handle_subscription, handle_upsert,
    parse_filter_value, validate_field, AddResponse, ListQuery,
};
use crate::AppState;

/// Query parameters for a subscription.
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub field: Option<String>,
    /// JSON-encoded value the field must equal
    pub equals: Option<String>,
}

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/collections/{collection}/documents",
            get(list_handler).post(add_handler),
        )
        .route(
            "/collections/{collection}/documents/{id}",
            put(upsert_handler).delete(delete_handler),
        )
        .route("/collections/{collection}/subscribe", get(subscribe_handler))
}

/// GET /collections/{collection}/documents
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RemoteDocument>>> {
    let documents = handle_list(&state.pool, &collection, query).await?;
    Ok(Json(documents))
}

/// POST /collections/{collection}/documents
async fn add_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Json(data): Json<Value>,
) -> Result<(StatusCode, Json<AddResponse>)> {
    let response = handle_add(&state.pool, &state.subscriptions, &collection, data).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /collections/{collection}/documents/{id}
async fn upsert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    Json(data): Json<Value>,
) -> Result<StatusCode> {
    handle_upsert(&state.pool, &state.subscriptions, &collection, &id, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /collections/{collection}/documents/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    handle_delete(&state.pool, &state.subscriptions, &collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /collections/{collection}/subscribe - upgrade to a live change feed.
async fn subscribe_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let filter = match (query.field, query.equals) {
        (Some(field), Some(equals)) => {
            validate_field(&field)?;
            Some(Filter::new(field, parse_filter_value(&equals)))
        }
        _ => None,
    };

    let subscriptions = Arc::clone(&state.subscriptions);
    Ok(ws.on_upgrade(move |socket| {
        handle_subscription(socket, subscriptions, collection, filter)
    }))
}
