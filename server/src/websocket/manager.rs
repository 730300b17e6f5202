//! WebSocket subscription manager.
//!
//! Tracks live subscriptions per collection and fans document changes out
//! to the subscribers whose filter matches.

use std::sync::Arc;

use dashmap::DashMap;
use gymsync_engine::{Filter, RemoteChange};
use serde_json::Value;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single subscribed WebSocket connection.
#[derive(Debug)]
pub struct Subscription {
    /// Unique identifier for this connection
    pub id: String,
    /// Collection path the client listens to
    pub collection: String,
    pub filter: Option<Filter>,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active subscriptions.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// All active subscriptions, keyed by connection ID.
    subscriptions: DashMap<String, Subscription>,
    /// Connection IDs per collection path.
    by_collection: DashMap<String, Vec<String>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new subscription manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscription.
    ///
    /// Returns the connection ID.
    pub fn register(
        &self,
        collection: String,
        filter: Option<Filter>,
        sender: MessageSender,
    ) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.by_collection
            .entry(collection.clone())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, collection = %collection, "subscription registered");

        self.subscriptions.insert(
            conn_id.clone(),
            Subscription {
                id: conn_id.clone(),
                collection,
                filter,
                sender,
            },
        );

        conn_id
    }

    /// Unregister a subscription.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, subscription)) = self.subscriptions.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_collection.get_mut(&subscription.collection) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_collection.remove(&subscription.collection);
                }
            }

            tracing::info!(
                conn_id = %conn_id,
                collection = %subscription.collection,
                "subscription unregistered"
            );
        }
    }

    /// Deliver a change to every matching subscriber of `collection`.
    ///
    /// `data` is the document body the filter is checked against: the new
    /// body for upserts, the last body for removals. Returns the number of
    /// subscribers that received the change.
    pub fn publish(&self, collection: &str, change: RemoteChange, data: &Value) -> usize {
        let Some(conn_ids) = self.by_collection.get(collection).map(|ids| ids.value().clone()) else {
            return 0;
        };

        let message = ServerMessage::from(change);
        let mut sent_count = 0;

        for conn_id in conn_ids {
            let Some(subscription) = self.subscriptions.get(&conn_id) else {
                continue;
            };
            let wanted = subscription
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(data));
            if wanted && subscription.sender.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(collection, recipients = sent_count, "published change");

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.subscriptions
            .get(conn_id)
            .map(|s| s.sender.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Get the number of active subscriptions.
    pub fn connection_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Get the number of collections with at least one subscriber.
    #[allow(dead_code)]
    pub fn collection_count(&self) -> usize {
        self.by_collection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_unregister() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("users/u1/workouts".to_string(), None, tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.collection_count(), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.collection_count(), 0);
    }

    #[test]
    fn test_publish_respects_collection_and_filter() {
        let manager = SubscriptionManager::new();

        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        let (day_tx, mut day_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();

        manager.register("users/u1/workouts".to_string(), None, all_tx);
        manager.register(
            "users/u1/workouts".to_string(),
            Some(Filter::new("date", "2024-01-01")),
            day_tx,
        );
        manager.register("global-exercises".to_string(), None, other_tx);

        let data = json!({"date": "2024-01-02"});
        let sent = manager.publish(
            "users/u1/workouts",
            RemoteChange::Upserted {
                id: "w-1".into(),
                data: data.clone(),
            },
            &data,
        );
        assert_eq!(sent, 1);
        assert!(matches!(
            all_rx.try_recv().unwrap(),
            ServerMessage::Upserted { .. }
        ));
        assert!(day_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());

        let data = json!({"date": "2024-01-01"});
        let sent = manager.publish(
            "users/u1/workouts",
            RemoteChange::Removed { id: "w-2".into() },
            &data,
        );
        assert_eq!(sent, 2);
        assert_eq!(
            day_rx.try_recv().unwrap(),
            ServerMessage::Removed { id: "w-2".into() }
        );
    }

    #[test]
    fn test_closed_receivers_are_not_counted() {
        let manager = SubscriptionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = manager.register("global-exercises".to_string(), None, tx);
        drop(rx);

        let sent = manager.publish(
            "global-exercises",
            RemoteChange::Removed { id: "ex-1".into() },
            &json!({}),
        );
        assert_eq!(sent, 0);
        assert!(!manager.send_to(&conn_id, ServerMessage::Pong));
    }
}
