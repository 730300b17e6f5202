//! WebSocket support for live collection subscriptions.
//!
//! Clients subscribe to one collection path, optionally filtered on a field,
//! and receive a frame for every document written or deleted there.

mod manager;
mod protocol;

pub use manager::SubscriptionManager;
pub use protocol::*;
