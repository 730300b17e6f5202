//! # gymsync engine
//!
//! Offline-first sync core for a workout and body-weight log.
//!
//! Every write lands in a durable local store first and is confirmed against
//! a remote document store when connectivity allows. Unconfirmed writes wait
//! in an ordered sync queue that survives restarts and is drained on
//! reconnect.
//!
//! ## Components
//!
//! - [`LocalStore`] - versioned SQLite storage for exercises, workouts,
//!   weight entries and the sync queue. Shared through a lazily opened
//!   [`StoreHandle`].
//! - [`SyncQueue`] - FIFO log of [`Mutation`]s not yet confirmed remotely.
//! - [`NetworkMonitor`] - current connectivity plus transition events.
//! - [`RemoteStore`] - the authoritative document store. [`MemoryRemote`]
//!   runs in process, [`HttpRemote`] talks to `gymsync-server`.
//! - [`Reconciler`] - drains the queue and pulls the remote working set back.
//! - [`SyncEngine`] - the facade applications call.
//!
//! ## Sync status
//!
//! An entity's `isSynced` flag is false exactly while some mutation of it is
//! unconfirmed. Dequeuing a confirmed item and setting the flag happen in one
//! local transaction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gymsync_engine::{
//!     Coefficient, Connectivity, MemoryRemote, NetworkMonitor, StoreHandle, StoreOptions,
//!     SyncEngine, SyncLimits,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> gymsync_engine::Result<()> {
//! let network = NetworkMonitor::new(Connectivity::Offline);
//! let engine = SyncEngine::new(
//!     StoreHandle::new(StoreOptions::file("gymsync.db")),
//!     Arc::new(MemoryRemote::new()),
//!     network.clone(),
//!     "user-1",
//!     SyncLimits::default(),
//! );
//! engine.start();
//!
//! // Offline: written locally and queued.
//! engine.create_exercise("Pull-up", Coefficient::Gravitron).await?;
//! assert_eq!(engine.pending_count().await?, 1);
//!
//! // Reconnecting drains the queue in the background.
//! network.set_online(true);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod http;
pub mod model;
pub mod network;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig};
pub use engine::{SyncEngine, SyncReport, WriteOutcome};
pub use error::{Error, Result};
pub use handle::StoreHandle;
pub use http::HttpRemote;
pub use model::{
    Coefficient, Collection, Entity, Exercise, Set, SortKey, WeightEntry, WeightUnit,
    WorkoutExercise, WorkoutSession,
};
pub use network::{Connectivity, ConnectivityProbe, NetworkMonitor, Transition};
pub use queue::{EntityRef, MalformedItem, Mutation, QueueEntry, SyncQueue, SyncQueueItem};
pub use reconcile::{
    Conflict, ConflictResolution, DrainReport, MutationState, PullReport, Reconciler, SyncLimits,
    SyncStatus, DEFAULT_EXERCISES,
};
pub use remote::{Filter, MemoryRemote, RemoteChange, RemoteDocument, RemoteStore};
pub use schema::CURRENT_VERSION;
pub use store::{LocalStore, StoreOptions};

/// Type aliases for clarity
pub type EntityId = String;
pub type Timestamp = i64;
pub type SchemaVersion = u32;
