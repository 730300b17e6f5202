//! Reconciliation between the local store and the remote store.
//!
//! Two directions:
//!
//! - **Drain** pushes queued mutations to the remote store in FIFO order.
//!   Each confirmed item is dequeued and its entity marked synced in one local
//!   transaction. A failed item stays queued and the drain moves on, holding
//!   back later items for the same entity so they never overtake it.
//! - **Pull** reads the authoritative working set (full exercise catalog,
//!   recent workouts, recent weight entries) and merges it into the local
//!   store. Locally unsynced records win; everything else is overwritten by
//!   the remote copy, and synced records outside the working set are pruned.
//!
//! At most one drain runs at a time. [`Reconciler::drain`] waits its turn,
//! [`Reconciler::try_drain`] gives up if a drain is already running.

use crate::handle::StoreHandle;
use crate::model::{Coefficient, Collection, Entity, Exercise, SortKey, WeightEntry, WorkoutSession};
use crate::queue::{Mutation, SyncQueue};
use crate::remote::{RemoteDocument, RemoteStore};
use crate::store::LocalStore;
use crate::{error::Result, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Catalog seeded into an empty remote store.
pub const DEFAULT_EXERCISES: [&str; 4] = ["Bench Press", "Squat", "Deadlift", "Overhead Press"];

/// Bounds on the locally cached working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    /// Most recent workouts kept after a pull
    pub recent_workouts: usize,
    /// Most recent weight entries kept after a pull
    pub weight_history: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            recent_workouts: 50,
            weight_history: 365,
        }
    }
}

/// What the status indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// Mutations are queued and waiting for connectivity
    Pending(usize),
    Syncing,
    Synced,
    /// The last sync left failed items behind
    Failed,
}

/// Lifecycle of one queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    InFlight,
    Confirmed,
}

/// How a pull resolved a record present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// Local record had unconfirmed changes and was kept
    LocalWins,
    /// Local copy differed and was replaced by the remote one
    RemoteWins,
}

/// A record that differed between local and remote during a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub collection: Collection,
    pub id: EntityId,
    pub resolution: ConflictResolution,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Queue items confirmed and removed
    pub confirmed: Vec<String>,
    /// Queue items whose remote write failed; still queued
    pub failed: Vec<String>,
    /// Queue items held back behind a failed item for the same entity
    pub deferred: Vec<String>,
    /// Malformed queue items left in place
    pub skipped: Vec<String>,
}

impl DrainReport {
    /// State of a queue item after this drain, if the drain saw it.
    pub fn state(&self, item_id: &str) -> Option<MutationState> {
        if self.confirmed.iter().any(|id| id == item_id) {
            Some(MutationState::Confirmed)
        } else if self.failed.iter().chain(&self.deferred).any(|id| id == item_id) {
            Some(MutationState::Pending)
        } else {
            None
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.deferred.is_empty() && self.skipped.is_empty()
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Remote records written into the local store
    pub applied: usize,
    /// Synced local records dropped from the working set
    pub pruned: usize,
    /// Default exercises added to an empty catalog
    pub seeded: usize,
    pub conflicts: Vec<Conflict>,
}

/// Moves data between the local store and the remote store.
pub struct Reconciler {
    store: StoreHandle,
    remote: Arc<dyn RemoteStore>,
    user_id: String,
    limits: SyncLimits,
    drain_lock: Mutex<()>,
    status: watch::Sender<SyncStatus>,
}

impl Reconciler {
    pub fn new(
        store: StoreHandle,
        remote: Arc<dyn RemoteStore>,
        user_id: impl Into<String>,
        limits: SyncLimits,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            remote,
            user_id: user_id.into(),
            limits,
            drain_lock: Mutex::new(()),
            status,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn limits(&self) -> SyncLimits {
        self.limits
    }

    /// Remote path of a collection for this user.
    pub fn remote_path(&self, collection: Collection) -> String {
        collection.remote_path(&self.user_id)
    }

    /// Watch the sync status.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }

    /// Recompute the status from the queue length.
    pub async fn refresh_status(&self) -> Result<()> {
        let store = self.store.get().await?;
        let pending = SyncQueue::new(store).len().await?;
        if pending > 0 {
            self.set_status(SyncStatus::Pending(pending));
        }
        Ok(())
    }

    /// Perform the single remote write a mutation implies.
    pub async fn push(&self, mutation: &Mutation) -> Result<()> {
        let path = self.remote_path(mutation.collection());
        match mutation {
            Mutation::CreateExercise(e) | Mutation::UpdateExercise(e) => {
                self.remote.upsert(&path, e.id(), e.to_remote()?).await
            }
            Mutation::CreateWorkout(w) | Mutation::UpdateWorkout(w) => {
                self.remote.upsert(&path, w.id(), w.to_remote()?).await
            }
            Mutation::CreateWeightEntry(w) => {
                self.remote.upsert(&path, w.id(), w.to_remote()?).await
            }
            Mutation::DeleteExercise(r) | Mutation::DeleteWorkout(r) => {
                self.remote.delete(&path, &r.id).await
            }
        }
    }

    /// Drain the queue, waiting for any running drain to finish first.
    pub async fn drain(&self) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        self.run_drain().await
    }

    /// Drain the queue unless a drain is already running.
    ///
    /// Returns `None` when the call was coalesced into the running drain.
    pub async fn try_drain(&self) -> Option<Result<DrainReport>> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("drain already running, trigger coalesced");
            return None;
        };
        Some(self.run_drain().await)
    }

    async fn run_drain(&self) -> Result<DrainReport> {
        let result = self.drain_queue().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "drain aborted");
            self.set_status(SyncStatus::Failed);
        }
        result
    }

    async fn drain_queue(&self) -> Result<DrainReport> {
        let queue = SyncQueue::new(self.store.get().await?);
        let entries = queue.drain_all().await?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<EntityId> = HashSet::new();

        if entries.is_empty() {
            self.set_status(SyncStatus::Synced);
            return Ok(report);
        }

        self.set_status(SyncStatus::Syncing);
        tracing::info!(items = entries.len(), "draining sync queue");

        for entry in entries {
            let item = match entry {
                Ok(item) => item,
                Err(malformed) => {
                    tracing::warn!(
                        item = %malformed.id,
                        reason = %malformed.reason,
                        "skipping malformed sync queue item"
                    );
                    report.skipped.push(malformed.id);
                    continue;
                }
            };

            if blocked.contains(item.mutation.entity_id()) {
                tracing::debug!(
                    item = %item.id,
                    entity = item.mutation.entity_id(),
                    "earlier mutation for entity failed, deferring"
                );
                report.deferred.push(item.id);
                continue;
            }

            tracing::debug!(
                item = %item.id,
                kind = item.mutation.kind(),
                state = ?MutationState::InFlight,
                "pushing mutation"
            );

            match self.push(&item.mutation).await {
                Ok(()) => {
                    queue.confirm(&item).await?;
                    report.confirmed.push(item.id);
                }
                Err(e) => {
                    tracing::warn!(
                        item = %item.id,
                        kind = item.mutation.kind(),
                        error = %e,
                        "remote write failed, item stays queued"
                    );
                    blocked.insert(item.mutation.entity_id().to_string());
                    report.failed.push(item.id);
                }
            }
        }

        let remaining = queue.len().await?;
        let status = if !report.failed.is_empty() {
            SyncStatus::Failed
        } else if remaining > 0 {
            SyncStatus::Pending(remaining)
        } else {
            SyncStatus::Synced
        };
        self.set_status(status);

        tracing::info!(
            confirmed = report.confirmed.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            skipped = report.skipped.len(),
            remaining,
            "drain finished"
        );
        Ok(report)
    }

    /// Refresh the local working set from the remote store.
    pub async fn pull(&self) -> Result<PullReport> {
        let store = self.store.get().await?;
        let mut report = PullReport::default();

        let catalog_path = self.remote_path(Collection::Exercises);
        let mut catalog = self.remote.read_all(&catalog_path).await?;
        if catalog.is_empty() && store.count(Collection::Exercises).await? == 0 {
            catalog = self.seed_catalog(&catalog_path).await?;
            report.seeded = catalog.len();
        }
        self.merge::<Exercise>(&store, catalog, &mut report).await?;

        let workouts = self
            .remote
            .read_recent(
                &self.remote_path(Collection::Workouts),
                SortKey::Date.field(),
                self.limits.recent_workouts,
            )
            .await?;
        self.merge::<WorkoutSession>(&store, workouts, &mut report)
            .await?;

        let weights = self
            .remote
            .read_recent(
                &self.remote_path(Collection::WeightEntries),
                SortKey::Date.field(),
                self.limits.weight_history,
            )
            .await?;
        self.merge::<WeightEntry>(&store, weights, &mut report)
            .await?;

        tracing::info!(
            applied = report.applied,
            pruned = report.pruned,
            seeded = report.seeded,
            conflicts = report.conflicts.len(),
            "pull finished"
        );
        Ok(report)
    }

    async fn seed_catalog(&self, path: &str) -> Result<Vec<RemoteDocument>> {
        tracing::info!("exercise catalog is empty, seeding defaults");
        let mut seeded = Vec::with_capacity(DEFAULT_EXERCISES.len());
        for name in DEFAULT_EXERCISES {
            let data = Exercise::new(name, Coefficient::X1).to_remote()?;
            let id = self.remote.add(path, data.clone()).await?;
            seeded.push(RemoteDocument { id, data });
        }
        Ok(seeded)
    }

    async fn merge<E: Entity + PartialEq>(
        &self,
        store: &LocalStore,
        documents: Vec<RemoteDocument>,
        report: &mut PullReport,
    ) -> Result<()> {
        let collection = E::COLLECTION;
        let mut keep = HashSet::with_capacity(documents.len());

        for document in documents {
            keep.insert(document.id.clone());

            let remote = match E::from_remote(&document.id, &document.data) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::warn!(%collection, id = %document.id, error = %e, "ignoring undecodable remote document");
                    continue;
                }
            };

            let local = store.get::<E>(&document.id).await?;
            if local.as_ref() == Some(&remote) {
                continue;
            }

            // Unsynced or queued records are left alone by the write itself,
            // so an edit landing after the read above still wins.
            if store.put_if_synced(&remote).await? {
                if local.is_some() {
                    report.conflicts.push(Conflict {
                        collection,
                        id: document.id,
                        resolution: ConflictResolution::RemoteWins,
                    });
                }
                report.applied += 1;
            } else {
                report.conflicts.push(Conflict {
                    collection,
                    id: document.id,
                    resolution: ConflictResolution::LocalWins,
                });
            }
        }

        report.pruned += store.retain(collection, &keep).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("user_id", &self.user_id)
            .field("limits", &self.limits)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
