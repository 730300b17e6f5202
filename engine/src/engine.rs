//! The public entry point: optimistic writes, reads, and sync control.
//!
//! Every mutation is two independent effects. [`SyncEngine::apply_local`]
//! writes the change to the local store with `isSynced = false`, then
//! [`SyncEngine::push_or_enqueue`] either confirms it remotely right away or
//! leaves it in the sync queue for the next drain.
//!
//! When the local store cannot be opened the engine runs remote-only: writes
//! go straight to the remote store and reads come from it.

use crate::config::EngineConfig;
use crate::handle::StoreHandle;
use crate::http::HttpRemote;
use crate::model::{
    now_millis, Coefficient, Entity, Exercise, SortKey, WeightEntry, WorkoutExercise,
    WorkoutSession,
};
use crate::network::{Connectivity, ConnectivityProbe, NetworkMonitor, Transition};
use crate::queue::{EntityRef, Mutation, SyncQueue};
use crate::reconcile::{DrainReport, PullReport, Reconciler, SyncLimits, SyncStatus};
use crate::remote::RemoteStore;
use crate::store::{LocalStore, StoreOptions};
use crate::{error::Result, Error};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// What happened to a mutation after its local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote store accepted it immediately
    Confirmed,
    /// It is waiting in the sync queue
    Queued,
}

/// Result of a manual sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub drain: DrainReport,
    pub pull: PullReport,
}

/// Offline-first workout log.
#[derive(Clone)]
pub struct SyncEngine {
    store: StoreHandle,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    reconciler: Arc<Reconciler>,
    probe: Option<(Arc<dyn ConnectivityProbe>, Duration)>,
}

impl SyncEngine {
    pub fn new(
        store: StoreHandle,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
        user_id: impl Into<String>,
        limits: SyncLimits,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            remote.clone(),
            user_id,
            limits,
        ));
        Self {
            store,
            remote,
            network,
            reconciler,
            probe: None,
        }
    }

    /// Build an engine talking to the document server described by `config`.
    ///
    /// Starts offline; the health probe brings it online.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut remote = HttpRemote::new(config.remote_url.clone());
        if let Some(token) = &config.api_token {
            remote = remote.with_token(token.clone());
        }
        let remote = Arc::new(remote);

        let mut engine = Self::new(
            StoreHandle::new(StoreOptions::file(config.database_path.clone())),
            remote.clone(),
            NetworkMonitor::new(Connectivity::Offline),
            config.user_id.clone(),
            config.limits,
        );
        if let Some(interval) = config.probe_interval {
            engine = engine.with_probe(remote, interval);
        }
        engine
    }

    /// Probe connectivity in the background once started.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        self.probe = Some((probe, interval));
        self
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Watch the sync status indicator.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.reconciler.status()
    }

    /// React to connectivity changes in the background.
    ///
    /// Every offline to online transition drains the queue, then pulls.
    /// A transition arriving while a drain is running is dropped.
    pub fn start(&self) -> JoinHandle<()> {
        let probe = self
            .probe
            .as_ref()
            .map(|(probe, interval)| self.network.spawn_probe(probe.clone(), *interval));

        let mut transitions = self.network.subscribe();
        let reconciler = self.reconciler.clone();

        tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(Transition::WentOnline) => {
                        let reconciler = reconciler.clone();
                        tokio::spawn(async move { on_reconnect(&reconciler).await });
                    }
                    Ok(Transition::WentOffline) => {
                        if let Err(e) = reconciler.refresh_status().await {
                            tracing::debug!(error = %e, "cannot refresh sync status");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "missed connectivity transitions");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            if let Some(probe) = probe {
                probe.abort();
            }
        })
    }

    // Writes

    pub async fn create_exercise(
        &self,
        name: impl Into<String>,
        coefficient: Coefficient,
    ) -> Result<Exercise> {
        let exercise = Exercise::new(name, coefficient);
        self.commit(Mutation::CreateExercise(exercise.clone()))
            .await?;
        Ok(exercise)
    }

    pub async fn update_exercise(&self, mut exercise: Exercise) -> Result<Exercise> {
        self.ensure_exists::<Exercise>(&exercise.id).await?;
        exercise.is_synced = false;
        exercise.updated_at = now_millis();
        self.commit(Mutation::UpdateExercise(exercise.clone()))
            .await?;
        Ok(exercise)
    }

    /// Delete an exercise. Deleting an unknown id succeeds.
    pub async fn delete_exercise(&self, id: &str) -> Result<()> {
        self.commit(Mutation::DeleteExercise(EntityRef { id: id.to_string() }))
            .await
    }

    pub async fn create_workout(
        &self,
        date: NaiveDate,
        exercises: Vec<WorkoutExercise>,
    ) -> Result<WorkoutSession> {
        let workout = WorkoutSession::new(date, exercises);
        self.commit(Mutation::CreateWorkout(workout.clone()))
            .await?;
        Ok(workout)
    }

    pub async fn update_workout(&self, mut workout: WorkoutSession) -> Result<WorkoutSession> {
        self.ensure_exists::<WorkoutSession>(&workout.id).await?;
        workout.is_synced = false;
        self.commit(Mutation::UpdateWorkout(workout.clone()))
            .await?;
        Ok(workout)
    }

    /// Delete a workout. Deleting an unknown id succeeds.
    pub async fn delete_workout(&self, id: &str) -> Result<()> {
        self.commit(Mutation::DeleteWorkout(EntityRef { id: id.to_string() }))
            .await
    }

    pub async fn record_weight(&self, date: NaiveDate, weight: f64) -> Result<WeightEntry> {
        let entry = WeightEntry::new(date, weight);
        self.commit(Mutation::CreateWeightEntry(entry.clone()))
            .await?;
        Ok(entry)
    }

    async fn commit(&self, mutation: Mutation) -> Result<()> {
        match self.store.get().await {
            Ok(store) => {
                self.apply_local(&store, &mutation).await?;
                self.push_or_enqueue(&store, mutation).await?;
                Ok(())
            }
            Err(Error::StoreUnavailable(reason)) => {
                if !self.network.is_online() {
                    return Err(Error::StoreUnavailable(reason));
                }
                self.reconciler.push(&mutation).await
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_exists<E: Entity>(&self, id: &str) -> Result<()> {
        // Remote-only mode has nothing local to check against.
        let Ok(store) = self.store.get().await else {
            return Ok(());
        };
        match store.get::<E>(id).await? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                collection: E::COLLECTION.name(),
                id: id.to_string(),
            }),
        }
    }

    /// Write a mutation's effect to the local store, unconfirmed.
    pub async fn apply_local(&self, store: &LocalStore, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::CreateExercise(e) | Mutation::UpdateExercise(e) => {
                store.put(&unsynced(e)).await
            }
            Mutation::CreateWorkout(w) | Mutation::UpdateWorkout(w) => {
                store.put(&unsynced(w)).await
            }
            Mutation::CreateWeightEntry(w) => store.put(&unsynced(w)).await,
            Mutation::DeleteExercise(r) => store.delete::<Exercise>(&r.id).await.map(|_| ()),
            Mutation::DeleteWorkout(r) => store.delete::<WorkoutSession>(&r.id).await.map(|_| ()),
        }
    }

    /// Confirm a mutation remotely now if possible, otherwise queue it.
    ///
    /// A mutation for an entity that already has queued changes is queued
    /// behind them so the remote store sees changes in order.
    pub async fn push_or_enqueue(&self, store: &LocalStore, mutation: Mutation) -> Result<WriteOutcome> {
        let queue = SyncQueue::new(store.clone());

        if self.network.is_online() && queue.pending_for(mutation.entity_id()).await? == 0 {
            match self.reconciler.push(&mutation).await {
                Ok(()) => {
                    if !mutation.is_delete() {
                        queue
                            .settle(mutation.collection(), mutation.entity_id())
                            .await?;
                    }
                    return Ok(WriteOutcome::Confirmed);
                }
                Err(e) => {
                    tracing::warn!(
                        kind = mutation.kind(),
                        entity = mutation.entity_id(),
                        error = %e,
                        "immediate remote write failed, queueing"
                    );
                }
            }
        }

        queue.enqueue(mutation).await?;
        self.reconciler.refresh_status().await?;
        Ok(WriteOutcome::Queued)
    }

    // Reads

    /// The exercise catalog, ordered by name.
    pub async fn exercises(&self) -> Result<Vec<Exercise>> {
        match self.store.get().await {
            Ok(store) => store.get_all().await,
            Err(Error::StoreUnavailable(_)) => {
                let mut exercises: Vec<Exercise> = self.read_remote_all().await?;
                exercises.sort_by_key(|e| e.name.to_lowercase());
                Ok(exercises)
            }
            Err(e) => Err(e),
        }
    }

    /// All cached workouts, newest first.
    pub async fn workouts(&self) -> Result<Vec<WorkoutSession>> {
        match self.store.get().await {
            Ok(store) => store.get_all().await,
            Err(Error::StoreUnavailable(_)) => {
                let mut workouts: Vec<WorkoutSession> = self.read_remote_all().await?;
                workouts.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
                Ok(workouts)
            }
            Err(e) => Err(e),
        }
    }

    /// The `limit` most recent workouts.
    pub async fn recent_workouts(&self, limit: usize) -> Result<Vec<WorkoutSession>> {
        match self.store.get().await {
            Ok(store) => store.get_recent(SortKey::Date, limit).await,
            Err(Error::StoreUnavailable(_)) => self.read_remote_recent(limit).await,
            Err(e) => Err(e),
        }
    }

    /// Body-weight history, newest first.
    pub async fn weight_entries(&self) -> Result<Vec<WeightEntry>> {
        match self.store.get().await {
            Ok(store) => store.get_all().await,
            Err(Error::StoreUnavailable(_)) => {
                self.read_remote_recent(self.reconciler.limits().weight_history)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn read_remote_all<E: Entity>(&self) -> Result<Vec<E>> {
        let path = self.reconciler.remote_path(E::COLLECTION);
        let documents = self.remote.read_all(&path).await?;
        documents
            .iter()
            .map(|d| E::from_remote(&d.id, &d.data))
            .collect()
    }

    async fn read_remote_recent<E: Entity>(&self, limit: usize) -> Result<Vec<E>> {
        let path = self.reconciler.remote_path(E::COLLECTION);
        let documents = self
            .remote
            .read_recent(&path, SortKey::Date.field(), limit)
            .await?;
        documents
            .iter()
            .map(|d| E::from_remote(&d.id, &d.data))
            .collect()
    }

    // Sync control

    /// Drain the queue and refresh the local working set, now.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        if !self.network.is_online() {
            return Err(Error::Offline);
        }
        let drain = self.reconciler.drain().await?;
        let pull = self.reconciler.pull().await?;
        Ok(SyncReport { drain, pull })
    }

    /// Number of mutations waiting in the queue.
    pub async fn pending_count(&self) -> Result<usize> {
        match self.store.get().await {
            Ok(store) => SyncQueue::new(store).len().await,
            Err(Error::StoreUnavailable(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

async fn on_reconnect(reconciler: &Reconciler) {
    match reconciler.try_drain().await {
        None => return,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "reconnect drain failed");
            return;
        }
        Some(Ok(_)) => {}
    }
    if let Err(e) = reconciler.pull().await {
        tracing::warn!(error = %e, "reconnect pull failed, serving cached data");
    }
}

fn unsynced<E: Entity>(entity: &E) -> E {
    let mut entity = entity.clone();
    entity.set_synced(false);
    entity
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("network", &self.network.current())
            .field("reconciler", &self.reconciler)
            .finish()
    }
}
