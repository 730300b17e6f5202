//! Network monitor - current connectivity plus a stream of transitions.
//!
//! Connectivity is fed either by the platform calling [`NetworkMonitor::set_online`]
//! or by a background probe asking a [`ConnectivityProbe`] whether the remote
//! is reachable. Only real changes produce transition events.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Current connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn from_online(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// A connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// offline -> online
    WentOnline,
    /// online -> offline
    WentOffline,
}

/// Something that can tell whether the remote store is reachable right now.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Shared connectivity state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<Connectivity>>,
    transitions: broadcast::Sender<Transition>,
}

impl NetworkMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(16);
        Self {
            state: Arc::new(state),
            transitions,
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Record the platform's view of connectivity.
    ///
    /// Returns the transition this caused, if any.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let next = Connectivity::from_online(online);
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return None;
        }

        let transition = if online {
            tracing::info!("network online");
            Transition::WentOnline
        } else {
            tracing::warn!("network offline");
            Transition::WentOffline
        };
        // No subscribers is fine.
        let _ = self.transitions.send(transition);
        Some(transition)
    }

    /// Stream of future transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Watch the current state.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Poll `probe` every `interval`, feeding results into this monitor.
    pub fn spawn_probe(
        &self,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.reachable().await;
                monitor.set_online(reachable);
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Offline)
    }
}
