//! Watch-to-index synchronization.
//!
//! [`SyncController`] bridges an ordered stream of node events into
//! [`NodeIndex`] mutations and tracks lifecycle state. Events arrive over a
//! bounded channel and are applied strictly in delivery order by a single
//! consumer task; the producer side is the Kubernetes watch adapter in
//! [`crate::watch`], but tests feed the channel directly.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Error;
use crate::index::{NodeIndex, NodeRecord};
use crate::metrics::{self, SyncEventType};

/// One change observed on the node watch.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node was added or modified; replaces any record with the same name.
    Apply(NodeRecord),
    /// A node was deleted.
    Delete(String),
    /// The current listing has been fully replayed; the watch is now live.
    InitDone,
    /// The watch source is re-listing. Events up to the next `InitDone`
    /// form the replacement listing; the index keeps serving the previous
    /// one until then.
    Restarted,
}

/// Lifecycle of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// `start` has not been called.
    NotStarted,
    /// The run loop is consuming the initial listing.
    Syncing,
    /// The initial listing has been replayed; the watch is live.
    Synced,
    /// `stop` has been called; the run loop has not yet exited.
    ShuttingDown,
    /// The run loop has exited.
    Stopped,
}

/// Applies node events to a [`NodeIndex`] and exposes readiness.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SyncController {
    index: NodeIndex,
    state: Arc<Mutex<SyncState>>,
    synced: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SyncController {
    /// Create a controller that feeds the given index.
    pub fn new(index: NodeIndex) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            index,
            state: Arc::new(Mutex::new(SyncState::NotStarted)),
            synced: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// True once the initial listing has been replayed into the index.
    ///
    /// This only reports completeness; it never blocks queries. Callers
    /// decide whether to gate on it.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Start the run loop consuming `events`.
    ///
    /// Fails with [`Error::AlreadyRunning`] if called again before `stop`.
    pub fn start(&self, events: mpsc::Receiver<NodeEvent>) -> Result<JoinHandle<()>, Error> {
        {
            let mut state = self.state.lock();
            if *state != SyncState::NotStarted {
                return Err(Error::AlreadyRunning);
            }
            *state = SyncState::Syncing;
        }

        let controller = self.clone();
        Ok(tokio::spawn(async move {
            controller.run(events).await;
        }))
    }

    /// Request cancellation of the run loop.
    ///
    /// The loop observes the signal at its next event-receive point. A
    /// second call while shutdown is in progress (or after it completed)
    /// fails with [`Error::ShutdownInProgress`]; the signal is only ever
    /// sent once.
    pub fn stop(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        match *state {
            SyncState::ShuttingDown | SyncState::Stopped => Err(Error::ShutdownInProgress),
            _ => {
                *state = SyncState::ShuttingDown;
                // Receiver side may already be gone; that just means the
                // loop has nothing left to observe.
                let _ = self.shutdown_tx.send(true);
                Ok(())
            }
        }
    }

    async fn run(&self, mut events: mpsc::Receiver<NodeEvent>) {
        info!("node sync loop started");
        let mut shutdown = self.shutdown_rx.clone();
        // In-progress listing, accumulated between Restarted and InitDone.
        // The index keeps serving the previous listing until the swap.
        let mut staging: Option<HashMap<String, NodeRecord>> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("node sync loop received shutdown signal");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.apply(&mut staging, event),
                        None => {
                            info!("node event stream ended");
                            break;
                        }
                    }
                }
            }
        }

        *self.state.lock() = SyncState::Stopped;
        metrics::record_sync_stopped();
        info!("node sync loop stopped");
    }

    /// Apply one event, strictly in delivery order. While a listing is in
    /// progress its records go to `staging`; they reach the index only on
    /// `InitDone`, in one wholesale swap.
    fn apply(&self, staging: &mut Option<HashMap<String, NodeRecord>>, event: NodeEvent) {
        match event {
            NodeEvent::Apply(record) => {
                metrics::record_sync_event(SyncEventType::Apply);
                match staging {
                    Some(listing) => {
                        listing.insert(record.name.clone(), record);
                    }
                    None => self.index.upsert(record),
                }
            }
            NodeEvent::Delete(name) => {
                metrics::record_sync_event(SyncEventType::Delete);
                match staging {
                    Some(listing) => {
                        listing.remove(&name);
                    }
                    None => self.index.remove(&name),
                }
            }
            NodeEvent::InitDone => {
                metrics::record_sync_event(SyncEventType::InitDone);
                if let Some(listing) = staging.take() {
                    self.index.replace_all(listing);
                }
                let mut state = self.state.lock();
                if *state == SyncState::Syncing {
                    *state = SyncState::Synced;
                }
                drop(state);
                self.synced.store(true, Ordering::Release);
                debug!(nodes = self.index.len(), "node listing replayed");
            }
            NodeEvent::Restarted => {
                metrics::record_sync_event(SyncEventType::Restarted);
                *staging = Some(HashMap::new());
            }
        }
    }
}
