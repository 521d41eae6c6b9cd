use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::folders::SyncFolder;
use crate::server::share_cache::{ShareStateCache, now_ms};

/// Identifies one remote listing: a collection inside one folder's account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub folder: String,
    pub collection: String,
}

/// What a waiter learns when its fetch job resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Refreshed,
    Failed,
}

#[derive(Default)]
struct CoordinatorState {
    jobs: HashMap<CollectionKey, Vec<oneshot::Sender<FetchOutcome>>>,
    closed: bool,
}

/// Collapses concurrent share listings of the same collection into one
/// remote call and fans the result out to every waiter.
pub struct FetchCoordinator {
    cache: ShareStateCache,
    state: Mutex<CoordinatorState>,
}

impl FetchCoordinator {
    pub fn new(cache: ShareStateCache) -> Self {
        Self {
            cache,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn cache(&self) -> ShareStateCache {
        self.cache
    }

    /// Registers a waiter for `collection`, starting a remote fetch unless
    /// one is already running for the same key.
    ///
    /// The receiver resolves exactly once. It reports a closed channel when
    /// the coordinator shut down before the job finished.
    pub fn request_fetch(
        self: &Arc<Self>,
        folder: Arc<SyncFolder>,
        collection: String,
    ) -> oneshot::Receiver<FetchOutcome> {
        let (tx, rx) = oneshot::channel();
        let key = CollectionKey {
            folder: folder.alias().to_string(),
            collection,
        };

        let mut state = self.lock_state();
        if state.closed {
            return rx;
        }
        if let Some(waiters) = state.jobs.get_mut(&key) {
            waiters.push(tx);
            tracing::debug!(
                folder = %key.folder,
                collection = %key.collection,
                waiters = waiters.len(),
                "joined in-flight share fetch"
            );
            return rx;
        }
        state.jobs.insert(key.clone(), vec![tx]);
        drop(state);

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_job(folder, key).await;
        });
        rx
    }

    /// Number of collections with a remote fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_state().jobs.len()
    }

    /// Drops every pending waiter and refuses new ones.
    pub fn disconnect_all(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        let dropped: usize = state.jobs.values().map(Vec::len).sum();
        state.jobs.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "disconnected pending share fetch waiters");
        }
    }

    async fn run_job(&self, folder: Arc<SyncFolder>, key: CollectionKey) {
        let outcome = match folder.client().list_shares(&key.collection).await {
            Ok(shares) => {
                match self
                    .cache
                    .apply_share_listing(&folder, &key.collection, &shares, now_ms())
                    .await
                {
                    Ok(stats) => {
                        tracing::debug!(
                            folder = %key.folder,
                            collection = %key.collection,
                            reset = stats.reset,
                            marked = stats.marked,
                            unknown = stats.unknown,
                            "share listing applied"
                        );
                        FetchOutcome::Refreshed
                    }
                    Err(err) => {
                        tracing::warn!(
                            folder = %key.folder,
                            collection = %key.collection,
                            "failed to store share listing: {err}"
                        );
                        FetchOutcome::Failed
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    folder = %key.folder,
                    collection = %key.collection,
                    "share listing failed: {err}"
                );
                FetchOutcome::Failed
            }
        };

        let waiters = self.lock_state().jobs.remove(&key).unwrap_or_default();
        for waiter in waiters {
            // A receiver that went away has already answered its connection.
            let _ = waiter.send(outcome);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
