//! Keeps the local store and the remote backend in step.
//!
//! A sync pulls all three collections, merges them into the store, then pushes whatever is still
//! dirty. The store lock is only held for the merge and for marking pushed records clean, never
//! across a network call, so the UI keeps working while a sync is in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::remote::RemoteBackend;
use crate::store::{FlushLater, MergePolicy, MergeSummary, RemoteRecords, SharedStore, lock_store};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Periodic,
    Login,
    Foreground,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotLoggedIn,
    AlreadySyncing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub merged: MergeSummary,
    pub pushed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
    /// The user logged out (or the coordinator was cancelled) while the sync was running.
    /// Nothing it fetched was applied.
    Discarded,
    Failed(String),
}

/// Clears the in-flight flag however the sync ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncCoordinator<B: RemoteBackend> {
    store: SharedStore,
    backend: Arc<B>,
    policy: MergePolicy,
    interval: Duration,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    user_id: RwLock<Option<String>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: RemoteBackend> SyncCoordinator<B> {
    pub fn new(store: SharedStore, backend: Arc<B>, policy: MergePolicy, interval: Duration) -> Self {
        Self {
            store,
            backend,
            policy,
            interval,
            in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            user_id: RwLock::new(None),
            ticker: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn phase(&self) -> SyncPhase {
        if self.in_flight.load(Ordering::SeqCst) {
            SyncPhase::Syncing
        } else {
            SyncPhase::Idle
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Switch users. Any sync still running for the previous user is discarded when it finishes,
    /// and the store is handed to the new user (see [`HabitStore::claim_for`]).
    ///
    /// [`HabitStore::claim_for`]: crate::store::HabitStore::claim_for
    pub fn set_user(&self, user_id: Option<String>) {
        {
            let mut current = self
                .user_id
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *current == user_id {
                return;
            }
            self.cancel();
            *current = user_id.clone();
        }
        if let Some(user_id) = user_id {
            let _flusher = FlushLater::new(&self.store);
            if let Err(e) = lock_store(&self.store).claim_for(&user_id) {
                log::error!("Couldn't hand the store to {user_id}: {e}");
            }
        }
    }

    /// The current user together with the epoch their syncs run under.
    fn session(&self) -> Option<(String, u64)> {
        let current = self
            .user_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // `set_user` bumps the epoch under the write lock, so the pair is consistent.
        let epoch = self.epoch.load(Ordering::SeqCst);
        current.clone().map(|user_id| (user_id, epoch))
    }

    /// Make any in-flight sync drop its results.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        let Some((user_id, epoch)) = self.session() else {
            log::debug!("Skipping {trigger:?} sync: not logged in");
            return SyncOutcome::Skipped(SkipReason::NotLoggedIn);
        };
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Skipping {trigger:?} sync: a sync is already running");
            return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
        }
        let _in_flight = InFlight(&self.in_flight);

        log::info!("Starting {trigger:?} sync");
        lock_store(&self.store).mark_sync_started();

        match self.run(trigger, &user_id, epoch).await {
            Ok(Some(report)) => {
                log::info!(
                    "Sync finished: {} pulled, {} updated, {} pushed",
                    report.merged.inserted,
                    report.merged.updated,
                    report.pushed
                );
                lock_store(&self.store).mark_sync_finished(None);
                SyncOutcome::Completed(report)
            }
            Ok(None) => {
                log::info!("Discarding {trigger:?} sync results: the session changed");
                lock_store(&self.store).mark_sync_finished(None);
                SyncOutcome::Discarded
            }
            Err(e) => {
                log::error!("Sync failed: {e}");
                lock_store(&self.store).mark_sync_finished(Some(e.to_string()));
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        trigger: SyncTrigger,
        user_id: &str,
        epoch: u64,
    ) -> Result<Option<SyncReport>, SyncError> {
        let (habits, completions, achievements) = futures::try_join!(
            self.backend.fetch_habits(user_id),
            self.backend.fetch_completions(user_id),
            self.backend.fetch_achievements(user_id),
        )?;

        let (merged, changes) = {
            let _flusher = FlushLater::new(&self.store);
            let mut store = lock_store(&self.store);
            if !self.is_current(epoch) {
                return Ok(None);
            }
            store.claim_for(user_id)?;
            let merged = store.apply_remote(
                &self.policy,
                RemoteRecords {
                    habits,
                    completions,
                    achievements,
                },
            )?;
            (merged, store.changes_to_push())
        };

        if changes.is_empty() {
            return Ok(Some(SyncReport {
                trigger,
                merged,
                pushed: 0,
            }));
        }

        let ack = self.backend.push_changes(user_id, &changes).await?;
        if ack.accepted < changes.len() {
            log::warn!(
                "Remote accepted {} of {} pushed record(s)",
                ack.accepted,
                changes.len()
            );
        }

        let mut store = lock_store(&self.store);
        if !self.is_current(epoch) {
            return Ok(None);
        }
        let pushed = store.mark_pushed(&changes)?;
        Ok(Some(SyncReport {
            trigger,
            merged,
            pushed,
        }))
    }

    /// Start syncing every `interval`. The first tick is one interval from now.
    /// Needs a tokio runtime; returns false if there isn't one.
    pub fn start_periodic(self: &Arc<Self>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("No tokio runtime; periodic sync is disabled");
            return false;
        };

        let coordinator = Arc::downgrade(self);
        let interval = self.interval;
        let task = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.sync_now(SyncTrigger::Periodic).await;
            }
        });

        let previous = self
            .ticker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        log::info!("Periodic sync every {}s", interval.as_secs());
        true
    }

    pub fn stop_periodic(&self) {
        let task = self
            .ticker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            log::info!("Periodic sync stopped");
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<B: RemoteBackend> Drop for SyncCoordinator<B> {
    fn drop(&mut self) {
        self.stop_periodic();
    }
}
