//! `HabitTracker` ties the store, the sync coordinator and the side effects (reminders, the widget)
//! together. Hosts create one, call [`HabitTracker::init`] once, and [`HabitTracker::dispose`] when
//! tearing down.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use reconcile::{FileStore, ListenerKey};

use crate::clock::SystemClock;
use crate::config::TrackerConfig;
use crate::error::{ConfigError, NotFoundError, StoreError, TrackerError};
use crate::model::{Completion, CompletionValue, Habit, HabitPatch, NewHabit};
use crate::notifications::{Notification, Notifier, compute_scheduled_notifications};
use crate::remote::{RemoteBackend, SupabaseBackend};
use crate::stats::HabitStats;
use crate::store::{
    FlushLater, HabitStore, MergePolicy, SharedStore, StoreChange, StoreEvent, flush_notifications,
    lock_store, shared,
};
use crate::sync::{SyncCoordinator, SyncOutcome, SyncTrigger};
use crate::widget::{WidgetPublisher, WidgetSnapshot};

/// Where reminders and the widget go, and how to schedule them.
struct Effects {
    notifier: Arc<dyn Notifier>,
    widget: WidgetPublisher,
    timezone_offset_minutes: i32,
    reminder_horizon_days: u32,
}

impl Effects {
    fn refresh(&self, change: &StoreChange) {
        if let StoreEvent::AchievementUnlocked(achievement) = &change.event {
            self.notifier.announce(Notification::achievement(achievement));
        }

        let schedule = compute_scheduled_notifications(
            &change.snapshot,
            change.now,
            self.timezone_offset_minutes,
            self.reminder_horizon_days,
        );
        self.notifier.replace_schedule(schedule);

        let widget = WidgetSnapshot::build(&change.snapshot, change.today);
        if let Err(e) = self.widget.publish(&widget) {
            log::warn!("Couldn't update the widget: {e}");
        }
    }
}

pub struct HabitTracker<B: RemoteBackend> {
    store: SharedStore,
    sync: Arc<SyncCoordinator<B>>,
    effects: Arc<Effects>,
    listener_keys: Mutex<Vec<ListenerKey>>,
}

impl HabitTracker<SupabaseBackend> {
    /// A tracker that keeps its data under `config.data_dir` and syncs with Supabase.
    pub fn open(config: &TrackerConfig, notifier: Arc<dyn Notifier>) -> Result<Self, TrackerError> {
        let supabase = config.supabase.clone().ok_or(ConfigError::MissingSupabase)?;
        let storage = FileStore::new(&config.data_dir).map_err(StoreError::from)?;
        let clock = SystemClock::new(config.timezone_offset_minutes);
        let store = HabitStore::open(storage.clone(), Arc::new(clock))?;
        Ok(Self::new(
            store,
            Arc::new(SupabaseBackend::new(supabase)),
            notifier,
            WidgetPublisher::new(storage),
            config,
            MergePolicy::default(),
        ))
    }
}

impl<B: RemoteBackend> HabitTracker<B> {
    pub fn new(
        store: HabitStore,
        backend: Arc<B>,
        notifier: Arc<dyn Notifier>,
        widget: WidgetPublisher,
        config: &TrackerConfig,
        policy: MergePolicy,
    ) -> Self {
        let store = shared(store);
        let sync = Arc::new(SyncCoordinator::new(
            store.clone(),
            backend,
            policy,
            config.sync_interval,
        ));
        Self {
            store,
            sync,
            effects: Arc::new(Effects {
                notifier,
                widget,
                timezone_offset_minutes: config.timezone_offset_minutes,
                reminder_horizon_days: config.reminder_horizon_days,
            }),
            listener_keys: Mutex::new(Vec::new()),
        }
    }

    fn listener_keys(&self) -> MutexGuard<'_, Vec<ListenerKey>> {
        self.listener_keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Hook up reminders and the widget, and sync right away if someone is logged in.
    /// Returns the startup sync's outcome.
    pub async fn init(&self) -> SyncOutcome {
        {
            let mut keys = self.listener_keys();
            if keys.is_empty() {
                let effects = Arc::clone(&self.effects);
                let key = lock_store(&self.store).register_listener(move |change| {
                    effects.refresh(change);
                });
                keys.push(key);
            }
        }
        self.refresh_effects();

        if self.sync.user_id().is_some() {
            self.sync.start_periodic();
        }
        self.sync.sync_now(SyncTrigger::Startup).await
    }

    /// Stop the timer and detach from the store. Any sync still running is discarded.
    pub fn dispose(&self) {
        self.sync.stop_periodic();
        self.sync.cancel();
        let keys: Vec<ListenerKey> = self.listener_keys().drain(..).collect();
        let mut store = lock_store(&self.store);
        for key in keys {
            store.unregister_listener(key);
        }
        log::info!("Habit tracker disposed");
    }

    /// Recompute reminders and the widget from the current state.
    pub fn refresh_effects(&self) {
        let change = {
            let store = lock_store(&self.store);
            StoreChange {
                event: StoreEvent::HabitsChanged,
                snapshot: store.snapshot(),
                today: store.today(),
                now: store.now(),
            }
        };
        self.effects.refresh(&change);
    }

    pub async fn login(&self, user_id: impl Into<String>, access_token: impl Into<String>) -> SyncOutcome {
        let user_id = user_id.into();
        log::info!("Logged in as {user_id}");
        self.sync.backend().set_access_token(Some(access_token.into()));
        self.sync.set_user(Some(user_id));
        self.sync.start_periodic();
        self.sync.sync_now(SyncTrigger::Login).await
    }

    pub fn logout(&self) {
        self.sync.stop_periodic();
        self.sync.set_user(None);
        self.sync.backend().set_access_token(None);
        self.effects.notifier.cancel_all();
        if let Err(e) = self.effects.widget.clear() {
            log::warn!("Couldn't clear the widget: {e}");
        }
        log::info!("Logged out");
    }

    /// The timer only runs in the foreground. Coming back restarts it and syncs right away.
    pub async fn set_foreground(&self, foreground: bool) -> Option<SyncOutcome> {
        if !foreground {
            self.sync.stop_periodic();
            return None;
        }
        if self.sync.user_id().is_some() && !self.sync.is_periodic_running() {
            self.sync.start_periodic();
        }
        Some(self.sync.sync_now(SyncTrigger::Foreground).await)
    }

    pub async fn sync_now(&self) -> SyncOutcome {
        self.sync.sync_now(SyncTrigger::Manual).await
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator<B>> {
        &self.sync
    }

    /// Direct access to the store. Listener calls queued while holding it run on the next mutation
    /// made through the tracker, or on [`HabitTracker::flush`].
    pub fn store(&self) -> MutexGuard<'_, HabitStore> {
        lock_store(&self.store)
    }

    pub fn flush(&self) {
        flush_notifications(&self.store);
    }

    pub fn add_habit(&self, new: NewHabit) -> Result<Habit, StoreError> {
        let _flusher = FlushLater::new(&self.store);
        lock_store(&self.store).add_habit(new)
    }

    pub fn update_habit(&self, id: &str, patch: HabitPatch) -> Result<Habit, StoreError> {
        let _flusher = FlushLater::new(&self.store);
        lock_store(&self.store).update_habit(id, patch)
    }

    pub fn delete_habit(&self, id: &str) -> Result<(), StoreError> {
        let _flusher = FlushLater::new(&self.store);
        lock_store(&self.store).delete_habit(id)
    }

    pub fn set_completion(
        &self,
        habit_id: &str,
        date: NaiveDate,
        value: CompletionValue,
    ) -> Result<Completion, StoreError> {
        let _flusher = FlushLater::new(&self.store);
        lock_store(&self.store).set_completion(habit_id, date, value)
    }

    pub fn clear_completion(&self, habit_id: &str, date: NaiveDate) -> Result<(), StoreError> {
        let _flusher = FlushLater::new(&self.store);
        lock_store(&self.store).clear_completion(habit_id, date)
    }

    pub fn stats(&self, habit_id: Option<&str>) -> Result<HabitStats, NotFoundError> {
        lock_store(&self.store).stats(habit_id)
    }

    pub fn active_habits(&self) -> Vec<Habit> {
        lock_store(&self.store).active_habits()
    }
}

impl<B: RemoteBackend> Drop for HabitTracker<B> {
    fn drop(&mut self) {
        self.sync.stop_periodic();
    }
}
