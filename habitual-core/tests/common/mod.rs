#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use habitual_core::notifications::{Notification, Notifier, ScheduledNotification};
use habitual_core::store::shared;
use habitual_core::{
    Achievement, ChangeSet, Completion, FixedClock, Habit, HabitStore, MergePolicy, PushAck,
    RemoteBackend, SharedStore, SyncCoordinator, SyncError,
};
use reconcile::MemoryStore;
use tokio::sync::Notify;

/// What the server holds. Shared between backends to simulate several devices of one user.
#[derive(Default)]
pub struct RemoteTables {
    pub habits: BTreeMap<String, Habit>,
    pub completions: BTreeMap<(String, NaiveDate), Completion>,
    pub achievements: BTreeMap<String, Achievement>,
}

#[derive(Default)]
pub struct MemoryBackend {
    pub tables: Arc<Mutex<RemoteTables>>,
    pub fail_fetch: AtomicBool,
    pub fetches: AtomicUsize,
    pub pushes: AtomicUsize,
    /// When set, `fetch_habits` waits for a permit before answering.
    pub gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever `fetch_habits` starts.
    pub entered: Arc<Notify>,
}

impl MemoryBackend {
    pub fn sharing(tables: &Arc<Mutex<RemoteTables>>) -> Self {
        Self {
            tables: Arc::clone(tables),
            ..Self::default()
        }
    }

    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

impl RemoteBackend for MemoryBackend {
    async fn fetch_habits(&self, _user_id: &str) -> Result<Vec<Habit>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check()?;
        Ok(self.tables.lock().unwrap().habits.values().cloned().collect())
    }

    async fn fetch_completions(&self, _user_id: &str) -> Result<Vec<Completion>, SyncError> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .completions
            .values()
            .cloned()
            .collect())
    }

    async fn fetch_achievements(&self, _user_id: &str) -> Result<Vec<Achievement>, SyncError> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .achievements
            .values()
            .cloned()
            .collect())
    }

    async fn push_changes(&self, _user_id: &str, changes: &ChangeSet) -> Result<PushAck, SyncError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock().unwrap();
        for habit in &changes.habits {
            tables.habits.insert(habit.id.clone(), habit.clone());
        }
        for completion in &changes.completions {
            tables
                .completions
                .insert((completion.habit_id.clone(), completion.date), completion.clone());
        }
        for achievement in &changes.achievements {
            tables
                .achievements
                .insert(achievement.id.clone(), achievement.clone());
        }
        Ok(PushAck {
            accepted: changes.len(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub schedules: Mutex<Vec<Vec<ScheduledNotification>>>,
    pub announced: Mutex<Vec<Notification>>,
    pub cancelled: AtomicUsize,
}

impl Notifier for RecordingNotifier {
    fn replace_schedule(&self, schedule: Vec<ScheduledNotification>) {
        self.schedules.lock().unwrap().push(schedule);
    }

    fn cancel_all(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn announce(&self, notification: Notification) {
        self.announced.lock().unwrap().push(notification);
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap()
}

pub struct Device {
    pub clock: Arc<FixedClock>,
    pub store: SharedStore,
    pub sync: Arc<SyncCoordinator<MemoryBackend>>,
}

impl Device {
    pub fn new(backend: MemoryBackend, policy: MergePolicy) -> Self {
        let clock = Arc::new(FixedClock::new(start_time()));
        let store = shared(HabitStore::open(MemoryStore::new(), clock.clone()).unwrap());
        let sync = Arc::new(SyncCoordinator::new(
            store.clone(),
            Arc::new(backend),
            policy,
            Duration::from_secs(3600),
        ));
        sync.set_user(Some("user-1".to_string()));
        Self { clock, store, sync }
    }

    pub fn backend(&self) -> &MemoryBackend {
        self.sync.backend()
    }
}
