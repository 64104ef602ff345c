//! The local habit store. Every read is served from memory, every write goes through to the
//! key-value store before the call returns.
//!
//! Mutations build the next [`Snapshot`] on a clone, persist it, and only then swap it in. If the
//! write fails, the clone is dropped and the store still holds the last durable snapshot.

use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use reconcile::persistence::{load_snapshot, save_snapshot};
use reconcile::{
    KeyValueStore, LastWriteWins, ListenerKey, Listeners, ManualResolution, MergeReport,
    MergeStrategy, SyncState,
};

use crate::achievements::{self, MonotonicUnlock};
use crate::clock::Clock;
use crate::error::{NotFoundError, RecordKind, StoreError, ValidationError};
use crate::model::{
    Achievement, Completion, CompletionValue, Habit, HabitId, HabitPatch, NewHabit, Snapshot,
};
use crate::remote::ChangeSet;
use crate::stats::{HabitStats, Scope, StatsMemo};

pub const SNAPSHOT_KEY: &str = "snapshot";

#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    HabitsChanged,
    CompletionChanged { habit_id: HabitId, date: NaiveDate },
    AchievementUnlocked(Achievement),
    /// A pull changed local records.
    RemoteMerged(MergeSummary),
}

/// What listeners receive: the event and the snapshot right after it.
#[derive(Clone, Debug)]
pub struct StoreChange {
    pub event: StoreEvent,
    pub snapshot: Snapshot,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

/// How pulled records are reconciled with local ones, per collection.
pub struct MergePolicy {
    pub habits: Box<dyn MergeStrategy<Habit>>,
    pub completions: Box<dyn MergeStrategy<Completion>>,
    pub achievements: Box<dyn MergeStrategy<Achievement>>,
}

impl MergePolicy {
    pub fn last_write_wins() -> Self {
        Self {
            habits: Box::new(LastWriteWins),
            completions: Box::new(LastWriteWins),
            achievements: Box::new(MonotonicUnlock),
        }
    }

    /// Park conflicting habit and completion edits until they are resolved by hand.
    pub fn manual() -> Self {
        Self {
            habits: Box::new(ManualResolution),
            completions: Box::new(ManualResolution),
            achievements: Box::new(MonotonicUnlock),
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::last_write_wins()
    }
}

impl std::fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergePolicy").finish_non_exhaustive()
    }
}

/// Records pulled from the remote in one sync.
#[derive(Clone, Debug, Default)]
pub struct RemoteRecords {
    pub habits: Vec<Habit>,
    pub completions: Vec<Completion>,
    pub achievements: Vec<Achievement>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub kept_local: usize,
    pub deferred: usize,
}

impl MergeSummary {
    fn add<K>(&mut self, report: &MergeReport<K>) {
        self.inserted += report.inserted.len();
        self.updated += report.updated.len();
        self.kept_local += report.kept_local.len();
        self.deferred += report.deferred.len();
    }

    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

pub struct HabitStore {
    snapshot: Snapshot,
    storage: Box<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    listeners: Listeners<StoreChange>,
    stats: RefCell<StatsMemo>,
    sync_state: SyncState,
}

impl std::fmt::Debug for HabitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HabitStore")
            .field("habits", &self.snapshot.habits.len())
            .field("completions", &self.snapshot.completions.len())
            .field("listeners", &self.listeners)
            .field("sync_state", &self.sync_state)
            .finish()
    }
}

impl HabitStore {
    /// Load the last persisted snapshot, or start empty.
    pub fn open(
        storage: impl KeyValueStore + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let mut snapshot: Snapshot = load_snapshot(&storage, SNAPSHOT_KEY)?.unwrap_or_default();
        log::info!(
            "Opened habit store: {} habit(s), {} completion(s), {} unsynced",
            snapshot.habits.len(),
            snapshot.completions.len(),
            snapshot.habits.dirty_count() + snapshot.completions.dirty_count()
        );
        seed_catalog(&mut snapshot, clock.now());

        Ok(Self {
            snapshot,
            storage: Box::new(storage),
            clock,
            listeners: Listeners::default(),
            stats: RefCell::new(StatsMemo::default()),
            sync_state: SyncState::default(),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    pub fn owner(&self) -> Option<&str> {
        self.snapshot.owner.as_deref()
    }

    /// Make `user_id` the owner of the local records.
    ///
    /// Records made before the first login are adopted. If another user owned the store, their
    /// records (pushed or not) are dropped so they are never shown to or pushed as `user_id`.
    /// Returns whether anything was dropped.
    pub fn claim_for(&mut self, user_id: &str) -> Result<bool, StoreError> {
        match self.snapshot.owner.as_deref() {
            Some(owner) if owner == user_id => Ok(false),
            None => {
                let mut next = self.snapshot.clone();
                next.owner = Some(user_id.to_string());
                save_snapshot(&*self.storage, SNAPSHOT_KEY, &next)?;
                self.snapshot = next;
                log::info!("Local records now belong to {user_id}");
                Ok(false)
            }
            Some(owner) => {
                log::warn!(
                    "Switching from {owner} to {user_id}: dropping {} local record(s), {} unsynced",
                    self.snapshot.habits.len() + self.snapshot.completions.len(),
                    self.unsynced_count()
                );
                let mut next = Snapshot {
                    owner: Some(user_id.to_string()),
                    ..Snapshot::default()
                };
                seed_catalog(&mut next, self.clock.now());
                self.commit(next, vec![StoreEvent::HabitsChanged])?;
                self.sync_state = SyncState::default();
                Ok(true)
            }
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// A `modified_at` for a new version of a record last written at `previous`.
    /// Always strictly later, so a pushed version can be told apart from a re-edit.
    fn next_version(&self, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = self.clock.now();
        match previous {
            Some(previous) if previous >= now => previous + chrono::Duration::milliseconds(1),
            _ => now,
        }
    }

    /// Unlock whatever `next` now qualifies for, then persist and swap it in.
    fn commit(&mut self, mut next: Snapshot, events: Vec<StoreEvent>) -> Result<(), StoreError> {
        let today = self.clock.today();
        let now = self.clock.now();
        let unlocked = achievements::evaluate(&next, today, now);
        for achievement in &unlocked {
            log::info!("Achievement unlocked: {}", achievement.title);
            next.achievements.upsert_local(achievement.clone());
        }

        save_snapshot(&*self.storage, SNAPSHOT_KEY, &next)?;
        self.snapshot = next;

        let events = events
            .into_iter()
            .chain(unlocked.into_iter().map(StoreEvent::AchievementUnlocked));
        for event in events {
            self.listeners.queue(StoreChange {
                event,
                snapshot: self.snapshot.clone(),
                today,
                now,
            });
        }
        Ok(())
    }

    fn active_habit(&self, id: &str) -> Result<&Habit, NotFoundError> {
        self.snapshot
            .habit(id)
            .filter(|habit| habit.is_active())
            .ok_or_else(|| NotFoundError::habit(id))
    }

    pub fn add_habit(&mut self, new: NewHabit) -> Result<Habit, StoreError> {
        let now = self.clock.now();
        let habit = Habit {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            color: new.color,
            icon: new.icon,
            category: new.category,
            kind: new.kind,
            target_goal: new.target_goal,
            repeat: new.repeat,
            reminder: new.reminder,
            start_date: self.clock.today(),
            created_at: now,
            modified_at: now,
            deleted: false,
        };
        habit.validate()?;

        let mut next = self.snapshot.clone();
        next.habits.upsert_local(habit.clone());
        self.commit(next, vec![StoreEvent::HabitsChanged])?;
        log::info!("Added habit {} ({})", habit.name, habit.id);
        Ok(habit)
    }

    pub fn update_habit(&mut self, id: &str, patch: HabitPatch) -> Result<Habit, StoreError> {
        let current = self.active_habit(id)?.clone();
        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        updated.validate()?;
        if updated == current {
            return Ok(current);
        }
        updated.modified_at = self.next_version(Some(current.modified_at));

        let mut next = self.snapshot.clone();
        next.habits.upsert_local(updated.clone());
        self.commit(next, vec![StoreEvent::HabitsChanged])?;
        Ok(updated)
    }

    /// Soft delete. The habit's completions stay queryable through [`HabitStore::completions_for`].
    pub fn delete_habit(&mut self, id: &str) -> Result<(), StoreError> {
        let Some(habit) = self.snapshot.habit(id) else {
            return Err(NotFoundError::habit(id).into());
        };
        if habit.deleted {
            return Ok(());
        }
        let mut deleted = habit.clone();
        deleted.deleted = true;
        deleted.modified_at = self.next_version(Some(habit.modified_at));

        let mut next = self.snapshot.clone();
        next.habits.upsert_local(deleted);
        self.commit(next, vec![StoreEvent::HabitsChanged])?;
        log::info!("Deleted habit {id}");
        Ok(())
    }

    /// Record a day's result for a habit. Setting the value it already has writes nothing.
    pub fn set_completion(
        &mut self,
        habit_id: &str,
        date: NaiveDate,
        value: CompletionValue,
    ) -> Result<Completion, StoreError> {
        value.validate()?;
        let habit = self.active_habit(habit_id)?;
        if date > self.clock.today() {
            return Err(ValidationError::FutureDate { date }.into());
        }
        if date < habit.start_date {
            return Err(ValidationError::BeforeStart {
                date,
                start: habit.start_date,
            }
            .into());
        }

        let existing = self.snapshot.completion(habit_id, date);
        if let Some(existing) = existing.filter(|existing| existing.value == value) {
            return Ok(existing.clone());
        }

        let completion = Completion {
            habit_id: habit_id.to_string(),
            date,
            value,
            modified_at: self.next_version(existing.map(|c| c.modified_at)),
        };
        let mut next = self.snapshot.clone();
        next.completions.upsert_local(completion.clone());
        self.commit(
            next,
            vec![StoreEvent::CompletionChanged {
                habit_id: habit_id.to_string(),
                date,
            }],
        )?;
        Ok(completion)
    }

    /// Un-mark a day. The record stays (as not done) so the change reaches other devices.
    pub fn clear_completion(&mut self, habit_id: &str, date: NaiveDate) -> Result<(), StoreError> {
        self.active_habit(habit_id)?;
        if self.snapshot.completion(habit_id, date).is_none() {
            return Ok(());
        }
        self.set_completion(habit_id, date, CompletionValue::Done(false))?;
        Ok(())
    }

    fn scope(&self, habit_id: Option<&str>) -> Result<Scope, NotFoundError> {
        if let Some(id) = habit_id.filter(|id| self.snapshot.habit(id).is_none()) {
            return Err(NotFoundError::habit(id));
        }
        Ok(Scope::from_habit_id(habit_id))
    }

    /// Streaks, totals and success rate for one habit, or for all active habits with `None`.
    pub fn stats(&self, habit_id: Option<&str>) -> Result<HabitStats, NotFoundError> {
        let scope = self.scope(habit_id)?;
        let today = self.clock.today();
        Ok(self.stats.borrow_mut().get(&self.snapshot, &scope, today))
    }

    pub fn current_streak(&self, habit_id: Option<&str>) -> Result<u32, NotFoundError> {
        Ok(self.stats(habit_id)?.current_streak)
    }

    pub fn max_streak(&self, habit_id: Option<&str>) -> Result<u32, NotFoundError> {
        Ok(self.stats(habit_id)?.max_streak)
    }

    pub fn total_completions(&self, habit_id: Option<&str>) -> Result<u32, NotFoundError> {
        Ok(self.stats(habit_id)?.total_completions)
    }

    pub fn success_rate(&self, habit_id: Option<&str>) -> Result<u32, NotFoundError> {
        Ok(self.stats(habit_id)?.success_rate)
    }

    /// Active habits, oldest first.
    pub fn active_habits(&self) -> Vec<Habit> {
        let mut habits: Vec<Habit> = self.snapshot.active_habits().cloned().collect();
        habits.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        habits
    }

    /// Any habit by id, including deleted ones.
    pub fn habit(&self, id: &str) -> Option<&Habit> {
        self.snapshot.habit(id)
    }

    pub fn completions_for(&self, habit_id: &str) -> Result<Vec<Completion>, NotFoundError> {
        if self.snapshot.habit(habit_id).is_none() {
            return Err(NotFoundError::habit(habit_id));
        }
        Ok(self.snapshot.completions_for(habit_id).cloned().collect())
    }

    pub fn achievements(&self) -> Vec<Achievement> {
        self.snapshot.achievements.iter().cloned().collect()
    }

    /// Merge pulled records. Persists only if something changed.
    pub fn apply_remote(
        &mut self,
        policy: &MergePolicy,
        remote: RemoteRecords,
    ) -> Result<MergeSummary, StoreError> {
        let mut next = self.snapshot.clone();
        let mut summary = MergeSummary::default();
        summary.add(&next.habits.merge_remote(remote.habits, &*policy.habits));
        summary.add(
            &next
                .completions
                .merge_remote(remote.completions, &*policy.completions),
        );
        summary.add(
            &next
                .achievements
                .merge_remote(remote.achievements, &*policy.achievements),
        );

        log::info!(
            "Merged remote records: {} inserted, {} updated, {} kept local, {} deferred",
            summary.inserted,
            summary.updated,
            summary.kept_local,
            summary.deferred
        );

        // An identical remote copy can clean a dirty record without changing anything else.
        if next != self.snapshot {
            let events = if summary.changed() {
                vec![StoreEvent::RemoteMerged(summary)]
            } else {
                Vec::new()
            };
            self.commit(next, events)?;
        }
        Ok(summary)
    }

    /// Every record that hasn't reached the remote yet.
    pub fn changes_to_push(&self) -> ChangeSet {
        ChangeSet {
            habits: self.snapshot.habits.dirty(),
            completions: self.snapshot.completions.dirty(),
            achievements: self.snapshot.achievements.dirty(),
        }
    }

    /// Mark the pushed versions clean. Records edited since `pushed` was taken stay dirty.
    pub fn mark_pushed(&mut self, pushed: &ChangeSet) -> Result<usize, StoreError> {
        let mut next = self.snapshot.clone();
        let marked = next.habits.mark_clean(&ChangeSet::versions(&pushed.habits))
            + next
                .completions
                .mark_clean(&ChangeSet::versions(&pushed.completions))
            + next
                .achievements
                .mark_clean(&ChangeSet::versions(&pushed.achievements));
        if marked > 0 {
            save_snapshot(&*self.storage, SNAPSHOT_KEY, &next)?;
            self.snapshot = next;
        }
        Ok(marked)
    }

    pub fn unsynced_count(&self) -> usize {
        self.snapshot.habits.dirty_count()
            + self.snapshot.completions.dirty_count()
            + self.snapshot.achievements.dirty_count()
    }

    pub fn conflict_count(&self) -> usize {
        self.snapshot.habits.conflicts().count() + self.snapshot.completions.conflicts().count()
    }

    /// Remote versions parked under [`MergePolicy::manual`], next to the local version they clash with.
    pub fn habit_conflicts(&self) -> Vec<(Habit, Habit)> {
        self.snapshot
            .habits
            .conflicts()
            .filter_map(|(id, remote)| {
                let local = self.snapshot.habits.get(id)?;
                Some((local.clone(), remote.clone()))
            })
            .collect()
    }

    pub fn resolve_habit_conflict(&mut self, id: &str, take_remote: bool) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        if !next.habits.resolve_conflict(&id.to_string(), take_remote) {
            return Err(NotFoundError {
                kind: RecordKind::Conflict,
                id: id.to_string(),
            }
            .into());
        }
        self.commit(next, vec![StoreEvent::HabitsChanged])
    }

    pub fn resolve_completion_conflict(
        &mut self,
        habit_id: &str,
        date: NaiveDate,
        take_remote: bool,
    ) -> Result<(), StoreError> {
        let mut next = self.snapshot.clone();
        if !next
            .completions
            .resolve_conflict(&(habit_id.to_string(), date), take_remote)
        {
            return Err(NotFoundError {
                kind: RecordKind::Conflict,
                id: format!("{habit_id}/{date}"),
            }
            .into());
        }
        self.commit(
            next,
            vec![StoreEvent::CompletionChanged {
                habit_id: habit_id.to_string(),
                date,
            }],
        )
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync_state
    }

    pub fn mark_sync_started(&mut self) {
        let now = self.clock.now();
        self.sync_state.mark_started(now);
    }

    pub fn mark_sync_finished(&mut self, error: Option<String>) {
        let now = self.clock.now();
        self.sync_state.mark_finished(now, error);
    }

    pub fn register_listener(
        &mut self,
        listener: impl Fn(&StoreChange) + Send + Sync + 'static,
    ) -> ListenerKey {
        self.listeners.register_listener(listener)
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.unregister_listener(key);
    }

    /// Queued listener calls. Run them after releasing the store lock.
    pub fn drain_notifications(&mut self) -> Vec<Box<dyn FnOnce() + Send>> {
        self.listeners.drain_due_notifications()
    }
}

fn seed_catalog(snapshot: &mut Snapshot, now: DateTime<Utc>) {
    for achievement in achievements::default_catalog(now) {
        if !snapshot.achievements.contains(&achievement.id) {
            snapshot.achievements.upsert_clean(achievement);
        }
    }
}

pub type SharedStore = Arc<Mutex<HabitStore>>;

pub fn shared(store: HabitStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock the store. A panic in another holder doesn't make the data unusable, so poisoning is ignored.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, HabitStore> {
    store.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub fn flush_notifications(store: &SharedStore) {
    let notifications = lock_store(store).drain_notifications();
    for notification in notifications {
        notification();
    }
}

/// Flushes store notifications when dropped. Create it before taking the lock, so it drops after.
pub(crate) struct FlushLater<'a> {
    store: &'a SharedStore,
}

impl<'a> FlushLater<'a> {
    pub(crate) fn new(store: &'a SharedStore) -> Self {
        Self { store }
    }
}

impl Drop for FlushLater<'_> {
    fn drop(&mut self) {
        flush_notifications(self.store);
    }
}
