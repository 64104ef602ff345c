//! The home-screen widget reads a small JSON document from a shared key-value store.
//! It is rewritten after every change, unless it would come out byte-for-byte the same.

use std::sync::Mutex;

use chrono::NaiveDate;
use reconcile::{KeyValueStore, PersistenceError};
use xxhash_rust::xxh3::xxh3_64;

use crate::model::{HabitId, Snapshot};
use crate::stats::{self, Scope};

pub const WIDGET_KEY: &str = "widget-snapshot";

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct WidgetSnapshot {
    pub today: NaiveDate,
    pub current_streak: u32,
    pub completed_today: usize,
    pub scheduled_today: usize,
    pub habits: Vec<WidgetHabit>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct WidgetHabit {
    pub id: HabitId,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub scheduled_today: bool,
    pub done_today: bool,
    pub current_streak: u32,
}

impl WidgetSnapshot {
    pub fn build(snapshot: &Snapshot, today: NaiveDate) -> Self {
        let mut habits: Vec<_> = snapshot.active_habits().collect();
        habits.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let habits: Vec<WidgetHabit> = habits
            .into_iter()
            .map(|habit| WidgetHabit {
                id: habit.id.clone(),
                name: habit.name.clone(),
                color: habit.color.clone(),
                icon: habit.icon.clone(),
                scheduled_today: habit.is_scheduled_on(today),
                done_today: snapshot.is_done_on(habit, today),
                current_streak: stats::current_streak(
                    snapshot,
                    &Scope::Habit(habit.id.clone()),
                    today,
                ),
            })
            .collect();

        WidgetSnapshot {
            today,
            current_streak: stats::current_streak(snapshot, &Scope::AllActive, today),
            completed_today: habits
                .iter()
                .filter(|habit| habit.scheduled_today && habit.done_today)
                .count(),
            scheduled_today: habits.iter().filter(|habit| habit.scheduled_today).count(),
            habits,
        }
    }
}

pub struct WidgetPublisher {
    bridge: Box<dyn KeyValueStore>,
    last_hash: Mutex<Option<u64>>,
}

impl WidgetPublisher {
    pub fn new(bridge: impl KeyValueStore + 'static) -> Self {
        Self {
            bridge: Box::new(bridge),
            last_hash: Mutex::new(None),
        }
    }

    /// Write the widget document. Returns false if it was unchanged and nothing was written.
    pub fn publish(&self, widget: &WidgetSnapshot) -> Result<bool, PersistenceError> {
        let bytes = serde_json::to_vec(widget)?;
        let hash = xxh3_64(&bytes);

        let mut last_hash = self
            .last_hash
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last_hash == Some(hash) {
            return Ok(false);
        }
        self.bridge.set(WIDGET_KEY, &bytes)?;
        *last_hash = Some(hash);
        log::debug!("Widget updated ({} bytes)", bytes.len());
        Ok(true)
    }

    /// Remove the widget document, e.g. on logout.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        *self
            .last_hash
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        self.bridge.delete(WIDGET_KEY)
    }
}
