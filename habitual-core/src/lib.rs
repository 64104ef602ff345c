//! Habitual: a habit tracker's core.
//!
//! Habits and their daily completions live in a [`HabitStore`] that answers every read from memory
//! and writes every change through to disk. Streaks, totals and success rates are derived on
//! demand (see [`stats`]), never stored. A [`SyncCoordinator`] reconciles the store with a remote
//! backend on startup, login, foreground and on a timer, and [`HabitTracker`] wires all of it
//! together with reminders and the home-screen widget.

use std::sync::LazyLock;

pub mod achievements;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod notifications;
pub mod remote;
pub mod stats;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod widget;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{ConfigError, NotFoundError, StoreError, SyncError, TrackerError, ValidationError};
pub use model::{
    Achievement, Category, Completion, CompletionValue, Habit, HabitId, HabitKind, HabitPatch,
    NewHabit, RepeatRule, Snapshot,
};
pub use remote::{ChangeSet, PushAck, RemoteBackend, SupabaseBackend};
pub use stats::{HabitStats, Scope};
pub use store::{HabitStore, MergePolicy, SharedStore, StoreChange, StoreEvent};
pub use sync::{SkipReason, SyncCoordinator, SyncOutcome, SyncPhase, SyncReport, SyncTrigger};
pub use tracker::HabitTracker;

static LOGGER: LazyLock<()> = LazyLock::new(|| {
    if env_logger::try_init().is_ok() {
        log::info!("Logging initialized");
    }
});

/// Set up `env_logger` (honoring `RUST_LOG`). Safe to call more than once.
pub fn init_logging() {
    LazyLock::force(&LOGGER);
}
