//! The pieces of state the engine keeps in memory.

#[path = "data_model/1-record.rs"]
mod record;
pub use record::{Entry, Record, SyncStatus};

#[path = "data_model/2-merge-strategy.rs"]
mod merge_strategy;
pub use merge_strategy::{FieldMerge, LastWriteWins, ManualResolution, MergeStrategy, Resolution};

#[path = "data_model/3-record-set.rs"]
mod record_set;
pub use record_set::{MergeReport, RecordSet};

#[path = "data_model/4-sync-state.rs"]
mod sync_state;
pub use sync_state::SyncState;

#[path = "data_model/5-listeners.rs"]
mod listeners;
pub use listeners::{ListenerKey, Listeners};
