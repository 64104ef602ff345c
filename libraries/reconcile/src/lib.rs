//! This is a library for keeping a local-first copy of per-user records in step with a remote copy.
//! It was created for Habitual, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. Every record has a key and a modification timestamp.
//! 2. Local edits are applied to the in-memory [`RecordSet`] immediately and the touched entry is marked dirty.
//! 3. When syncing:
//!   1. The remote copy is pulled and merged into the local set through a [`MergeStrategy`]. Records that only exist locally are never dropped.
//!   2. Whatever is still dirty after the merge is pushed, and the pushed versions are marked clean once the remote acknowledges them.
//!
//! Persistence is simple: the whole snapshot is framed and written through a [`KeyValueStore`] after every mutation.

#[cfg(feature = "supabase")]
pub mod supabase;

pub mod data_model;
pub mod persistence;

pub use data_model::{
    Entry, FieldMerge, LastWriteWins, ListenerKey, Listeners, ManualResolution, MergeReport,
    MergeStrategy, Record, RecordSet, Resolution, SyncState, SyncStatus,
};
pub use persistence::{FileStore, KeyValueStore, MemoryStore, PersistenceError};
