//! # Record
//! Anything that can be reconciled. A record only has to know its own key and when it was last edited;
//! everything else about it is opaque to the engine.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

pub trait Record: Clone + Debug + PartialEq {
    type Key: Ord + Clone + Debug;

    fn key(&self) -> Self::Key;

    /// Wall-clock time of the last edit, on whichever device made it.
    fn modified_at(&self) -> DateTime<Utc>;
}

/// Whether the local copy of a record still has to be pushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Matches what the remote had at the last sync.
    Clean,
    /// Edited locally since the last successful push.
    Dirty,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Entry<R> {
    pub record: R,
    pub status: SyncStatus,
    /// For dirty records: `modified_at` of the last remote version this edit was based on.
    /// `None` if the record was created here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<DateTime<Utc>>,
}

impl<R> Entry<R> {
    pub fn clean(record: R) -> Self {
        Self {
            record,
            status: SyncStatus::Clean,
            base: None,
        }
    }

    pub fn dirty(record: R) -> Self {
        Self::edited(record, None)
    }

    /// A local edit of the remote version written at `base`.
    pub fn edited(record: R, base: Option<DateTime<Utc>>) -> Self {
        Self {
            record,
            status: SyncStatus::Dirty,
            base,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.status == SyncStatus::Dirty
    }
}
