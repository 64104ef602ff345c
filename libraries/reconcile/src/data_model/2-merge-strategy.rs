//! # MergeStrategy
//! Decides what happens when a pulled record collides with a local one.
//! Records that exist on only one side never reach a strategy: remote-only records are inserted,
//! local-only records are kept as they are.

use crate::data_model::{Entry, Record};

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<R> {
    KeepLocal,
    TakeRemote,
    /// Replace both sides with a combined record. The result is marked dirty so it gets pushed.
    Merged(R),
    /// Keep local for now and park the remote version until someone resolves it.
    Defer,
}

pub trait MergeStrategy<R: Record>: Send + Sync {
    fn resolve(&self, local: &Entry<R>, remote: &R) -> Resolution<R>;
}

/// Newest `modified_at` wins and the remote copy wins ties, dirty or not.
///
/// A dirty local record survives only a strictly older remote version, so an unpushed edit is
/// never downgraded by a stale pull.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastWriteWins;

impl<R: Record> MergeStrategy<R> for LastWriteWins {
    fn resolve(&self, local: &Entry<R>, remote: &R) -> Resolution<R> {
        if remote.modified_at() >= local.record.modified_at() {
            Resolution::TakeRemote
        } else {
            Resolution::KeepLocal
        }
    }
}

/// Field-level merge. The closure receives `(local, remote)` and builds the combined record.
/// Clean local records are simply replaced, since there is nothing local to preserve.
pub struct FieldMerge<F>(pub F);

impl<R, F> MergeStrategy<R> for FieldMerge<F>
where
    R: Record,
    F: Fn(&R, &R) -> R + Send + Sync,
{
    fn resolve(&self, local: &Entry<R>, remote: &R) -> Resolution<R> {
        if !local.is_dirty() {
            return LastWriteWins.resolve(local, remote);
        }
        let merged = (self.0)(&local.record, remote);
        if &merged == remote {
            Resolution::TakeRemote
        } else if merged == local.record {
            Resolution::KeepLocal
        } else {
            Resolution::Merged(merged)
        }
    }
}

/// Queues real conflicts for manual resolution: the record was edited here, and the remote copy
/// changed since the version that edit started from.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualResolution;

impl<R: Record> MergeStrategy<R> for ManualResolution {
    fn resolve(&self, local: &Entry<R>, remote: &R) -> Resolution<R> {
        if !local.is_dirty() {
            LastWriteWins.resolve(local, remote)
        } else if local.base == Some(remote.modified_at()) {
            Resolution::KeepLocal
        } else {
            Resolution::Defer
        }
    }
}
