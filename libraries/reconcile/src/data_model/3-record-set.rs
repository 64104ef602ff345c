//! # RecordSet
//! One collection of records (all of a user's habits, say), keyed by [`Record::key`].
//! Backed by a persistent map, so cloning a set is cheap and two sets can be compared by identity
//! to tell whether anything changed in between.

use std::ops::RangeBounds;

use chrono::{DateTime, Utc};
use im::OrdMap;

use crate::data_model::{Entry, MergeStrategy, Record, Resolution, SyncStatus};

#[derive(Clone, Debug)]
pub struct RecordSet<R: Record> {
    records: OrdMap<R::Key, Entry<R>>,
    /// Remote versions parked by [`Resolution::Defer`], waiting for a decision.
    conflicts: OrdMap<R::Key, R>,
}

impl<R: Record> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            records: OrdMap::new(),
            conflicts: OrdMap::new(),
        }
    }
}

impl<R: Record> PartialEq for RecordSet<R> {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records && self.conflicts == other.conflicts
    }
}

/// What a merge did, by key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeReport<K> {
    pub inserted: Vec<K>,
    pub updated: Vec<K>,
    pub kept_local: Vec<K>,
    pub deferred: Vec<K>,
}

impl<K> Default for MergeReport<K> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            kept_local: Vec::new(),
            deferred: Vec::new(),
        }
    }
}

impl<K> MergeReport<K> {
    /// True if the local set was modified.
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty()
    }
}

impl<R: Record> RecordSet<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.records.get(key).map(|entry| &entry.record)
    }

    pub fn entry(&self, key: &R::Key) -> Option<&Entry<R>> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.records.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.values().map(|entry| &entry.record)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<R>> {
        self.records.values()
    }

    pub fn range<B>(&self, range: B) -> impl Iterator<Item = &R>
    where
        B: RangeBounds<R::Key>,
    {
        self.records.range(range).map(|(_, entry)| &entry.record)
    }

    /// Whether both sets share the same underlying storage, i.e. nothing was written to either
    /// since one was cloned from the other.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.records.ptr_eq(&other.records) && self.conflicts.ptr_eq(&other.conflicts)
    }

    /// Insert or replace a record edited on this device. Returns the previous version.
    pub fn upsert_local(&mut self, record: R) -> Option<R> {
        let key = record.key();
        let base = self.records.get(&key).and_then(|previous| {
            if previous.is_dirty() {
                previous.base
            } else {
                Some(previous.record.modified_at())
            }
        });
        self.records
            .insert(key, Entry::edited(record, base))
            .map(|entry| entry.record)
    }

    /// Insert or replace a record that is already known to match the remote.
    pub fn upsert_clean(&mut self, record: R) -> Option<R> {
        self.records
            .insert(record.key(), Entry::clean(record))
            .map(|entry| entry.record)
    }

    /// Records waiting to be pushed. Records with a parked conflict are held back until it is resolved.
    pub fn dirty(&self) -> Vec<R> {
        self.records
            .iter()
            .filter(|(key, entry)| entry.is_dirty() && !self.conflicts.contains_key(key))
            .map(|(_, entry)| entry.record.clone())
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.records.values().filter(|entry| entry.is_dirty()).count()
    }

    /// Mark pushed versions clean. A record edited again after it was pushed keeps its dirty flag,
    /// which is why the pushed timestamp has to match.
    pub fn mark_clean(&mut self, pushed: &[(R::Key, DateTime<Utc>)]) -> usize {
        let mut marked = 0;
        for (key, modified_at) in pushed {
            let Some(entry) = self.records.get(key) else {
                log::warn!("Pushed record {key:?} is no longer in the local set");
                continue;
            };
            if entry.is_dirty() && entry.record.modified_at() == *modified_at {
                let record = entry.record.clone();
                self.records.insert(key.clone(), Entry::clean(record));
                marked += 1;
            }
        }
        marked
    }

    /// Merge a pulled collection into the local one.
    pub fn merge_remote(
        &mut self,
        remote: impl IntoIterator<Item = R>,
        strategy: &dyn MergeStrategy<R>,
    ) -> MergeReport<R::Key> {
        let mut report = MergeReport::default();

        for remote_record in remote {
            let key = remote_record.key();
            let Some(local) = self.records.get(&key) else {
                self.records
                    .insert(key.clone(), Entry::clean(remote_record));
                report.inserted.push(key);
                continue;
            };

            if local.record == remote_record {
                if local.is_dirty() {
                    // The remote already has exactly this version.
                    self.records.insert(key, Entry::clean(remote_record));
                }
                continue;
            }

            match strategy.resolve(local, &remote_record) {
                Resolution::KeepLocal => report.kept_local.push(key),
                Resolution::TakeRemote => {
                    self.conflicts.remove(&key);
                    self.records.insert(key.clone(), Entry::clean(remote_record));
                    report.updated.push(key);
                }
                Resolution::Merged(merged) => {
                    self.conflicts.remove(&key);
                    let base = Some(remote_record.modified_at());
                    self.records.insert(key.clone(), Entry::edited(merged, base));
                    report.updated.push(key);
                }
                Resolution::Defer => {
                    self.conflicts.insert(key.clone(), remote_record);
                    report.deferred.push(key);
                }
            }
        }

        if !report.deferred.is_empty() {
            log::info!("{} conflict(s) deferred for manual resolution", report.deferred.len());
        }

        report
    }

    pub fn conflicts(&self) -> impl Iterator<Item = (&R::Key, &R)> {
        self.conflicts.iter()
    }

    /// Settle a parked conflict. With `take_remote` the parked version replaces the local one;
    /// otherwise the local version is rebased onto it and wins on the next push.
    /// Returns false if there was no conflict for `key`.
    pub fn resolve_conflict(&mut self, key: &R::Key, take_remote: bool) -> bool {
        let Some(remote) = self.conflicts.remove(key) else {
            return false;
        };
        if take_remote {
            self.records.insert(key.clone(), Entry::clean(remote));
        } else if let Some(local) = self.records.get(key) {
            let rebased = Entry::edited(local.record.clone(), Some(remote.modified_at()));
            self.records.insert(key.clone(), rebased);
        }
        true
    }

    pub fn status(&self, key: &R::Key) -> Option<SyncStatus> {
        self.records.get(key).map(|entry| entry.status)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(bound(
    serialize = "R: serde::Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
struct RecordSetRepr<R> {
    records: Vec<Entry<R>>,
    #[serde(default)]
    conflicts: Vec<R>,
}

// Keys are not necessarily strings, so the set is written as a list and re-keyed on load.
impl<R: Record + serde::Serialize> serde::Serialize for RecordSet<R> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordSetRepr {
            records: self.records.values().cloned().collect(),
            conflicts: self.conflicts.values().cloned().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de, R: Record + serde::de::DeserializeOwned> serde::Deserialize<'de> for RecordSet<R> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RecordSetRepr::<R>::deserialize(deserializer)?;
        Ok(Self {
            records: repr
                .records
                .into_iter()
                .map(|entry| (entry.record.key(), entry))
                .collect(),
            conflicts: repr
                .conflicts
                .into_iter()
                .map(|record| (record.key(), record))
                .collect(),
        })
    }
}
