//! Bookkeeping about the last sync attempt, for display and for deciding whether one is running.

use chrono::{DateTime, Utc};

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyncState {
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub in_progress: bool,
}

impl SyncState {
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.last_started = Some(now);
        self.in_progress = true;
    }

    pub fn mark_finished(&mut self, now: DateTime<Utc>, error: Option<String>) {
        self.last_finished = Some(now);
        self.in_progress = false;
        match error {
            None => {
                self.last_success = Some(now);
                self.last_error = None;
            }
            Some(error) => self.last_error = Some(error),
        }
    }
}
