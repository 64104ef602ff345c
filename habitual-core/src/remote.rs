//! The remote side of sync: a trait for anything that can hold a user's records, and the
//! Supabase implementation of it.

use std::future::Future;
use std::sync::RwLock;

use reconcile::Record;
use reconcile::supabase::{SupabaseClient, SupabaseConfig};

use crate::error::SyncError;
use crate::model::{Achievement, Completion, Habit};

/// The records a push carries. Each is the exact version that was dirty when the push started.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub habits: Vec<Habit>,
    pub completions: Vec<Completion>,
    pub achievements: Vec<Achievement>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.habits.is_empty() && self.completions.is_empty() && self.achievements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.habits.len() + self.completions.len() + self.achievements.len()
    }

    pub(crate) fn versions<R: Record>(records: &[R]) -> Vec<(R::Key, chrono::DateTime<chrono::Utc>)> {
        records
            .iter()
            .map(|record| (record.key(), record.modified_at()))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushAck {
    pub accepted: usize,
}

pub trait RemoteBackend: Send + Sync + 'static {
    fn fetch_habits(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Habit>, SyncError>> + Send;

    fn fetch_completions(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Completion>, SyncError>> + Send;

    fn fetch_achievements(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Achievement>, SyncError>> + Send;

    /// Store every record in `changes`, overwriting rows with the same key.
    fn push_changes(
        &self,
        user_id: &str,
        changes: &ChangeSet,
    ) -> impl Future<Output = Result<PushAck, SyncError>> + Send;

    /// Called on login and logout. Backends that don't authenticate can ignore it.
    fn set_access_token(&self, _token: Option<String>) {}
}

const HABITS_TABLE: &str = "habits";
const COMPLETIONS_TABLE: &str = "habit_completions";
const ACHIEVEMENTS_TABLE: &str = "achievements";

pub struct SupabaseBackend {
    client: SupabaseClient,
    access_token: RwLock<Option<String>>,
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            client: SupabaseClient::new(config),
            access_token: RwLock::new(None),
        }
    }

    fn token(&self) -> Result<String, SyncError> {
        self.access_token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::NotAuthenticated)
    }
}

impl RemoteBackend for SupabaseBackend {
    async fn fetch_habits(&self, user_id: &str) -> Result<Vec<Habit>, SyncError> {
        let token = self.token()?;
        Ok(self
            .client
            .select_for_user(HABITS_TABLE, user_id, &token)
            .await?)
    }

    async fn fetch_completions(&self, user_id: &str) -> Result<Vec<Completion>, SyncError> {
        let token = self.token()?;
        Ok(self
            .client
            .select_for_user(COMPLETIONS_TABLE, user_id, &token)
            .await?)
    }

    async fn fetch_achievements(&self, user_id: &str) -> Result<Vec<Achievement>, SyncError> {
        let token = self.token()?;
        Ok(self
            .client
            .select_for_user(ACHIEVEMENTS_TABLE, user_id, &token)
            .await?)
    }

    async fn push_changes(&self, user_id: &str, changes: &ChangeSet) -> Result<PushAck, SyncError> {
        let token = self.token()?;
        let (habits, completions, achievements) = futures::try_join!(
            self.client
                .upsert(HABITS_TABLE, "id", user_id, &changes.habits, &token),
            self.client.upsert(
                COMPLETIONS_TABLE,
                "habit_id,date",
                user_id,
                &changes.completions,
                &token
            ),
            self.client.upsert(
                ACHIEVEMENTS_TABLE,
                "user_id,id",
                user_id,
                &changes.achievements,
                &token
            ),
        )?;
        Ok(PushAck {
            accepted: habits + completions + achievements,
        })
    }

    fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = token;
    }
}
