use chrono::NaiveDate;
use reconcile::PersistenceError;
use reconcile::supabase::SupabaseError;

/// Bad input to a mutator. Nothing was changed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("habit name must not be empty")]
    EmptyName,
    #[error("habit name is too long ({0} characters, max 80)")]
    NameTooLong(usize),
    #[error("habit color must be a #RRGGBB hex string, got `{0}`")]
    InvalidColor(String),
    #[error("habit icon must not be empty")]
    MissingIcon,
    #[error("numeric habits need a target goal greater than zero")]
    InvalidGoal,
    #[error("weekly repeat rule needs at least one weekday")]
    NoWeekdays,
    #[error("repeat interval must be at least one day")]
    ZeroInterval,
    #[error("completion progress must be a finite, non-negative number, got {0}")]
    InvalidProgress(f64),
    #[error("cannot record a completion for {date}, which is in the future")]
    FutureDate { date: NaiveDate },
    #[error("cannot record a completion for {date}, before the habit started on {start}")]
    BeforeStart { date: NaiveDate, start: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Habit,
    Completion,
    Conflict,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Habit => write!(f, "habit"),
            RecordKind::Completion => write!(f, "completion"),
            RecordKind::Conflict => write!(f, "conflict"),
        }
    }
}

/// A referenced id does not exist (or, for habits, was deleted). Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} `{id}` not found")]
pub struct NotFoundError {
    pub kind: RecordKind,
    pub id: String,
}

impl NotFoundError {
    pub fn habit(id: &str) -> Self {
        Self {
            kind: RecordKind::Habit,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// The write-through failed and the in-memory state was rolled back. Safe to retry.
    #[error("couldn't save: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no access token; log in before syncing")]
    NotAuthenticated,
    #[error("remote request failed: {0}")]
    Remote(#[from] SupabaseError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("SUPABASE_URL and SUPABASE_ANON_KEY must be set together")]
    IncompleteSupabase,
    #[error("SUPABASE_URL and SUPABASE_ANON_KEY are required for syncing")]
    MissingSupabase,
}

/// Failure to assemble a tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("couldn't open the habit store: {0}")]
    Store(#[from] StoreError),
}
