//! Habits, completions and achievements, plus the snapshot that holds all three.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use reconcile::{Record, RecordSet};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_NAME_LEN: usize = 80;

pub type HabitId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Health,
    Fitness,
    Mindfulness,
    Productivity,
    Learning,
    Social,
    Finance,
    Creativity,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Health,
        Category::Fitness,
        Category::Mindfulness,
        Category::Productivity,
        Category::Learning,
        Category::Social,
        Category::Finance,
        Category::Creativity,
        Category::Other,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitKind {
    /// Done or not done.
    Boolean,
    /// Progress toward `target_goal` (glasses of water, pages read).
    Numeric,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatRule {
    Daily,
    Weekly { weekdays: Vec<Weekday> },
    /// Every `days` days, counted from the habit's start date.
    EveryNDays { days: u32 },
}

impl RepeatRule {
    pub fn weekly(weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        let mut weekdays: Vec<Weekday> = weekdays.into_iter().collect();
        weekdays.sort_by_key(|day| day.num_days_from_monday());
        weekdays.dedup();
        RepeatRule::Weekly { weekdays }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            RepeatRule::Daily => Ok(()),
            RepeatRule::Weekly { weekdays } if weekdays.is_empty() => {
                Err(ValidationError::NoWeekdays)
            }
            RepeatRule::Weekly { .. } => Ok(()),
            RepeatRule::EveryNDays { days: 0 } => Err(ValidationError::ZeroInterval),
            RepeatRule::EveryNDays { .. } => Ok(()),
        }
    }

    /// Whether the rule covers `date`. `anchor` is the first day the rule applies from.
    pub fn applies_on(&self, anchor: NaiveDate, date: NaiveDate) -> bool {
        if date < anchor {
            return false;
        }
        match self {
            RepeatRule::Daily => true,
            RepeatRule::Weekly { weekdays } => weekdays.contains(&date.weekday()),
            RepeatRule::EveryNDays { days } => {
                *days > 0 && (date - anchor).num_days() % i64::from(*days) == 0
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub color: String,
    pub icon: String,
    pub category: Category,
    pub kind: HabitKind,
    #[serde(default)]
    pub target_goal: Option<f64>,
    pub repeat: RepeatRule,
    #[serde(default)]
    pub reminder: Option<NaiveTime>,
    /// The user's calendar day the habit was created on. Scheduling starts here.
    pub start_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl Habit {
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    pub fn is_scheduled_on(&self, date: NaiveDate) -> bool {
        self.repeat.applies_on(self.start_date, date)
    }

    /// Whether a completion value counts as the habit being done that day.
    pub fn is_satisfied_by(&self, value: &CompletionValue) -> bool {
        match (self.kind, value) {
            (_, CompletionValue::Done(done)) => *done,
            (HabitKind::Boolean, CompletionValue::Progress(progress)) => *progress > 0.0,
            (HabitKind::Numeric, CompletionValue::Progress(progress)) => self
                .target_goal
                .is_some_and(|goal| *progress >= goal),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let name_len = name.chars().count();
        if name_len > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong(name_len));
        }
        if !is_hex_color(&self.color) {
            return Err(ValidationError::InvalidColor(self.color.clone()));
        }
        if self.icon.trim().is_empty() {
            return Err(ValidationError::MissingIcon);
        }
        if self.kind == HabitKind::Numeric
            && !self
                .target_goal
                .is_some_and(|goal| goal.is_finite() && goal > 0.0)
        {
            return Err(ValidationError::InvalidGoal);
        }
        self.repeat.validate()
    }
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Record for Habit {
    type Key = HabitId;

    fn key(&self) -> HabitId {
        self.id.clone()
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
}

/// Input for creating a habit. Ids and timestamps are assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewHabit {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub color: String,
    pub icon: String,
    pub category: Category,
    pub kind: HabitKind,
    #[serde(default)]
    pub target_goal: Option<f64>,
    pub repeat: RepeatRule,
    #[serde(default)]
    pub reminder: Option<NaiveTime>,
}

impl NewHabit {
    /// A daily done/not-done habit with a default look.
    pub fn daily(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            color: "#4F46E5".to_string(),
            icon: "check".to_string(),
            category: Category::Other,
            kind: HabitKind::Boolean,
            target_goal: None,
            repeat: RepeatRule::Daily,
            reminder: None,
        }
    }
}

/// Fields to change on an existing habit. `None` leaves a field alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub category: Option<Category>,
    pub kind: Option<HabitKind>,
    pub target_goal: Option<Option<f64>>,
    pub repeat: Option<RepeatRule>,
    pub reminder: Option<Option<NaiveTime>>,
}

impl HabitPatch {
    pub fn apply_to(self, habit: &mut Habit) {
        let HabitPatch {
            name,
            description,
            color,
            icon,
            category,
            kind,
            target_goal,
            repeat,
            reminder,
        } = self;
        if let Some(name) = name {
            habit.name = name.trim().to_string();
        }
        if let Some(description) = description {
            habit.description = description;
        }
        if let Some(color) = color {
            habit.color = color;
        }
        if let Some(icon) = icon {
            habit.icon = icon;
        }
        if let Some(category) = category {
            habit.category = category;
        }
        if let Some(kind) = kind {
            habit.kind = kind;
        }
        if let Some(target_goal) = target_goal {
            habit.target_goal = target_goal;
        }
        if let Some(repeat) = repeat {
            habit.repeat = repeat;
        }
        if let Some(reminder) = reminder {
            habit.reminder = reminder;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &HabitPatch::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CompletionValue {
    Done(bool),
    Progress(f64),
}

impl CompletionValue {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            CompletionValue::Progress(progress) if !progress.is_finite() || *progress < 0.0 => {
                Err(ValidationError::InvalidProgress(*progress))
            }
            _ => Ok(()),
        }
    }
}

/// At most one per habit per day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub habit_id: HabitId,
    pub date: NaiveDate,
    pub value: CompletionValue,
    pub modified_at: DateTime<Utc>,
}

impl Record for Completion {
    type Key = (HabitId, NaiveDate);

    fn key(&self) -> (HabitId, NaiveDate) {
        (self.habit_id.clone(), self.date)
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    Streak,
    Completions,
    Habits,
    Consistency,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AchievementCondition {
    CurrentStreakAtLeast { days: u32 },
    MaxStreakAtLeast { days: u32 },
    TotalCompletionsAtLeast { count: u32 },
    ActiveHabitsAtLeast { count: u32 },
    /// Success rate of at least `percent`, once at least `min_scheduled` occurrences were due.
    SuccessRateAtLeast { percent: u32, min_scheduled: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementScope {
    /// Measured across all active habits together.
    Global,
    /// Met as soon as any single active habit meets it.
    AnyHabit,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: AchievementCategory,
    pub condition: AchievementCondition,
    pub scope: AchievementScope,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,
}

impl Record for Achievement {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
}

/// Everything the store knows, as one immutable value. Cloning is cheap.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The user these records belong to. `None` until the first login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub habits: RecordSet<Habit>,
    pub completions: RecordSet<Completion>,
    pub achievements: RecordSet<Achievement>,
}

impl Snapshot {
    pub fn habit(&self, id: &str) -> Option<&Habit> {
        self.habits.get(&id.to_string())
    }

    pub fn active_habits(&self) -> impl Iterator<Item = &Habit> {
        self.habits.iter().filter(|habit| habit.is_active())
    }

    pub fn completion(&self, habit_id: &str, date: NaiveDate) -> Option<&Completion> {
        self.completions.get(&(habit_id.to_string(), date))
    }

    /// Every completion ever recorded for a habit, oldest first. Includes deleted habits.
    pub fn completions_for(&self, habit_id: &str) -> impl Iterator<Item = &Completion> {
        let id = habit_id.to_string();
        self.completions
            .range((id.clone(), NaiveDate::MIN)..=(id, NaiveDate::MAX))
    }

    pub fn is_done_on(&self, habit: &Habit, date: NaiveDate) -> bool {
        self.completion(&habit.id, date)
            .is_some_and(|completion| habit.is_satisfied_by(&completion.value))
    }

    /// True if neither habits nor completions were written since `other` was cloned from this.
    pub fn same_stats_inputs(&self, other: &Snapshot) -> bool {
        self.habits.ptr_eq(&other.habits) && self.completions.ptr_eq(&other.completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn every_n_days_is_anchored_on_start() {
        let rule = RepeatRule::EveryNDays { days: 3 };
        let start = date(2025, 1, 1);
        assert!(rule.applies_on(start, date(2025, 1, 1)));
        assert!(!rule.applies_on(start, date(2025, 1, 2)));
        assert!(rule.applies_on(start, date(2025, 1, 4)));
        assert!(!rule.applies_on(start, date(2024, 12, 29)));
    }

    #[test]
    fn weekly_rule_normalizes_weekdays() {
        let rule = RepeatRule::weekly([Weekday::Fri, Weekday::Mon, Weekday::Fri]);
        assert_eq!(
            rule,
            RepeatRule::Weekly {
                weekdays: vec![Weekday::Mon, Weekday::Fri]
            }
        );
        // 2025-01-06 is a Monday
        assert!(rule.applies_on(date(2025, 1, 1), date(2025, 1, 6)));
        assert!(!rule.applies_on(date(2025, 1, 1), date(2025, 1, 7)));
    }

    #[test]
    fn numeric_habits_need_the_goal() {
        let mut new = NewHabit::daily("Water");
        new.kind = HabitKind::Numeric;
        new.target_goal = Some(8.0);
        let habit = Habit {
            id: "h".to_string(),
            name: new.name,
            description: new.description,
            color: new.color,
            icon: new.icon,
            category: new.category,
            kind: new.kind,
            target_goal: new.target_goal,
            repeat: new.repeat,
            reminder: None,
            start_date: date(2025, 1, 1),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            deleted: false,
        };
        assert!(!habit.is_satisfied_by(&CompletionValue::Progress(7.5)));
        assert!(habit.is_satisfied_by(&CompletionValue::Progress(8.0)));
        assert!(habit.is_satisfied_by(&CompletionValue::Done(true)));

        let mut no_goal = habit.clone();
        no_goal.target_goal = None;
        assert_eq!(no_goal.validate(), Err(ValidationError::InvalidGoal));
    }

    #[test]
    fn colors_must_be_hex() {
        assert!(is_hex_color("#a1B2c3"));
        assert!(!is_hex_color("a1b2c3"));
        assert!(!is_hex_color("#a1b2c"));
        assert!(!is_hex_color(""));
    }
}
