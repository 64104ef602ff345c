//! Streaks and statistics. Everything here is a pure function of `(snapshot, scope, today)`.
//!
//! A day *qualifies* for a scope when every habit in the scope that is scheduled that day has a
//! qualifying completion. A day where nothing in the scope is scheduled is *neutral*: it neither
//! extends nor breaks a streak.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::{Habit, HabitId, Snapshot};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// All active (not deleted) habits together.
    AllActive,
    /// A single habit, deleted or not.
    Habit(HabitId),
}

impl Scope {
    pub fn from_habit_id(habit_id: Option<&str>) -> Self {
        match habit_id {
            Some(id) => Scope::Habit(id.to_string()),
            None => Scope::AllActive,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HabitStats {
    pub current_streak: u32,
    pub max_streak: u32,
    pub total_completions: u32,
    /// Rounded percentage, 0..=100.
    pub success_rate: u32,
    pub scheduled_occurrences: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreakRun {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub length: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DayStatus {
    Neutral,
    Qualified,
    Missed,
}

fn scope_habits<'a>(snapshot: &'a Snapshot, scope: &Scope) -> Vec<&'a Habit> {
    match scope {
        Scope::AllActive => snapshot.active_habits().collect(),
        Scope::Habit(id) => snapshot.habit(id).into_iter().collect(),
    }
}

fn first_day(habits: &[&Habit]) -> Option<NaiveDate> {
    habits.iter().map(|habit| habit.start_date).min()
}

fn day_status(snapshot: &Snapshot, habits: &[&Habit], date: NaiveDate) -> DayStatus {
    let mut any_scheduled = false;
    for habit in habits.iter().filter(|habit| habit.is_scheduled_on(date)) {
        any_scheduled = true;
        if !snapshot.is_done_on(habit, date) {
            return DayStatus::Missed;
        }
    }
    if any_scheduled {
        DayStatus::Qualified
    } else {
        DayStatus::Neutral
    }
}

/// The last day that can count: today once it qualifies, otherwise yesterday,
/// so a streak isn't broken before the user had a chance to act today.
fn last_countable_day(snapshot: &Snapshot, habits: &[&Habit], today: NaiveDate) -> Option<NaiveDate> {
    if day_status(snapshot, habits, today) == DayStatus::Qualified {
        Some(today)
    } else {
        today.pred_opt()
    }
}

pub fn current_streak(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> u32 {
    let habits = scope_habits(snapshot, scope);
    let Some(first) = first_day(&habits) else {
        return 0;
    };
    let Some(mut day) = last_countable_day(snapshot, &habits, today) else {
        return 0;
    };

    let mut streak = 0;
    while day >= first {
        match day_status(snapshot, &habits, day) {
            DayStatus::Qualified => streak += 1,
            DayStatus::Neutral => {}
            DayStatus::Missed => break,
        }
        let Some(previous) = day.pred_opt() else {
            break;
        };
        day = previous;
    }
    streak
}

/// The longest qualifying run in the whole history. On ties the most recent run wins.
pub fn longest_run(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> Option<StreakRun> {
    let habits = scope_habits(snapshot, scope);
    let first = first_day(&habits)?;
    let last = last_countable_day(snapshot, &habits, today)?;

    let mut best: Option<StreakRun> = None;
    let mut current: Option<StreakRun> = None;
    for day in first.iter_days().take_while(|day| *day <= last) {
        match day_status(snapshot, &habits, day) {
            DayStatus::Qualified => {
                let run = match current {
                    Some(run) => StreakRun {
                        end: day,
                        length: run.length + 1,
                        ..run
                    },
                    None => StreakRun {
                        start: day,
                        end: day,
                        length: 1,
                    },
                };
                if best.is_none_or(|best| run.length >= best.length) {
                    best = Some(run);
                }
                current = Some(run);
            }
            DayStatus::Neutral => {}
            DayStatus::Missed => current = None,
        }
    }
    best
}

pub fn max_streak(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> u32 {
    longest_run(snapshot, scope, today).map_or(0, |run| run.length)
}

/// Qualifying completion records in scope, on any day.
pub fn total_completions(snapshot: &Snapshot, scope: &Scope) -> u32 {
    scope_habits(snapshot, scope)
        .into_iter()
        .map(|habit| {
            snapshot
                .completions_for(&habit.id)
                .filter(|completion| habit.is_satisfied_by(&completion.value))
                .count() as u32
        })
        .sum()
}

/// `(hits, scheduled)`: scheduled occurrences from each habit's start through its last countable day,
/// and how many of those were done.
fn occurrences(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> (u32, u32) {
    let mut hits = 0;
    let mut scheduled = 0;
    for habit in scope_habits(snapshot, scope) {
        let habit_slice = [habit];
        let Some(last) = last_countable_day(snapshot, &habit_slice, today) else {
            continue;
        };
        for day in habit
            .start_date
            .iter_days()
            .take_while(|day| *day <= last)
            .filter(|day| habit.is_scheduled_on(*day))
        {
            scheduled += 1;
            if snapshot.is_done_on(habit, day) {
                hits += 1;
            }
        }
    }
    (hits, scheduled)
}

pub fn success_rate(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> u32 {
    let (hits, scheduled) = occurrences(snapshot, scope, today);
    rate(hits, scheduled)
}

fn rate(hits: u32, scheduled: u32) -> u32 {
    if scheduled == 0 {
        return 0;
    }
    ((f64::from(hits) * 100.0 / f64::from(scheduled)).round() as u32).min(100)
}

pub fn habit_stats(snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> HabitStats {
    let (hits, scheduled) = occurrences(snapshot, scope, today);
    HabitStats {
        current_streak: current_streak(snapshot, scope, today),
        max_streak: max_streak(snapshot, scope, today),
        total_completions: total_completions(snapshot, scope),
        success_rate: rate(hits, scheduled),
        scheduled_occurrences: scheduled,
    }
}

/// Caches [`HabitStats`] per scope for one snapshot identity and one day.
/// Any write to habits or completions produces new maps, which empties the cache on the next read.
#[derive(Debug, Default)]
pub struct StatsMemo {
    inputs: Option<(Snapshot, NaiveDate)>,
    cached: HashMap<Scope, HabitStats>,
    computations: usize,
}

impl StatsMemo {
    pub fn get(&mut self, snapshot: &Snapshot, scope: &Scope, today: NaiveDate) -> HabitStats {
        let fresh = self
            .inputs
            .as_ref()
            .is_some_and(|(seen, seen_today)| *seen_today == today && seen.same_stats_inputs(snapshot));
        if !fresh {
            self.inputs = Some((snapshot.clone(), today));
            self.cached.clear();
        }

        if let Some(stats) = self.cached.get(scope) {
            return *stats;
        }
        self.computations += 1;
        let stats = habit_stats(snapshot, scope, today);
        self.cached.insert(scope.clone(), stats);
        stats
    }

    pub fn computations(&self) -> usize {
        self.computations
    }
}
