//! The achievement catalog and its evaluation.

use chrono::{DateTime, NaiveDate, Utc};
use reconcile::{Entry, LastWriteWins, MergeStrategy, Resolution};

use crate::model::{
    Achievement, AchievementCategory, AchievementCondition, AchievementScope, Snapshot,
};
use crate::stats::{self, Scope};

struct CatalogEntry {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    category: AchievementCategory,
    condition: AchievementCondition,
    scope: AchievementScope,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "first-check-in",
        title: "First Step",
        description: "Complete a habit for the first time.",
        category: AchievementCategory::Completions,
        condition: AchievementCondition::TotalCompletionsAtLeast { count: 1 },
        scope: AchievementScope::Global,
    },
    CatalogEntry {
        id: "streak-3",
        title: "Warming Up",
        description: "Keep a habit going for 3 days in a row.",
        category: AchievementCategory::Streak,
        condition: AchievementCondition::MaxStreakAtLeast { days: 3 },
        scope: AchievementScope::AnyHabit,
    },
    CatalogEntry {
        id: "streak-7",
        title: "One Week Strong",
        description: "Keep a habit going for 7 days in a row.",
        category: AchievementCategory::Streak,
        condition: AchievementCondition::MaxStreakAtLeast { days: 7 },
        scope: AchievementScope::AnyHabit,
    },
    CatalogEntry {
        id: "streak-30",
        title: "Monthly Master",
        description: "Keep a habit going for 30 days in a row.",
        category: AchievementCategory::Streak,
        condition: AchievementCondition::MaxStreakAtLeast { days: 30 },
        scope: AchievementScope::AnyHabit,
    },
    CatalogEntry {
        id: "streak-100",
        title: "Centurion",
        description: "Keep a habit going for 100 days in a row.",
        category: AchievementCategory::Streak,
        condition: AchievementCondition::MaxStreakAtLeast { days: 100 },
        scope: AchievementScope::AnyHabit,
    },
    CatalogEntry {
        id: "completions-10",
        title: "Getting Started",
        description: "Log 10 completions.",
        category: AchievementCategory::Completions,
        condition: AchievementCondition::TotalCompletionsAtLeast { count: 10 },
        scope: AchievementScope::Global,
    },
    CatalogEntry {
        id: "completions-100",
        title: "Dedicated",
        description: "Log 100 completions.",
        category: AchievementCategory::Completions,
        condition: AchievementCondition::TotalCompletionsAtLeast { count: 100 },
        scope: AchievementScope::Global,
    },
    CatalogEntry {
        id: "completions-500",
        title: "Unstoppable",
        description: "Log 500 completions.",
        category: AchievementCategory::Completions,
        condition: AchievementCondition::TotalCompletionsAtLeast { count: 500 },
        scope: AchievementScope::Global,
    },
    CatalogEntry {
        id: "habits-5",
        title: "Habit Builder",
        description: "Track 5 habits at once.",
        category: AchievementCategory::Habits,
        condition: AchievementCondition::ActiveHabitsAtLeast { count: 5 },
        scope: AchievementScope::Global,
    },
    CatalogEntry {
        id: "consistency-80",
        title: "Consistent",
        description: "Reach an 80% success rate over at least two weeks of scheduled days.",
        category: AchievementCategory::Consistency,
        condition: AchievementCondition::SuccessRateAtLeast {
            percent: 80,
            min_scheduled: 14,
        },
        scope: AchievementScope::Global,
    },
];

/// Every achievement, locked. `now` becomes their `modified_at`.
pub fn default_catalog(now: DateTime<Utc>) -> Vec<Achievement> {
    CATALOG
        .iter()
        .map(|entry| Achievement {
            id: entry.id.to_string(),
            title: entry.title.to_string(),
            description: entry.description.to_string(),
            category: entry.category,
            condition: entry.condition,
            scope: entry.scope,
            unlocked: false,
            unlocked_at: None,
            modified_at: now,
        })
        .collect()
}

fn condition_met(
    condition: AchievementCondition,
    snapshot: &Snapshot,
    scope: &Scope,
    today: NaiveDate,
) -> bool {
    match condition {
        AchievementCondition::CurrentStreakAtLeast { days } => {
            stats::current_streak(snapshot, scope, today) >= days
        }
        AchievementCondition::MaxStreakAtLeast { days } => {
            stats::max_streak(snapshot, scope, today) >= days
        }
        AchievementCondition::TotalCompletionsAtLeast { count } => {
            stats::total_completions(snapshot, scope) >= count
        }
        AchievementCondition::ActiveHabitsAtLeast { count } => {
            snapshot.active_habits().count() >= count as usize
        }
        AchievementCondition::SuccessRateAtLeast {
            percent,
            min_scheduled,
        } => {
            let stats = stats::habit_stats(snapshot, scope, today);
            stats.scheduled_occurrences >= min_scheduled && stats.success_rate >= percent
        }
    }
}

pub fn is_met(achievement: &Achievement, snapshot: &Snapshot, today: NaiveDate) -> bool {
    match achievement.scope {
        AchievementScope::Global => {
            condition_met(achievement.condition, snapshot, &Scope::AllActive, today)
        }
        AchievementScope::AnyHabit => snapshot.active_habits().any(|habit| {
            condition_met(
                achievement.condition,
                snapshot,
                &Scope::Habit(habit.id.clone()),
                today,
            )
        }),
    }
}

/// The locked achievements whose condition now holds, already flipped to unlocked at `now`.
pub fn evaluate(snapshot: &Snapshot, today: NaiveDate, now: DateTime<Utc>) -> Vec<Achievement> {
    snapshot
        .achievements
        .iter()
        .filter(|achievement| !achievement.unlocked)
        .filter(|achievement| is_met(achievement, snapshot, today))
        .map(|achievement| Achievement {
            unlocked: true,
            unlocked_at: Some(now),
            modified_at: now,
            ..achievement.clone()
        })
        .collect()
}

/// Unlocks never go backwards. Among two unlocked copies the earlier unlock wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicUnlock;

impl MergeStrategy<Achievement> for MonotonicUnlock {
    fn resolve(&self, local: &Entry<Achievement>, remote: &Achievement) -> Resolution<Achievement> {
        let mine = &local.record;
        match (mine.unlocked, remote.unlocked) {
            (false, true) => Resolution::TakeRemote,
            // The remote lost an unlock (or never saw it); push ours again.
            (true, false) if local.is_dirty() => Resolution::KeepLocal,
            (true, false) => Resolution::Merged(Achievement {
                modified_at: mine.modified_at.max(remote.modified_at),
                ..mine.clone()
            }),
            (true, true) => {
                let earliest = match (mine.unlocked_at, remote.unlocked_at) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if remote.unlocked_at == earliest {
                    Resolution::TakeRemote
                } else if local.is_dirty() {
                    Resolution::KeepLocal
                } else {
                    Resolution::Merged(Achievement {
                        unlocked_at: earliest,
                        modified_at: mine.modified_at.max(remote.modified_at),
                        ..remote.clone()
                    })
                }
            }
            (false, false) => LastWriteWins.resolve(local, remote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Completion, CompletionValue, Habit, HabitKind, RepeatRule};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, day, 9, 0, 0).unwrap()
    }

    fn seeded() -> Snapshot {
        let mut snapshot = Snapshot::default();
        for achievement in default_catalog(at(1)) {
            snapshot.achievements.upsert_clean(achievement);
        }
        snapshot
    }

    fn add_habit(snapshot: &mut Snapshot, id: &str) {
        snapshot.habits.upsert_local(Habit {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            color: "#000000".to_string(),
            icon: "dot".to_string(),
            category: Category::Learning,
            kind: HabitKind::Boolean,
            target_goal: None,
            repeat: RepeatRule::Daily,
            reminder: None,
            start_date: at(1).date_naive(),
            created_at: at(1),
            modified_at: at(1),
            deleted: false,
        });
    }

    fn check_in(snapshot: &mut Snapshot, id: &str, day: u32) {
        snapshot.completions.upsert_local(Completion {
            habit_id: id.to_string(),
            date: at(day).date_naive(),
            value: CompletionValue::Done(true),
            modified_at: at(day),
        });
    }

    fn unlocked_ids(unlocked: &[Achievement]) -> Vec<&str> {
        unlocked.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn catalog_ids_are_unique() {
        let catalog = default_catalog(at(1));
        let mut ids: Vec<_> = catalog.iter().map(|a| a.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
        assert!(catalog.iter().all(|a| !a.unlocked));
    }

    #[test]
    fn streaks_unlock_per_habit() {
        let mut snapshot = seeded();
        add_habit(&mut snapshot, "read");
        add_habit(&mut snapshot, "run");
        assert!(evaluate(&snapshot, at(1).date_naive(), at(1)).is_empty());

        for day in 1..=3 {
            check_in(&mut snapshot, "read", day);
        }
        let unlocked = evaluate(&snapshot, at(3).date_naive(), at(3));
        // "run" was never done, so no global streak, but "read" alone reached 3.
        assert_eq!(unlocked_ids(&unlocked), vec!["first-check-in", "streak-3"]);
        assert!(unlocked.iter().all(|a| a.unlocked_at == Some(at(3))));
    }

    #[test]
    fn unlocked_achievements_are_not_reported_again() {
        let mut snapshot = seeded();
        add_habit(&mut snapshot, "read");
        check_in(&mut snapshot, "read", 1);
        for achievement in evaluate(&snapshot, at(1).date_naive(), at(1)) {
            snapshot.achievements.upsert_local(achievement);
        }
        assert!(evaluate(&snapshot, at(1).date_naive(), at(1)).is_empty());
    }

    #[test]
    fn merge_never_relocks() {
        let locked = default_catalog(at(1)).remove(0);
        let unlocked = Achievement {
            unlocked: true,
            unlocked_at: Some(at(2)),
            modified_at: at(2),
            ..locked.clone()
        };
        // Newer but locked remote copy does not undo a local unlock.
        let newer_locked = Achievement {
            modified_at: at(5),
            ..locked.clone()
        };
        assert_eq!(
            MonotonicUnlock.resolve(&Entry::dirty(unlocked.clone()), &newer_locked),
            Resolution::KeepLocal
        );
        assert!(matches!(
            MonotonicUnlock.resolve(&Entry::clean(unlocked.clone()), &newer_locked),
            Resolution::Merged(a) if a.unlocked && a.modified_at == at(5)
        ));
        assert_eq!(
            MonotonicUnlock.resolve(&Entry::clean(locked), &unlocked),
            Resolution::TakeRemote
        );
    }

    #[test]
    fn merge_keeps_the_earliest_unlock() {
        let base = default_catalog(at(1)).remove(0);
        let early = Achievement {
            unlocked: true,
            unlocked_at: Some(at(2)),
            modified_at: at(2),
            ..base.clone()
        };
        let late = Achievement {
            unlocked: true,
            unlocked_at: Some(at(4)),
            modified_at: at(4),
            ..base
        };
        assert_eq!(
            MonotonicUnlock.resolve(&Entry::dirty(late.clone()), &early),
            Resolution::TakeRemote
        );
        assert_eq!(
            MonotonicUnlock.resolve(&Entry::dirty(early.clone()), &late),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn streak_ladder_survives_a_broken_streak() {
        let mut snapshot = seeded();
        add_habit(&mut snapshot, "read");
        for day in [1, 2, 3, 5] {
            check_in(&mut snapshot, "read", day);
        }
        let today = at(5).date_naive();
        assert!(
            CATALOG
                .iter()
                .filter(|entry| entry.category == AchievementCategory::Streak)
                .all(|entry| matches!(entry.condition, AchievementCondition::MaxStreakAtLeast { .. }))
        );
        let unlocked = evaluate(&snapshot, today, at(5));
        assert!(unlocked_ids(&unlocked).contains(&"streak-3"));

        let current = Achievement {
            condition: AchievementCondition::CurrentStreakAtLeast { days: 3 },
            ..default_catalog(at(1)).remove(1)
        };
        assert!(!is_met(&current, &snapshot, today));
    }
}
