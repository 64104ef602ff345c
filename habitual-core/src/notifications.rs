use chrono::{DateTime, NaiveDate, Utc};

use crate::clock::local_date;
use crate::model::{Achievement, Habit, HabitId, Snapshot};
use crate::stats::{self, Scope};

/// Local hour of the evening nudge when today's habits are still open and a streak is on the line.
const STREAK_AT_RISK_HOUR: u32 = 20;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    HabitReminder,
    StreakAtRisk,
    AchievementUnlocked,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct ScheduledNotification {
    pub scheduled_at: DateTime<Utc>,
    pub notification: Notification,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub habit_id: Option<HabitId>,
}

impl Notification {
    pub fn reminder(habit: &Habit) -> Self {
        Notification {
            title: format!("Time for {} ⏰", habit.name),
            body: if habit.description.is_empty() {
                "Keep your streak going!".to_string()
            } else {
                habit.description.clone()
            },
            notification_type: NotificationType::HabitReminder,
            habit_id: Some(habit.id.clone()),
        }
    }

    pub fn streak_at_risk(streak: u32, open_habits: usize) -> Self {
        Notification {
            title: format!("Don't lose your {streak}-day streak! 🔥"),
            body: format!(
                "{} habit{} left for today",
                open_habits,
                if open_habits == 1 { "" } else { "s" }
            ),
            notification_type: NotificationType::StreakAtRisk,
            habit_id: None,
        }
    }

    pub fn achievement(achievement: &Achievement) -> Self {
        Notification {
            title: format!("Achievement unlocked: {} 🏆", achievement.title),
            body: achievement.description.clone(),
            notification_type: NotificationType::AchievementUnlocked,
            habit_id: None,
        }
    }

    pub fn at(self, scheduled_at: DateTime<Utc>) -> ScheduledNotification {
        ScheduledNotification {
            scheduled_at,
            notification: self,
        }
    }
}

/// Where reminders end up: the OS notification center, a push service, a test double.
pub trait Notifier: Send + Sync {
    /// Replace everything scheduled so far with `schedule`.
    fn replace_schedule(&self, schedule: Vec<ScheduledNotification>);
    fn cancel_all(&self);
    /// Show right away.
    fn announce(&self, notification: Notification);
}

/// A notifier that only logs. Used when the host has no notification support.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn replace_schedule(&self, schedule: Vec<ScheduledNotification>) {
        log::debug!("{} notification(s) scheduled", schedule.len());
    }

    fn cancel_all(&self) {
        log::debug!("Notifications cancelled");
    }

    fn announce(&self, notification: Notification) {
        log::info!("{}: {}", notification.title, notification.body);
    }
}

/// Reminders for the next `horizon_days` days, soonest first.
///
/// `timezone_offset_minutes` is read as in [`local_date`], the same rule [`SystemClock`] uses for
/// "today".
///
/// [`SystemClock`]: crate::clock::SystemClock
pub fn compute_scheduled_notifications(
    snapshot: &Snapshot,
    now: DateTime<Utc>,
    timezone_offset_minutes: i32,
    horizon_days: u32,
) -> Vec<ScheduledNotification> {
    let offset = chrono::Duration::minutes(i64::from(timezone_offset_minutes));
    let local_today = local_date(now, timezone_offset_minutes);
    let mut notifications = Vec::new();

    for date in local_today.iter_days().take(horizon_days as usize) {
        for habit in snapshot.active_habits() {
            let Some(reminder) = habit.reminder else {
                continue;
            };
            if !habit.is_scheduled_on(date) {
                continue;
            }
            if date == local_today && snapshot.is_done_on(habit, date) {
                continue;
            }
            let scheduled_at = date.and_time(reminder).and_utc() + offset;
            if scheduled_at > now {
                notifications.push(Notification::reminder(habit).at(scheduled_at));
            }
        }
    }

    if let Some(nudge) = streak_at_risk(snapshot, local_today).filter(|_| horizon_days > 0) {
        let evening = local_today
            .and_hms_opt(STREAK_AT_RISK_HOUR, 0, 0)
            .map(|local| local.and_utc() + offset);
        if let Some(scheduled_at) = evening.filter(|at| *at > now) {
            notifications.push(nudge.at(scheduled_at));
        }
    }

    notifications.sort_by_key(|scheduled| scheduled.scheduled_at);
    notifications
}

fn streak_at_risk(snapshot: &Snapshot, today: NaiveDate) -> Option<Notification> {
    let open_habits = snapshot
        .active_habits()
        .filter(|habit| habit.is_scheduled_on(today) && !snapshot.is_done_on(habit, today))
        .count();
    if open_habits == 0 {
        return None;
    }
    let streak = stats::current_streak(snapshot, &Scope::AllActive, today);
    (streak > 0).then(|| Notification::streak_at_risk(streak, open_habits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Completion, CompletionValue, HabitKind, RepeatRule};
    use chrono::{NaiveTime, TimeZone, Weekday};

    // 2025-03-10 is a Monday. At 12:00 UTC it's 07:00 in UTC-5.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    const UTC_MINUS_5: i32 = 300;

    fn habit(id: &str, repeat: RepeatRule, reminder: Option<(u32, u32)>) -> Habit {
        Habit {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            color: "#ABCDEF".to_string(),
            icon: "bell".to_string(),
            category: Category::Mindfulness,
            kind: HabitKind::Boolean,
            target_goal: None,
            repeat,
            reminder: reminder.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            created_at: now(),
            modified_at: now(),
            deleted: false,
        }
    }

    fn snapshot(habits: Vec<Habit>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for habit in habits {
            snapshot.habits.upsert_clean(habit);
        }
        snapshot
    }

    fn mark(snapshot: &mut Snapshot, id: &str, day: u32) {
        snapshot.completions.upsert_clean(Completion {
            habit_id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            value: CompletionValue::Done(true),
            modified_at: now(),
        });
    }

    fn reminders(schedule: &[ScheduledNotification]) -> Vec<DateTime<Utc>> {
        schedule
            .iter()
            .filter(|s| s.notification.notification_type == NotificationType::HabitReminder)
            .map(|s| s.scheduled_at)
            .collect()
    }

    #[test]
    fn reminders_use_the_local_time_of_day() {
        let snapshot = snapshot(vec![habit("stretch", RepeatRule::Daily, Some((8, 0)))]);
        let schedule = compute_scheduled_notifications(&snapshot, now(), UTC_MINUS_5, 3);
        assert_eq!(
            reminders(&schedule),
            vec![
                Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 11, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 12, 13, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn done_and_unscheduled_days_get_no_reminder() {
        let mut snapshot = snapshot(vec![
            habit("stretch", RepeatRule::Daily, Some((8, 0))),
            habit("gym", RepeatRule::weekly([Weekday::Wed]), Some((18, 30))),
            habit("silent", RepeatRule::Daily, None),
        ]);
        mark(&mut snapshot, "stretch", 10);

        let schedule = compute_scheduled_notifications(&snapshot, now(), UTC_MINUS_5, 3);
        assert_eq!(
            reminders(&schedule),
            vec![
                Utc.with_ymd_and_hms(2025, 3, 11, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 12, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 12, 23, 30, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn open_streak_gets_an_evening_nudge() {
        let mut snapshot = snapshot(vec![habit("read", RepeatRule::Daily, None)]);
        for day in 1..10 {
            mark(&mut snapshot, "read", day);
        }
        let schedule = compute_scheduled_notifications(&snapshot, now(), UTC_MINUS_5, 1);
        assert_eq!(schedule.len(), 1);
        assert_eq!(
            schedule[0].notification.notification_type,
            NotificationType::StreakAtRisk
        );
        assert_eq!(
            schedule[0].scheduled_at,
            Utc.with_ymd_and_hms(2025, 3, 11, 1, 0, 0).unwrap()
        );
        assert!(schedule[0].notification.title.contains("9-day"));

        mark(&mut snapshot, "read", 10);
        assert!(compute_scheduled_notifications(&snapshot, now(), UTC_MINUS_5, 1).is_empty());
    }
}
