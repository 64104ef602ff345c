use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

/// Where the store gets "now" and "today" from. Days are the user's calendar days.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn today(&self) -> NaiveDate;
}

/// The calendar day at `now` for a user `timezone_offset_minutes` behind UTC.
///
/// The offset follows the browser convention: minutes to add to local time to get UTC, so it's
/// positive west of Greenwich.
pub fn local_date(now: DateTime<Utc>, timezone_offset_minutes: i32) -> NaiveDate {
    (now - chrono::Duration::minutes(i64::from(timezone_offset_minutes))).date_naive()
}

/// The host's current offset, in the same convention as [`local_date`].
pub fn system_offset_minutes() -> i32 {
    -chrono::Local::now().offset().local_minus_utc() / 60
}

/// Wall-clock time, with days cut at the configured offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    timezone_offset_minutes: i32,
}

impl SystemClock {
    pub fn new(timezone_offset_minutes: i32) -> Self {
        Self {
            timezone_offset_minutes,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(system_offset_minutes())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        local_date(self.now(), self.timezone_offset_minutes)
    }
}

/// A clock that only moves when told to. Its calendar day is the UTC day of `now`.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    fn today(&self) -> NaiveDate {
        self.lock().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn days_are_cut_at_the_offset() {
        // 02:30 UTC is still the previous evening five hours west of Greenwich.
        let now = Utc.with_ymd_and_hms(2025, 3, 11, 2, 30, 0).unwrap();
        assert_eq!(local_date(now, 300), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(local_date(now, 0), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        assert_eq!(local_date(now, -600), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
    }
}
