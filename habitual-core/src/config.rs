use std::path::PathBuf;
use std::time::Duration;

use reconcile::supabase::SupabaseConfig;

use crate::clock;
use crate::error::ConfigError;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REMINDER_DAYS: u32 = 7;

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Where the habit snapshot and the widget document live.
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    /// How many days of reminders to keep scheduled.
    pub reminder_horizon_days: u32,
    /// Minutes to add to local time to get UTC (positive west of Greenwich). Decides both the
    /// calendar day and when reminders fire.
    pub timezone_offset_minutes: i32,
    /// Without this, the tracker works offline only.
    pub supabase: Option<SupabaseConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("habitual"),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            reminder_horizon_days: DEFAULT_REMINDER_DAYS,
            timezone_offset_minutes: clock::system_offset_minutes(),
            supabase: None,
        }
    }
}

impl TrackerConfig {
    /// Read the configuration from the environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from any variable source. Unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = lookup("HABITUAL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("HABITUAL_SYNC_INTERVAL_SECS") {
            let secs: u64 = parse("HABITUAL_SYNC_INTERVAL_SECS", &secs)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "HABITUAL_SYNC_INTERVAL_SECS",
                    value: secs.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(days) = lookup("HABITUAL_REMINDER_DAYS") {
            config.reminder_horizon_days = parse("HABITUAL_REMINDER_DAYS", &days)?;
        }
        if let Some(offset) = lookup("HABITUAL_TZ_OFFSET_MINUTES") {
            let minutes: i32 = parse("HABITUAL_TZ_OFFSET_MINUTES", &offset)?;
            if minutes.abs() > 14 * 60 {
                return Err(ConfigError::Invalid {
                    var: "HABITUAL_TZ_OFFSET_MINUTES",
                    value: offset,
                    reason: "must be within ±14 hours".to_string(),
                });
            }
            config.timezone_offset_minutes = minutes;
        }

        config.supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_ANON_KEY")) {
            (Some(supabase_url), Some(supabase_anon_key)) => Some(SupabaseConfig {
                supabase_url,
                supabase_anon_key,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteSupabase),
        };

        Ok(config)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
