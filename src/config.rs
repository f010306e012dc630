use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

/// Numeric scheduling thresholds. Everything the validators compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    /// How far ahead of `now` an activity must be announced.
    pub min_lead_time: Ms,
    pub min_activity_duration: Ms,
    pub min_shift: Ms,
    pub max_shift: Ms,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            min_lead_time: DAY_MS,
            min_activity_duration: 60 * MINUTE_MS,
            min_shift: HOUR_MS,
            max_shift: 12 * HOUR_MS,
        }
    }
}

/// Process configuration, read from `ROSTRA_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Offset from midnight at which the finalizer runs each day.
    pub finalize_at: Ms,
    pub compact_threshold: u64,
    pub page_size: u32,
    pub policy: SchedulingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            finalize_at: 23 * HOUR_MS + 50 * MINUTE_MS,
            compact_threshold: 1000,
            page_size: 25,
            policy: SchedulingPolicy::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// A positive count of `unit`s, in milliseconds. None on garbage or overflow.
fn parse_duration(raw: &str, unit: Ms) -> Option<Ms> {
    raw.trim()
        .parse::<Ms>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| n.checked_mul(unit))
}

fn env_duration(key: &str, unit: Ms, default: Ms) -> Ms {
    match std::env::var(key) {
        Ok(raw) => parse_duration(&raw, unit).unwrap_or_else(|| {
            tracing::warn!("ignoring invalid {key}={raw:?}, expected a positive whole number");
            default
        }),
        Err(_) => default,
    }
}

impl SchedulingPolicy {
    /// Fall back to the default shift bounds if they are inverted.
    fn checked(mut self) -> Self {
        if self.min_shift > self.max_shift {
            let defaults = Self::default();
            tracing::warn!(
                "minimum shift {} min exceeds maximum {} min, using defaults",
                self.min_shift / MINUTE_MS,
                self.max_shift / MINUTE_MS
            );
            self.min_shift = defaults.min_shift;
            self.max_shift = defaults.max_shift;
        }
        self
    }
}

/// Parse `HH:MM` into milliseconds after midnight.
pub fn parse_time_of_day(s: &str) -> Option<Ms> {
    let (h, m) = s.trim().split_once(':')?;
    let h: Ms = h.parse().ok()?;
    let m: Ms = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * HOUR_MS + m * MINUTE_MS)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base = defaults.policy;
        let policy = SchedulingPolicy {
            min_lead_time: env_duration("ROSTRA_MIN_LEAD_HOURS", HOUR_MS, base.min_lead_time),
            min_activity_duration: env_duration(
                "ROSTRA_MIN_ACTIVITY_MINUTES",
                MINUTE_MS,
                base.min_activity_duration,
            ),
            min_shift: env_duration("ROSTRA_MIN_SHIFT_MINUTES", MINUTE_MS, base.min_shift),
            max_shift: env_duration("ROSTRA_MAX_SHIFT_HOURS", HOUR_MS, base.max_shift),
        }
        .checked();

        let finalize_at = match std::env::var("ROSTRA_FINALIZE_AT") {
            Ok(raw) => parse_time_of_day(&raw).unwrap_or_else(|| {
                tracing::warn!("ignoring invalid ROSTRA_FINALIZE_AT={raw:?}, expected HH:MM");
                defaults.finalize_at
            }),
            Err(_) => defaults.finalize_at,
        };

        Self {
            data_dir: std::env::var("ROSTRA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: env_parse("ROSTRA_METRICS_PORT"),
            finalize_at,
            compact_threshold: env_parse::<u64>("ROSTRA_COMPACT_THRESHOLD")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.compact_threshold),
            page_size: env_parse::<u32>("ROSTRA_PAGE_SIZE")
                .unwrap_or(defaults.page_size)
                .clamp(1, MAX_PAGE_SIZE),
            policy,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rostra.wal")
    }
}
