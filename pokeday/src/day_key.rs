//! Day-key resolution
//!
//! Maps the current instant to a table key using the local calendar of a
//! reference timezone.

use crate::dataset::{Dataset, DayEntry};
use crate::error::Result;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Response entry: the day number plus every field of the stored entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodayEntry {
    pub day_of_year: u32,
    #[serde(flatten)]
    pub entry: DayEntry,
}

/// Ordinal day (1..=366) of `now` in the given timezone
pub fn day_of_year(now: DateTime<Utc>, tz: Tz) -> u32 {
    now.with_timezone(&tz).ordinal()
}

/// Dataset key for `day`. Day 366 wraps to "1" when the table has no "366".
pub fn resolve_key(day: u32, has_key: impl Fn(&str) -> bool) -> String {
    let key = day.to_string();
    if day == 366 && !has_key(&key) {
        log::info!("No entry for day 366, serving day 1");
        return "1".to_string();
    }
    key
}

/// Entry for the local calendar day containing `now`
pub fn today(dataset: &Dataset, now: DateTime<Utc>, tz: Tz) -> Result<TodayEntry> {
    let day = day_of_year(now, tz);

    // An unloaded dataset resolves normally and fails at lookup with 503
    let key = resolve_key(day, |k| dataset.contains(k).unwrap_or(false));
    let entry = dataset.lookup(&key)?;

    // day_of_year reports the key actually served
    let day_of_year = key.parse().unwrap_or(day);
    log::debug!("Day {} -> key {} ({})", day, key, entry.name);

    Ok(TodayEntry { day_of_year, entry })
}
