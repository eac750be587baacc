//! Interval checks for periodic housekeeping

use chrono::{DateTime, Utc};

/// Check whether a periodic task is due again.
///
/// # Arguments
/// * `last_run_at` - When the task last ran (None if never)
/// * `interval_secs` - Minimum seconds between runs
///
/// # Returns
/// `true` if the task never ran or the interval has passed
pub fn cooldown_elapsed(last_run_at: Option<DateTime<Utc>>, interval_secs: u64) -> bool {
    match last_run_at {
        Some(last) => (Utc::now() - last).num_seconds() >= interval_secs as i64,
        None => true,
    }
}
