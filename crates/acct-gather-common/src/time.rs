//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Shared primitives and utilities for the accounting runtime."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time as unix seconds, the unit energy polls are stamped in.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Render a poll timestamp for logs. Zero means "never polled".
pub fn poll_time_display(poll_time: i64) -> String {
    if poll_time == 0 {
        return "never".to_owned();
    }
    match poll_time_to_datetime(poll_time) {
        Some(at) => at.to_rfc3339(),
        None => format!("invalid({poll_time})"),
    }
}

/// Seconds elapsed between two poll stamps, clamped at zero for clocks that step back.
pub fn elapsed_secs(previous: i64, now: i64) -> u64 {
    u64::try_from(now.saturating_sub(previous)).unwrap_or(0)
}

/// Convert a poll timestamp into a `DateTime`, if representable.
fn poll_time_to_datetime(poll_time: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(poll_time, 0).single()
}

/// Whole seconds of a duration, saturating at `u32::MAX`.
pub fn duration_to_secs_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}
