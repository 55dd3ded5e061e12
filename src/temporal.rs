//! # Temporal Module
//!
//! Calendar bucketing for the ranking. All instants are epoch milliseconds and all
//! period boundaries are computed in UTC.

use crate::model::Granularity;
use time::{Date, Duration, OffsetDateTime};

/// Epoch milliseconds, UTC.
pub type Instant = i64;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_DAY: i64 = 86_400 * MILLIS_PER_SECOND;

pub fn to_datetime(instant: Instant) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(instant as i128 * 1_000_000).ok()
}

fn date_start(date: Date) -> Instant {
    date.midnight().assume_utc().unix_timestamp() * MILLIS_PER_SECOND
}

fn bucket_start(date: Date, granularity: Granularity) -> Option<Date> {
    match granularity {
        Granularity::Daily => Some(date),
        // ISO weeks start on Monday.
        Granularity::Weekly => date.checked_sub(Duration::days(
            date.weekday().number_days_from_monday() as i64,
        )),
        Granularity::Monthly => date.replace_day(1).ok(),
    }
}

/// Truncate an instant to the start of its containing period.
///
/// Returns `None` only for instants outside the calendar range `time` supports.
pub fn period_start(instant: Instant, granularity: Granularity) -> Option<Instant> {
    let date = to_datetime(instant)?.date();
    bucket_start(date, granularity).map(date_start)
}
