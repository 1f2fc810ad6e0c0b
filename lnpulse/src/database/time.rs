//! Timestamp helpers. Bookkeeping times are stored as `INTEGER` Unix epoch
//! milliseconds (UTC); an event's own `timestamp` keeps the producer's full
//! precision as epoch nanoseconds.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Current time as Unix epoch milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert epoch milliseconds back to a `DateTime<Utc>`, clamping out-of-range values.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .earliest()
        .unwrap_or(if ms.is_negative() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Epoch nanoseconds, or `None` outside 1677-09-21..=2262-04-11.
#[inline]
pub fn datetime_to_ns(dt: DateTime<Utc>) -> Option<i64> {
    dt.timestamp_nanos_opt()
}

pub fn ns_to_datetime(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}

/// `base_ms + delay`, saturating.
#[inline]
pub fn add_duration_ms(base_ms: i64, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    base_ms.saturating_add(delay_ms)
}

/// Milliseconds for `days` days ago.
pub fn days_ago_ms(days: u32) -> i64 {
    now_ms().saturating_sub(i64::from(days) * 24 * 60 * 60 * 1000)
}
