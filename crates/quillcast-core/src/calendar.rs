//! Tenant-local calendar arithmetic.
//!
//! All scheduling decisions are made in the tenant's IANA zone: posting
//! windows are sets of local clock hours, and daily counters roll at
//! local midnight. The helpers here do the UTC ⇄ local conversions in a
//! way that stays correct across DST transitions: candidate instants are
//! enumerated as *local* hour boundaries and mapped back to UTC, so a
//! skipped local hour is naturally absent and a doubled one resolves to
//! its first occurrence.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// How far ahead window scans look before giving up. Hour-granular
/// windows recur at least daily, so a week covers every DST corner.
const SCAN_HORIZON_HOURS: i64 = 24 * 7;

/// Local wall-clock time of `wall` in `tz`.
pub fn local_time(wall: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    wall.with_timezone(&tz)
}

/// Tenant-local calendar date. Daily counters are bucketed by this key
/// and roll over at local midnight.
pub fn day_key(wall: DateTime<Utc>, tz: Tz) -> NaiveDate {
    wall.with_timezone(&tz).date_naive()
}

/// Local wall-clock hour (0–23) of `wall` in `tz`.
pub fn local_hour(wall: DateTime<Utc>, tz: Tz) -> u8 {
    wall.with_timezone(&tz).hour() as u8
}

/// Fractional seconds since the Unix epoch. Token-bucket state in the
/// shared counter store is stamped with this, the only time reference
/// every worker process agrees on.
pub fn epoch_secs(wall: DateTime<Utc>) -> f64 {
    wall.timestamp_micros() as f64 / 1_000_000.0
}

fn hour_start(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Resolves a naive local timestamp to UTC. A timestamp inside a DST gap
/// yields `None`; an ambiguous one resolves to its earlier occurrence.
fn resolve_local(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First instant strictly after `from` whose local hour in `tz`
/// satisfies `is_open`. Returns `None` when no hour matches within the
/// scan horizon (e.g. an empty window set).
pub fn next_local_hour_match<F>(from: DateTime<Utc>, tz: Tz, is_open: F) -> Option<DateTime<Utc>>
where
    F: Fn(u8) -> bool,
{
    let local = from.with_timezone(&tz);
    let base = local.date_naive().and_time(hour_start(local.hour()));

    for offset in 0..=SCAN_HORIZON_HOURS {
        let candidate = base + chrono::Duration::hours(offset);
        let Some(utc) = resolve_local(candidate, tz) else {
            // Local hour erased by a DST jump.
            continue;
        };
        if utc <= from {
            continue;
        }
        if is_open(candidate.hour() as u8) {
            return Some(utc);
        }
    }
    None
}

/// First tenant-local midnight strictly after `from`. If midnight itself
/// falls in a DST gap, the first existing instant of the new day is used.
pub fn next_local_midnight(from: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = from.with_timezone(&tz);
    let mut date = local.date_naive();

    for _ in 0..2 {
        date = date.succ_opt().unwrap_or(date);
        for hour in 0..24 {
            let naive = date.and_time(hour_start(hour));
            if let Some(utc) = resolve_local(naive, tz) {
                if utc > from {
                    return utc;
                }
            }
        }
    }
    // Unreachable for any real zone; bound the wait regardless.
    from + chrono::Duration::try_days(1).unwrap_or(chrono::Duration::zero())
}

/// Duration from `from` until `target`, zero if `target` has passed.
pub fn until(from: DateTime<Utc>, target: DateTime<Utc>) -> Duration {
    (target - from).to_std().unwrap_or(Duration::ZERO)
}
