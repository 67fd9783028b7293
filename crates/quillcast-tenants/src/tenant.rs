//! The tenant record and its calendar-dependent state.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use quillcast_core::{calendar, Credentials, TenantId};
use serde::{Deserialize, Serialize};

/// Allow-list of tenant-local clock hours during which posting is
/// permitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostingWindows(BTreeSet<u8>);

impl PostingWindows {
    /// Builds a window set; hours outside 0..=23 are discarded.
    pub fn from_hours(hours: impl IntoIterator<Item = u8>) -> Self {
        Self(hours.into_iter().filter(|h| *h < 24).collect())
    }

    pub fn contains(&self, hour: u8) -> bool {
        self.0.contains(&hour)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hours(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

/// Timestamp of a completed post: the monotonic hand orders completions
/// within a process lifetime, the wall hand goes into audit records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActedAt {
    pub mono: Duration,
    pub wall: DateTime<Utc>,
}

/// Per-day usage counters, bucketed by tenant-local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub day_key: NaiveDate,
    pub llm_calls: u32,
    pub posts: u32,
    pub llm_tokens: u64,
}

impl DailyCounters {
    pub fn for_day(day_key: NaiveDate) -> Self {
        Self {
            day_key,
            llm_calls: 0,
            posts: 0,
            llm_tokens: 0,
        }
    }

    /// Counters as of `today`. When the stored day key is older the
    /// counters read as zero; applying the roll twice is a no-op.
    pub fn rolled_to(self, today: NaiveDate) -> Self {
        if self.day_key == today {
            self
        } else {
            Self::for_day(today)
        }
    }
}

/// A tenant: the unit of multi-tenancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    /// Free text injected into every prompt render.
    pub persona_prompt: String,
    pub posting_windows: PostingWindows,
    pub timezone: Tz,
    pub credentials: Credentials,
    /// Optional reference to a per-tenant context collection.
    pub knowledge_handle: Option<String>,
    /// Inactive tenants are retained but never selected.
    pub active: bool,
    pub last_acted_at: Option<ActedAt>,
    pub daily: DailyCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// A fresh active tenant with empty counters for the current
    /// tenant-local day.
    pub fn new(
        id: TenantId,
        display_name: impl Into<String>,
        timezone: Tz,
        posting_windows: PostingWindows,
        credentials: Credentials,
        now_wall: DateTime<Utc>,
    ) -> Self {
        let day_key = calendar::day_key(now_wall, timezone);
        Self {
            id,
            display_name: display_name.into(),
            persona_prompt: String::new(),
            posting_windows,
            timezone,
            credentials,
            knowledge_handle: None,
            active: true,
            last_acted_at: None,
            daily: DailyCounters::for_day(day_key),
            created_at: now_wall,
            updated_at: now_wall,
        }
    }

    /// True iff the tenant-local hour of `wall` is in the posting
    /// windows.
    pub fn in_posting_window(&self, wall: DateTime<Utc>) -> bool {
        self.posting_windows
            .contains(calendar::local_hour(wall, self.timezone))
    }

    /// Tenant-local calendar date at `wall`.
    pub fn day_key_at(&self, wall: DateTime<Utc>) -> NaiveDate {
        calendar::day_key(wall, self.timezone)
    }

    /// Daily counters as seen at `wall`, with the day roll applied.
    pub fn counters_at(&self, wall: DateTime<Utc>) -> DailyCounters {
        self.daily.rolled_to(self.day_key_at(wall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use chrono_tz::UTC;

    fn tenant(tz: Tz, hours: impl IntoIterator<Item = u8>) -> Tenant {
        Tenant::new(
            TenantId::new("t1"),
            "Tenant One",
            tz,
            PostingWindows::from_hours(hours),
            Credentials::new("secret"),
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn windows_discard_invalid_hours() {
        let windows = PostingWindows::from_hours([9, 10, 24, 99]);
        assert!(windows.contains(9));
        assert!(!windows.contains(24));
        assert_eq!(windows.hours().count(), 2);
    }

    #[test]
    fn window_membership_uses_local_hour() {
        let t = tenant(New_York, 9..=17);
        // 14:30 UTC is 09:30 in New York (EST).
        let wall = Utc.with_ymd_and_hms(2024, 1, 10, 14, 30, 0).unwrap();
        assert!(t.in_posting_window(wall));
        // 13:30 UTC is 08:30 local, outside the window.
        let wall = Utc.with_ymd_and_hms(2024, 1, 10, 13, 30, 0).unwrap();
        assert!(!t.in_posting_window(wall));
    }

    #[test]
    fn counters_roll_idempotently() {
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
        let counters = DailyCounters {
            day_key: day1,
            llm_calls: 5,
            posts: 2,
            llm_tokens: 900,
        };

        let rolled = counters.rolled_to(day2);
        assert_eq!(rolled, DailyCounters::for_day(day2));
        assert_eq!(rolled.rolled_to(day2), rolled);

        // Same day leaves counters untouched.
        assert_eq!(counters.rolled_to(day1), counters);
    }

    #[test]
    fn counters_at_respects_the_tenant_zone() {
        let mut t = tenant(New_York, 0..24);
        t.daily = DailyCounters {
            day_key: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            llm_calls: 3,
            posts: 1,
            llm_tokens: 100,
        };
        // 03:00 UTC on the 11th is still 22:00 on the 10th in New York.
        let wall = Utc.with_ymd_and_hms(2024, 1, 11, 3, 0, 0).unwrap();
        assert_eq!(t.counters_at(wall).posts, 1);
        // Past local midnight the counters read fresh.
        let wall = Utc.with_ymd_and_hms(2024, 1, 11, 6, 0, 0).unwrap();
        assert_eq!(t.counters_at(wall).posts, 0);
    }

    #[test]
    fn tenant_serializes_without_exposing_credentials_in_debug() {
        let t = tenant(UTC, 9..=17);
        let debug = format!("{t:?}");
        assert!(!debug.contains("secret"));
    }
}
