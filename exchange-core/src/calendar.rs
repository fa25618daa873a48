//! Business-day calendar
//!
//! Settlement due dates are quoted in business days from the trade date
//! (T+1 .. T+3). A business day is Monday through Friday and not in the
//! configured holiday set.
//!
//! Holiday awareness is an extension point: the calendar ships with an
//! empty holiday set (weekend-skipping only) and a jurisdictional
//! calendar can be injected without code change.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Business-day calendar with an injectable holiday set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessCalendar {
    /// Market holidays (skipped in addition to weekends)
    holidays: BTreeSet<NaiveDate>,
}

impl BusinessCalendar {
    /// Weekend-only calendar (no holidays)
    pub fn new() -> Self {
        Self::default()
    }

    /// Calendar with an explicit holiday set
    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Check whether `date` is a business day
    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Add `n` business days to `reference`
    ///
    /// Pure and deterministic. `n = 0` returns the reference unchanged;
    /// for `n >= 1` the result is always a business day.
    pub fn add_business_days(&self, reference: NaiveDate, n: u32) -> NaiveDate {
        let mut date = reference;
        let mut remaining = n;

        while remaining > 0 {
            date += Duration::days(1);
            if self.is_business_day(date) {
                remaining -= 1;
            }
        }

        date
    }
}
