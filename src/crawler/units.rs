//! Work units of a batch job
//!
//! A job is a finite, ordered sequence of work units. The driver commits one
//! unit at a time and checkpoints its end marker, so the marker type must be
//! totally ordered and serializable.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// One schedulable chunk of fetch work
pub trait WorkUnit: Clone + Debug + Send + Sync {
    /// End marker persisted in the checkpoint
    type Cursor: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Column added to every record collected for this unit
    const LABEL_COLUMN: &'static str;

    /// Label used in output file names and the label column
    fn label(&self) -> String;

    fn end_marker(&self) -> Self::Cursor;

    /// Whether a record timestamp lies inside this unit's bounds
    fn contains(&self, at: DateTime<Utc>) -> bool;
}

/// A calendar month in UTC, half-open: `[start, end)`
///
/// The last window of a range is clipped to the range end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    /// The full calendar month containing `at`
    pub fn containing(at: DateTime<Utc>) -> Self {
        let start = month_start(at.year(), at.month());
        Self {
            start,
            end: next_month_start(start),
        }
    }
}

impl WorkUnit for MonthWindow {
    type Cursor = DateTime<Utc>;

    const LABEL_COLUMN: &'static str = "scrape_month";

    fn label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }

    fn end_marker(&self) -> DateTime<Utc> {
        self.end
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Splits `[start, end)` into month windows
///
/// The first window starts at the first day of `start`'s month; the last one
/// ends at `end`. An empty or inverted range yields no windows.
pub fn month_windows(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<MonthWindow> {
    let mut windows = Vec::new();
    let mut current = month_start(start.year(), start.month());

    while current < end {
        let next = next_month_start(current);
        windows.push(MonthWindow {
            start: current,
            end: next.min(end),
        });
        current = next;
    }

    windows
}

/// Month windows covering the last `years` years up to `now`
///
/// A year is counted as 365 days.
pub fn historical_windows(now: DateTime<Utc>, years: u32) -> Vec<MonthWindow> {
    let start = now - Duration::days(365 * i64::from(years));
    month_windows(start, now)
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn next_month_start(start: DateTime<Utc>) -> DateTime<Utc> {
    if start.month() == 12 {
        month_start(start.year() + 1, 1)
    } else {
        month_start(start.year(), start.month() + 1)
    }
}
