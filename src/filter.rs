//! Inclusive work-date window.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::models::ReportRecord;

/// Closed calendar-day interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("window start {} is after end {}", start, end);
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")?;
        Self::new(start, end)
    }

    /// The `days`-long window ending on `today`. Fails when the start
    /// would fall outside the representable calendar.
    pub fn trailing(today: NaiveDate, days: i64) -> Result<Self> {
        let start = chrono::Duration::try_days(days.max(0))
            .and_then(|span| today.checked_sub_signed(span));
        match start {
            Some(start) => Ok(Self { start, end: today }),
            None => bail!("a {}-day window ending {} is out of range", days, today),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Anything carrying a work-date string.
pub trait WorkDated {
    fn work_date(&self) -> Option<&str>;
}

impl WorkDated for ReportRecord {
    fn work_date(&self) -> Option<&str> {
        self.date_work.as_deref()
    }
}

/// Day part of a work-date string. Accepts a bare date, RFC 3339, or
/// `YYYY-MM-DD HH:MM:SS`; anything else is `None`.
pub fn parse_work_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Keep the records whose work date lies in `window`. Records without a
/// parseable date are dropped.
pub fn filter_by_window<T: WorkDated>(records: Vec<T>, window: &DateWindow) -> Vec<T> {
    records
        .into_iter()
        .filter(|record| {
            record
                .work_date()
                .and_then(parse_work_date)
                .is_some_and(|date| window.contains(date))
        })
        .collect()
}
