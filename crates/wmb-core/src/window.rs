//! Report time window calculator.
//!
//! The dashboard day boundary is 08:30/08:31 in the deployment time zone
//! (WIB, UTC+7 by default): the daily report covers yesterday 08:31:00
//! through today 08:30:00, and an explicit range covers the start date at
//! 08:31 through the end date at 08:30.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::{errors::Error, Result};

/// Half-open time interval one report summarizes. Immutable once constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportWindow {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl ReportWindow {
    /// Default window: yesterday 08:31 → today 08:30 local, regardless of the
    /// current wall-clock instant.
    pub fn default_for(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        let today = NaiveDate::from_ymd_opt(local.year(), local.month(), local.day())
            .expect("date from a valid datetime");
        let end = at(offset, today, 8, 30);
        let start = end - Duration::days(1) + Duration::minutes(1);
        Self { start, end }
    }

    /// Explicit window: `start` at 08:31 → `end` at 08:30. Rejects ranges
    /// where the start date is after the end date; equal dates are accepted.
    pub fn explicit(start: NaiveDate, end: NaiveDate, offset: FixedOffset) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(
                "Start date cannot be after end date.".to_string(),
            ));
        }
        Ok(Self {
            start: at(offset, start, 8, 31),
            end: at(offset, end, 8, 30),
        })
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    /// Epoch milliseconds, as the dashboard stat query expects.
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Human-readable title placed above the rendered table.
    pub fn title(&self) -> String {
        format!(
            "Report from {} to {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

fn at(offset: FixedOffset, date: NaiveDate, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    let naive = date
        .and_hms_opt(hour, minute, 0)
        .expect("valid wall clock time");
    // A fixed offset maps every local datetime to exactly one instant.
    offset
        .from_local_datetime(&naive)
        .single()
        .expect("unambiguous fixed-offset datetime")
}
