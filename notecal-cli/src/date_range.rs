//! Date range for listing occurrences.

use chrono::{Duration, Local, NaiveDate};

/// Days shown when no end date is given.
const DEFAULT_RANGE_DAYS: i64 = 30;

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Parse `--from`/`--to` arguments.
    /// - `from`: YYYY-MM-DD, defaults to today
    /// - `to`: YYYY-MM-DD, defaults to `from` + 30 days
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> Result<Self, String> {
        let from = match from {
            Some(s) => parse_day(s)?,
            None => Local::now().date_naive(),
        };

        let to = match to {
            Some(s) => parse_day(s)?,
            None => from + Duration::days(DEFAULT_RANGE_DAYS),
        };

        if to < from {
            return Err(format!("--to ({}) is before --from ({})", to, from));
        }

        Ok(DateRange { from, to })
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}
