//! Date and date-time values as they appear in frontmatter fields.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A wall-clock date-time as written in a note.
///
/// The text after the date (separator, time and any `Z`/offset suffix) is kept
/// verbatim so that moving the value to another day never reinterprets it in a
/// different timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDateTime {
    date: NaiveDate,
    time: NaiveTime,
    tail: String,
}

impl FieldDateTime {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let date = parse_date_prefix(raw)?;
        let tail = raw.get(10..)?;

        let time_text = tail.strip_prefix('T').or_else(|| tail.strip_prefix(' '))?;
        let time = parse_time(strip_offset(time_text))?;

        Some(FieldDateTime {
            date,
            time,
            tail: tail.to_string(),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// The same time-of-day text placed on another calendar date.
    pub fn on_date(&self, date: NaiveDate) -> Self {
        FieldDateTime {
            date,
            time: self.time,
            tail: self.tail.clone(),
        }
    }
}

impl fmt::Display for FieldDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.date.format(DATE_FORMAT), self.tail)
    }
}

/// Parse a `YYYY-MM-DD` value, or the date part of a date-time value.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_date_prefix(raw.trim())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.get(..10)?;
    let rest = raw.get(10..)?;
    if !(rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')) {
        return None;
    }
    NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok()
}

fn strip_offset(time_text: &str) -> &str {
    if let Some(stripped) = time_text.strip_suffix('Z') {
        return stripped;
    }
    // An offset sign can only follow the HH:MM part.
    match time_text.get(5..).and_then(|s| s.rfind(['+', '-'])) {
        Some(pos) => &time_text[..5 + pos],
        None => time_text,
    }
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}
