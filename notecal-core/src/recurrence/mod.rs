//! Recurrence definitions and occurrence calculation.

mod calculator;
mod schema;

pub use calculator::{
    first_instance_date, first_valid_occurrence, iterate_occurrences_in_range, next_occurrence,
    Occurrences,
};
pub use schema::{RecurrenceSchema, parse_definition};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::note::{FieldDateTime, Frontmatter};

/// The closed set of supported repeat rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    BiWeekly,
    Monthly,
    BiMonthly,
    Quarterly,
    SemiAnnual,
    Yearly,
}

impl RecurrenceType {
    /// Whether a weekday set applies to this rule.
    pub fn uses_weekdays(self) -> bool {
        matches!(self, RecurrenceType::Weekly | RecurrenceType::BiWeekly)
    }

    /// Calendar months added per step, for month-based rules.
    pub fn months(self) -> Option<u32> {
        match self {
            RecurrenceType::Monthly => Some(1),
            RecurrenceType::BiMonthly => Some(2),
            RecurrenceType::Quarterly => Some(3),
            RecurrenceType::SemiAnnual => Some(6),
            RecurrenceType::Yearly => Some(12),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecurrenceType::Daily => "daily",
            RecurrenceType::Weekly => "weekly",
            RecurrenceType::BiWeekly => "bi-weekly",
            RecurrenceType::Monthly => "monthly",
            RecurrenceType::BiMonthly => "bi-monthly",
            RecurrenceType::Quarterly => "quarterly",
            RecurrenceType::SemiAnnual => "semi-annual",
            RecurrenceType::Yearly => "yearly",
        }
    }
}

impl FromStr for RecurrenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(RecurrenceType::Daily),
            "weekly" => Ok(RecurrenceType::Weekly),
            "bi-weekly" | "biweekly" => Ok(RecurrenceType::BiWeekly),
            "monthly" => Ok(RecurrenceType::Monthly),
            "bi-monthly" | "bimonthly" => Ok(RecurrenceType::BiMonthly),
            "quarterly" => Ok(RecurrenceType::Quarterly),
            "semi-annual" | "semiannual" | "semi-annually" => Ok(RecurrenceType::SemiAnnual),
            "yearly" | "annual" | "annually" => Ok(RecurrenceType::Yearly),
            other => Err(format!("Unknown recurrence type '{}'", other)),
        }
    }
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weekdays sorted Monday-first without duplicates.
pub fn normalize_weekdays(mut weekdays: Vec<Weekday>) -> Vec<Weekday> {
    weekdays.sort_by_key(|w| w.num_days_from_monday());
    weekdays.dedup();
    weekdays
}

/// Where a definition's occurrences are pinned.
#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
    AllDay(NaiveDate),
    Timed {
        start: FieldDateTime,
        end: Option<FieldDateTime>,
    },
}

impl Anchor {
    pub fn date(&self) -> NaiveDate {
        match self {
            Anchor::AllDay(date) => *date,
            Anchor::Timed { start, .. } => start.date(),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Anchor::AllDay(_))
    }

    /// Start and end field values for an occurrence on `date`.
    ///
    /// The time-of-day text is copied onto the new date; an end that falls on a
    /// later day than the start keeps the same day offset.
    pub fn times_on(&self, date: NaiveDate) -> (Option<FieldDateTime>, Option<FieldDateTime>) {
        match self {
            Anchor::AllDay(_) => (None, None),
            Anchor::Timed { start, end } => {
                let end = end.as_ref().map(|end| {
                    let offset = end.date() - start.date();
                    end.on_date(date + offset)
                });
                (Some(start.on_date(date)), end)
            }
        }
    }
}

/// A repeat rule declared in one note.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceDefinition {
    pub id: String,
    pub rule: RecurrenceType,
    pub weekdays: Vec<Weekday>,
    pub anchor: Anchor,
    pub source: PathBuf,
    /// Display name of the defining note (its file stem)
    pub title: String,
    /// All frontmatter fields of the defining note
    pub fields: Frontmatter,
    pub body: String,
    pub disabled: bool,
    /// Per-definition override of the number of future intervals to keep
    pub future_instances: Option<u32>,
}

impl RecurrenceDefinition {
    /// Whether `date` is an occurrence date under the weekday restriction.
    pub fn matches_weekdays(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        !self.rule.uses_weekdays()
            || self.weekdays.is_empty()
            || self.weekdays.contains(&date.weekday())
    }

    /// How many future instances should exist for this definition.
    pub fn target_instance_count(&self, default_intervals: u32) -> usize {
        let intervals = self.future_instances.unwrap_or(default_intervals) as usize;
        if self.rule.uses_weekdays() {
            self.weekdays.len().max(1) * intervals
        } else {
            intervals
        }
    }
}
