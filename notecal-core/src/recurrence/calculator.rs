//! Occurrence date arithmetic.
//!
//! Month-based rules add calendar months and clamp to the last day of shorter
//! months (Jan 31 + 1 month = Feb 28). Each step advances from the previous
//! occurrence, so `next_occurrence` and range iteration always agree.
//! Weekday cycling treats Monday as the first day of the week.

use chrono::{Datelike, Days, Duration, Months, NaiveDate, Weekday};

use crate::constants::FIRST_VALID_SEARCH_DAYS;
use crate::recurrence::{RecurrenceDefinition, RecurrenceType};

/// The occurrence following `date`.
///
/// `weekdays` must be sorted Monday-first and only matters for weekly and
/// bi-weekly rules. Returns `None` only when the result overflows chrono's
/// date range.
pub fn next_occurrence(
    date: NaiveDate,
    rule: RecurrenceType,
    weekdays: &[Weekday],
) -> Option<NaiveDate> {
    match rule {
        RecurrenceType::Daily => date.checked_add_days(Days::new(1)),
        RecurrenceType::Weekly => next_in_week_cycle(date, weekdays, 1),
        RecurrenceType::BiWeekly => next_in_week_cycle(date, weekdays, 2),
        month_based => {
            let months = month_based.months()?;
            date.checked_add_months(Months::new(months))
        }
    }
}

/// Next date in the weekday set, jumping `stride_weeks` weeks once the
/// current week's weekdays are exhausted.
fn next_in_week_cycle(date: NaiveDate, weekdays: &[Weekday], stride_weeks: u64) -> Option<NaiveDate> {
    let Some(first) = weekdays.first() else {
        return date.checked_add_days(Days::new(7 * stride_weeks));
    };

    let today = u64::from(date.weekday().num_days_from_monday());

    let later_this_week = weekdays
        .iter()
        .map(|w| u64::from(w.num_days_from_monday()))
        .find(|&w| w > today);

    let days = match later_this_week {
        Some(w) => w - today,
        None => (7 - today) + 7 * (stride_weeks - 1) + u64::from(first.num_days_from_monday()),
    };

    date.checked_add_days(Days::new(days))
}

/// The first date on or after the anchor that satisfies the definition.
///
/// Only weekly and bi-weekly rules with a weekday set can have an anchor that
/// is not itself an occurrence. The search is bounded; when nothing matches
/// the raw anchor is returned.
pub fn first_valid_occurrence(definition: &RecurrenceDefinition) -> NaiveDate {
    let anchor = definition.anchor.date();

    if definition.matches_weekdays(anchor) {
        return anchor;
    }

    let bound = anchor + Duration::days(FIRST_VALID_SEARCH_DAYS);
    iterate_occurrences_in_range(anchor, definition, anchor, bound)
        .next()
        .unwrap_or(anchor)
}

/// The first date that gets its own instance note.
///
/// An anchor that satisfies the rule is the defining note's own occurrence, so
/// instances start at the occurrence after it. A non-matching anchor is moved
/// forward to the first matching date, which is not skipped.
pub fn first_instance_date(definition: &RecurrenceDefinition) -> Option<NaiveDate> {
    let anchor = definition.anchor.date();
    let first = first_valid_occurrence(definition);

    if first == anchor && definition.matches_weekdays(anchor) {
        next_occurrence(anchor, definition.rule, &definition.weekdays)
    } else {
        Some(first)
    }
}

/// Lazily iterate occurrences in `[range_start, range_end]`, stepping from `anchor`.
///
/// An anchor that does not satisfy the weekday rule is first advanced to the
/// next matching date. The iterator is `Clone`, so a sequence can be restarted
/// from any point.
pub fn iterate_occurrences_in_range(
    anchor: NaiveDate,
    definition: &RecurrenceDefinition,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Occurrences {
    let seed = if definition.matches_weekdays(anchor) {
        Some(anchor)
    } else {
        next_occurrence(anchor, definition.rule, &definition.weekdays)
    };

    Occurrences {
        next: seed,
        rule: definition.rule,
        weekdays: definition.weekdays.clone(),
        range_start,
        range_end,
    }
}

/// Bounded occurrence sequence produced by [`iterate_occurrences_in_range`].
#[derive(Debug, Clone)]
pub struct Occurrences {
    next: Option<NaiveDate>,
    rule: RecurrenceType,
    weekdays: Vec<Weekday>,
    range_start: NaiveDate,
    range_end: NaiveDate,
}

impl Iterator for Occurrences {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            let current = self.next?;
            if current > self.range_end {
                self.next = None;
                return None;
            }

            self.next = next_occurrence(current, self.rule, &self.weekdays);

            if current >= self.range_start {
                return Some(current);
            }
        }
    }
}
