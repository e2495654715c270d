//! Recognizing recurrence definitions in note frontmatter.

use chrono::Weekday;

use crate::config::PropertyNames;
use crate::note::time::parse_date;
use crate::note::{FieldDateTime, Frontmatter, Note};
use crate::recurrence::{Anchor, RecurrenceDefinition, RecurrenceType, normalize_weekdays};

/// The validated recurrence fields of a note, before an id is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceSchema {
    pub rule: RecurrenceType,
    pub weekdays: Vec<Weekday>,
    pub anchor: Anchor,
}

impl RecurrenceSchema {
    /// Validate a note's fields against the recurrence schema.
    ///
    /// Returns `None` when the note does not declare a usable recurrence: no or
    /// unknown rule, or no parsable anchor date.
    pub fn validate(fields: &Frontmatter, props: &PropertyNames) -> Option<Self> {
        let rule: RecurrenceType = fields.get_str(&props.rrule)?.parse().ok()?;

        let weekdays = if rule.uses_weekdays() {
            normalize_weekdays(
                fields
                    .get_list(&props.rrule_spec)
                    .iter()
                    .filter_map(|name| parse_weekday(name))
                    .collect(),
            )
        } else {
            Vec::new()
        };

        let all_day = fields.get_bool(&props.all_day).unwrap_or(false);
        let anchor = if all_day {
            let date = fields
                .get_str(&props.date)
                .and_then(|raw| parse_date(&raw))
                .or_else(|| fields.get_str(&props.start).and_then(|raw| parse_date(&raw)))?;
            Anchor::AllDay(date)
        } else {
            let start = fields
                .get_str(&props.start)
                .and_then(|raw| FieldDateTime::parse(&raw))?;
            let end = fields
                .get_str(&props.end)
                .and_then(|raw| FieldDateTime::parse(&raw))
                .filter(|end| end.naive() >= start.naive());
            Anchor::Timed { start, end }
        };

        Some(RecurrenceSchema {
            rule,
            weekdays,
            anchor,
        })
    }

    pub fn into_definition(
        self,
        id: String,
        note: &Note,
        props: &PropertyNames,
    ) -> RecurrenceDefinition {
        let fields = &note.frontmatter;
        RecurrenceDefinition {
            id,
            rule: self.rule,
            weekdays: self.weekdays,
            anchor: self.anchor,
            source: note.path.clone(),
            title: note.stem(),
            fields: fields.clone(),
            body: note.body.clone(),
            disabled: fields.get_bool(&props.skip).unwrap_or(false),
            future_instances: fields.get_u32(&props.future_instances_count),
        }
    }
}

/// Build a definition from a note that already carries its recurrence id.
pub fn parse_definition(note: &Note, props: &PropertyNames) -> Option<RecurrenceDefinition> {
    let id = note.frontmatter.get_str(&props.rrule_id)?;
    let schema = RecurrenceSchema::validate(&note.frontmatter, props)?;
    Some(schema.into_definition(id, note, props))
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    let name = name.trim().to_lowercase();
    match name.get(..3)? {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}
