//! Naming and field layout of materialized instance notes.

use chrono::NaiveDate;

use crate::config::PropertyNames;
use crate::note::time::format_date;
use crate::note::{Frontmatter, wikilink};
use crate::recurrence::{Anchor, RecurrenceDefinition};

/// File stem of the instance of `title` on `date`: `"<title> <YYYY-MM-DD>"`.
pub fn instance_stem(title: &str, date: NaiveDate) -> String {
    format!("{} {}", title, format_date(date))
}

/// Fields written to a new instance note.
///
/// Inherited fields are copied from the definition minus the authoring fields.
/// Start and end keep the definition's time-of-day text, moved onto `date`.
pub fn instance_fields(definition: &RecurrenceDefinition, date: NaiveDate, props: &PropertyNames) -> Frontmatter {
    let excluded = props.authoring_fields();
    let mut fields = Frontmatter::new();

    for (key, value) in definition.fields.iter() {
        if !excluded.contains(&key) {
            fields.set(key, value.clone());
        }
    }

    match &definition.anchor {
        Anchor::AllDay(_) => {
            fields.set(&props.date, format_date(date));
            fields.set(&props.all_day, true);
        }
        anchor @ Anchor::Timed { .. } => {
            let (start, end) = anchor.times_on(date);
            if let Some(start) = start {
                fields.set(&props.start, start.to_string());
            }
            if let Some(end) = end {
                fields.set(&props.end, end.to_string());
            }
            fields.set(&props.all_day, false);
        }
    }

    fields.set(&props.rrule_id, definition.id.clone());
    fields.set(&props.instance_date, format_date(date));
    fields.set(&props.source, wikilink(&definition.title));
    fields
}

/// Recurrence id and occurrence date of an instance note, if the fields mark
/// it as one. Notes that declare a rule themselves are never instances.
pub fn instance_identity(fields: &Frontmatter, props: &PropertyNames) -> Option<(String, NaiveDate)> {
    if fields.contains(&props.rrule) {
        return None;
    }
    let id = fields.get_str(&props.rrule_id)?;
    let date = fields
        .get_str(&props.instance_date)
        .and_then(|raw| crate::note::time::parse_date(&raw))?;
    Some((id, date))
}
