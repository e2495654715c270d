use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use super::{Options, open_engine, print_json};
use crate::date_range::DateRange;
use crate::render::Render;

/// One row of the upcoming listing, materialized or projected.
#[derive(Serialize)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub recurrence_id: String,
    pub title: String,
    pub all_day: bool,
    pub start: Option<String>,
    pub end: Option<String>,
    pub materialized: bool,
    pub path: Option<PathBuf>,
}

pub async fn run(options: &Options, range: DateRange) -> Result<()> {
    let engine = open_engine(options, false).await?;
    let manager = engine.manager();

    let mut occurrences = Vec::new();

    for id in manager.definition_ids() {
        let Some(definition) = manager.definition(&id) else {
            continue;
        };

        for instance in manager.instances_for(&id) {
            if instance.date < range.from || instance.date > range.to {
                continue;
            }
            let (start, end) = definition.anchor.times_on(instance.date);
            occurrences.push(Occurrence {
                date: instance.date,
                recurrence_id: id.clone(),
                title: definition.title.clone(),
                all_day: definition.anchor.is_all_day(),
                start: start.map(|s| s.to_string()),
                end: end.map(|e| e.to_string()),
                materialized: true,
                path: Some(instance.path),
            });
        }
    }

    occurrences.extend(
        manager
            .generate_virtual_instances(range.from, range.to)
            .into_iter()
            .map(|projected| Occurrence {
                date: projected.date,
                recurrence_id: projected.recurrence_id,
                title: projected.title,
                all_day: projected.all_day,
                start: projected.start,
                end: projected.end,
                materialized: false,
                path: None,
            }),
    );

    occurrences.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.start.cmp(&b.start)));

    if options.json {
        return print_json(&occurrences);
    }

    if occurrences.is_empty() {
        println!("No recurring events between {} and {}", range.from, range.to);
        return Ok(());
    }

    for occurrence in &occurrences {
        println!("{}", occurrence.render());
    }

    Ok(())
}
