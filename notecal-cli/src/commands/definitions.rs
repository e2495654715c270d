use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use super::{Options, open_engine, print_json};
use crate::render::Render;

#[derive(Serialize)]
struct DefinitionSummary {
    id: String,
    title: String,
    rule: notecal_core::RecurrenceType,
    weekdays: Vec<String>,
    source: PathBuf,
    disabled: bool,
    instances: usize,
}

pub async fn run(options: &Options) -> Result<()> {
    let engine = open_engine(options, false).await?;
    let manager = engine.manager();

    let definitions: Vec<_> = manager
        .definition_ids()
        .iter()
        .filter_map(|id| manager.definition(id))
        .collect();

    if options.json {
        let summaries: Vec<DefinitionSummary> = definitions
            .iter()
            .map(|def| DefinitionSummary {
                id: def.id.clone(),
                title: def.title.clone(),
                rule: def.rule,
                weekdays: def.weekdays.iter().map(|w| w.to_string()).collect(),
                source: def.source.clone(),
                disabled: def.disabled,
                instances: manager.instances_for(&def.id).len(),
            })
            .collect();
        return print_json(&summaries);
    }

    if definitions.is_empty() {
        println!("No recurring events found in {}", engine.root().display());
        return Ok(());
    }

    for def in &definitions {
        println!("{}", def.render());
    }

    Ok(())
}
