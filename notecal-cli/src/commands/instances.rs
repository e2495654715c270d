use anyhow::Result;

use super::{Options, open_engine, print_json};
use crate::render::Render;

pub async fn run(options: &Options, id: &str) -> Result<()> {
    let engine = open_engine(options, false).await?;
    let manager = engine.manager();

    let Some(definition) = manager.definition(id) else {
        anyhow::bail!(
            "Recurring event '{}' not found. Known ids: {}",
            id,
            manager.definition_ids().join(", ")
        );
    };

    let instances = manager.instances_for(id);

    if options.json {
        return print_json(&instances);
    }

    println!("{}", definition.render());
    if instances.is_empty() {
        println!("   No instances yet");
    }
    for instance in &instances {
        println!("{}", instance.render());
    }

    Ok(())
}
