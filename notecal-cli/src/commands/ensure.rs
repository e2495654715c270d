use anyhow::Result;
use owo_colors::OwoColorize;

use super::{Options, open_engine};

pub async fn run(options: &Options) -> Result<()> {
    let engine = open_engine(options, false).await?;
    let manager = engine.manager();

    let created = manager.ensure_all().await;

    if created == 0 {
        println!("{}", "All recurring events are up to date".dimmed());
    } else {
        println!(
            "{} {} instance note(s) for {} recurring event(s)",
            "Created".green(),
            created,
            manager.definition_ids().len()
        );
    }

    Ok(())
}
