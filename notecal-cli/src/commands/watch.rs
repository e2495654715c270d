use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use super::{Options, open_engine};

pub async fn run(options: &Options) -> Result<()> {
    let engine = open_engine(options, true).await?;
    let mut refreshes = engine.manager().subscribe();

    println!(
        "{} {} ({} recurring events)",
        "Watching".green(),
        engine.root().display(),
        engine.manager().definition_ids().len()
    );

    loop {
        tokio::select! {
            refresh = refreshes.recv() => match refresh {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    tracing::info!(definitions = engine.manager().definition_ids().len(), "calendar refreshed");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.stop();
    Ok(())
}
