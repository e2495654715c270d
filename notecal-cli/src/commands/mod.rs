pub mod definitions;
pub mod ensure;
pub mod instances;
pub mod upcoming;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use notecal_core::{EngineHandle, EngineRegistry, FsNoteStore, NotecalConfig};

/// Global command line options.
pub struct Options {
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Options {
    /// The global configuration with the `--dir` override applied.
    pub fn config(&self) -> Result<NotecalConfig> {
        let mut config = NotecalConfig::load().context("Failed to load notecal config")?;
        if let Some(dir) = &self.dir {
            config.directory = dir.clone();
        }
        Ok(config)
    }
}

/// Scan the notes directory and return an engine over it.
pub async fn open_engine(options: &Options, watch: bool) -> Result<EngineHandle<FsNoteStore>> {
    let config = options.config()?;
    let root = config.root();
    let registry = EngineRegistry::new(Arc::new(FsNoteStore::new()));

    registry
        .acquire(config, watch)
        .await
        .with_context(|| format!("Failed to open notes directory {}", root.display()))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
