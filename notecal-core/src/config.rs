//! Global notecal configuration.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_FUTURE_INSTANCES;
use crate::error::{CalError, CalResult};

static DEFAULT_NOTES_PATH: &str = "~/notes";

fn default_directory() -> PathBuf {
    PathBuf::from(DEFAULT_NOTES_PATH)
}

fn default_future_instances() -> u32 {
    DEFAULT_FUTURE_INSTANCES
}

fn default_done_value() -> String {
    "Done".to_string()
}

/// Global configuration at ~/.config/notecal/config.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotecalConfig {
    /// Root directory holding the event notes
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Number of future intervals kept materialized per definition
    #[serde(default = "default_future_instances")]
    pub future_instances_count: u32,

    /// Set the status field of notes whose event has ended
    #[serde(default)]
    pub mark_past_events_done: bool,

    #[serde(default = "default_done_value")]
    pub done_value: String,

    #[serde(default)]
    pub properties: PropertyNames,
}

impl Default for NotecalConfig {
    fn default() -> Self {
        NotecalConfig {
            directory: default_directory(),
            future_instances_count: default_future_instances(),
            mark_past_events_done: false,
            done_value: default_done_value(),
            properties: PropertyNames::default(),
        }
    }
}

/// Frontmatter field names used to read and write event notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyNames {
    pub start: String,
    pub end: String,
    pub date: String,
    pub all_day: String,
    pub rrule: String,
    pub rrule_spec: String,
    pub rrule_id: String,
    pub source: String,
    pub instance_date: String,
    pub skip: String,
    pub status: String,
    pub future_instances_count: String,
    pub notification_sent: String,
    pub archived: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        PropertyNames {
            start: "Start Date".into(),
            end: "End Date".into(),
            date: "Date".into(),
            all_day: "All Day".into(),
            rrule: "RRule".into(),
            rrule_spec: "RRuleSpec".into(),
            rrule_id: "RRuleID".into(),
            source: "Source".into(),
            instance_date: "Recurring Instance Date".into(),
            skip: "Skip".into(),
            status: "Status".into(),
            future_instances_count: "Future Instances Count".into(),
            notification_sent: "Already Notified".into(),
            archived: "_Archived".into(),
        }
    }
}

impl PropertyNames {
    /// Fields that describe the recurrence itself and must not be copied
    /// onto materialized instances.
    pub fn authoring_fields(&self) -> [&str; 8] {
        [
            &self.rrule,
            &self.rrule_spec,
            &self.start,
            &self.end,
            &self.date,
            &self.all_day,
            &self.notification_sent,
            &self.archived,
        ]
    }
}

impl NotecalConfig {
    pub fn config_path() -> CalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalError::Config("Could not determine config directory".into()))?
            .join("notecal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load ~/.config/notecal/config.toml, layered with NOTECAL_* environment variables.
    pub fn load() -> CalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> CalResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("NOTECAL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| CalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalError::Config(e.to_string()))
    }

    /// The notes root with `~` expanded.
    pub fn root(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.directory.to_string_lossy()).into_owned();
        PathBuf::from(expanded)
    }

    /// Whether switching to `other` changes which notes are tracked or how they parse.
    pub fn requires_rescan(&self, other: &NotecalConfig) -> bool {
        self.root() != other.root() || self.properties != other.properties
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalResult<()> {
        let contents = format!(
            "\
# notecal configuration

# Where your event notes live:
# directory = \"{}\"

# How many future intervals to keep as real notes per recurring event:
# future_instances_count = {}

# Mark notes whose event has ended as done:
# mark_past_events_done = false
# done_value = \"Done\"

# Frontmatter field names:
# [properties]
# start = \"Start Date\"
# end = \"End Date\"
# rrule = \"RRule\"
",
            DEFAULT_NOTES_PATH, DEFAULT_FUTURE_INSTANCES
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
