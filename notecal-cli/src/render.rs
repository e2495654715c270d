//! Terminal rendering for notecal types.
//!
//! Extension traits that add colored output to notecal-core types using owo_colors.

use notecal_core::{MaterializedInstance, RecurrenceDefinition};
use owo_colors::OwoColorize;

use crate::commands::upcoming::Occurrence;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for RecurrenceDefinition {
    fn render(&self) -> String {
        let weekdays = if self.weekdays.is_empty() {
            String::new()
        } else {
            let names: Vec<String> = self.weekdays.iter().map(|w| w.to_string()).collect();
            format!(" on {}", names.join(", "))
        };
        let rule = format!("{}{}", self.rule, weekdays);

        let line = format!("🔁 {} {} {}", self.title.bold(), rule.cyan(), self.id.dimmed());
        if self.disabled {
            format!("{} {}", line, "(skipped)".yellow())
        } else {
            line
        }
    }
}

impl Render for MaterializedInstance {
    fn render(&self) -> String {
        format!("   {} {}", self.date.green(), self.path.display().dimmed())
    }
}

impl Render for Occurrence {
    fn render(&self) -> String {
        let time = match (&self.start, self.all_day) {
            (_, true) => "all day".to_string(),
            (Some(start), false) => start.get(11..16).unwrap_or(start).to_string(),
            (None, false) => String::new(),
        };

        let marker = if self.materialized {
            "●".green().to_string()
        } else {
            "○".dimmed().to_string()
        };

        format!("{} {} {} {}", marker, self.date, self.title, time.dimmed())
    }
}
