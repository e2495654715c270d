//! Markdown notes with YAML frontmatter.

mod diff;
pub mod frontmatter;
pub mod time;

pub use diff::{FieldChange, FrontmatterDiff};
pub use frontmatter::Frontmatter;
pub use time::FieldDateTime;

use std::path::{Path, PathBuf};

use crate::constants::NOTE_EXTENSION;
use crate::error::{CalError, CalResult};

/// A note parsed from disk
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: PathBuf,
    pub frontmatter: Frontmatter,
    pub body: String,
}

impl Note {
    pub fn parse(path: PathBuf, content: &str) -> CalResult<Self> {
        let (yaml, body) = frontmatter::split(content);

        let frontmatter = match yaml {
            Some(yaml) => frontmatter::parse(yaml).map_err(|message| CalError::Frontmatter {
                path: path.clone(),
                message,
            })?,
            None => Frontmatter::new(),
        };

        Ok(Note {
            path,
            frontmatter,
            body: body.to_string(),
        })
    }

    pub fn render(&self) -> CalResult<String> {
        frontmatter::render(&self.frontmatter, &self.body).map_err(|e| CalError::Frontmatter {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// File name without extension, used as the note's display name.
    pub fn stem(&self) -> String {
        stem_of(&self.path)
    }
}

pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn is_note_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == NOTE_EXTENSION)
}

/// A `[[wikilink]]` to the note with the given stem.
pub fn wikilink(stem: &str) -> String {
    format!("[[{}]]", stem)
}
