use std::path::{Path, PathBuf};

use crate::note::{Frontmatter, FrontmatterDiff};
use crate::recurrence::RecurrenceDefinition;

/// A normalized change emitted by the feed.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A note was created or its content changed
    FileChanged {
        path: PathBuf,
        /// Previous location when the change is a rename
        old_path: Option<PathBuf>,
        frontmatter: Frontmatter,
        diff: FrontmatterDiff,
    },
    FileDeleted { path: PathBuf },
    /// A note declares a valid recurrence
    DefinitionFound {
        path: PathBuf,
        old_path: Option<PathBuf>,
        definition: RecurrenceDefinition,
    },
}

impl ChangeEvent {
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::FileChanged { path, .. }
            | ChangeEvent::FileDeleted { path }
            | ChangeEvent::DefinitionFound { path, .. } => path,
        }
    }

    pub fn old_path(&self) -> Option<&Path> {
        match self {
            ChangeEvent::FileChanged { old_path, .. } | ChangeEvent::DefinitionFound { old_path, .. } => {
                old_path.as_deref()
            }
            ChangeEvent::FileDeleted { .. } => None,
        }
    }
}
