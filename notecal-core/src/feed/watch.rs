//! Translating file watcher notifications into per-path changes.

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// What happened to one path, before debouncing settles it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawChange {
    /// Created or modified, possibly arriving from `old_path` by rename
    Upsert { old_path: Option<PathBuf> },
    Removed,
}

impl RawChange {
    /// Combine a change still waiting in the debounce window with a newer one.
    /// A rename origin survives later plain modifications.
    pub fn merge(previous: RawChange, incoming: RawChange) -> RawChange {
        match (previous, incoming) {
            (RawChange::Upsert { old_path: Some(from) }, RawChange::Upsert { old_path: None }) => {
                RawChange::Upsert { old_path: Some(from) }
            }
            (_, incoming) => incoming,
        }
    }
}

/// Changes to push into the debouncer, plus paths whose pending change must be
/// dropped because they were renamed away.
#[derive(Debug, Default, PartialEq)]
pub struct Translated {
    pub changes: Vec<(PathBuf, RawChange)>,
    pub cancelled: Vec<PathBuf>,
}

pub fn translate(event: Event) -> Translated {
    let mut out = Translated::default();

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                out.cancelled.push(from.clone());
                out.changes.push((
                    to.clone(),
                    RawChange::Upsert {
                        old_path: Some(from.clone()),
                    },
                ));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            out.changes
                .extend(event.paths.into_iter().map(|p| (p, RawChange::Removed)));
        }
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => {
            out.changes.extend(
                event
                    .paths
                    .into_iter()
                    .map(|p| (p, RawChange::Upsert { old_path: None })),
            );
        }
        EventKind::Access(_) | EventKind::Other => {}
    }

    out
}
