//! Storage collaborator for event notes.
//!
//! The change feed reads through a [`NoteStore`] and the recurring event
//! manager writes instance notes, field updates and renames through it.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::error::{CalError, CalResult};
use crate::note::{self, Frontmatter, Note, frontmatter};

pub trait NoteStore: Send + Sync + 'static {
    /// Read and parse a note. `Ok(None)` when the file does not exist.
    fn read_note(&self, path: &Path) -> impl Future<Output = CalResult<Option<Note>>> + Send;

    fn exists(&self, path: &Path) -> impl Future<Output = CalResult<bool>> + Send;

    /// Create a new note. Fails with an `AlreadyExists` IO error when a file is
    /// already present at `directory/filename`.
    fn create_note(
        &self,
        title: &str,
        directory: &Path,
        filename: &str,
        body: Option<&str>,
        frontmatter: &Frontmatter,
    ) -> impl Future<Output = CalResult<PathBuf>> + Send;

    /// Apply `mutate` to a note's frontmatter and write it back if it changed.
    fn update_frontmatter<F>(&self, path: &Path, mutate: F) -> impl Future<Output = CalResult<()>> + Send
    where
        F: FnOnce(&mut Frontmatter) + Send;

    /// Rename a note within its directory. Returns the new path.
    fn rename_note(&self, path: &Path, new_stem: &str) -> impl Future<Output = CalResult<PathBuf>> + Send;

    /// All note paths under `root`, skipping hidden directories.
    fn list_notes(&self, root: &Path) -> impl Future<Output = CalResult<Vec<PathBuf>>> + Send;
}

/// Notes stored as Markdown files on the local file system.
#[derive(Debug, Clone, Default)]
pub struct FsNoteStore;

impl FsNoteStore {
    pub fn new() -> Self {
        FsNoteStore
    }
}

fn stale_or_io(path: &Path, err: std::io::Error) -> CalError {
    if err.kind() == ErrorKind::NotFound {
        CalError::StaleReference(path.to_path_buf())
    } else {
        CalError::Io(err)
    }
}

impl NoteStore for FsNoteStore {
    async fn read_note(&self, path: &Path) -> CalResult<Option<Note>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Note::parse(path.to_path_buf(), &content).map(Some)
    }

    async fn exists(&self, path: &Path) -> CalResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn create_note(
        &self,
        title: &str,
        directory: &Path,
        filename: &str,
        body: Option<&str>,
        frontmatter: &Frontmatter,
    ) -> CalResult<PathBuf> {
        let path = directory.join(filename);
        let content =
            frontmatter::render(frontmatter, body.unwrap_or_default()).map_err(|e| CalError::StorageWrite {
                path: path.clone(),
                message: e.to_string(),
            })?;

        tokio::fs::create_dir_all(directory).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), title, "created note");
        Ok(path)
    }

    async fn update_frontmatter<F>(&self, path: &Path, mutate: F) -> CalResult<()>
    where
        F: FnOnce(&mut Frontmatter) + Send,
    {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| stale_or_io(path, e))?;
        let mut note = Note::parse(path.to_path_buf(), &content)?;

        let before = note.frontmatter.clone();
        mutate(&mut note.frontmatter);
        if note.frontmatter == before {
            return Ok(());
        }

        let rendered = note.render()?;

        // Write to a sibling temp file first so readers never see a partial note
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{}.tmp", file_name));

        tokio::fs::write(&temp, rendered).await?;
        tokio::fs::rename(&temp, path).await?;
        Ok(())
    }

    async fn rename_note(&self, path: &Path, new_stem: &str) -> CalResult<PathBuf> {
        let directory = path.parent().unwrap_or_else(|| Path::new(""));
        let new_path = directory.join(format!("{}.{}", new_stem, crate::constants::NOTE_EXTENSION));

        if new_path == path {
            return Ok(new_path);
        }
        if tokio::fs::try_exists(&new_path).await? {
            return Err(CalError::StorageWrite {
                path: new_path,
                message: "a note with that name already exists".to_string(),
            });
        }

        tokio::fs::rename(path, &new_path)
            .await
            .map_err(|e| stale_or_io(path, e))?;
        Ok(new_path)
    }

    async fn list_notes(&self, root: &Path) -> CalResult<Vec<PathBuf>> {
        let root = root.to_path_buf();

        let paths = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'))
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| note::is_note_path(path))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CalError::Io(std::io::Error::other(e)))?;

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsNoteStore::new();
        let mut fm = Frontmatter::new();
        fm.set("Title", "Standup");

        let path = store
            .create_note("Standup", dir.path(), "Standup 2025-01-08.md", Some("body\n"), &fm)
            .await
            .unwrap();
        let note = store.read_note(&path).await.unwrap().unwrap();
        assert_eq!(note.frontmatter, fm);
        assert_eq!(note.body, "body\n");

        let again = store
            .create_note("Standup", dir.path(), "Standup 2025-01-08.md", None, &fm)
            .await;
        assert!(matches!(again, Err(CalError::Io(e)) if e.kind() == ErrorKind::AlreadyExists));
    }

    #[tokio::test]
    async fn update_frontmatter_keeps_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Event.md");
        std::fs::write(&path, "---\nTitle: Event\n---\nkeep me\n").unwrap();
        let store = FsNoteStore::new();

        store
            .update_frontmatter(&path, |fm| fm.set("Status", "Done"))
            .await
            .unwrap();

        let note = store.read_note(&path).await.unwrap().unwrap();
        assert_eq!(note.frontmatter.get_str("Status").as_deref(), Some("Done"));
        assert_eq!(note.body, "keep me\n");
    }

    #[tokio::test]
    async fn missing_notes_are_stale_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsNoteStore::new();
        let missing = dir.path().join("gone.md");

        assert!(store.read_note(&missing).await.unwrap().is_none());
        assert!(matches!(
            store.update_frontmatter(&missing, |_| {}).await,
            Err(CalError::StaleReference(_))
        ));
        assert!(matches!(
            store.rename_note(&missing, "other").await,
            Err(CalError::StaleReference(_))
        ));
    }

    #[tokio::test]
    async fn rename_and_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work/.obsidian")).unwrap();
        std::fs::write(dir.path().join("work/Standup.md"), "").unwrap();
        std::fs::write(dir.path().join("work/.obsidian/ignored.md"), "").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "").unwrap();
        let store = FsNoteStore::new();

        let renamed = store
            .rename_note(&dir.path().join("work/Standup.md"), "Daily Standup")
            .await
            .unwrap();
        assert_eq!(renamed, dir.path().join("work/Daily Standup.md"));

        let notes = store.list_notes(dir.path()).await.unwrap();
        assert_eq!(notes, vec![renamed]);
    }
}
