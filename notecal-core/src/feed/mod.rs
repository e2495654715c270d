//! Change feed: watches the notes root and emits normalized change events.
//!
//! File system notifications are debounced per path, each settled path is
//! parsed, recurrence definitions are recognized (and given a stable id on
//! first sight), and the resulting events are sent on one ordered channel.
//! A full scan runs on start and whenever filtering configuration changes.

mod event;
mod watch;

pub use event::ChangeEvent;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use futures::StreamExt;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch as signal};
use tokio::task::JoinHandle;

use crate::config::NotecalConfig;
use crate::constants::{CHANGE_DEBOUNCE, SCAN_CONCURRENCY};
use crate::debounce::Debouncer;
use crate::error::CalResult;
use crate::note::time::parse_date;
use crate::note::{self, FieldDateTime, Frontmatter, FrontmatterDiff, Note};
use crate::recurrence::RecurrenceSchema;
use crate::store::NoteStore;
use watch::RawChange;

/// Receiving side of a feed: the ordered event stream and the indexing flag.
pub struct ChangeStream {
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    /// `false` while a full scan runs, `true` once its batch has been sent
    pub indexing_complete: signal::Receiver<bool>,
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    frontmatter: Frontmatter,
    body: String,
}

struct FeedInner<S> {
    store: Arc<S>,
    config: RwLock<Arc<NotecalConfig>>,
    snapshots: Mutex<HashMap<PathBuf, Snapshot>>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    indexing: signal::Sender<bool>,
}

pub struct ChangeFeed<S: NoteStore> {
    inner: Arc<FeedInner<S>>,
    debouncer: Arc<Debouncer<PathBuf, RawChange>>,
    settled: Mutex<Option<mpsc::UnboundedReceiver<(PathBuf, RawChange)>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: NoteStore> ChangeFeed<S> {
    pub fn new(store: Arc<S>, config: NotecalConfig) -> (Self, ChangeStream) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (indexing_tx, indexing_rx) = signal::channel(false);
        let (debouncer, settled) = Debouncer::new(CHANGE_DEBOUNCE, RawChange::merge);

        let feed = ChangeFeed {
            inner: Arc::new(FeedInner {
                store,
                config: RwLock::new(Arc::new(config)),
                snapshots: Mutex::new(HashMap::new()),
                events: events_tx,
                indexing: indexing_tx,
            }),
            debouncer: Arc::new(debouncer),
            settled: Mutex::new(Some(settled)),
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };

        let stream = ChangeStream {
            events: events_rx,
            indexing_complete: indexing_rx,
        };

        (feed, stream)
    }

    pub fn config(&self) -> Arc<NotecalConfig> {
        self.inner.config()
    }

    /// Start watching the root. Settled changes are processed on a background task.
    pub fn start_watching(&self) -> CalResult<()> {
        if let Some(settled) = self.settled.lock().take() {
            let inner = Arc::clone(&self.inner);
            self.tasks.lock().push(tokio::spawn(process_settled(inner, settled)));
        }
        self.watch_root(&self.inner.config().root())
    }

    fn watch_root(&self, root: &Path) -> CalResult<()> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let debouncer = Arc::clone(&self.debouncer);
        let translator = tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                let translated = watch::translate(event);
                for path in &translated.cancelled {
                    debouncer.cancel(path);
                }
                for (path, change) in translated.changes {
                    debouncer.push(path, change);
                }
            }
        });

        // Replacing the watcher drops the old one, which closes its channel
        // and ends its translator task.
        *self.watcher.lock() = Some(watcher);
        self.tasks.lock().push(translator);

        tracing::info!(root = %root.display(), "watching notes");
        Ok(())
    }

    /// Parse every note under the root and emit the results as one batch,
    /// followed by the indexing-complete signal.
    pub async fn rescan(&self) -> CalResult<()> {
        let inner = &self.inner;
        inner.indexing.send_replace(false);

        let result = inner.scan().await;

        inner.indexing.send_replace(true);
        result
    }

    /// Swap the configuration. Changes to the root or field names trigger a
    /// full rescan (and re-watch when the root moved).
    pub async fn reconfigure(&self, config: NotecalConfig) -> CalResult<()> {
        let previous = self.inner.config();
        let rescan = previous.requires_rescan(&config);
        let root_moved = previous.root() != config.root();

        *self.inner.config.write() = Arc::new(config);

        if !rescan {
            return Ok(());
        }

        if root_moved && self.watcher.lock().is_some() {
            self.debouncer.cancel_all();
            self.watch_root(&self.inner.config().root())?;
        }

        // Everything known so far was read under the old settings
        let known: Vec<PathBuf> = self.inner.snapshots.lock().drain().map(|(path, _)| path).collect();
        for path in known {
            self.inner.emit(ChangeEvent::FileDeleted { path });
        }
        self.rescan().await
    }

    /// Stop watching and drop pending timers. Writes already in flight finish.
    pub fn stop(&self) {
        self.watcher.lock().take();
        self.debouncer.cancel_all();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl<S: NoteStore> Drop for ChangeFeed<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn process_settled<S: NoteStore>(
    inner: Arc<FeedInner<S>>,
    mut settled: mpsc::UnboundedReceiver<(PathBuf, RawChange)>,
) {
    while let Some((path, change)) = settled.recv().await {
        if !inner.is_tracked(&path) {
            // Moved out of sight, e.g. into a hidden trash folder
            if let RawChange::Upsert { old_path: Some(old) } = &change {
                if inner.is_tracked(old) {
                    for event in inner.removed(old) {
                        inner.emit(event);
                    }
                }
            }
            continue;
        }

        let events = match change {
            RawChange::Removed => inner.removed(&path),
            RawChange::Upsert { old_path } => {
                // Atomic writes rename a hidden temp file into place
                let old_path = old_path.filter(|old| inner.is_tracked(old));
                inner.parse_path(path, old_path).await
            }
        };

        for event in events {
            inner.emit(event);
        }
    }
}

impl<S: NoteStore> FeedInner<S> {
    fn config(&self) -> Arc<NotecalConfig> {
        Arc::clone(&self.config.read())
    }

    fn emit(&self, event: ChangeEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("change stream closed, dropping event");
        }
    }

    /// Whether a path is a note under the root, outside hidden directories.
    fn is_tracked(&self, path: &Path) -> bool {
        let root = self.config().root();
        let Ok(relative) = path.strip_prefix(&root) else {
            return false;
        };
        note::is_note_path(path)
            && !relative
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    }

    async fn scan(&self) -> CalResult<()> {
        let root = self.config().root();
        let paths = self.store.list_notes(&root).await?;

        let batches: Vec<Vec<ChangeEvent>> = futures::stream::iter(paths.iter().cloned())
            .map(|path| self.parse_path(path, None))
            .buffered(SCAN_CONCURRENCY)
            .collect()
            .await;

        // Notes that disappeared while nobody was watching
        let vanished: Vec<PathBuf> = {
            let snapshots = self.snapshots.lock();
            snapshots
                .keys()
                .filter(|known| !paths.contains(known))
                .cloned()
                .collect()
        };

        let mut emitted = 0;
        for event in batches.into_iter().flatten() {
            self.emit(event);
            emitted += 1;
        }
        for path in vanished {
            for event in self.removed(&path) {
                self.emit(event);
            }
        }

        tracing::info!(notes = paths.len(), events = emitted, "scan complete");
        Ok(())
    }

    fn removed(&self, path: &Path) -> Vec<ChangeEvent> {
        self.snapshots.lock().remove(path);
        vec![ChangeEvent::FileDeleted {
            path: path.to_path_buf(),
        }]
    }

    /// Read and parse one note, returning the events it produces.
    async fn parse_path(&self, path: PathBuf, old_path: Option<PathBuf>) -> Vec<ChangeEvent> {
        let note = match self.store.read_note(&path).await {
            Ok(Some(note)) => note,
            Ok(None) => {
                // Gone before it settled
                let known = self.snapshots.lock().contains_key(&path);
                let mut events = Vec::new();
                if let Some(old) = &old_path {
                    events.extend(self.removed(old));
                }
                if known {
                    events.extend(self.removed(&path));
                }
                return events;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable note");
                return Vec::new();
            }
        };

        let config = self.config();
        let props = &config.properties;

        let previous = {
            let mut snapshots = self.snapshots.lock();
            match &old_path {
                Some(old) => snapshots.remove(old).or_else(|| snapshots.get(&path).cloned()),
                None => snapshots.get(&path).cloned(),
            }
        };

        let mut note = note;
        let definition = match RecurrenceSchema::validate(&note.frontmatter, props) {
            Some(schema) => match self.ensure_recurrence_id(&mut note, &config).await {
                Some(id) => Some(schema.into_definition(id, &note, props)),
                None => None,
            },
            None => None,
        };

        let snapshot = Snapshot {
            frontmatter: note.frontmatter.clone(),
            body: note.body.clone(),
        };
        if old_path.is_none() && previous.as_ref() == Some(&snapshot) {
            return Vec::new();
        }
        self.snapshots.lock().insert(path.clone(), snapshot);

        let diff = FrontmatterDiff::between(previous.as_ref().map(|s| &s.frontmatter), &note.frontmatter);

        if definition.is_none() {
            self.mark_done_if_past(&note, &config);
        }

        let mut events = Vec::with_capacity(2);
        if let Some(definition) = definition {
            events.push(ChangeEvent::DefinitionFound {
                path: path.clone(),
                old_path: old_path.clone(),
                definition,
            });
        }
        events.push(ChangeEvent::FileChanged {
            path,
            old_path,
            frontmatter: note.frontmatter,
            diff,
        });
        events
    }

    /// Return the note's recurrence id, generating and persisting one when
    /// the note has none. `None` if the id could not be written.
    async fn ensure_recurrence_id(&self, note: &mut Note, config: &NotecalConfig) -> Option<String> {
        let field = &config.properties.rrule_id;
        if let Some(id) = note.frontmatter.get_str(field) {
            return Some(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let assigned = id.clone();
        let key = field.clone();

        match self
            .store
            .update_frontmatter(&note.path, move |fm| fm.set(&key, assigned))
            .await
        {
            Ok(()) => {
                tracing::info!(path = %note.path.display(), recurrence_id = %id, "assigned recurrence id");
                note.frontmatter.set(field, id.clone());
                Some(id)
            }
            Err(e) => {
                tracing::warn!(path = %note.path.display(), error = %e, "could not assign recurrence id");
                None
            }
        }
    }

    /// Best-effort: set the status field of an ended event in the background.
    /// Notes declaring a recurrence are never touched.
    fn mark_done_if_past(&self, note: &Note, config: &NotecalConfig) {
        if !config.mark_past_events_done {
            return;
        }

        let props = &config.properties;
        let fields = &note.frontmatter;
        if fields.contains(&props.rrule) {
            return;
        }
        if fields.get_str(&props.status).as_deref() == Some(config.done_value.as_str()) {
            return;
        }
        let Some(ended_at) = event_end(fields, config) else {
            return;
        };
        if ended_at >= Local::now().naive_local() {
            return;
        }

        let store = Arc::clone(&self.store);
        let path = note.path.clone();
        let status = props.status.clone();
        let done = config.done_value.clone();

        tokio::spawn(async move {
            if let Err(e) = store.update_frontmatter(&path, move |fm| fm.set(&status, done)).await {
                tracing::warn!(path = %path.display(), error = %e, "could not mark event done");
            }
        });
    }
}

/// When a plain event ends: its end, else its start, else the end of its all-day date.
fn event_end(fields: &Frontmatter, config: &NotecalConfig) -> Option<NaiveDateTime> {
    let props = &config.properties;

    if fields.get_bool(&props.all_day).unwrap_or(false) {
        let date = fields
            .get_str(&props.date)
            .or_else(|| fields.get_str(&props.start))
            .and_then(|raw| parse_date(&raw))?;
        return date.succ_opt().map(|next| next.and_time(chrono::NaiveTime::MIN));
    }

    fields
        .get_str(&props.end)
        .and_then(|raw| FieldDateTime::parse(&raw))
        .or_else(|| fields.get_str(&props.start).and_then(|raw| FieldDateTime::parse(&raw)))
        .map(|dt| dt.naive())
}
