//! Recurring event manager.
//!
//! Keeps one state record per recurrence id (the definition plus its
//! materialized instances by date), tops up the horizon of future instance
//! notes, and projects virtual occurrences for calendar queries.

mod instance;
mod state;

pub use instance::{instance_fields, instance_identity, instance_stem};
pub use state::{MaterializedInstance, VirtualInstance};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use crate::config::NotecalConfig;
use crate::constants::{MAX_ENSURE_STEPS, NOTE_EXTENSION};
use crate::error::{CalError, CalResult};
use crate::feed::{ChangeEvent, ChangeStream};
use crate::lock::KeyedMutex;
use crate::note::{self, Frontmatter};
use crate::notifier::ChangeNotifier;
use crate::recurrence::{
    RecurrenceDefinition, RecurrenceSchema, first_instance_date, iterate_occurrences_in_range, next_occurrence,
};
use crate::store::NoteStore;
use state::ManagerState;

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct RecurringEventManager<S: NoteStore> {
    store: Arc<S>,
    config: RwLock<Arc<NotecalConfig>>,
    state: RwLock<ManagerState>,
    locks: KeyedMutex<(String, NaiveDate)>,
    notifier: ChangeNotifier,
    today: Clock,
}

/// What happened when a definition event was applied.
enum Upsert {
    /// New id; `adopted` when parked instances were picked up
    Inserted { adopted: bool },
    Updated { previous: RecurrenceDefinition },
    /// The source already belongs to an earlier id
    Merged { into: String },
}

impl<S: NoteStore> RecurringEventManager<S> {
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<S>, config: NotecalConfig) -> Self {
        RecurringEventManager {
            store,
            config: RwLock::new(Arc::new(config)),
            state: RwLock::new(ManagerState::default()),
            locks: KeyedMutex::new(),
            notifier: ChangeNotifier::new(),
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the clock used to decide which instances are in the future.
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    pub fn set_config(&self, config: NotecalConfig) {
        *self.config.write() = Arc::new(config);
    }

    fn config(&self) -> Arc<NotecalConfig> {
        Arc::clone(&self.config.read())
    }

    fn today(&self) -> NaiveDate {
        (self.today)()
    }

    // Event handlers

    /// Apply one change event. Returns the id whose horizon should be topped up.
    pub async fn handle_event(&self, event: ChangeEvent) -> Option<String> {
        match event {
            ChangeEvent::DefinitionFound {
                old_path, definition, ..
            } => Some(self.on_definition_found(definition, old_path).await),
            ChangeEvent::FileChanged {
                path,
                old_path,
                frontmatter,
                ..
            } => self.on_file_changed(path, old_path, &frontmatter),
            ChangeEvent::FileDeleted { path } => self.on_deleted(&path),
        }
    }

    /// Upsert a definition. A definition claiming a source already owned by
    /// another id is merged into that earlier id. Returns the effective id.
    pub async fn on_definition_found(&self, definition: RecurrenceDefinition, old_path: Option<PathBuf>) -> String {
        let id = definition.id.clone();
        let source = definition.source.clone();

        // The id is known under another note that was not reported as renamed
        let claimed_elsewhere = {
            let state = self.state.read();
            state
                .recurring
                .get(&id)
                .map(|s| s.definition.source.clone())
                .filter(|previous| *previous != source && old_path.as_deref() != Some(previous.as_path()))
        };
        let mut moved = false;
        if let Some(previous) = claimed_elsewhere {
            match self.store.exists(&previous).await {
                Ok(true) => return self.fork_definition(definition).await,
                // Move reported as separate events
                Ok(false) => moved = true,
                Err(e) => {
                    tracing::warn!(recurrence_id = %id, path = %previous.display(), error = %e, "could not check previous source");
                }
            }
        }

        let outcome = {
            let mut state = self.state.write();
            let owner = state
                .recurring
                .iter()
                .find(|(other, s)| **other != id && s.definition.source == source)
                .map(|(other, _)| other.clone());

            if let Some(owner) = owner {
                let merged = RecurrenceDefinition {
                    id: owner.clone(),
                    ..definition
                };
                if let Some(existing) = state.recurring.get_mut(&owner) {
                    existing.definition = merged;
                }
                Upsert::Merged { into: owner }
            } else if let Some(existing) = state.recurring.get_mut(&id) {
                let previous = std::mem::replace(&mut existing.definition, definition);
                Upsert::Updated { previous }
            } else {
                let adopted = state.insert_definition(definition);
                Upsert::Inserted { adopted }
            }
        };

        match outcome {
            Upsert::Inserted { adopted } => {
                tracing::debug!(recurrence_id = %id, path = %source.display(), adopted, "definition registered");
                // Instances parked under an earlier name, e.g. a rename seen as delete + create
                if adopted {
                    self.propagate_rename(&id, None).await;
                }
                self.notifier.notify();
                id
            }
            Upsert::Updated { previous } => {
                let renamed = (moved || old_path.as_deref() == Some(previous.source.as_path()))
                    && previous.title != note::stem_of(&source);
                if renamed {
                    self.propagate_rename(&id, Some(&previous.title)).await;
                }
                self.notifier.notify();
                id
            }
            Upsert::Merged { into } => {
                tracing::debug!(
                    recurrence_id = %id,
                    merged_into = %into,
                    path = %source.display(),
                    "merged duplicate definition"
                );
                let field = self.config().properties.rrule_id.clone();
                let winner = into.clone();
                if let Err(e) = self
                    .store
                    .update_frontmatter(&source, move |fm| fm.set(&field, winner))
                    .await
                {
                    tracing::warn!(recurrence_id = %into, path = %source.display(), error = %e, "could not rewrite merged id");
                }
                into
            }
        }
    }

    /// Give a copied definition note its own id. The copy keeps the original's
    /// rule but none of its instances.
    async fn fork_definition(&self, definition: RecurrenceDefinition) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let field = self.config().properties.rrule_id.clone();
        let assigned = id.clone();

        if let Err(e) = self
            .store
            .update_frontmatter(&definition.source, move |fm| fm.set(&field, assigned))
            .await
        {
            tracing::warn!(
                recurrence_id = %definition.id,
                path = %definition.source.display(),
                error = %e,
                "could not give copied definition a new id"
            );
            return definition.id;
        }

        tracing::info!(
            recurrence_id = %id,
            copied_from = %definition.id,
            path = %definition.source.display(),
            "copied definition registered under a new id"
        );
        self.state.write().insert_definition(RecurrenceDefinition {
            id: id.clone(),
            ..definition
        });
        self.notifier.notify();
        id
    }

    /// Record an instance note, matched by occurrence date.
    pub fn on_instance_observed(&self, path: PathBuf, recurrence_id: String, date: NaiveDate) {
        let added = self.state.write().upsert_instance(MaterializedInstance {
            recurrence_id,
            date,
            path,
        });
        if added {
            self.notifier.notify();
        }
    }

    /// Forget whatever lived at `path`. Returns the id that lost an instance.
    pub fn on_deleted(&self, path: &Path) -> Option<String> {
        let mut state = self.state.write();

        if let Some(id) = state.id_for_source(path).map(str::to_string) {
            state.remove_definition(&id);
            drop(state);
            tracing::info!(recurrence_id = %id, path = %path.display(), "definition removed");
            self.notifier.notify();
            return None;
        }

        let lost = state.remove_instance_at(path);
        drop(state);
        if let Some(id) = &lost {
            tracing::debug!(recurrence_id = %id, path = %path.display(), "instance removed");
            self.notifier.notify();
        }
        lost
    }

    fn on_file_changed(&self, path: PathBuf, old_path: Option<PathBuf>, fields: &Frontmatter) -> Option<String> {
        let config = self.config();
        let props = &config.properties;

        // A definition note that no longer validates is withdrawn
        let was_source = self.state.read().id_for_source(&path).is_some();
        if was_source && RecurrenceSchema::validate(fields, props).is_none() {
            self.on_deleted(&path);
            return None;
        }

        match instance::instance_identity(fields, props) {
            Some((id, date)) => {
                if let Some(old) = &old_path {
                    self.state.write().remove_instance_at(old);
                }
                self.on_instance_observed(path, id, date);
                None
            }
            None => {
                // Instance fields stripped from a known instance
                let lost = self.state.write().remove_instance_at(&path);
                let lost_old = old_path.and_then(|old| self.state.write().remove_instance_at(&old));
                lost.or(lost_old)
            }
        }
    }

    // Materialization

    /// Top up the future instances of `id` to its target count.
    ///
    /// Failures are logged and abort only this id's pass. Returns the number of
    /// instance notes created.
    pub async fn ensure_materialized_instances(&self, id: &str) -> usize {
        match self.try_ensure(id).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(recurrence_id = %id, error = %e, "failed to materialize instances");
                0
            }
        }
    }

    /// Ensure instances for every known id. Ids are processed concurrently.
    pub async fn ensure_all(&self) -> usize {
        let ids = self.definition_ids();
        futures::future::join_all(ids.iter().map(|id| self.ensure_materialized_instances(id)))
            .await
            .into_iter()
            .sum()
    }

    async fn try_ensure(&self, id: &str) -> CalResult<usize> {
        let today = self.today();
        let (definition, future) = {
            let state = self.state.read();
            let Some(recurring) = state.recurring.get(id) else {
                return Ok(0);
            };
            (recurring.definition.clone(), recurring.future_dates(today))
        };

        if definition.disabled {
            tracing::debug!(recurrence_id = %id, "definition disabled, skipping");
            return Ok(0);
        }

        let target = definition.target_instance_count(self.config().future_instances_count);
        if future.len() >= target {
            return Ok(0);
        }

        let start = match future.last() {
            Some(latest) => next_occurrence(*latest, definition.rule, &definition.weekdays),
            None => first_instance_date(&definition)
                .and_then(|first| iterate_occurrences_in_range(first, &definition, today, NaiveDate::MAX).next()),
        };
        let Some(start) = start else {
            return Ok(0);
        };

        let mut present = future.len();
        let mut created = 0;
        let mut steps = 0;
        for date in iterate_occurrences_in_range(start, &definition, start, NaiveDate::MAX).take(MAX_ENSURE_STEPS) {
            if present >= target {
                break;
            }
            steps += 1;
            if self.materialize_instance(&definition, date).await? {
                created += 1;
            }
            present += 1;
        }

        if present < target && steps == MAX_ENSURE_STEPS {
            tracing::debug!(recurrence_id = %id, target, present, "ensure pass stopped at the step limit");
        }

        if created > 0 {
            tracing::info!(recurrence_id = %id, created, "materialized instances");
        }
        Ok(created)
    }

    /// Create the instance note of `definition` on `date` unless it exists.
    ///
    /// Concurrent calls for the same (id, date) queue on one lock; the first
    /// creates the note and the rest find it. Returns `true` if a note was written.
    pub async fn materialize_instance(&self, definition: &RecurrenceDefinition, date: NaiveDate) -> CalResult<bool> {
        let id = definition.id.as_str();
        let _guard = self.locks.lock((id.to_string(), date)).await;

        if self.state.read().has_instance(id, date) {
            return Ok(false);
        }

        let directory = definition.source.parent().unwrap_or_else(|| Path::new(""));
        let stem = instance_stem(&definition.title, date);
        let filename = format!("{}.{}", stem, NOTE_EXTENSION);
        let path = directory.join(&filename);

        if self.store.exists(&path).await? {
            tracing::debug!(recurrence_id = %id, %date, path = %path.display(), "instance note already present");
            self.record_instance(id, date, path);
            return Ok(false);
        }

        let config = self.config();
        let fields = instance_fields(definition, date, &config.properties);
        let body = (!definition.body.is_empty()).then_some(definition.body.as_str());

        match self.store.create_note(&stem, directory, &filename, body, &fields).await {
            Ok(created) => {
                tracing::info!(recurrence_id = %id, %date, path = %created.display(), "created instance");
                self.record_instance(id, date, created);
                Ok(true)
            }
            Err(CalError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {
                self.record_instance(id, date, path);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn record_instance(&self, id: &str, date: NaiveDate, path: PathBuf) {
        self.on_instance_observed(path, id.to_string(), date);
    }

    /// Bring the instances of `id` in line with its definition's current name.
    ///
    /// Instance notes named after `old_title` are renamed; when the old name is
    /// unknown, any instance named after another title is. Source links that
    /// do not point at the definition are rewritten.
    async fn propagate_rename(&self, id: &str, old_title: Option<&str>) {
        let (new_title, instances) = {
            let state = self.state.read();
            let Some(recurring) = state.recurring.get(id) else {
                return;
            };
            let instances: Vec<MaterializedInstance> = recurring.instances.values().cloned().collect();
            (recurring.definition.title.clone(), instances)
        };

        let props = self.config().properties.clone();
        let link = note::wikilink(&new_title);
        let mut renamed = 0;
        let mut relinked = 0;

        for instance in instances {
            let mut path = instance.path.clone();
            let stem = note::stem_of(&path);
            let wanted = instance_stem(&new_title, instance.date);

            let stale_name = stem != wanted
                && match old_title {
                    Some(old) => stem == instance_stem(old, instance.date),
                    None => stem.ends_with(&format!(" {}", instance.date)),
                };
            if stale_name {
                match self.store.rename_note(&path, &wanted).await {
                    Ok(moved) => {
                        self.record_instance(id, instance.date, moved.clone());
                        path = moved;
                        renamed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(recurrence_id = %id, path = %path.display(), error = %e, "could not rename instance");
                    }
                }
            }

            let current = match self.store.read_note(&path).await {
                Ok(Some(note)) => note.frontmatter.get_str(&props.source),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(recurrence_id = %id, path = %path.display(), error = %e, "could not read instance");
                    continue;
                }
            };
            if current.as_deref() == Some(link.as_str()) {
                continue;
            }

            let field = props.source.clone();
            let link = link.clone();
            match self.store.update_frontmatter(&path, move |fm| fm.set(&field, link)).await {
                Ok(()) => relinked += 1,
                Err(e) => {
                    tracing::warn!(recurrence_id = %id, path = %path.display(), error = %e, "could not update source link");
                }
            }
        }

        if renamed + relinked > 0 {
            tracing::info!(recurrence_id = %id, to = %new_title, renamed, relinked, "realigned instances");
        }
    }

    // Queries

    /// Occurrences in `[range_start, range_end]` beyond each definition's
    /// latest materialized instance. Disabled definitions produce nothing.
    pub fn generate_virtual_instances(&self, range_start: NaiveDate, range_end: NaiveDate) -> Vec<VirtualInstance> {
        let state = self.state.read();
        let mut projected = Vec::new();

        for (id, recurring) in &state.recurring {
            let definition = &recurring.definition;
            if definition.disabled {
                continue;
            }

            let first = match recurring.latest_instance() {
                Some(latest) => next_occurrence(latest, definition.rule, &definition.weekdays),
                None => first_instance_date(definition),
            };
            let Some(first) = first else {
                continue;
            };

            for date in iterate_occurrences_in_range(first, definition, range_start, range_end) {
                let (start, end) = definition.anchor.times_on(date);
                projected.push(VirtualInstance {
                    recurrence_id: id.clone(),
                    date,
                    title: definition.title.clone(),
                    source: definition.source.clone(),
                    all_day: definition.anchor.is_all_day(),
                    start: start.map(|s| s.to_string()),
                    end: end.map(|e| e.to_string()),
                });
            }
        }

        projected.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.recurrence_id.cmp(&b.recurrence_id)));
        projected
    }

    pub fn instances_for(&self, id: &str) -> Vec<MaterializedInstance> {
        self.state
            .read()
            .recurring
            .get(id)
            .map(|state| state.instances.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn definition_source(&self, id: &str) -> Option<PathBuf> {
        self.state
            .read()
            .recurring
            .get(id)
            .map(|state| state.definition.source.clone())
    }

    pub fn definition(&self, id: &str) -> Option<RecurrenceDefinition> {
        self.state.read().recurring.get(id).map(|state| state.definition.clone())
    }

    pub fn definition_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().recurring.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn disabled_definitions(&self) -> Vec<RecurrenceDefinition> {
        let mut disabled: Vec<RecurrenceDefinition> = self
            .state
            .read()
            .recurring
            .values()
            .filter(|state| state.definition.disabled)
            .map(|state| state.definition.clone())
            .collect();
        disabled.sort_by(|a, b| a.id.cmp(&b.id));
        disabled
    }

    /// Refresh notifications for UI consumers.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notifier.subscribe()
    }

    /// Refresh subscribers now instead of after the debounce window.
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    // Driving

    /// Apply every event already queued on `events` without waiting for more.
    pub async fn drain(&self, events: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Vec<String> {
        let mut touched = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Some(id) = self.handle_event(event).await {
                if !touched.contains(&id) {
                    touched.push(id);
                }
            }
        }
        touched
    }

    /// Consume a change stream until it closes.
    ///
    /// Events arriving outside a scan trigger an ensure pass for the affected
    /// id. When a scan completes, every id is ensured and subscribers are
    /// refreshed immediately.
    pub async fn run(self: Arc<Self>, mut stream: ChangeStream) {
        stream.indexing_complete.borrow_and_update();

        loop {
            tokio::select! {
                event = stream.events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let indexed = *stream.indexing_complete.borrow();
                    if let Some(id) = self.handle_event(event).await {
                        if indexed {
                            self.spawn_ensure(vec![id]);
                        }
                    }
                }
                changed = stream.indexing_complete.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *stream.indexing_complete.borrow_and_update() {
                        self.drain(&mut stream.events).await;
                        self.flush_notifications();
                        self.spawn_ensure(self.definition_ids());
                    }
                }
            }
        }

        tracing::debug!("change stream closed");
    }

    /// Ensure passes run detached so that stopping the engine never aborts a
    /// write halfway.
    fn spawn_ensure(self: &Arc<Self>, ids: Vec<String>) {
        for id in ids {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.ensure_materialized_instances(&id).await;
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Note;
    use crate::recurrence::parse_definition;
    use crate::store::FsNoteStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config_for(root: &Path) -> NotecalConfig {
        NotecalConfig {
            directory: root.to_path_buf(),
            ..NotecalConfig::default()
        }
    }

    fn manager_at<S: NoteStore>(store: S, root: &Path, today: NaiveDate) -> RecurringEventManager<S> {
        RecurringEventManager::new(Arc::new(store), config_for(root)).with_today(move || today)
    }

    fn write_definition(root: &Path, name: &str, yaml: &str) -> RecurrenceDefinition {
        let path = root.join(format!("{name}.md"));
        let content = format!("---\n{yaml}---\nNotes\n");
        std::fs::write(&path, &content).unwrap();
        let note = Note::parse(path, &content).unwrap();
        parse_definition(&note, &Default::default()).unwrap()
    }

    fn note_count(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    fn dates(instances: &[MaterializedInstance]) -> Vec<NaiveDate> {
        instances.iter().map(|i| i.date).collect()
    }

    const STANDUP: &str = "RRule: weekly\nRRuleSpec: Monday, Wednesday, Friday\nRRuleID: standup\n\
                           Start Date: 2025-01-06T09:00\nEnd Date: 2025-01-06T09:30\n";

    #[tokio::test]
    async fn weekly_weekdays_materialize_target_count() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);

        manager.on_definition_found(def, None).await;
        assert_eq!(manager.ensure_materialized_instances("standup").await, 6);

        assert_eq!(
            dates(&manager.instances_for("standup")),
            vec![
                date(2025, 1, 8),
                date(2025, 1, 10),
                date(2025, 1, 13),
                date(2025, 1, 15),
                date(2025, 1, 17),
                date(2025, 1, 20),
            ]
        );

        let instance = std::fs::read_to_string(dir.path().join("Standup 2025-01-13.md")).unwrap();
        assert!(instance.contains("Start Date: 2025-01-13T09:00"));
        assert!(instance.contains("End Date: 2025-01-13T09:30"));
        assert!(instance.contains("[[Standup]]"));
        assert!(!instance.contains("RRule:"));
        assert!(instance.ends_with("Notes\n"));
    }

    #[tokio::test]
    async fn second_ensure_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;

        manager.ensure_materialized_instances("standup").await;
        let files = note_count(dir.path());

        assert_eq!(manager.ensure_materialized_instances("standup").await, 0);
        assert_eq!(note_count(dir.path()), files);
        assert_eq!(files, 7);
    }

    #[tokio::test]
    async fn parallel_materialization_creates_one_note() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6)));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def.clone(), None).await;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let def = def.clone();
                tokio::spawn(async move { manager.materialize_instance(&def, date(2025, 1, 8)).await })
            })
            .collect();

        let mut written = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                written += 1;
            }
        }

        assert_eq!(written, 1);
        assert_eq!(note_count(dir.path()), 2);
        assert_eq!(manager.instances_for("standup").len(), 1);
    }

    #[tokio::test]
    async fn existing_note_at_instance_path_is_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def.clone(), None).await;
        std::fs::write(dir.path().join("Standup 2025-01-08.md"), "edited by hand\n").unwrap();

        assert!(!manager.materialize_instance(&def, date(2025, 1, 8)).await.unwrap());
        assert_eq!(dates(&manager.instances_for("standup")), vec![date(2025, 1, 8)]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Standup 2025-01-08.md")).unwrap(),
            "edited by hand\n"
        );
    }

    #[tokio::test]
    async fn virtual_instances_continue_after_materialized() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let daily = write_definition(
            dir.path(),
            "Walk",
            "RRule: daily\nRRuleID: walk\nAll Day: true\nDate: 2025-01-06\n",
        );
        let skipped = write_definition(
            dir.path(),
            "Gym",
            "RRule: daily\nRRuleID: gym\nSkip: true\nStart Date: 2025-01-06T18:00\n",
        );
        manager.on_definition_found(daily, None).await;
        manager.on_definition_found(skipped, None).await;

        assert_eq!(manager.ensure_all().await, 2);

        let projected = manager.generate_virtual_instances(date(2025, 1, 1), date(2025, 1, 12));
        assert_eq!(
            projected.iter().map(|v| v.date).collect::<Vec<_>>(),
            vec![date(2025, 1, 9), date(2025, 1, 10), date(2025, 1, 11), date(2025, 1, 12)]
        );
        assert!(projected.iter().all(|v| v.recurrence_id == "walk" && v.all_day));

        let materialized = dates(&manager.instances_for("walk"));
        assert!(projected.iter().all(|v| !materialized.contains(&v.date)));
        assert_eq!(manager.disabled_definitions().len(), 1);
        assert!(manager.instances_for("gym").is_empty());
    }

    #[tokio::test]
    async fn deleting_one_instance_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("standup").await;

        let deleted = dir.path().join("Standup 2025-01-10.md");
        std::fs::remove_file(&deleted).unwrap();

        assert_eq!(manager.on_deleted(&deleted).as_deref(), Some("standup"));
        assert_eq!(manager.instances_for("standup").len(), 5);
        assert!(!manager.instances_for("standup").iter().any(|i| i.date == date(2025, 1, 10)));
        assert_eq!(
            manager.definition_source("standup"),
            Some(dir.path().join("Standup.md"))
        );
    }

    #[tokio::test]
    async fn deleting_the_definition_drops_its_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("standup").await;

        assert_eq!(manager.on_deleted(&dir.path().join("Standup.md")), None);
        assert!(manager.definition_ids().is_empty());
        assert!(manager.instances_for("standup").is_empty());
        assert_eq!(manager.definition_source("standup"), None);
    }

    #[tokio::test]
    async fn monthly_end_of_month_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 31));
        let def = write_definition(
            dir.path(),
            "Rent",
            "RRule: monthly\nRRuleID: rent\nAll Day: true\nDate: 2025-01-31\n",
        );
        manager.on_definition_found(def, None).await;

        manager.ensure_materialized_instances("rent").await;

        assert_eq!(
            dates(&manager.instances_for("rent")),
            vec![date(2025, 2, 28), date(2025, 3, 28)]
        );
    }

    #[tokio::test]
    async fn stale_anchor_starts_from_today() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 3, 12));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;

        manager.ensure_materialized_instances("standup").await;

        let created = dates(&manager.instances_for("standup"));
        assert_eq!(created.first(), Some(&date(2025, 3, 12)));
        assert_eq!(created.len(), 6);
    }

    #[tokio::test]
    async fn early_instances_count_toward_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let existing = dir.path().join("Standup 2025-01-08.md");
        std::fs::write(&existing, "---\nRRuleID: standup\n---\n").unwrap();

        manager.on_instance_observed(existing.clone(), "standup".into(), date(2025, 1, 8));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;

        assert_eq!(manager.ensure_materialized_instances("standup").await, 5);
        assert_eq!(manager.instances_for("standup")[0].path, existing);
    }

    #[tokio::test]
    async fn duplicate_definition_merges_into_earlier_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let first = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(first, None).await;

        let second = write_definition(dir.path(), "Standup", &STANDUP.replace("RRuleID: standup", "RRuleID: other"));
        let effective = manager.on_definition_found(second, None).await;

        assert_eq!(effective, "standup");
        assert_eq!(manager.definition_ids(), vec!["standup".to_string()]);
        let on_disk = std::fs::read_to_string(dir.path().join("Standup.md")).unwrap();
        assert!(on_disk.contains("RRuleID: standup"));
    }

    #[tokio::test]
    async fn rename_propagates_to_instances() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let yaml = "RRule: daily\nRRuleID: walk\nStart Date: 2025-01-06T07:00\n";
        let def = write_definition(dir.path(), "Walk", yaml);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("walk").await;

        let old = dir.path().join("Walk.md");
        std::fs::remove_file(&old).unwrap();
        let renamed = write_definition(dir.path(), "Morning Walk", yaml);
        manager.on_definition_found(renamed, Some(old)).await;

        let instances = manager.instances_for("walk");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].path, dir.path().join("Morning Walk 2025-01-07.md"));
        assert!(!dir.path().join("Walk 2025-01-07.md").exists());

        let content = std::fs::read_to_string(&instances[1].path).unwrap();
        assert!(content.contains("[[Morning Walk]]"));
    }

    #[tokio::test]
    async fn rename_seen_as_delete_and_create_realigns_instances() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let yaml = "RRule: daily\nRRuleID: walk\nStart Date: 2025-01-06T07:00\n";
        let def = write_definition(dir.path(), "Walk", yaml);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("walk").await;

        let old = dir.path().join("Walk.md");
        std::fs::remove_file(&old).unwrap();
        manager.on_deleted(&old);
        assert!(manager.definition_ids().is_empty());

        let renamed = write_definition(dir.path(), "Morning Walk", yaml);
        manager.on_definition_found(renamed, None).await;

        let instances = manager.instances_for("walk");
        assert_eq!(
            instances.iter().map(|i| i.path.clone()).collect::<Vec<_>>(),
            vec![
                dir.path().join("Morning Walk 2025-01-07.md"),
                dir.path().join("Morning Walk 2025-01-08.md"),
            ]
        );
        assert!(!dir.path().join("Walk 2025-01-07.md").exists());
        for instance in &instances {
            let content = std::fs::read_to_string(&instance.path).unwrap();
            assert!(content.contains("[[Morning Walk]]"));
            assert!(!content.contains("[[Walk]]"));
        }
        assert_eq!(manager.ensure_materialized_instances("walk").await, 0);
    }

    #[tokio::test]
    async fn create_before_delete_is_treated_as_a_move() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let yaml = "RRule: daily\nRRuleID: walk\nStart Date: 2025-01-06T07:00\n";
        let def = write_definition(dir.path(), "Walk", yaml);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("walk").await;

        let old = dir.path().join("Walk.md");
        std::fs::remove_file(&old).unwrap();
        let renamed = write_definition(dir.path(), "Morning Walk", yaml);
        assert_eq!(manager.on_definition_found(renamed, None).await, "walk");
        assert_eq!(manager.on_deleted(&old), None);

        assert_eq!(manager.definition_source("walk"), Some(dir.path().join("Morning Walk.md")));
        assert!(dir.path().join("Morning Walk 2025-01-08.md").exists());
        assert!(!dir.path().join("Walk 2025-01-08.md").exists());
    }

    #[tokio::test]
    async fn copied_definition_gets_its_own_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("standup").await;

        let copy = write_definition(dir.path(), "Standup copy", STANDUP);
        let id = manager.on_definition_found(copy, None).await;

        assert_ne!(id, "standup");
        assert_eq!(manager.definition_ids().len(), 2);
        assert_eq!(manager.definition_source("standup"), Some(dir.path().join("Standup.md")));
        assert_eq!(manager.definition_source(&id), Some(dir.path().join("Standup copy.md")));
        assert_eq!(manager.instances_for("standup").len(), 6);
        assert!(manager.instances_for(&id).is_empty());

        let on_disk = std::fs::read_to_string(dir.path().join("Standup copy.md")).unwrap();
        assert!(on_disk.contains(&format!("RRuleID: {id}")));
        assert!(std::fs::read_to_string(dir.path().join("Standup.md")).unwrap().contains("RRuleID: standup"));
    }

    #[tokio::test]
    async fn weekly_virtual_instances_continue_the_weekday_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;
        manager.ensure_materialized_instances("standup").await;

        let projected = manager.generate_virtual_instances(date(2025, 1, 6), date(2025, 1, 31));
        assert_eq!(
            projected.iter().map(|v| v.date).collect::<Vec<_>>(),
            vec![
                date(2025, 1, 22),
                date(2025, 1, 24),
                date(2025, 1, 27),
                date(2025, 1, 29),
                date(2025, 1, 31),
            ]
        );
        assert_eq!(projected[0].start.as_deref(), Some("2025-01-22T09:00"));
    }

    #[tokio::test]
    async fn large_horizon_is_filled_over_several_passes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(
            dir.path(),
            "Water",
            "RRule: daily\nRRuleID: water\nAll Day: true\nDate: 2025-01-06\nFuture Instances Count: 1200\n",
        );
        manager.on_definition_found(def, None).await;

        assert_eq!(manager.ensure_materialized_instances("water").await, MAX_ENSURE_STEPS);
        assert_eq!(manager.ensure_materialized_instances("water").await, 1200 - MAX_ENSURE_STEPS);
        assert_eq!(manager.ensure_materialized_instances("water").await, 0);
    }

    #[tokio::test]
    async fn withdrawn_definition_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(FsNoteStore::new(), dir.path(), date(2025, 1, 6));
        let def = write_definition(dir.path(), "Standup", STANDUP);
        manager.on_definition_found(def, None).await;

        let fields = crate::note::frontmatter::parse("Start Date: 2025-01-06T09:00\nRRuleID: standup\n").unwrap();
        let event = ChangeEvent::FileChanged {
            path: dir.path().join("Standup.md"),
            old_path: None,
            frontmatter: fields,
            diff: Default::default(),
        };
        manager.handle_event(event).await;

        assert!(manager.definition_ids().is_empty());
    }

    struct FailingStore {
        inner: FsNoteStore,
    }

    impl NoteStore for FailingStore {
        async fn read_note(&self, path: &Path) -> CalResult<Option<Note>> {
            self.inner.read_note(path).await
        }

        async fn exists(&self, path: &Path) -> CalResult<bool> {
            self.inner.exists(path).await
        }

        async fn create_note(
            &self,
            title: &str,
            directory: &Path,
            filename: &str,
            body: Option<&str>,
            frontmatter: &Frontmatter,
        ) -> CalResult<PathBuf> {
            if title.starts_with("Broken") {
                return Err(CalError::StorageWrite {
                    path: directory.join(filename),
                    message: "disk full".into(),
                });
            }
            self.inner.create_note(title, directory, filename, body, frontmatter).await
        }

        async fn update_frontmatter<F>(&self, path: &Path, mutate: F) -> CalResult<()>
        where
            F: FnOnce(&mut Frontmatter) + Send,
        {
            self.inner.update_frontmatter(path, mutate).await
        }

        async fn rename_note(&self, path: &Path, new_stem: &str) -> CalResult<PathBuf> {
            self.inner.rename_note(path, new_stem).await
        }

        async fn list_notes(&self, root: &Path) -> CalResult<Vec<PathBuf>> {
            self.inner.list_notes(root).await
        }
    }

    #[tokio::test]
    async fn storage_failure_is_isolated_to_one_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FailingStore {
            inner: FsNoteStore::new(),
        };
        let manager = manager_at(store, dir.path(), date(2025, 1, 6));
        let broken = write_definition(dir.path(), "Broken", "RRule: daily\nRRuleID: broken\nStart Date: 2025-01-06T08:00\n");
        let fine = write_definition(dir.path(), "Fine", "RRule: daily\nRRuleID: fine\nStart Date: 2025-01-06T08:00\n");
        manager.on_definition_found(broken, None).await;
        manager.on_definition_found(fine, None).await;

        assert_eq!(manager.ensure_all().await, 2);
        assert!(manager.instances_for("broken").is_empty());
        assert_eq!(manager.instances_for("fine").len(), 2);

        // The failed id keeps trying on later triggers
        assert_eq!(manager.ensure_materialized_instances("broken").await, 0);
        assert_eq!(manager.definition_ids().len(), 2);
    }
}
