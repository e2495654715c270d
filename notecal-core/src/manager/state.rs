//! In-memory bookkeeping for recurring definitions and their instances.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::recurrence::RecurrenceDefinition;

/// A persisted occurrence of a recurrence definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedInstance {
    pub recurrence_id: String,
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// A computed occurrence beyond the materialized horizon. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualInstance {
    pub recurrence_id: String,
    pub date: NaiveDate,
    pub title: String,
    pub source: PathBuf,
    pub all_day: bool,
    pub start: Option<String>,
    pub end: Option<String>,
}

type InstancesByDate = BTreeMap<NaiveDate, MaterializedInstance>;

/// One definition and its materialized instances, keyed by occurrence date.
#[derive(Debug, Clone)]
pub struct RecurringState {
    pub definition: RecurrenceDefinition,
    pub instances: InstancesByDate,
}

impl RecurringState {
    pub fn new(definition: RecurrenceDefinition) -> Self {
        RecurringState {
            definition,
            instances: BTreeMap::new(),
        }
    }

    pub fn latest_instance(&self) -> Option<NaiveDate> {
        self.instances.keys().next_back().copied()
    }

    /// Instance dates on or after `today`, ascending.
    pub fn future_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        self.instances.range(today..).map(|(date, _)| *date).collect()
    }
}

/// The manager's single shared map, plus instances seen without a live definition.
#[derive(Debug, Default)]
pub struct ManagerState {
    pub recurring: HashMap<String, RecurringState>,
    /// Instances whose definition is not (or no longer) known, by recurrence id
    pub pending: HashMap<String, InstancesByDate>,
}

impl ManagerState {
    pub fn id_for_source(&self, source: &Path) -> Option<&str> {
        self.recurring
            .iter()
            .find(|(_, state)| state.definition.source == source)
            .map(|(id, _)| id.as_str())
    }

    pub fn has_instance(&self, id: &str, date: NaiveDate) -> bool {
        self.recurring
            .get(id)
            .is_some_and(|state| state.instances.contains_key(&date))
    }

    /// Register a definition that has no state yet, adopting pending instances.
    /// Returns `true` when pending instances were adopted.
    pub fn insert_definition(&mut self, definition: RecurrenceDefinition) -> bool {
        let id = definition.id.clone();
        let mut state = RecurringState::new(definition);
        let adopted = match self.pending.remove(&id) {
            Some(pending) => {
                state.instances = pending;
                true
            }
            None => false,
        };
        self.recurring.insert(id, state);
        adopted
    }

    /// Drop the definition's live state. Its instance entries are parked as
    /// pending so a reappearing definition picks them up again.
    pub fn remove_definition(&mut self, id: &str) -> Option<RecurrenceDefinition> {
        let state = self.recurring.remove(id)?;
        if !state.instances.is_empty() {
            self.pending
                .entry(id.to_string())
                .or_default()
                .extend(state.instances);
        }
        Some(state.definition)
    }

    /// Record an instance by occurrence date. A path previously recorded for a
    /// different (id, date) is forgotten first. Returns `true` when the date
    /// was not known before.
    pub fn upsert_instance(&mut self, instance: MaterializedInstance) -> bool {
        if let Some((id, date)) = self.instance_at(&instance.path) {
            if id != instance.recurrence_id || date != instance.date {
                self.remove_instance_at(&instance.path);
            }
        }

        let instances = match self.recurring.get_mut(&instance.recurrence_id) {
            Some(state) => &mut state.instances,
            None => self.pending.entry(instance.recurrence_id.clone()).or_default(),
        };
        instances.insert(instance.date, instance).is_none()
    }

    /// The (id, date) of the instance stored at `path`, live or pending.
    pub fn instance_at(&self, path: &Path) -> Option<(String, NaiveDate)> {
        let live = self.recurring.iter().map(|(id, s)| (id, &s.instances));
        let pending = self.pending.iter();
        live.chain(pending).find_map(|(id, instances)| {
            instances
                .values()
                .find(|instance| instance.path == path)
                .map(|instance| (id.clone(), instance.date))
        })
    }

    /// Remove the instance stored at `path`. Returns its recurrence id when it
    /// belonged to a live definition.
    pub fn remove_instance_at(&mut self, path: &Path) -> Option<String> {
        for (id, state) in self.recurring.iter_mut() {
            let before = state.instances.len();
            state.instances.retain(|_, instance| instance.path != path);
            if state.instances.len() != before {
                return Some(id.clone());
            }
        }

        self.pending.retain(|_, instances| {
            instances.retain(|_, instance| instance.path != path);
            !instances.is_empty()
        });
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Frontmatter;
    use crate::recurrence::{Anchor, RecurrenceType};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn definition(id: &str) -> RecurrenceDefinition {
        RecurrenceDefinition {
            id: id.to_string(),
            rule: RecurrenceType::Daily,
            weekdays: Vec::new(),
            anchor: Anchor::AllDay(date(1)),
            source: PathBuf::from(format!("/v/{id}.md")),
            title: id.to_string(),
            fields: Frontmatter::new(),
            body: String::new(),
            disabled: false,
            future_instances: None,
        }
    }

    fn instance(id: &str, d: u32, path: &str) -> MaterializedInstance {
        MaterializedInstance {
            recurrence_id: id.to_string(),
            date: date(d),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn instances_are_keyed_by_date_not_path() {
        let mut state = ManagerState::default();
        state.insert_definition(definition("gym"));

        assert!(state.upsert_instance(instance("gym", 2, "/v/gym 2025-01-02.md")));
        // Renamed file for the same date replaces the entry
        assert!(!state.upsert_instance(instance("gym", 2, "/v/Gym 2025-01-02.md")));

        let instances = &state.recurring["gym"].instances;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[&date(2)].path, PathBuf::from("/v/Gym 2025-01-02.md"));
    }

    #[test]
    fn early_instances_wait_for_their_definition() {
        let mut state = ManagerState::default();
        state.upsert_instance(instance("gym", 3, "/v/gym 2025-01-03.md"));
        assert!(state.recurring.is_empty());

        assert!(state.insert_definition(definition("gym")));
        assert!(state.has_instance("gym", date(3)));
        assert!(state.pending.is_empty());
    }

    #[test]
    fn removing_one_instance_keeps_siblings() {
        let mut state = ManagerState::default();
        state.insert_definition(definition("gym"));
        state.upsert_instance(instance("gym", 2, "/v/a.md"));
        state.upsert_instance(instance("gym", 3, "/v/b.md"));

        assert_eq!(state.remove_instance_at(Path::new("/v/a.md")).as_deref(), Some("gym"));
        assert_eq!(state.recurring["gym"].future_dates(date(1)), vec![date(3)]);
        assert_eq!(state.remove_instance_at(Path::new("/v/missing.md")), None);
    }

    #[test]
    fn moving_an_instance_to_another_date_forgets_the_old_one() {
        let mut state = ManagerState::default();
        state.insert_definition(definition("gym"));
        state.upsert_instance(instance("gym", 2, "/v/a.md"));
        state.upsert_instance(instance("gym", 5, "/v/a.md"));

        assert_eq!(state.recurring["gym"].future_dates(date(1)), vec![date(5)]);
        assert_eq!(state.instance_at(Path::new("/v/a.md")), Some(("gym".to_string(), date(5))));
    }
}
