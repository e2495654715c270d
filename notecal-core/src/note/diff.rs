//! Field-level diff between two parses of the same note.

use serde_yaml::Value;

use crate::note::Frontmatter;

/// A single field change
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Fields added, changed and removed between two frontmatter snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontmatterDiff {
    pub added: Vec<FieldChange>,
    pub changed: Vec<FieldChange>,
    pub removed: Vec<FieldChange>,
}

impl FrontmatterDiff {
    /// Compare a previous snapshot (if any) against the fresh parse.
    /// With no previous snapshot every field counts as added.
    pub fn between(old: Option<&Frontmatter>, new: &Frontmatter) -> Self {
        let mut diff = FrontmatterDiff::default();

        for (field, new_value) in new.iter() {
            match old.and_then(|old| old.get(field)) {
                Some(old_value) if old_value != new_value => diff.changed.push(FieldChange {
                    field: field.to_string(),
                    old_value: Some(old_value.clone()),
                    new_value: Some(new_value.clone()),
                }),
                Some(_) => {}
                None => diff.added.push(FieldChange {
                    field: field.to_string(),
                    old_value: None,
                    new_value: Some(new_value.clone()),
                }),
            }
        }

        if let Some(old) = old {
            for (field, old_value) in old.iter() {
                if !new.contains(field) {
                    diff.removed.push(FieldChange {
                        field: field.to_string(),
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    });
                }
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Whether `field` was added, changed or removed.
    pub fn touches(&self, field: &str) -> bool {
        self.added
            .iter()
            .chain(&self.changed)
            .chain(&self.removed)
            .any(|c| c.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::frontmatter;

    #[test]
    fn detects_added_changed_removed() {
        let old = frontmatter::parse("Title: Standup\nRRule: weekly\nSkip: false\n").unwrap();
        let new = frontmatter::parse("Title: Standup\nRRule: daily\nLocation: Room 4\n").unwrap();

        let diff = FrontmatterDiff::between(Some(&old), &new);

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].field, "Location");
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].field, "RRule");
        assert_eq!(diff.changed[0].old_value, Some(Value::from("weekly")));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].field, "Skip");
        assert!(diff.touches("RRule"));
        assert!(!diff.touches("Title"));
    }

    #[test]
    fn first_parse_is_all_added() {
        let new = frontmatter::parse("Title: Standup\nRRule: weekly\n").unwrap();
        let diff = FrontmatterDiff::between(None, &new);
        assert_eq!(diff.added.len(), 2);
        assert!(diff.changed.is_empty() && diff.removed.is_empty());
    }

    #[test]
    fn identical_snapshots_are_empty() {
        let fm = frontmatter::parse("Title: Standup\n").unwrap();
        assert!(FrontmatterDiff::between(Some(&fm), &fm).is_empty());
    }
}
