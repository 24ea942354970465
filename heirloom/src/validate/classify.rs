//! Three-way record classification.

use std::collections::{BTreeMap, BTreeSet};

use super::report::{CollectionPreview, Conflict};
use crate::model::{Entity, FieldDiff};

/// Where an archived record stands relative to live state.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    New,
    Identical,
    Conflicting(Vec<FieldDiff>),
}

pub fn classify_record<E: Entity>(live: Option<&E>, incoming: &E) -> Classification {
    match live {
        None => Classification::New,
        Some(live) => {
            let diff = live.diff(incoming);
            if diff.is_empty() {
                Classification::Identical
            } else {
                Classification::Conflicting(diff)
            }
        }
    }
}

/// Index records by identifier.
pub fn index_by_id<E: Entity>(records: &[E]) -> BTreeMap<&str, &E> {
    records.iter().map(|r| (r.id(), r)).collect()
}

/// Classify every incoming record. Duplicate or empty identifiers are
/// returned as structural errors and left out of the counts.
pub fn classify_collection<E: Entity>(live: &[E], incoming: &[E]) -> (CollectionPreview, Vec<String>) {
    let live_by_id = index_by_id(live);
    let mut preview = CollectionPreview::default();
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();

    for record in incoming {
        let id = record.id();
        if id.trim().is_empty() {
            errors.push(format!("{}: record with an empty identifier", E::COLLECTION));
            continue;
        }
        if !seen.insert(id) {
            errors.push(format!("{}: duplicate identifier {}", E::COLLECTION, id));
            continue;
        }
        match classify_record(live_by_id.get(id).copied(), record) {
            Classification::New => preview.counts.new += 1,
            Classification::Identical => preview.counts.identical += 1,
            Classification::Conflicting(fields) => {
                preview.counts.conflicting += 1;
                preview.conflicts.push(Conflict {
                    id: id.to_string(),
                    fields,
                });
            }
        }
    }

    preview.conflicts.sort_by(|a, b| a.id.cmp(&b.id));
    (preview, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Person;
    use serde_json::json;

    fn person(id: &str, name: &str) -> Person {
        Person {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_three_ways() {
        let live = vec![person("p1", "Jane"), person("p2", "John")];
        let incoming = vec![
            person("p3", "Ada"),
            person("p2", "John"),
            person("p1", "Janet"),
        ];

        let (preview, errors) = classify_collection(&live, &incoming);
        assert!(errors.is_empty());
        assert_eq!(preview.counts.new, 1);
        assert_eq!(preview.counts.identical, 1);
        assert_eq!(preview.counts.conflicting, 1);
        assert_eq!(preview.conflicts[0].id, "p1");
        assert_eq!(preview.conflicts[0].fields[0].field, "name");
        assert_eq!(preview.conflicts[0].fields[0].live, json!("Jane"));
        assert_eq!(preview.conflicts[0].fields[0].incoming, json!("Janet"));
    }

    #[test]
    fn test_duplicates_and_empty_ids_are_errors() {
        let incoming = vec![person("p1", "A"), person("p1", "B"), person(" ", "C")];
        let (preview, errors) = classify_collection(&[], &incoming);
        assert_eq!(preview.counts.total(), 1);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("duplicate identifier p1"));
    }

    #[test]
    fn test_conflicts_sorted_by_id() {
        let live = vec![person("b", "x"), person("a", "x")];
        let incoming = vec![person("b", "y"), person("a", "y")];
        let (preview, _) = classify_collection(&live, &incoming);
        let ids: Vec<&str> = preview.conflicts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
