//! Per-record strategy resolution.

use super::report::{ApplyCounts, Strategy};
use crate::model::Entity;
use crate::validate::index_by_id;

/// Records to write for one collection, and how each archived record was
/// counted.
#[derive(Debug, Clone)]
pub struct Resolution<E> {
    pub writes: Vec<E>,
    pub counts: ApplyCounts,
}

/// Decide what to write for every incoming record.
///
/// Records identical to their live counterpart are skipped under every
/// strategy. Under `Merge` a record only counts as updated when at least one
/// blank live field was filled.
pub fn resolve<E: Entity>(live: &[E], incoming: &[E], strategy: Strategy) -> Resolution<E> {
    let live_by_id = index_by_id(live);
    let mut writes = Vec::new();
    let mut counts = ApplyCounts::default();

    for record in incoming {
        let Some(existing) = live_by_id.get(record.id()) else {
            writes.push(record.clone());
            counts.created += 1;
            continue;
        };
        if existing.diff(record).is_empty() {
            counts.skipped += 1;
            continue;
        }
        match strategy {
            Strategy::Skip => counts.skipped += 1,
            Strategy::Replace => {
                writes.push(record.clone());
                counts.updated += 1;
            }
            Strategy::Merge => {
                let mut merged = (*existing).clone();
                if merged.merge_from(record) {
                    writes.push(merged);
                    counts.updated += 1;
                } else {
                    counts.skipped += 1;
                }
            }
        }
    }

    Resolution { writes, counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Person, Setting};
    use serde_json::json;

    fn jane() -> Person {
        Person {
            id: "p1".into(),
            name: "Jane".into(),
            ..Default::default()
        }
    }

    fn janet_teacher() -> Person {
        Person {
            id: "p1".into(),
            name: "Janet".into(),
            profession: Some("Teacher".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_skip_leaves_existing() {
        let r = resolve(&[jane()], &[janet_teacher()], Strategy::Skip);
        assert!(r.writes.is_empty());
        assert_eq!(r.counts.skipped, 1);
        assert_eq!(r.counts.updated, 0);
    }

    #[test]
    fn test_replace_overwrites() {
        let r = resolve(&[jane()], &[janet_teacher()], Strategy::Replace);
        assert_eq!(r.writes, vec![janet_teacher()]);
        assert_eq!(r.counts.updated, 1);
    }

    #[test]
    fn test_merge_fills_blanks_only() {
        let r = resolve(&[jane()], &[janet_teacher()], Strategy::Merge);
        assert_eq!(r.counts.updated, 1);
        assert_eq!(r.writes[0].name, "Jane");
        assert_eq!(r.writes[0].profession.as_deref(), Some("Teacher"));
    }

    #[test]
    fn test_merge_with_nothing_to_fill_is_skip() {
        let live = Person {
            profession: Some("Nurse".into()),
            ..jane()
        };
        let r = resolve(&[live], &[janet_teacher()], Strategy::Merge);
        assert!(r.writes.is_empty());
        assert_eq!(r.counts.skipped, 1);
    }

    #[test]
    fn test_identical_and_new_records() {
        let new = Person {
            id: "p2".into(),
            name: "John".into(),
            ..Default::default()
        };
        for strategy in [Strategy::Skip, Strategy::Replace, Strategy::Merge] {
            let r = resolve(&[jane()], &[jane(), new.clone()], strategy);
            assert_eq!(r.counts.skipped, 1, "{}", strategy);
            assert_eq!(r.counts.created, 1, "{}", strategy);
            assert_eq!(r.writes, vec![new.clone()]);
        }
    }

    #[test]
    fn test_settings_keyed_by_key() {
        let live = vec![Setting {
            key: "theme".into(),
            value: json!("dark"),
        }];
        let incoming = vec![Setting {
            key: "theme".into(),
            value: json!("light"),
        }];
        let r = resolve(&live, &incoming, Strategy::Replace);
        assert_eq!(r.counts.updated, 1);
        assert_eq!(r.writes[0].value, json!("light"));
    }
}
