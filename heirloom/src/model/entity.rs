//! Table-driven field comparison and merge.
//!
//! Every record type lists its fields explicitly: serialized name, the
//! comparator used to decide equality, an accessor producing the JSON value,
//! and a fill function used by the `merge` strategy. Classification and merge
//! both walk this table, so a field missing from it is caught by the
//! per-entity table test rather than silently ignored.

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Collection;

/// How two values of a field are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// JSON equality.
    Exact,
    /// Surrounding whitespace ignored; `null` and `""` are equal.
    Text,
    /// `Text` plus case folding.
    CaseInsensitive,
    /// RFC 3339 timestamps compared as instants. Unparseable values fall
    /// back to `Text`.
    Timestamp,
}

impl Comparator {
    pub fn equal(&self, live: &Value, incoming: &Value) -> bool {
        match self {
            Comparator::Exact => live == incoming,
            Comparator::Text => match (text_of(live), text_of(incoming)) {
                (Some(a), Some(b)) => a == b,
                _ => live == incoming,
            },
            Comparator::CaseInsensitive => match (text_of(live), text_of(incoming)) {
                (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                _ => live == incoming,
            },
            Comparator::Timestamp => {
                let parsed = (
                    live.as_str().map(DateTime::parse_from_rfc3339),
                    incoming.as_str().map(DateTime::parse_from_rfc3339),
                );
                match parsed {
                    (Some(Ok(a)), Some(Ok(b))) => a == b,
                    _ => Comparator::Text.equal(live, incoming),
                }
            }
        }
    }
}

fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::Null => Some(""),
        Value::String(s) => Some(s.trim()),
        _ => None,
    }
}

/// A value that may be considered empty for merge purposes.
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for Value {
    fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }
}

impl<T: Blank> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        match self {
            None => true,
            Some(v) => v.is_blank(),
        }
    }
}

/// Merge rule for a single field: a blank live value takes a non-blank
/// incoming value, anything else keeps the live value. Returns whether
/// `live` changed.
pub fn fill<T: Blank + Clone>(live: &mut T, incoming: &T) -> bool {
    if live.is_blank() && !incoming.is_blank() {
        *live = incoming.clone();
        true
    } else {
        false
    }
}

/// One row of an entity's field table.
pub struct FieldSpec<T: 'static> {
    pub name: &'static str,
    pub comparator: Comparator,
    pub get: fn(&T) -> Value,
    pub fill: fn(&mut T, &T) -> bool,
}

/// A field whose live and incoming values differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub live: Value,
    pub incoming: Value,
}

/// A record type stored in one collection.
pub trait Entity:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const COLLECTION: Collection;

    /// Serialized name of the identifier field.
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> &str;

    /// Every serialized field except the identifier.
    fn fields() -> &'static [FieldSpec<Self>];

    /// Fields that differ between `self` (live) and `incoming`, in table order.
    fn diff(&self, incoming: &Self) -> Vec<FieldDiff> {
        Self::fields()
            .iter()
            .filter_map(|spec| {
                let live = (spec.get)(self);
                let theirs = (spec.get)(incoming);
                if spec.comparator.equal(&live, &theirs) {
                    None
                } else {
                    Some(FieldDiff {
                        field: spec.name.to_string(),
                        live,
                        incoming: theirs,
                    })
                }
            })
            .collect()
    }

    /// Apply the merge rule to every field. Returns whether anything changed.
    fn merge_from(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        for spec in Self::fields() {
            changed |= (spec.fill)(self, incoming);
        }
        changed
    }
}

/// Builds a `&'static [FieldSpec<T>]` from `"serializedName" => rust_field: Comparator` rows.
macro_rules! field_table {
    ($ty:ty { $($name:literal => $field:ident : $cmp:ident),* $(,)? }) => {
        &[
            $(
                $crate::model::entity::FieldSpec::<$ty> {
                    name: $name,
                    comparator: $crate::model::entity::Comparator::$cmp,
                    get: |record: &$ty| {
                        serde_json::to_value(&record.$field).unwrap_or(serde_json::Value::Null)
                    },
                    fill: |live: &mut $ty, incoming: &$ty| {
                        $crate::model::entity::fill(&mut live.$field, &incoming.$field)
                    },
                }
            ),*
        ]
    };
}

pub(crate) use field_table;
