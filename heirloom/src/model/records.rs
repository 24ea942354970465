//! Record types of the exported collections.
//!
//! Optional fields serialize as `null` rather than being omitted, so every
//! record of a collection has the same set of keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{field_table, Entity, FieldSpec};
use super::Collection;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub surname: Option<String>,
    pub maiden_name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub birth_place: Option<String>,
    pub death_date: Option<String>,
    pub death_place: Option<String>,
    pub profession: Option<String>,
    pub biography: Option<String>,
    /// Original filename of the portrait, stored under `photos/<id>/`.
    pub photo: Option<String>,
    pub updated_at: Option<String>,
}

static PERSON_FIELDS: &[FieldSpec<Person>] = field_table!(Person {
    "name" => name: Text,
    "surname" => surname: Text,
    "maidenName" => maiden_name: Text,
    "gender" => gender: CaseInsensitive,
    "birthDate" => birth_date: Text,
    "birthPlace" => birth_place: Text,
    "deathDate" => death_date: Text,
    "deathPlace" => death_place: Text,
    "profession" => profession: Text,
    "biography" => biography: Text,
    "photo" => photo: Exact,
    "updatedAt" => updated_at: Timestamp,
});

impl Entity for Person {
    const COLLECTION: Collection = Collection::People;

    fn id(&self) -> &str {
        &self.id
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        PERSON_FIELDS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub person_id: String,
    pub related_person_id: String,
    /// e.g. `parent`, `spouse`, `sibling`
    pub kind: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub notes: Option<String>,
}

static RELATIONSHIP_FIELDS: &[FieldSpec<Relationship>] = field_table!(Relationship {
    "personId" => person_id: Exact,
    "relatedPersonId" => related_person_id: Exact,
    "kind" => kind: CaseInsensitive,
    "startDate" => start_date: Text,
    "endDate" => end_date: Text,
    "notes" => notes: Text,
});

impl Entity for Relationship {
    const COLLECTION: Collection = Collection::Relationships;

    fn id(&self) -> &str {
        &self.id
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        RELATIONSHIP_FIELDS
    }
}

impl Relationship {
    pub fn endpoints(&self) -> [(&'static str, &str); 2] {
        [
            ("personId", &self.person_id),
            ("relatedPersonId", &self.related_person_id),
        ]
    }
}

/// An application account. Password hashes and session tokens are not part
/// of this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    /// The person record this account belongs to, if linked.
    pub person_id: Option<String>,
    pub created_at: Option<String>,
}

static USER_FIELDS: &[FieldSpec<User>] = field_table!(User {
    "username" => username: CaseInsensitive,
    "email" => email: CaseInsensitive,
    "displayName" => display_name: Text,
    "role" => role: CaseInsensitive,
    "personId" => person_id: Exact,
    "createdAt" => created_at: Timestamp,
});

impl Entity for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.id
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        USER_FIELDS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub person_id: Option<String>,
    pub submitted_by: Option<String>,
    pub kind: String,
    pub payload: Value,
    pub status: String,
    pub created_at: Option<String>,
    pub reviewed_at: Option<String>,
}

static SUGGESTION_FIELDS: &[FieldSpec<Suggestion>] = field_table!(Suggestion {
    "personId" => person_id: Exact,
    "submittedBy" => submitted_by: Exact,
    "kind" => kind: CaseInsensitive,
    "payload" => payload: Exact,
    "status" => status: CaseInsensitive,
    "createdAt" => created_at: Timestamp,
    "reviewedAt" => reviewed_at: Timestamp,
});

impl Entity for Suggestion {
    const COLLECTION: Collection = Collection::Suggestions;

    fn id(&self) -> &str {
        &self.id
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        SUGGESTION_FIELDS
    }
}

/// A key/value application setting; the key is the identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Value,
}

static SETTING_FIELDS: &[FieldSpec<Setting>] = field_table!(Setting {
    "value" => value: Exact,
});

impl Entity for Setting {
    const COLLECTION: Collection = Collection::Settings;
    const ID_FIELD: &'static str = "key";

    fn id(&self) -> &str {
        &self.key
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        SETTING_FIELDS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: Value,
    pub created_at: String,
}

static AUDIT_LOG_FIELDS: &[FieldSpec<AuditLogEntry>] = field_table!(AuditLogEntry {
    "userId" => user_id: Exact,
    "action" => action: Exact,
    "entityType" => entity_type: Exact,
    "entityId" => entity_id: Exact,
    "details" => details: Exact,
    "createdAt" => created_at: Timestamp,
});

impl Entity for AuditLogEntry {
    const COLLECTION: Collection = Collection::AuditLogs;

    fn id(&self) -> &str {
        &self.id
    }

    fn fields() -> &'static [FieldSpec<Self>] {
        AUDIT_LOG_FIELDS
    }
}
