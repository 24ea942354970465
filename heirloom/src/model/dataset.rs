use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::records::{AuditLogEntry, Person, Relationship, Setting, Suggestion, User};
use super::Collection;

/// One consistent read of every exported collection.
///
/// `audit_logs` is `None` when the section was not requested (export) or
/// not present (archive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub people: Vec<Person>,
    pub relationships: Vec<Relationship>,
    pub users: Vec<User>,
    pub suggestions: Vec<Suggestion>,
    pub settings: Vec<Setting>,
    pub audit_logs: Option<Vec<AuditLogEntry>>,
}

impl Dataset {
    /// Number of records per present collection.
    pub fn counts(&self) -> BTreeMap<Collection, u64> {
        let mut counts = BTreeMap::new();
        counts.insert(Collection::People, self.people.len() as u64);
        counts.insert(Collection::Relationships, self.relationships.len() as u64);
        counts.insert(Collection::Users, self.users.len() as u64);
        counts.insert(Collection::Suggestions, self.suggestions.len() as u64);
        counts.insert(Collection::Settings, self.settings.len() as u64);
        if let Some(ref logs) = self.audit_logs {
            counts.insert(Collection::AuditLogs, logs.len() as u64);
        }
        counts
    }

    /// Serialize one collection the way it is stored in the archive.
    ///
    /// Returns `None` for an absent optional collection.
    pub fn collection_json(&self, collection: Collection) -> serde_json::Result<Option<Vec<u8>>> {
        let bytes = match collection {
            Collection::People => serde_json::to_vec_pretty(&self.people)?,
            Collection::Relationships => serde_json::to_vec_pretty(&self.relationships)?,
            Collection::Users => serde_json::to_vec_pretty(&self.users)?,
            Collection::Suggestions => serde_json::to_vec_pretty(&self.suggestions)?,
            Collection::Settings => serde_json::to_vec_pretty(&self.settings)?,
            Collection::AuditLogs => match self.audit_logs {
                Some(ref logs) => serde_json::to_vec_pretty(logs)?,
                None => return Ok(None),
            },
        };
        Ok(Some(bytes))
    }

    /// Replace one collection from its archived JSON form.
    pub fn set_collection_json(
        &mut self,
        collection: Collection,
        data: &[u8],
    ) -> serde_json::Result<()> {
        match collection {
            Collection::People => self.people = serde_json::from_slice(data)?,
            Collection::Relationships => self.relationships = serde_json::from_slice(data)?,
            Collection::Users => self.users = serde_json::from_slice(data)?,
            Collection::Suggestions => self.suggestions = serde_json::from_slice(data)?,
            Collection::Settings => self.settings = serde_json::from_slice(data)?,
            Collection::AuditLogs => self.audit_logs = Some(serde_json::from_slice(data)?),
        }
        Ok(())
    }

    pub fn person(&self, id: &str) -> Option<&Person> {
        self.people.iter().find(|p| p.id == id)
    }
}
