//! Local-only ownership tracking.
//!
//! The owner token never leaves the device that created or forked a
//! session; this module is where it lives. The store is an injected
//! object rather than ambient global state so embedders can back it by
//! whatever persistence their platform has.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// What the device knows about a session it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRecord {
    pub owner_token: String,
    /// Id of the session this one was forked from, if any.
    pub forked_from: Option<String>,
}

/// Map from session id to ownership record, at most one record per id.
pub trait OwnershipStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<OwnershipRecord>;

    /// Insert or replace the record for `session_id`.
    fn insert(&self, session_id: &str, record: OwnershipRecord);

    fn remove(&self, session_id: &str);

    /// Scan for a session forked from `original_id`. This is what keeps
    /// repeated edits of the same shared session from forking it twice.
    fn find_fork_of(&self, original_id: &str) -> Option<(String, OwnershipRecord)>;
}

/// In-memory ownership store.
#[derive(Default)]
pub struct MemoryOwnershipStore {
    records: Mutex<HashMap<String, OwnershipRecord>>,
}

impl MemoryOwnershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OwnershipStore for MemoryOwnershipStore {
    fn get(&self, session_id: &str) -> Option<OwnershipRecord> {
        self.records.lock().unwrap().get(session_id).cloned()
    }

    fn insert(&self, session_id: &str, record: OwnershipRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(session_id.to_string(), record);
    }

    fn remove(&self, session_id: &str) {
        self.records.lock().unwrap().remove(session_id);
    }

    fn find_fork_of(&self, original_id: &str) -> Option<(String, OwnershipRecord)> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|(_, record)| record.forked_from.as_deref() == Some(original_id))
            .map(|(id, record)| (id.clone(), record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, forked_from: Option<&str>) -> OwnershipRecord {
        OwnershipRecord {
            owner_token: token.to_string(),
            forked_from: forked_from.map(str::to_string),
        }
    }

    #[test]
    fn get_returns_inserted_record() {
        let store = MemoryOwnershipStore::new();
        store.insert("s-1", record("tok-1", None));
        assert_eq!(store.get("s-1"), Some(record("tok-1", None)));
        assert_eq!(store.get("s-2"), None);
    }

    #[test]
    fn insert_replaces_existing_record() {
        let store = MemoryOwnershipStore::new();
        store.insert("s-1", record("tok-1", None));
        store.insert("s-1", record("tok-2", Some("parent")));
        assert_eq!(store.get("s-1"), Some(record("tok-2", Some("parent"))));
    }

    #[test]
    fn remove_forgets_the_record() {
        let store = MemoryOwnershipStore::new();
        store.insert("s-1", record("tok-1", None));
        store.remove("s-1");
        assert_eq!(store.get("s-1"), None);
    }

    #[test]
    fn find_fork_of_scans_lineage() {
        let store = MemoryOwnershipStore::new();
        store.insert("mine", record("tok-1", None));
        store.insert("fork-of-shared", record("tok-2", Some("shared")));

        let (fork_id, fork_record) = store.find_fork_of("shared").expect("fork found");
        assert_eq!(fork_id, "fork-of-shared");
        assert_eq!(fork_record.owner_token, "tok-2");
        assert!(store.find_fork_of("mine").is_none());
    }
}
