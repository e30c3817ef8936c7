//! Local key/value store
//!
//! In-memory only. Entries are created by the first accepted write and
//! never removed.

use serde::Serialize;
use std::collections::BTreeMap;

/// A stored key and its most recently accepted value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    entries: BTreeMap<String, String>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a value. Returns true if a previous value was replaced.
    pub fn put(&mut self, key: &str, value: &str) -> bool {
        self.entries.insert(key.to_string(), value.to_string()).is_some()
    }

    /// Set `key` to `new` when it is absent or currently equals `expected`
    pub fn compare_and_swap(&mut self, key: &str, expected: &str, new: &str) -> bool {
        match self.entries.get(key) {
            Some(current) if current != expected => false,
            _ => {
                self.put(key, new);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order
    pub fn entries(&self) -> Vec<StoredEntry> {
        self.entries
            .iter()
            .map(|(key, value)| StoredEntry { key: key.clone(), value: value.clone() })
            .collect()
    }
}
