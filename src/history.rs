//! Bounded, deduplicated, most-recent-first search history.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{SearchForm, SearchQuery};
use crate::storage::KeyValueStore;

/// Key under which the history is persisted.
pub const STORAGE_KEY: &str = "flight_search_history";

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct HistoryEntry {
    id: Uuid,
    #[serde(flatten)]
    query: SearchQuery,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

impl HistoryEntry {
    // Persisted at millisecond precision; keep memory and disk identical.
    fn new(query: SearchQuery) -> Self {
        Self {
            id: Uuid::new_v4(),
            query,
            created_at: Utc::now().trunc_subsecs(3),
        }
    }
}

pub struct SearchHistory<S: KeyValueStore> {
    store: S,
    capacity: usize,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl<S: KeyValueStore> SearchHistory<S> {
    /// Creates an empty history. Call [`SearchHistory::load`] to pick up
    /// whatever was persisted before.
    pub fn new(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Creates a history and loads it from the store in one step.
    pub fn open(store: S, capacity: usize) -> Self {
        let history = Self::new(store, capacity);
        history.load();
        history
    }

    /// Replaces the in-memory list with the persisted one. Missing, unreadable
    /// or unparseable data yields an empty history; this never fails.
    pub fn load(&self) -> usize {
        let loaded = match self.read_persisted() {
            Ok(Some(entries)) => self.sanitize(entries),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "discarding unreadable search history");
                Vec::new()
            }
        };
        let count = loaded.len();
        *self.lock() = loaded;
        debug!(count, "search history loaded");
        count
    }

    /// Records a search at the front, dropping any older entry for the same
    /// route and date and anything past capacity.
    pub fn add(&self, query: SearchQuery) -> HistoryEntry {
        let entry = HistoryEntry::new(query);
        let mut entries = self.lock();
        entries.retain(|existing| existing.query.dedup_key() != entry.query.dedup_key());
        entries.insert(0, entry.clone());
        entries.truncate(self.capacity);
        self.persist(&entries);
        entry
    }

    pub fn clear(&self) {
        self.lock().clear();
        if let Err(err) = self.store.remove(STORAGE_KEY) {
            warn!(error = %err, "failed to remove persisted search history");
        }
    }

    /// Snapshot of the entries, most recent first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<HistoryEntry> {
        self.lock().iter().find(|entry| entry.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_persisted(&self) -> Result<Option<Vec<HistoryEntry>>, StorageError> {
        match self.store.get(STORAGE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // Parseable data can still break invariants if it was written by hand or
    // by an older build, so the rules of `add` are re-applied here.
    fn sanitize(&self, entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
        let total = entries.len();
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(total.min(self.capacity));

        for mut entry in entries {
            match SearchForm::from(&entry.query).validate() {
                Ok(query) => entry.query = query,
                Err(err) => {
                    warn!(id = %entry.id, error = %err, "dropping invalid history entry");
                    continue;
                }
            }
            let (origin, destination, date) = entry.query.dedup_key();
            if seen.insert((origin.to_string(), destination.to_string(), date)) {
                kept.push(entry);
            }
        }
        kept.truncate(self.capacity);

        if kept.len() != total {
            warn!(
                loaded = total,
                kept = kept.len(),
                "persisted search history needed repair"
            );
        }
        kept
    }

    fn persist(&self, entries: &[HistoryEntry]) {
        let result = serde_json::to_string(entries)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(STORAGE_KEY, &json));
        match result {
            Ok(()) => debug!(count = entries.len(), "search history persisted"),
            Err(err) => warn!(error = %err, "failed to persist search history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn query(origin: &str, destination: &str, date: &str) -> SearchQuery {
        SearchForm::one_way(origin, destination, date)
            .validate()
            .unwrap()
    }

    fn day(n: u32) -> String {
        format!("2025-06-{n:02}")
    }

    #[test]
    fn test_add_puts_newest_first_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let history = SearchHistory::new(store.clone(), DEFAULT_CAPACITY);

        history.add(query("PEK", "SHA", "2025-06-01"));
        history.add(query("CAN", "CTU", "2025-06-02"));

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query().origin, "CAN");
        assert_eq!(entries[1].query().origin, "PEK");

        let raw = store.get(STORAGE_KEY).unwrap().unwrap();
        let persisted: Vec<HistoryEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, entries);
    }

    #[test]
    fn test_duplicate_moves_to_front_without_growing() {
        let history = SearchHistory::new(MemoryStore::new(), DEFAULT_CAPACITY);
        let first = history.add(query("PEK", "SHA", "2025-06-01"));
        history.add(query("CAN", "CTU", "2025-06-02"));
        let again = history.add(query("pek", "sha", "2025-06-01"));

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id(), again.id());
        assert_ne!(first.id(), again.id());
        assert_eq!(entries[1].query().origin, "CAN");
    }

    #[test]
    fn test_trip_type_is_not_part_of_the_key() {
        let history = SearchHistory::new(MemoryStore::new(), DEFAULT_CAPACITY);
        history.add(query("PEK", "SHA", "2025-06-01"));
        let round = SearchForm::round_trip("PEK", "SHA", "2025-06-01", "2025-06-05")
            .validate()
            .unwrap();
        history.add(round.clone());

        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query(), &round);
    }

    #[test]
    fn test_eleventh_entry_evicts_oldest() {
        let history = SearchHistory::new(MemoryStore::new(), DEFAULT_CAPACITY);
        for n in 1..=10 {
            history.add(query("PEK", "SHA", &day(n)));
        }
        assert_eq!(history.len(), 10);

        history.add(query("PEK", "SHA", &day(11)));
        let entries = history.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].query().date.to_string(), day(11));
        assert_eq!(entries[9].query().date.to_string(), day(2));
        assert!(entries
            .iter()
            .all(|entry| entry.query().date.to_string() != day(1)));
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let history = SearchHistory::new(MemoryStore::new(), 3);
        for n in 1..=20 {
            history.add(query("PEK", "SHA", &day(n % 7 + 1)));
            assert!(history.len() <= 3);
        }
    }

    #[test]
    fn test_load_restores_persisted_entries() {
        let store = Arc::new(MemoryStore::new());
        let written = SearchHistory::new(store.clone(), DEFAULT_CAPACITY);
        written.add(query("PEK", "SHA", "2025-06-01"));
        written.add(query("SZX", "XIY", "2025-06-03"));

        let reloaded = SearchHistory::open(store, DEFAULT_CAPACITY);
        assert_eq!(reloaded.entries(), written.entries());
    }

    #[test]
    fn test_created_at_survives_reload_exactly() {
        let store = Arc::new(MemoryStore::new());
        let history = SearchHistory::new(store.clone(), DEFAULT_CAPACITY);
        let entry = history.add(query("PEK", "SHA", "2025-06-01"));
        assert_eq!(entry.created_at().timestamp_subsec_nanos() % 1_000_000, 0);

        let reloaded = SearchHistory::open(store, DEFAULT_CAPACITY);
        assert_eq!(reloaded.get(*entry.id()), Some(entry));
    }

    #[test]
    fn test_load_recovers_from_garbage() {
        let store = MemoryStore::new();
        store.set(STORAGE_KEY, "{not json").unwrap();
        let history = SearchHistory::open(store, DEFAULT_CAPACITY);
        assert!(history.is_empty());
    }

    #[test]
    fn test_load_recovers_from_wrong_shape() {
        let store = MemoryStore::new();
        store
            .set(STORAGE_KEY, r#"[{"id": 7, "dcity": 1, "timestamp": "x"}]"#)
            .unwrap();
        let history = SearchHistory::open(store, DEFAULT_CAPACITY);
        assert!(history.is_empty());
    }

    #[test]
    fn test_load_repairs_parseable_but_invalid_data() {
        let store = MemoryStore::new();
        let raw = serde_json::json!([
            {"id": Uuid::new_v4(), "dcity": "pek", "acity": "sha", "date": "2025-06-01", "type": "oneway", "timestamp": 3},
            {"id": Uuid::new_v4(), "dcity": "PEK", "acity": "SHA", "date": "2025-06-01", "type": "oneway", "timestamp": 2},
            {"id": Uuid::new_v4(), "dcity": "PEK", "acity": "PEK", "date": "2025-06-01", "type": "oneway", "timestamp": 1},
        ]);
        store.set(STORAGE_KEY, &raw.to_string()).unwrap();

        let history = SearchHistory::open(store, DEFAULT_CAPACITY);
        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query().origin, "PEK");
        assert_eq!(entries[0].created_at().timestamp_millis(), 3);
    }

    #[test]
    fn test_clear_removes_persisted_value() {
        let store = Arc::new(MemoryStore::new());
        let history = SearchHistory::new(store.clone(), DEFAULT_CAPACITY);
        history.add(query("PEK", "SHA", "2025-06-01"));
        history.clear();

        assert!(history.is_empty());
        assert_eq!(store.get(STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_get_by_id() {
        let history = SearchHistory::new(MemoryStore::new(), DEFAULT_CAPACITY);
        let entry = history.add(query("PEK", "SHA", "2025-06-01"));
        assert_eq!(history.get(*entry.id()), Some(entry));
        assert_eq!(history.get(Uuid::new_v4()), None);
    }
}
