//! Abstract key/hash/set/stream store.
//!
//! The physical backend is explicitly out of scope: this module defines the
//! trait the round engine programs against, plus one in-process
//! implementation (`MemoryStore`) sufficient to run a single server
//! instance. A Redis-backed implementation would satisfy the same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::StoredEvent;
use crate::state::TableRecord;

/// Typed accessors over a key/hash/set/stream backend, scoped to table
/// aggregates, reconnect tokens, request dedup, and event streams.
pub trait Store: Send + Sync {
    /// Returns the table, creating it (in `LOBBY`) if it does not exist yet.
    fn ensure_table(
        &self,
        table_id: &str,
        settings: &blackjack_shared::Settings,
        new_session_id: &str,
    ) -> TableRecord;

    fn get_table(&self, table_id: &str) -> Option<TableRecord>;

    /// Mutates the table in place and persists the result. `f`'s return
    /// value is passed back to the caller.
    fn with_table<R>(&self, table_id: &str, f: impl FnOnce(&mut TableRecord) -> R) -> Option<R>;

    fn all_table_ids(&self) -> Vec<String>;

    fn clear_table(&self, table_id: &str);

    // -- string KV: locks, request dedup, reconnect tokens --------------

    /// `SET key value NX PX ttl_ms`. Returns true iff the key was absent and
    /// is now set.
    fn set_nx_px(&self, key: &str, value: &str, ttl_ms: i64, now_ms: i64) -> bool;

    /// Atomic compare-and-delete: removes `key` iff its current value equals
    /// `expected`. Returns whether it was removed.
    fn compare_and_del(&self, key: &str, expected: &str) -> bool;

    fn get_str(&self, key: &str) -> Option<String>;

    fn set_str(&self, key: &str, value: &str);

    fn del(&self, key: &str);

    // -- event stream -----------------------------------------------------

    fn append_event(&self, table_id: &str, event: StoredEvent, maxlen: usize) -> String;

    fn read_events_tail(&self, table_id: &str, count: usize) -> Vec<StoredEvent>;

    fn read_events_after(&self, table_id: &str, after_event_id: &str) -> Vec<StoredEvent>;
}

/// In-process `Store` implementation backed by a single mutex-guarded map.
/// Every call is a fast, non-blocking critical section, consistent with the
/// concurrency model's assumption that store calls are a single atomic RTT.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, TableRecord>,
    strings: HashMap<String, (String, i64)>, // value, expires_at_ms (0 = no expiry)
    events: HashMap<String, Vec<StoredEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(entry: &(String, i64), now_ms: i64) -> bool {
        entry.1 != 0 && now_ms >= entry.1
    }
}

impl Store for MemoryStore {
    fn ensure_table(
        &self,
        table_id: &str,
        settings: &blackjack_shared::Settings,
        new_session_id: &str,
    ) -> TableRecord {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tables
            .entry(table_id.to_string())
            .or_insert_with(|| TableRecord::new(table_id.to_string(), settings, new_session_id.to_string()))
            .clone()
    }

    fn get_table(&self, table_id: &str) -> Option<TableRecord> {
        self.inner.lock().unwrap().tables.get(table_id).cloned()
    }

    fn with_table<R>(&self, table_id: &str, f: impl FnOnce(&mut TableRecord) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.get_mut(table_id).map(f)
    }

    fn all_table_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().tables.keys().cloned().collect()
    }

    fn clear_table(&self, table_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.remove(table_id);
        inner.events.remove(table_id);
    }

    fn set_nx_px(&self, key: &str, value: &str, ttl_ms: i64, now_ms: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.strings.get(key) {
            if !Self::is_expired(existing, now_ms) {
                return false;
            }
        }
        let expires_at = if ttl_ms > 0 { now_ms + ttl_ms } else { 0 };
        inner.strings.insert(key.to_string(), (value.to_string(), expires_at));
        true
    }

    fn compare_and_del(&self, key: &str, expected: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let matches = inner.strings.get(key).map(|(v, _)| v == expected).unwrap_or(false);
        if matches {
            inner.strings.remove(key);
        }
        matches
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().strings.get(key).map(|(v, _)| v.clone())
    }

    fn set_str(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), (value.to_string(), 0));
    }

    fn del(&self, key: &str) {
        self.inner.lock().unwrap().strings.remove(key);
    }

    fn append_event(&self, table_id: &str, event: StoredEvent, maxlen: usize) -> String {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.events.entry(table_id.to_string()).or_default();
        stream.push(event.clone());
        if stream.len() > maxlen {
            let excess = stream.len() - maxlen;
            stream.drain(0..excess);
        }
        event.event_id
    }

    fn read_events_tail(&self, table_id: &str, count: usize) -> Vec<StoredEvent> {
        let inner = self.inner.lock().unwrap();
        match inner.events.get(table_id) {
            Some(stream) => {
                let start = stream.len().saturating_sub(count);
                stream[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    fn read_events_after(&self, table_id: &str, after_event_id: &str) -> Vec<StoredEvent> {
        let inner = self.inner.lock().unwrap();
        match inner.events.get(table_id) {
            Some(stream) => stream
                .iter()
                .filter(|e| e.event_id.as_str() > after_event_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackjack_shared::Settings;

    #[test]
    fn ensure_table_is_idempotent() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let a = store.ensure_table("t1", &settings, "s1");
        let b = store.ensure_table("t1", &settings, "s2");
        assert_eq!(a.meta.session_id, b.meta.session_id);
    }

    #[test]
    fn set_nx_px_rejects_second_writer_until_expiry() {
        let store = MemoryStore::new();
        assert!(store.set_nx_px("lock:t1", "tok-a", 1000, 0));
        assert!(!store.set_nx_px("lock:t1", "tok-b", 1000, 500));
        assert!(store.set_nx_px("lock:t1", "tok-b", 1000, 1500));
    }

    #[test]
    fn compare_and_del_only_removes_matching_token() {
        let store = MemoryStore::new();
        store.set_nx_px("lock:t1", "tok-a", 1000, 0);
        assert!(!store.compare_and_del("lock:t1", "tok-wrong"));
        assert!(store.compare_and_del("lock:t1", "tok-a"));
        assert!(store.get_str("lock:t1").is_none());
    }
}
