//! Append-only per-table event stream.
//!
//! Mirrors the reference implementation's Redis stream: a capped log keyed
//! by table, a short tail read on connect, and exclusive-start pagination
//! for full replay via `SYNC{last_event_id}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Store;

pub const STREAM_MAXLEN: usize = 2000;
pub const SYNC_TAIL: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: String,
    pub event_type: String,
    pub session_id: String,
    pub round_id: u64,
    pub payload: Value,
    /// Set only on CARD_DEALT events dealt face up to a single seat; lets
    /// personalization reconstruct the real card for that seat and redact it
    /// for everyone else.
    pub owner_seat: Option<u32>,
}

/// Builds a lexicographically-monotonic event id from a per-table sequence
/// number. Zero-padding keeps string comparison equivalent to numeric order
/// well past any realistic table lifetime.
pub fn format_event_id(seq: u64) -> String {
    format!("{seq:020}")
}

pub fn append(
    store: &dyn Store,
    table_id: &str,
    event_type: &str,
    session_id: &str,
    round_id: u64,
    payload: Value,
    owner_seat: Option<u32>,
    seq: u64,
) -> StoredEvent {
    let event = StoredEvent {
        event_id: format_event_id(seq),
        event_type: event_type.to_string(),
        session_id: session_id.to_string(),
        round_id,
        payload,
        owner_seat,
    };
    store.append_event(table_id, event.clone(), STREAM_MAXLEN);
    event
}

pub fn tail(store: &dyn Store, table_id: &str) -> Vec<StoredEvent> {
    store.read_events_tail(table_id, SYNC_TAIL)
}

pub fn after(store: &dyn Store, table_id: &str, last_event_id: &str) -> Vec<StoredEvent> {
    store.read_events_after(table_id, last_event_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_sort_lexicographically_like_numbers() {
        let a = format_event_id(9);
        let b = format_event_id(10);
        assert!(a < b);
    }
}
