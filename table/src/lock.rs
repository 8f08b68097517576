//! Per-table exclusive lock with a TTL, built on the store's `SET NX PX` /
//! compare-and-delete primitives. The reference implementation uses this
//! pattern (a Redis key holding a random owner token) to serialize every
//! mutating operation on a table, including the 1Hz ticker's own passes.

use rand::Rng;
use thiserror::Error;

use crate::store::Store;

pub const LOCK_TTL_MS: i64 = 5000;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("table is locked by another operation")]
    TableBusy,
}

fn lock_key(table_id: &str) -> String {
    format!("lock:table:{table_id}")
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A held lock. Dropping it without calling `release` leaves the lock to
/// expire on its own TTL, same as a crashed holder in the reference design.
pub struct TableLock<'s> {
    store: &'s dyn Store,
    table_id: String,
    token: String,
}

impl<'s> TableLock<'s> {
    pub fn acquire(store: &'s dyn Store, table_id: &str, now_ms: i64) -> Result<Self, LockError> {
        let token = random_token();
        if store.set_nx_px(&lock_key(table_id), &token, LOCK_TTL_MS, now_ms) {
            Ok(Self {
                store,
                table_id: table_id.to_string(),
                token,
            })
        } else {
            Err(LockError::TableBusy)
        }
    }

    pub fn release(self) {
        self.store.compare_and_del(&lock_key(&self.table_id), &self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let store = MemoryStore::new();
        let first = TableLock::acquire(&store, "t1", 0).unwrap();
        assert!(TableLock::acquire(&store, "t1", 100).is_err());
        first.release();
        assert!(TableLock::acquire(&store, "t1", 200).is_ok());
    }

    #[test]
    fn lock_expires_after_ttl() {
        let store = MemoryStore::new();
        let _first = TableLock::acquire(&store, "t1", 0).unwrap();
        assert!(TableLock::acquire(&store, "t1", LOCK_TTL_MS + 1).is_ok());
    }
}
