//! Background lifecycle loop: once a second, walks every known table and
//! drives whatever time-based transition is due, then reaps players who
//! disconnected longer ago than the reconnect grace period and tears down
//! tables left with nobody seated.

use std::sync::Arc;
use std::time::Duration;

use blackjack_shared::{Phase, Settings};
use tracing::{error, info};

use crate::connection::ConnectionManager;
use crate::dispatch;
use crate::lock::TableLock;
use crate::round::{self, Clock, RoundError};
use crate::state::PlayerStatus;
use crate::store::Store;

/// Runs forever, ticking once a second. Intended to be `tokio::spawn`ed
/// alongside the WS server.
pub async fn run(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    connections: Arc<ConnectionManager>,
    settings: Arc<Settings>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        tick(&*store, &*clock, &connections, &settings);
    }
}

fn tick(store: &dyn Store, clock: &dyn Clock, connections: &ConnectionManager, settings: &Settings) {
    let mut table_ids = store.all_table_ids();
    if table_ids.is_empty() {
        table_ids.push(settings.table_id.clone());
    }

    for table_id in table_ids {
        if let Err(err) = tick_table(store, clock, connections, settings, &table_id) {
            error!(table_id = %table_id, error = %err, "ticker pass failed for table");
        }
    }
}

fn tick_table(
    store: &dyn Store,
    clock: &dyn Clock,
    connections: &ConnectionManager,
    settings: &Settings,
    table_id: &str,
) -> Result<(), RoundError> {
    let mut rng = rand::thread_rng();
    let mut session_ended = false;

    macro_rules! drive {
        ($call:expr) => {{
            let (snapshot, events) = $call?;
            if snapshot.meta.phase == Phase::SessionEnded {
                session_ended = true;
            }
            if !events.is_empty() {
                dispatch::flush(store, connections, &snapshot, events);
            }
        }};
    }

    drive!(round::finalize_vote(store, clock, table_id, false));
    drive!(round::finalize_bets(store, clock, &mut rng, table_id, false));
    drive!(round::advance_pending_turn(store, clock, table_id));
    drive!(round::advance_bust_pending(store, clock, table_id));
    drive!(round::advance_double_pending(store, clock, &mut rng, table_id));
    drive!(round::advance_inactive_turn(store, clock, table_id));
    drive!(round::advance_deal_pending(store, clock, &mut rng, table_id));
    drive!(round::advance_turn_start(store, clock, table_id));
    drive!(round::advance_dealer(store, clock, &mut rng, table_id));
    drive!(round::advance_settle(store, clock, table_id));

    cleanup_disconnected(store, clock, table_id, settings.reconnect_grace_seconds);

    if session_ended {
        clear_table_locked(store, clock, table_id);
    } else if table_is_empty(store, table_id) {
        clear_if_still_empty(store, clock, table_id);
    }

    Ok(())
}

/// Drops players who have been disconnected longer than the grace period,
/// freeing their seat for a fresh join.
fn cleanup_disconnected(store: &dyn Store, clock: &dyn Clock, table_id: &str, grace_seconds: u64) {
    let now = clock.now_ms();
    let Ok(lock) = TableLock::acquire(store, table_id, now) else {
        return;
    };
    store.with_table(table_id, |table| {
        let grace_ms = grace_seconds as i64 * 1000;
        let stale: Vec<String> = table
            .players
            .values()
            .filter(|p| p.status == PlayerStatus::Disconnected && now - p.last_seen_ts > grace_ms)
            .map(|p| p.player_id.clone())
            .collect();
        for player_id in stale {
            if let Some(player) = table.players.remove(&player_id) {
                table.seats.remove(&player.seat);
                table.ready.remove(&player_id);
                info!(table_id = %table.table_id, player_id = %player_id, "reaped disconnected player past grace period");
            }
        }
    });
    lock.release();
}

fn table_is_empty(store: &dyn Store, table_id: &str) -> bool {
    store.get_table(table_id).map(|t| t.players.is_empty()).unwrap_or(false)
}

/// Clears a table whose session just ended, unconditionally, so the next
/// JOIN_TABLE recreates it fresh in `LOBBY`.
fn clear_table_locked(store: &dyn Store, clock: &dyn Clock, table_id: &str) {
    let now = clock.now_ms();
    let Ok(lock) = TableLock::acquire(store, table_id, now) else {
        return;
    };
    store.clear_table(table_id);
    lock.release();
}

/// Clears an apparently-empty table, re-checking emptiness under the lock to
/// avoid racing a concurrent join.
fn clear_if_still_empty(store: &dyn Store, clock: &dyn Clock, table_id: &str) {
    let now = clock.now_ms();
    let Ok(lock) = TableLock::acquire(store, table_id, now) else {
        return;
    };
    let still_empty = store.get_table(table_id).map(|t| t.players.is_empty()).unwrap_or(false);
    if still_empty {
        store.clear_table(table_id);
    }
    lock.release();
}
