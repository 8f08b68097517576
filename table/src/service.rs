//! Table lifecycle operations: handshake, joining, the ready check, manual
//! session start, and staged admin configuration. Everything here runs
//! before or between rounds; once a session is running, `round.rs` owns the
//! phase state machine.

use blackjack_shared::Phase;
use serde_json::{json, Value};
use thiserror::Error;

use crate::lock::{LockError, TableLock};
use crate::round::{self, apply_pending_config, bet_deadline, emit, emit_announcement, QueuedEvent};
use crate::state::{PendingConfig, PlayerRecord, PlayerStatus, TableRecord};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("table not found")]
    TableNotFound,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("{0}")]
    JoinDenied(String),
    #[error("{0}")]
    ReadyDenied(String),
    #[error("{0}")]
    StartDenied(String),
    #[error("{0}")]
    ConfigDenied(String),
}

pub struct HelloResult {
    pub player_id: String,
    pub reconnect_token: String,
}

/// Issues a fresh player identity, or resolves an existing one from a
/// reconnect token presented by a returning client.
pub fn hello(
    store: &dyn Store,
    reconnect_token: Option<&str>,
    new_player_id: impl FnOnce() -> String,
    new_reconnect_token: impl FnOnce() -> String,
) -> HelloResult {
    if let Some(token) = reconnect_token {
        if let Some(player_id) = store.get_str(&reconnect_key(token)) {
            return HelloResult {
                player_id,
                reconnect_token: token.to_string(),
            };
        }
    }
    let player_id = new_player_id();
    let reconnect_token = new_reconnect_token();
    store.set_str(&reconnect_key(&reconnect_token), &player_id);
    HelloResult {
        player_id,
        reconnect_token,
    }
}

fn reconnect_key(token: &str) -> String {
    format!("reconnect:{token}")
}

fn active_players(table: &TableRecord) -> Vec<&PlayerRecord> {
    table.active_players().collect()
}

fn all_active_ready(table: &TableRecord) -> bool {
    let active = active_players(table);
    if active.is_empty() {
        return false;
    }
    active.iter().all(|p| table.ready.contains(&p.player_id))
}

fn start_session_locked(
    table: &mut TableRecord,
    now: i64,
    new_session_id: &str,
    events: &mut Vec<QueuedEvent>,
) {
    apply_pending_config(table);
    table.meta.phase = Phase::WaitingForBets;
    table.meta.session_id = new_session_id.to_string();
    table.meta.round_id = 1;
    table.meta.bet_deadline_ts = bet_deadline(table, now);
    table.meta.clear_pending();
    table.meta.dealer_revealed = false;
    for player in table.players.values_mut() {
        player.bet = 0;
        player.bet_submitted = false;
    }
    table.hands.clear();
    emit(events, "SESSION_STARTED", json!({"table_id": table.table_id}));
    emit_announcement(events, table, now, "GAME BEGIN", "neutral", 3000, None);
    emit(events, "PHASE_CHANGED", json!({"phase": "WAITING_FOR_BETS"}));
}

/// Marks a player disconnected without removing their seat, so a later
/// reconnect within the grace period resumes in place. The ticker reaps the
/// player outright once `reconnect_grace_seconds` has elapsed.
pub fn mark_disconnected(store: &dyn Store, clock: &dyn round::Clock, table_id: &str, player_id: &str) {
    let now = clock.now_ms();
    let Ok(lock) = TableLock::acquire(store, table_id, now) else {
        return;
    };
    store.with_table(table_id, |table| {
        if let Some(player) = table.players.get_mut(player_id) {
            player.status = PlayerStatus::Disconnected;
            player.last_seen_ts = now;
        }
    });
    lock.release();
}

/// Bumps `last_seen_ts` for a player who just sent a message, so a
/// subsequent disconnect's grace period is measured from their last real
/// activity rather than whenever the socket happens to drop.
pub fn touch_last_seen(store: &dyn Store, clock: &dyn round::Clock, table_id: &str, player_id: &str) {
    let now = clock.now_ms();
    store.with_table(table_id, |table| {
        if let Some(player) = table.players.get_mut(player_id) {
            player.last_seen_ts = now;
        }
    });
}

fn assign_seat(table: &TableRecord, seat_count: u32, preferred: Option<u32>) -> Option<u32> {
    if let Some(seat) = preferred {
        if !table.seats.contains_key(&seat) {
            return Some(seat);
        }
    }
    (1..=seat_count).find(|seat| !table.seats.contains_key(seat))
}

pub fn join_table(
    store: &dyn Store,
    clock: &dyn round::Clock,
    settings: &blackjack_shared::Settings,
    table_id: &str,
    player_id: &str,
    nickname: &str,
    reconnect_token: &str,
    new_session_id: impl FnOnce() -> String,
) -> Result<(TableRecord, Vec<QueuedEvent>), LobbyError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;
    store.ensure_table(table_id, settings, "");
    let mut events = Vec::new();

    let outcome = store.with_table(table_id, |table| -> Result<u32, LobbyError> {
        let existing_seat = table.seats.iter().find(|(_, pid)| pid.as_str() == player_id).map(|(s, _)| *s);
        let existing_player = table.players.get(player_id).cloned();

        if table.meta.phase != Phase::Lobby
            && !settings.allow_join_during_session
            && existing_seat.is_none()
            && existing_player.is_none()
        {
            return Err(LobbyError::JoinDenied("Join denied: session already in progress".into()));
        }

        let seat = match existing_seat {
            Some(seat) => seat,
            None => {
                let preferred = existing_player.as_ref().map(|p| p.seat).filter(|&s| s > 0);
                assign_seat(table, settings.seat_count, preferred)
                    .ok_or_else(|| LobbyError::JoinDenied("Table is full".into()))?
            }
        };

        table.seats.insert(seat, player_id.to_string());
        table.players.insert(
            player_id.to_string(),
            PlayerRecord {
                player_id: player_id.to_string(),
                seat,
                name: nickname.to_string(),
                bankroll: existing_player.as_ref().map(|p| p.bankroll).unwrap_or(settings.starting_bankroll),
                status: PlayerStatus::Active,
                bet: existing_player.as_ref().map(|p| p.bet).unwrap_or(0),
                bet_submitted: existing_player.as_ref().map(|p| p.bet_submitted).unwrap_or(false),
                hand_ids: existing_player.map(|p| p.hand_ids).unwrap_or_default(),
                reconnect_token: reconnect_token.to_string(),
                last_seen_ts: now,
            },
        );

        emit(&mut events, "PLAYER_JOINED", json!({"player_id": player_id, "seat": seat, "name": nickname}));

        if table.meta.phase == Phase::Lobby
            && active_players(table).len() as u32 >= settings.min_players_to_start
            && all_active_ready(table)
        {
            let session_id = new_session_id();
            start_session_locked(table, now, &session_id, &mut events);
        }

        Ok(seat)
    });
    lock.release();

    match outcome {
        Some(Ok(_)) => {
            let snapshot = store.get_table(table_id).ok_or(LobbyError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(LobbyError::TableNotFound),
    }
}

pub fn ready_toggle(
    store: &dyn Store,
    clock: &dyn round::Clock,
    settings: &blackjack_shared::Settings,
    table_id: &str,
    player_id: &str,
    new_session_id: impl FnOnce() -> String,
) -> Result<(TableRecord, Vec<QueuedEvent>), LobbyError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;
    let mut events = Vec::new();

    let outcome = store.with_table(table_id, |table| -> Result<bool, LobbyError> {
        if table.meta.phase != Phase::Lobby {
            return Err(LobbyError::ReadyDenied("Ready toggle only allowed in lobby".into()));
        }
        let seat = table
            .players
            .get(player_id)
            .map(|p| p.seat)
            .ok_or_else(|| LobbyError::ReadyDenied("Player not seated".into()))?;

        let now_ready = if table.ready.contains(player_id) {
            table.ready.remove(player_id);
            false
        } else {
            table.ready.insert(player_id.to_string());
            true
        };
        emit(&mut events, "READY_CHANGED", json!({"player_id": player_id, "seat": seat, "ready": now_ready}));

        if active_players(table).len() as u32 >= settings.min_players_to_start && all_active_ready(table) {
            let session_id = new_session_id();
            start_session_locked(table, now, &session_id, &mut events);
        }
        Ok(now_ready)
    });
    lock.release();

    match outcome {
        Some(Ok(_)) => {
            let snapshot = store.get_table(table_id).ok_or(LobbyError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(LobbyError::TableNotFound),
    }
}

pub fn start_session(
    store: &dyn Store,
    clock: &dyn round::Clock,
    settings: &blackjack_shared::Settings,
    table_id: &str,
    new_session_id: impl FnOnce() -> String,
) -> Result<(TableRecord, Vec<QueuedEvent>), LobbyError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;
    let mut events = Vec::new();

    let outcome = store.with_table(table_id, |table| -> Result<(), LobbyError> {
        if table.meta.phase != Phase::Lobby {
            return Err(LobbyError::StartDenied("Session already started".into()));
        }
        if (active_players(table).len() as u32) < settings.min_players_to_start {
            return Err(LobbyError::StartDenied("Not enough players to start session".into()));
        }
        if !all_active_ready(table) {
            return Err(LobbyError::StartDenied("All active players must be ready".into()));
        }
        let session_id = new_session_id();
        start_session_locked(table, now, &session_id, &mut events);
        Ok(())
    });
    lock.release();

    match outcome {
        Some(Ok(())) => {
            let snapshot = store.get_table(table_id).ok_or(LobbyError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(LobbyError::TableNotFound),
    }
}

pub fn admin_config(
    store: &dyn Store,
    clock: &dyn round::Clock,
    table_id: &str,
    starting_bankroll: Option<i64>,
    min_bet: Option<i64>,
    max_bet: Option<i64>,
    shoe_decks: Option<u32>,
    reshuffle_when_remaining_pct: Option<f64>,
) -> Result<(TableRecord, Vec<QueuedEvent>), LobbyError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;
    let mut events = Vec::new();

    let outcome = store.with_table(table_id, |table| -> Result<Value, LobbyError> {
        if let Some(v) = starting_bankroll {
            if v < 0 {
                return Err(LobbyError::ConfigDenied("Starting bankroll must be >= 0".into()));
            }
        }
        if let Some(v) = min_bet {
            if v < 0 {
                return Err(LobbyError::ConfigDenied("Min bet must be >= 0".into()));
            }
        }
        if let Some(v) = max_bet {
            if v < 0 {
                return Err(LobbyError::ConfigDenied("Max bet must be >= 0".into()));
            }
        }
        if let Some(v) = shoe_decks {
            if v < 1 {
                return Err(LobbyError::ConfigDenied("Shoe decks must be >= 1".into()));
            }
        }
        if let Some(v) = reshuffle_when_remaining_pct {
            if !(0.0 < v && v < 1.0) {
                return Err(LobbyError::ConfigDenied("Reshuffle pct must be between 0 and 1".into()));
            }
        }
        let effective_min = min_bet.unwrap_or(table.meta.min_bet);
        let effective_max = max_bet.unwrap_or(table.meta.max_bet);
        if effective_min > effective_max {
            return Err(LobbyError::ConfigDenied("Min bet cannot exceed max bet".into()));
        }

        let pending = PendingConfig {
            starting_bankroll,
            min_bet,
            max_bet,
            shoe_decks,
            reshuffle_when_remaining_pct,
        };
        let pending_json = json!({
            "starting_bankroll": pending.starting_bankroll,
            "min_bet": pending.min_bet,
            "max_bet": pending.max_bet,
            "shoe_decks": pending.shoe_decks,
            "reshuffle_when_remaining_pct": pending.reshuffle_when_remaining_pct,
        });
        table.meta.pending_config = Some(pending);
        emit(&mut events, "ADMIN_CONFIG_UPDATED", json!({"pending": pending_json}));
        Ok(pending_json)
    });
    lock.release();

    match outcome {
        Some(Ok(_)) => {
            let snapshot = store.get_table(table_id).ok_or(LobbyError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(LobbyError::TableNotFound),
    }
}
