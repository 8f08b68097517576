//! The round engine: the phase state machine driving bets, the deal,
//! player actions, the dealer's draw, settlement, and the continue vote.
//!
//! Every public entry point acquires the table lock, mutates the
//! `TableRecord` in place, collects semantic events into a buffer, and
//! returns that buffer alongside the post-mutation snapshot. Callers
//! (the WS dispatcher, the ticker) are responsible for appending the
//! buffered events to the stream and broadcasting them only after the
//! lock has been released.

use std::time::{SystemTime, UNIX_EPOCH};

use blackjack_shared::{hand_value, Action, Card, DealerStep, NoBetBehavior, Phase, Soft17Mode, Soft17Rule, TieResult, Vote};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;

use crate::lock::{LockError, TableLock};
use crate::state::{HandRecord, PlayerStatus, TableRecord};
use crate::store::Store;

/// Timing constants governing the pace of animation-synced transitions.
/// Not user-configurable; the same values drive every table.
pub mod timing {
    pub const DEAL_GAP_MS: i64 = 320;
    pub const DEAL_SHUFFLE_MS: i64 = 1500;
    pub const DEAL_ANIM_MS: i64 = 560;
    pub const DEALER_GAP_MS: i64 = 800;
    pub const DEALER_REVEAL_MS: i64 = 1000;
    pub const DEALER_STEP_MS: i64 = 800;
    pub const DEALER_ANIM_DELAY_MS: i64 = 150;
    pub const BET_TO_DEAL_PAUSE_MS: i64 = 900;
    pub const CHIPS_COLLECT_MS: i64 = 700;
    pub const DOUBLE_ANNOUNCE_MS: i64 = 1000;
    pub const BUST_ANNOUNCE_MS: i64 = 1400;
    pub const BUST_REVEAL_DELAY_MS: i64 = DEAL_GAP_MS + DEAL_ANIM_MS;
    pub const REQUEST_DEDUP_TTL_MS: i64 = 120_000;
}

/// Wall-clock source, injectable so tests can drive the state machine
/// without real sleeps. All deadlines in `TableMeta` are absolute
/// milliseconds produced by this trait.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}

#[cfg(any(test, feature = "test-util"))]
pub struct FakeClock(std::sync::atomic::AtomicI64);

#[cfg(any(test, feature = "test-util"))]
impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(start_ms))
    }

    pub fn set(&self, ms: i64) {
        self.0.store(ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("table not found")]
    TableNotFound,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("{0}")]
    BetDenied(String),
    #[error("{0}")]
    ActionDenied(String),
    #[error("{0}")]
    VoteDenied(String),
}

/// One semantic event queued during a locked mutation, ready to be appended
/// to the stream and broadcast once the lock is released. `owner_seat` is
/// set only for `CARD_DEALT{to: "player"}` events, letting personalization
/// reconstruct the live view for that seat.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event_type: String,
    pub payload: Value,
    pub owner_seat: Option<u32>,
}

pub(crate) fn emit(events: &mut Vec<QueuedEvent>, event_type: &str, payload: Value) {
    events.push(QueuedEvent {
        event_type: event_type.to_string(),
        payload,
        owner_seat: None,
    });
}

fn emit_card_dealt(events: &mut Vec<QueuedEvent>, payload: Value, owner_seat: Option<u32>) {
    events.push(QueuedEvent {
        event_type: "CARD_DEALT".to_string(),
        payload,
        owner_seat,
    });
}

pub(crate) fn is_paused(table: &TableRecord, now: i64) -> bool {
    table.meta.is_paused(now)
}

pub(crate) fn pause_for(table: &mut TableRecord, now: i64, duration_ms: i64) {
    table.meta.extend_pause(now + duration_ms);
}

fn seat_display_name(table: &TableRecord, seat: u32) -> String {
    if seat == 0 {
        return "PLAYER".to_string();
    }
    match table.player_at_seat(seat) {
        Some(player) if !player.name.trim().is_empty() => player.name.to_uppercase(),
        _ => format!("PLAYER {seat}"),
    }
}

pub(crate) fn emit_announcement(
    events: &mut Vec<QueuedEvent>,
    table: &mut TableRecord,
    now: i64,
    title: &str,
    tone: &str,
    duration_ms: i64,
    target_seat: Option<u32>,
) {
    let mut payload = json!({
        "title": title,
        "variant": "reveal",
        "tone": tone,
        "duration_ms": duration_ms,
    });
    if let Some(seat) = target_seat {
        if seat > 0 {
            payload["target_seat"] = json!(seat);
        }
    }
    emit(events, "ANNOUNCEMENT", payload);
    pause_for(table, now, duration_ms);
}

fn next_hand_id(table: &mut TableRecord) -> String {
    format!("{}-hand-{}", table.table_id, table.meta.next_event_seq())
}

fn ensure_shoe(table: &mut TableRecord, rng: &mut impl rand::Rng) {
    let decks = table.meta.shoe_decks.max(1);
    let reshuffle_pct = table.meta.reshuffle_when_remaining_pct;
    if table.shoe.is_empty() {
        rebuild_shoe(table, decks, reshuffle_pct, rng);
        return;
    }
    if table.shoe.len() <= table.shoe_meta.cut_index {
        rebuild_shoe(table, decks, reshuffle_pct, rng);
    }
}

fn rebuild_shoe(table: &mut TableRecord, decks: u32, reshuffle_pct: f64, rng: &mut impl rand::Rng) {
    let mut codes: Vec<String> = Vec::with_capacity(decks as usize * 52);
    for _ in 0..decks {
        for &suit in blackjack_shared::Suit::ALL.iter() {
            for &rank in blackjack_shared::Rank::ALL.iter() {
                codes.push(Card::new(suit, rank).code());
            }
        }
    }
    codes.shuffle(rng);
    table.shoe_meta.decks = decks;
    table.shoe_meta.cut_index = (codes.len() as f64 * reshuffle_pct) as usize;
    table.shoe = codes;
}

fn draw_card(table: &mut TableRecord, rng: &mut impl rand::Rng) -> String {
    if table.shoe.is_empty() {
        ensure_shoe(table, rng);
    }
    table.shoe.pop().expect("shoe replenished by ensure_shoe")
}

fn set_hand(table: &mut TableRecord, hand_id: &str, cards: Vec<String>) {
    let parsed: Vec<Card> = cards.iter().filter_map(|c| Card::parse(c)).collect();
    let (total, is_soft) = hand_value(&parsed);
    table.hands.insert(
        hand_id.to_string(),
        HandRecord {
            cards,
            total,
            is_soft,
            face_down: false,
        },
    );
}

fn hand_total(table: &TableRecord, hand_id: &str) -> (u32, bool) {
    match table.hands.get(hand_id) {
        Some(h) => (h.total, h.is_soft),
        None => (0, false),
    }
}

/// Mirrors `_betting_players`: active players with `bet > 0`, sorted by seat.
fn betting_seats(table: &TableRecord) -> Vec<u32> {
    let mut seats: Vec<u32> = table.betting_players().iter().map(|p| p.seat).collect();
    seats.sort_unstable();
    seats
}

fn clear_hands(table: &mut TableRecord) {
    table.hands.clear();
    for player in table.players.values_mut() {
        player.hand_ids.clear();
    }
}

fn clear_bets(table: &mut TableRecord) {
    for player in table.players.values_mut() {
        player.bet = 0;
        player.bet_submitted = false;
    }
}

/// Calls `f` with a mutable handle on the table while holding its lock,
/// returning `None` if the table doesn't exist or the lock can't be
/// acquired.
pub(crate) fn with_locked_table<R>(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
    f: impl FnOnce(&mut TableRecord, i64, &mut Vec<QueuedEvent>) -> R,
) -> Result<(R, TableRecord, Vec<QueuedEvent>), RoundError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;
    let mut events = Vec::new();
    let result = store.with_table(table_id, |table| f(table, now, &mut events));
    lock.release();
    match result {
        Some(r) => {
            let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
            Ok((r, snapshot, events))
        }
        None => Err(RoundError::TableNotFound),
    }
}

// ============================================================================
// PLACE_BET
// ============================================================================

pub fn place_bet(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
    player_id: &str,
    amount: i64,
    request_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;

    let preflight = store.get_table(table_id);
    let phase_ok = preflight.as_ref().map(|t| t.meta.phase == Phase::WaitingForBets).unwrap_or(false);
    if !phase_ok {
        lock.release();
        return Err(RoundError::BetDenied("Not accepting bets in current phase".into()));
    }

    let dedup_key = format!("dedup:{table_id}:{request_id}");
    if !store.set_nx_px(&dedup_key, "1", timing::REQUEST_DEDUP_TTL_MS, now) {
        let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
        lock.release();
        return Ok((snapshot, Vec::new()));
    }

    let deadline = preflight.as_ref().map(|t| t.meta.bet_deadline_ts).unwrap_or(0);
    if deadline != 0 && now > deadline {
        let mut events = Vec::new();
        let result = store.with_table(table_id, |table| finalize_bets_and_deal(table, now, rng, &mut events));
        lock.release();
        return match result {
            Some(()) => {
                let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
                Ok((snapshot, events))
            }
            None => Err(RoundError::TableNotFound),
        };
    }

    let mut events = Vec::new();
    let outcome = store.with_table(table_id, |table| -> Result<(), RoundError> {
        let min_bet = table.meta.min_bet;
        let max_bet = table.meta.max_bet;
        let player = table
            .players
            .get(player_id)
            .cloned()
            .ok_or_else(|| RoundError::BetDenied("Unknown player".into()))?;

        if amount != 0 {
            if !player.is_eligible_to_bet(min_bet) {
                return Err(RoundError::BetDenied("Insufficient bankroll to bet".into()));
            }
            if amount < min_bet || amount > max_bet {
                return Err(RoundError::BetDenied("Bet amount out of bounds".into()));
            }
        }
        if player.bet > 0 {
            return Ok(());
        }

        let seat = player.seat;
        if let Some(p) = table.players.get_mut(player_id) {
            if amount > 0 {
                p.bankroll -= amount;
            }
            p.bet = amount;
            p.bet_submitted = true;
            p.last_seen_ts = now;
        }
        emit(&mut events, "BET_PLACED", json!({"player_id": player_id, "seat": seat, "amount": amount}));
        maybe_advance_after_bets(table, now, &mut events);
        Ok(())
    });
    lock.release();

    match outcome {
        Some(Ok(())) => {
            let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(RoundError::TableNotFound),
    }
}

fn maybe_advance_after_bets(table: &mut TableRecord, now: i64, events: &mut Vec<QueuedEvent>) {
    if is_paused(table, now) {
        table.meta.deal_pending = true;
        return;
    }
    let min_bet = table.meta.min_bet;
    let all_submitted = table
        .active_players()
        .filter(|p| p.is_eligible_to_bet(min_bet))
        .all(|p| p.bet_submitted);
    if !all_submitted {
        return;
    }
    let _ = events;
    pause_for(table, now, timing::BET_TO_DEAL_PAUSE_MS);
    table.meta.deal_pending = true;
}

fn finalize_bets_and_deal(
    table: &mut TableRecord,
    now: i64,
    rng: &mut impl rand::Rng,
    events: &mut Vec<QueuedEvent>,
) {
    if is_paused(table, now) {
        table.meta.deal_pending = true;
        return;
    }
    let min_bet = table.meta.min_bet;
    let no_bet_behavior = table.meta.no_bet_behavior;
    let player_ids: Vec<String> = table.players.keys().cloned().collect();
    for player_id in player_ids {
        let (eligible, submitted, bankroll, seat) = {
            let p = &table.players[&player_id];
            (p.is_eligible_to_bet(min_bet), p.bet_submitted, p.bankroll, p.seat)
        };
        if !eligible || submitted {
            continue;
        }
        if no_bet_behavior == NoBetBehavior::AutoMinBet && bankroll >= min_bet {
            let p = table.players.get_mut(&player_id).unwrap();
            p.bankroll -= min_bet;
            p.bet = min_bet;
            p.bet_submitted = true;
            emit(events, "BET_PLACED", json!({"player_id": player_id, "seat": seat, "amount": min_bet}));
            continue;
        }
        let p = table.players.get_mut(&player_id).unwrap();
        p.bet = 0;
        p.bet_submitted = true;
    }
    deal_initial(table, now, rng, events);
}

// ============================================================================
// DEAL_INITIAL
// ============================================================================

fn deal_initial(table: &mut TableRecord, now: i64, rng: &mut impl rand::Rng, events: &mut Vec<QueuedEvent>) {
    ensure_shoe(table, rng);
    clear_hands(table);
    table.meta.phase = Phase::DealInitial;
    table.meta.dealer_revealed = false;
    table.meta.clear_pending();
    emit(events, "PHASE_CHANGED", json!({"phase": "DEAL_INITIAL"}));

    let rule = match table.meta.dealer_soft_17_mode {
        Soft17Mode::S17 => Soft17Rule::S17,
        Soft17Mode::H17 => Soft17Rule::H17,
        Soft17Mode::RandomPerRound => {
            if rng.gen_bool(0.5) {
                Soft17Rule::S17
            } else {
                Soft17Rule::H17
            }
        }
    };
    table.meta.dealer_soft_17_rule = Some(rule);
    emit(events, "ROUND_STARTED", json!({"dealer_soft_17_rule": rule.as_str()}));

    let seats = betting_seats(table);
    if seats.is_empty() {
        if table.meta.auto_end_if_no_active_bettors {
            table.meta.phase = Phase::SessionEnded;
            emit(events, "PHASE_CHANGED", json!({"phase": "SESSION_ENDED"}));
            emit(events, "SESSION_ENDED", json!({"table_id": table.table_id}));
            return;
        }
        clear_bets(table);
        clear_hands(table);
        table.meta.phase = Phase::WaitingForBets;
        table.meta.bet_deadline_ts = bet_deadline(table, now);
        table.meta.clear_pending();
        table.meta.dealer_revealed = false;
        emit(events, "PHASE_CHANGED", json!({"phase": "WAITING_FOR_BETS"}));
        return;
    }

    let seat_to_player: std::collections::HashMap<u32, String> = seats
        .iter()
        .map(|&seat| (seat, table.seats[&seat].clone()))
        .collect();
    let mut hand_ids: std::collections::HashMap<u32, String> = std::collections::HashMap::new();

    let deal_started_ts = now + timing::DEAL_SHUFFLE_MS;
    emit(events, "DEAL_STARTED", json!({"deal_started_ts": deal_started_ts}));

    for (idx, &seat) in seats.iter().enumerate() {
        let hand_id = next_hand_id(table);
        let card = draw_card(table, rng);
        set_hand(table, &hand_id, vec![card.clone()]);
        let player_id = seat_to_player[&seat].clone();
        table.players.get_mut(&player_id).unwrap().hand_ids = vec![hand_id.clone()];
        hand_ids.insert(seat, hand_id.clone());
        emit_card_dealt(
            events,
            json!({
                "to": "player", "seat": seat, "hand_id": hand_id, "card_index": 0,
                "card": card, "face_down": false,
                "deal_started_ts": deal_started_ts, "deal_seq": idx, "deal_gap_ms": timing::DEAL_GAP_MS,
            }),
            Some(seat),
        );
    }

    let dealer_hand_id = next_hand_id(table);
    let dealer_up = draw_card(table, rng);
    set_hand(table, &dealer_hand_id, vec![dealer_up.clone()]);
    table.meta.dealer_hand_id = Some(dealer_hand_id.clone());
    emit_card_dealt(
        events,
        json!({
            "to": "dealer", "card": dealer_up, "face_down": false,
            "deal_started_ts": deal_started_ts, "deal_seq": seats.len(), "deal_gap_ms": timing::DEAL_GAP_MS,
        }),
        None,
    );

    for (idx, &seat) in seats.iter().enumerate() {
        let hand_id = hand_ids[&seat].clone();
        let card = draw_card(table, rng);
        let mut cards = table.hands[&hand_id].cards.clone();
        cards.push(card.clone());
        set_hand(table, &hand_id, cards);
        emit_card_dealt(
            events,
            json!({
                "to": "player", "seat": seat, "hand_id": hand_id, "card_index": 1,
                "card": card, "face_down": false,
                "deal_started_ts": deal_started_ts, "deal_seq": seats.len() + 1 + idx, "deal_gap_ms": timing::DEAL_GAP_MS,
            }),
            Some(seat),
        );
    }

    let dealer_hole = draw_card(table, rng);
    set_hand(table, &dealer_hand_id, vec![dealer_up, dealer_hole]);
    emit_card_dealt(
        events,
        json!({
            "to": "dealer", "card": Value::Null, "face_down": true,
            "deal_started_ts": deal_started_ts, "deal_seq": seats.len() * 2 + 1, "deal_gap_ms": timing::DEAL_GAP_MS,
        }),
        None,
    );

    let max_seq = seats.len() * 2 + 1;
    table.meta.turn_start_due_ts = deal_started_ts + max_seq as i64 * timing::DEAL_GAP_MS + timing::DEAL_ANIM_MS;
    table.meta.turn_seat = 0;
    table.meta.deal_pending = false;
    table.meta.dealer_revealed = false;
    table.meta.pending_double_due_ts = 0;
    table.meta.pending_double_seat = 0;
    table.meta.pending_double_player_id = None;
    table.meta.pending_double_hand_id = None;
    table.meta.pending_bust_announce_ts = 0;
    table.meta.pending_bust_seat = 0;
    table.meta.pending_bust_player_id = None;
}

/// Returns the next `bet_deadline_ts`, or `0` (meaning no deadline, bets
/// never time out on their own) when `bet_time_seconds` is unset, matching
/// the reference implementation's `BET_TIME_SECONDS=0` default.
pub(crate) fn bet_deadline(table: &TableRecord, now: i64) -> i64 {
    if table.meta.bet_time_seconds == 0 {
        0
    } else {
        now + table.meta.bet_time_seconds as i64 * 1000
    }
}

pub fn advance_deal_pending(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if table.meta.phase != Phase::WaitingForBets || !table.meta.deal_pending || is_paused(table, now) {
            return;
        }
        table.meta.deal_pending = false;
        finalize_bets_and_deal(table, now, rng, events);
    })?;
    Ok((snapshot, events))
}

pub fn finalize_bets(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
    force_timeout: bool,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::WaitingForBets {
            return;
        }
        let deadline = table.meta.bet_deadline_ts;
        if deadline == 0 {
            return;
        }
        if !force_timeout && now <= deadline {
            return;
        }
        finalize_bets_and_deal(table, now, rng, events);
    })?;
    Ok((snapshot, events))
}

pub fn advance_turn_start(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if table.meta.phase != Phase::DealInitial {
            return;
        }
        let due_ts = table.meta.turn_start_due_ts;
        if due_ts == 0 || is_paused(table, now) || now < due_ts {
            return;
        }
        let seats = betting_seats(table);
        if seats.is_empty() {
            table.meta.turn_start_due_ts = 0;
            dealer_turn_and_settle(table, now, events);
            return;
        }
        let first_seat = seats[0];
        table.meta.phase = Phase::PlayerTurns;
        table.meta.turn_seat = first_seat;
        table.meta.turn_start_due_ts = 0;
        emit(events, "PHASE_CHANGED", json!({"phase": "PLAYER_TURNS"}));
        emit(events, "TURN_STARTED", json!({"seat": first_seat}));
        let title = format!("{}'S TURN", seat_display_name(table, first_seat));
        emit_announcement(events, table, now, &title, "neutral", 3000, None);
    })?;
    Ok((snapshot, events))
}

// ============================================================================
// PLAYER ACTIONS
// ============================================================================

pub fn action(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
    player_id: &str,
    player_action: Action,
    request_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;

    let precheck = store.get_table(table_id);
    let result = (|| -> Result<(), RoundError> {
        let table = precheck.as_ref().ok_or(RoundError::TableNotFound)?;
        if table.meta.phase != Phase::PlayerTurns {
            return Err(RoundError::ActionDenied("Actions not allowed in current phase".into()));
        }
        if is_paused(table, now) {
            return Err(RoundError::ActionDenied("Table is paused".into()));
        }
        if table.meta.pending_advance_ts != 0 && now < table.meta.pending_advance_ts {
            return Err(RoundError::ActionDenied("Waiting for turn resolution".into()));
        }
        if table.meta.pending_bust_announce_ts != 0 {
            return Err(RoundError::ActionDenied("Waiting for bust reveal".into()));
        }
        if table.meta.pending_double_due_ts != 0 {
            return Err(RoundError::ActionDenied("Waiting for double-down resolution".into()));
        }
        Ok(())
    })();
    if let Err(e) = result {
        lock.release();
        return Err(e);
    }

    let dedup_key = format!("dedup:{table_id}:{request_id}");
    if !store.set_nx_px(&dedup_key, "1", timing::REQUEST_DEDUP_TTL_MS, now) {
        let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
        lock.release();
        return Ok((snapshot, Vec::new()));
    }

    let mut events = Vec::new();
    let outcome = store.with_table(table_id, |table| -> Result<(), RoundError> {
        let seat = table
            .players
            .get(player_id)
            .map(|p| p.seat)
            .ok_or_else(|| RoundError::ActionDenied("Player not seated".into()))?;
        if table.meta.turn_seat != seat {
            return Err(RoundError::ActionDenied("Not your turn".into()));
        }

        let pending_seat = table.meta.pending_advance_seat;
        let pending_ts = table.meta.pending_advance_ts;
        if pending_seat != 0 && pending_ts > 0 {
            return Err(RoundError::ActionDenied("Waiting for turn advance".into()));
        }
        if pending_seat != 0 && pending_ts == 0 {
            if seat != pending_seat {
                return Err(RoundError::ActionDenied("Not your turn".into()));
            }
            if player_action != Action::Next {
                return Err(RoundError::ActionDenied("Waiting for bust acknowledgment".into()));
            }
            table.meta.pending_advance_ts = 0;
            table.meta.pending_advance_seat = 0;
            table.meta.pending_bust_announce_ts = 0;
            table.meta.pending_bust_seat = 0;
            table.meta.pending_bust_player_id = None;
            advance_turn(table, seat, now, &mut events);
            return Ok(());
        }

        let hand_id = table
            .players
            .get(player_id)
            .and_then(|p| p.hand_ids.first().cloned())
            .ok_or_else(|| RoundError::ActionDenied("No active hand".into()))?;

        emit(&mut events, "PLAYER_ACTION", json!({"player_id": player_id, "seat": seat, "action": player_action.as_str()}));

        match player_action {
            Action::Hit => {
                let new_card = draw_card(table, rng);
                let mut cards = table.hands[&hand_id].cards.clone();
                cards.push(new_card.clone());
                let card_index = cards.len() - 1;
                set_hand(table, &hand_id, cards);
                emit_card_dealt(
                    &mut events,
                    json!({
                        "to": "player", "seat": seat, "hand_id": hand_id, "card_index": card_index,
                        "card": new_card, "face_down": false,
                        "deal_started_ts": now + timing::DEAL_GAP_MS, "deal_seq": 0, "deal_gap_ms": timing::DEAL_GAP_MS,
                    }),
                    Some(seat),
                );
                let (total, _) = hand_total(table, &hand_id);
                if total > 21 {
                    table.meta.pending_advance_ts = 0;
                    table.meta.pending_advance_seat = seat;
                    table.meta.pending_bust_announce_ts = now + timing::BUST_REVEAL_DELAY_MS;
                    table.meta.pending_bust_seat = seat;
                    table.meta.pending_bust_player_id = Some(player_id.to_string());
                    table.meta.pending_double_due_ts = 0;
                    table.meta.pending_double_seat = 0;
                    table.meta.pending_double_player_id = None;
                    table.meta.pending_double_hand_id = None;
                    emit(&mut events, "PLAYER_BUST", json!({"player_id": player_id, "seat": seat, "advance_at_ts": 0, "requires_ack": true}));
                }
                Ok(())
            }
            Action::Stand => {
                advance_turn(table, seat, now, &mut events);
                Ok(())
            }
            Action::Double => {
                let cards_len = table.hands[&hand_id].cards.len();
                if cards_len != 2 {
                    return Err(RoundError::ActionDenied("Double down only allowed on first decision".into()));
                }
                let player = table.players.get(player_id).unwrap();
                let bet = player.bet;
                if bet <= 0 {
                    return Err(RoundError::ActionDenied("Cannot double without an active bet".into()));
                }
                if player.bankroll < bet {
                    return Err(RoundError::ActionDenied("Insufficient bankroll to double down".into()));
                }
                let doubled = bet * 2;
                {
                    let p = table.players.get_mut(player_id).unwrap();
                    p.bankroll -= bet;
                    p.bet = doubled;
                }
                emit(&mut events, "BET_DOUBLED", json!({"player_id": player_id, "seat": seat, "amount": doubled, "added": bet}));
                let title = format!("{} DOUBLES DOWN", seat_display_name(table, seat));
                emit_announcement(&mut events, table, now, &title, "neutral", timing::DOUBLE_ANNOUNCE_MS, None);
                table.meta.pending_double_due_ts = now + timing::DOUBLE_ANNOUNCE_MS;
                table.meta.pending_double_seat = seat;
                table.meta.pending_double_player_id = Some(player_id.to_string());
                table.meta.pending_double_hand_id = Some(hand_id);
                table.meta.pending_advance_ts = 0;
                table.meta.pending_advance_seat = 0;
                table.meta.pending_bust_announce_ts = 0;
                table.meta.pending_bust_seat = 0;
                table.meta.pending_bust_player_id = None;
                Ok(())
            }
            Action::Next => Err(RoundError::ActionDenied("No bust to acknowledge".into())),
        }
    });
    lock.release();

    match outcome {
        Some(Ok(())) => {
            let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
            Ok((snapshot, events))
        }
        Some(Err(e)) => Err(e),
        None => Err(RoundError::TableNotFound),
    }
}

fn advance_turn(table: &mut TableRecord, current_seat: u32, now: i64, events: &mut Vec<QueuedEvent>) {
    let seats = betting_seats(table);
    let next_seat = seats.into_iter().find(|&s| s > current_seat);
    match next_seat {
        None => dealer_turn_and_settle(table, now, events),
        Some(next_seat) => {
            table.meta.turn_seat = next_seat;
            table.meta.pending_advance_ts = 0;
            table.meta.pending_advance_seat = 0;
            table.meta.pending_bust_announce_ts = 0;
            table.meta.pending_bust_seat = 0;
            table.meta.pending_bust_player_id = None;
            table.meta.pending_double_due_ts = 0;
            table.meta.pending_double_seat = 0;
            table.meta.pending_double_player_id = None;
            table.meta.pending_double_hand_id = None;
            emit(events, "TURN_STARTED", json!({"seat": next_seat}));
            let title = format!("{}'S TURN", seat_display_name(table, next_seat));
            emit_announcement(events, table, now, &title, "neutral", 3000, None);
        }
    }
}

pub fn advance_pending_turn(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::PlayerTurns {
            return;
        }
        let pending_ts = table.meta.pending_advance_ts;
        let pending_seat = table.meta.pending_advance_seat;
        if pending_ts == 0 || pending_seat == 0 || now < pending_ts {
            return;
        }
        table.meta.pending_advance_ts = 0;
        table.meta.pending_advance_seat = 0;
        advance_turn(table, pending_seat, now, events);
    })?;
    Ok((snapshot, events))
}

pub fn advance_bust_pending(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::PlayerTurns {
            return;
        }
        let due_ts = table.meta.pending_bust_announce_ts;
        let seat = table.meta.pending_bust_seat;
        if due_ts == 0 || seat == 0 || table.meta.pending_bust_player_id.is_none() || now < due_ts {
            return;
        }
        if table.meta.turn_seat != seat {
            table.meta.pending_bust_announce_ts = 0;
            table.meta.pending_bust_seat = 0;
            table.meta.pending_bust_player_id = None;
            return;
        }
        let title = format!("{} BUSTS", seat_display_name(table, seat));
        emit_announcement(events, table, now, &title, "loss", timing::BUST_ANNOUNCE_MS, Some(seat));
        table.meta.pending_bust_announce_ts = 0;
        table.meta.pending_bust_seat = 0;
        table.meta.pending_bust_player_id = None;
    })?;
    Ok((snapshot, events))
}

pub fn advance_double_pending(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::PlayerTurns {
            return;
        }
        let due_ts = table.meta.pending_double_due_ts;
        let seat = table.meta.pending_double_seat;
        let player_id = table.meta.pending_double_player_id.clone();
        let hand_id = table.meta.pending_double_hand_id.clone();
        let (Some(player_id), Some(hand_id)) = (player_id, hand_id) else { return };
        if due_ts == 0 || seat == 0 || now < due_ts {
            return;
        }
        if table.meta.turn_seat != seat {
            table.meta.clear_pending();
            return;
        }
        if !table.hands.contains_key(&hand_id) {
            table.meta.clear_pending();
            advance_turn(table, seat, now, events);
            return;
        }
        let new_card = draw_card(table, rng);
        let mut cards = table.hands[&hand_id].cards.clone();
        cards.push(new_card.clone());
        let card_index = cards.len() - 1;
        set_hand(table, &hand_id, cards);
        emit_card_dealt(
            events,
            json!({
                "to": "player", "seat": seat, "hand_id": hand_id, "card_index": card_index,
                "card": new_card, "face_down": false,
                "deal_started_ts": now + timing::DEAL_GAP_MS, "deal_seq": 0, "deal_gap_ms": timing::DEAL_GAP_MS,
            }),
            Some(seat),
        );
        table.meta.clear_pending();

        let (total, _) = hand_total(table, &hand_id);
        if total > 21 {
            table.meta.pending_advance_seat = seat;
            table.meta.pending_bust_announce_ts = now + timing::BUST_REVEAL_DELAY_MS;
            table.meta.pending_bust_seat = seat;
            table.meta.pending_bust_player_id = Some(player_id.clone());
            emit(events, "PLAYER_BUST", json!({"player_id": player_id, "seat": seat, "advance_at_ts": 0, "requires_ack": true}));
        } else {
            table.meta.pending_advance_ts = now + timing::DEAL_GAP_MS + timing::DEAL_ANIM_MS;
            table.meta.pending_advance_seat = seat;
        }
    })?;
    Ok((snapshot, events))
}

pub fn advance_inactive_turn(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::PlayerTurns {
            return;
        }
        if table.meta.pending_advance_ts != 0 || table.meta.pending_bust_announce_ts != 0 || table.meta.pending_double_due_ts != 0 {
            return;
        }
        let turn_seat = table.meta.turn_seat;
        if turn_seat == 0 {
            return;
        }
        let active = table
            .player_at_seat(turn_seat)
            .map(|p| p.status == PlayerStatus::Active)
            .unwrap_or(true);
        if active {
            return;
        }
        advance_turn(table, turn_seat, now, events);
    })?;
    Ok((snapshot, events))
}

// ============================================================================
// DEALER_TURN
// ============================================================================

fn dealer_turn_and_settle(table: &mut TableRecord, now: i64, events: &mut Vec<QueuedEvent>) {
    table.meta.phase = Phase::DealerTurn;
    table.meta.turn_seat = 0;
    table.meta.clear_pending();
    table.meta.dealer_revealed = false;
    table.meta.dealer_step = DealerStep::Reveal;
    table.meta.dealer_step_due_ts = now + timing::DEALER_REVEAL_MS;
    emit(events, "PHASE_CHANGED", json!({"phase": "DEALER_TURN"}));
    if table.meta.dealer_soft_17_rule.is_none() {
        table.meta.dealer_soft_17_rule = Some(Soft17Rule::S17);
    }
}

pub fn advance_dealer(
    store: &dyn Store,
    clock: &dyn Clock,
    rng: &mut impl rand::Rng,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if is_paused(table, now) || table.meta.phase != Phase::DealerTurn {
            return;
        }
        let step = table.meta.dealer_step;
        let due_ts = table.meta.dealer_step_due_ts;
        if step == DealerStep::None || due_ts == 0 {
            table.meta.dealer_step = DealerStep::Reveal;
            table.meta.dealer_step_due_ts = now + timing::DEALER_REVEAL_MS;
            return;
        }
        if now < due_ts {
            return;
        }

        let rule = table.meta.dealer_soft_17_rule.unwrap_or(Soft17Rule::S17);
        let dealer_hand_id = match &table.meta.dealer_hand_id {
            Some(id) => id.clone(),
            None => {
                let id = next_hand_id(table);
                table.meta.dealer_hand_id = Some(id.clone());
                id
            }
        };

        match step {
            DealerStep::Reveal => {
                let title = "DEALER REVEALS";
                emit_announcement(events, table, now, title, "dealer", 3000, None);
                table.meta.dealer_step = DealerStep::RevealWait;
                table.meta.dealer_step_due_ts = now;
            }
            DealerStep::RevealWait => {
                let cards = table.hands.get(&dealer_hand_id).map(|h| h.cards.clone()).unwrap_or_default();
                if !cards.is_empty() {
                    emit(
                        events,
                        "DEALER_REVEAL_HOLE",
                        json!({
                            "cards": cards,
                            "deal_started_ts": now + timing::DEALER_ANIM_DELAY_MS,
                            "deal_seq": 0,
                            "deal_gap_ms": timing::DEALER_GAP_MS,
                        }),
                    );
                }
                table.meta.dealer_revealed = true;
                table.meta.dealer_step = DealerStep::Draw;
                table.meta.dealer_step_due_ts = now + timing::DEALER_STEP_MS;
            }
            DealerStep::Draw => {
                let mut cards = table.hands.get(&dealer_hand_id).map(|h| h.cards.clone()).unwrap_or_default();
                let (total, is_soft) = {
                    let parsed: Vec<Card> = cards.iter().filter_map(|c| Card::parse(c)).collect();
                    hand_value(&parsed)
                };
                let timeline = json!({
                    "deal_started_ts": now + timing::DEALER_ANIM_DELAY_MS,
                    "deal_seq": 0,
                    "deal_gap_ms": timing::DEALER_GAP_MS,
                });
                if total > 21 {
                    let mut payload = json!({"action": "bust", "total": total});
                    merge_json(&mut payload, &timeline);
                    emit(events, "DEALER_ACTION", payload);
                    settle_after_dealer(table, now, events);
                    return;
                }
                let should_draw = total < 17 || (total == 17 && is_soft && rule == Soft17Rule::H17);
                if should_draw {
                    let new_card = draw_card(table, rng);
                    cards.push(new_card.clone());
                    set_hand(table, &dealer_hand_id, cards.clone());
                    let parsed: Vec<Card> = cards.iter().filter_map(|c| Card::parse(c)).collect();
                    let (new_total, _) = hand_value(&parsed);
                    let mut payload = json!({"action": "draw", "card": new_card, "total": new_total});
                    merge_json(&mut payload, &timeline);
                    emit(events, "DEALER_ACTION", payload);
                    table.meta.dealer_step = DealerStep::Draw;
                    table.meta.dealer_step_due_ts = now + timing::DEALER_STEP_MS;
                } else {
                    let mut payload = json!({"action": "stand", "total": total});
                    merge_json(&mut payload, &timeline);
                    emit(events, "DEALER_ACTION", payload);
                    settle_after_dealer(table, now, events);
                }
            }
            DealerStep::None => {}
        }
    })?;
    Ok((snapshot, events))
}

fn merge_json(base: &mut Value, extra: &Value) {
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
}

fn settle_after_dealer(table: &mut TableRecord, now: i64, events: &mut Vec<QueuedEvent>) {
    table.meta.phase = Phase::Settle;
    table.meta.clear_pending();
    table.meta.dealer_step = DealerStep::None;
    table.meta.dealer_step_due_ts = 0;
    table.meta.dealer_revealed = true;
    table.meta.settle_pending = true;
    table.meta.settle_collect_started = false;
    emit(events, "PHASE_CHANGED", json!({"phase": "SETTLE"}));

    let dealer_hand_id = table.meta.dealer_hand_id.clone();
    let dealer_cards = dealer_hand_id.as_ref().and_then(|id| table.hands.get(id)).map(|h| h.cards.clone()).unwrap_or_default();
    let dealer_total = hand_total_of(&dealer_cards);
    let dealer_blackjack = dealer_total == 21 && dealer_cards.len() == 2;
    let blackjack_payout = table.meta.blackjack_payout;

    let player_ids: Vec<String> = table.players.keys().cloned().collect();
    for player_id in player_ids {
        let (bet, hand_id, seat) = {
            let p = &table.players[&player_id];
            (p.bet, p.hand_ids.first().cloned(), p.seat)
        };
        if bet <= 0 {
            continue;
        }
        let Some(hand_id) = hand_id else { continue };
        let player_cards = table.hands.get(&hand_id).map(|h| h.cards.clone()).unwrap_or_default();
        let player_total = hand_total_of(&player_cards);
        let player_blackjack = player_total == 21 && player_cards.len() == 2;

        let (payout, reason) = if player_blackjack && !dealer_blackjack {
            (bet + ((bet as f64) * blackjack_payout).round() as i64, "BLACKJACK")
        } else if dealer_blackjack && !player_blackjack {
            (0, "DEALER_BLACKJACK")
        } else if player_total > 21 {
            (0, "BUST")
        } else if dealer_total > 21 {
            (bet * 2, "DEALER_BUST")
        } else if player_total > dealer_total {
            (bet * 2, "WIN")
        } else if player_total < dealer_total {
            (0, "LOSE")
        } else {
            (bet, "PUSH")
        };

        if payout != 0 {
            table.players.get_mut(&player_id).unwrap().bankroll += payout;
        }
        emit(events, "PAYOUT", json!({"player_id": player_id, "seat": seat, "delta": payout, "reason": reason}));
        let display_name = seat_display_name(table, seat);
        match reason {
            "WIN" | "BLACKJACK" | "DEALER_BUST" => {
                let title = format!("{display_name} WINS");
                emit_announcement(events, table, now, &title, "win", 3000, None);
            }
            "PUSH" => {
                let title = format!("{display_name} PUSHES");
                emit_announcement(events, table, now, &title, "neutral", 3000, None);
            }
            "BUST" => {
                let title = format!("{display_name} BUSTS");
                emit_announcement(events, table, now, &title, "loss", 3000, None);
            }
            _ => {
                let title = format!("{display_name} LOSES");
                emit_announcement(events, table, now, &title, "loss", 3000, None);
            }
        }
    }
}

fn hand_total_of(cards: &[String]) -> u32 {
    let parsed: Vec<Card> = cards.iter().filter_map(|c| Card::parse(c)).collect();
    hand_value(&parsed).0
}

pub fn advance_settle(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        if table.meta.phase != Phase::Settle || !table.meta.settle_pending || is_paused(table, now) {
            return;
        }
        if !table.meta.settle_collect_started {
            emit(events, "CHIPS_COLLECT", json!({"duration_ms": timing::CHIPS_COLLECT_MS}));
            pause_for(table, now, timing::CHIPS_COLLECT_MS);
            table.meta.settle_collect_started = true;
            return;
        }

        let dealer_hand_id = table.meta.dealer_hand_id.clone();
        let dealer_cards = dealer_hand_id.as_ref().and_then(|id| table.hands.get(id)).map(|h| h.cards.clone()).unwrap_or_default();
        let mut reveals = Vec::new();
        for player in table.players.values() {
            let Some(hand_id) = player.hand_ids.first() else { continue };
            let cards = table.hands.get(hand_id).map(|h| h.cards.clone()).unwrap_or_default();
            reveals.push(json!({"seat": player.seat, "cards": cards}));
        }
        emit(events, "HANDS_REVEALED", json!({"dealer": dealer_cards, "players": reveals}));

        clear_hands(table);
        clear_bets(table);

        table.meta.phase = Phase::VoteContinue;
        table.meta.turn_seat = 0;
        let deadline = now + table.meta.vote_time_seconds as i64 * 1000;
        table.meta.vote_deadline_ts = deadline;
        table.meta.settle_pending = false;
        table.meta.settle_collect_started = false;
        emit(events, "PHASE_CHANGED", json!({"phase": "VOTE_CONTINUE"}));
        emit(events, "VOTE_STARTED", json!({"deadline_ts": deadline}));
    })?;
    Ok((snapshot, events))
}

// ============================================================================
// VOTE_CONTINUE
// ============================================================================

pub fn vote_continue(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
    player_id: &str,
    vote: Vote,
    request_id: &str,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let now = clock.now_ms();
    let lock = TableLock::acquire(store, table_id, now)?;

    let phase_ok = store.get_table(table_id).map(|t| t.meta.phase == Phase::VoteContinue).unwrap_or(false);
    if !phase_ok {
        lock.release();
        return Err(RoundError::VoteDenied("Vote not allowed in current phase".into()));
    }

    let dedup_key = format!("dedup:{table_id}:{request_id}");
    if !store.set_nx_px(&dedup_key, "1", timing::REQUEST_DEDUP_TTL_MS, now) {
        let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
        lock.release();
        return Ok((snapshot, Vec::new()));
    }

    let mut events = Vec::new();
    store.with_table(table_id, |table| {
        let round_id = table.meta.round_id;
        table.votes.entry(round_id).or_default().insert(player_id.to_string(), vote);
        if let Some(p) = table.players.get_mut(player_id) {
            p.last_seen_ts = now;
        }
        let seat = table.players.get(player_id).map(|p| p.seat).unwrap_or(0);
        emit(&mut events, "VOTE_CAST", json!({"player_id": player_id, "seat": seat, "vote": vote}));
        finalize_vote_locked(table, now, false, &mut events);
    });
    lock.release();

    let snapshot = store.get_table(table_id).ok_or(RoundError::TableNotFound)?;
    Ok((snapshot, events))
}

pub fn finalize_vote(
    store: &dyn Store,
    clock: &dyn Clock,
    table_id: &str,
    force_timeout: bool,
) -> Result<(TableRecord, Vec<QueuedEvent>), RoundError> {
    let (_, snapshot, events) = with_locked_table(store, clock, table_id, |table, now, events| {
        finalize_vote_locked(table, now, force_timeout, events);
    })?;
    Ok((snapshot, events))
}

fn finalize_vote_locked(table: &mut TableRecord, now: i64, force_timeout: bool, events: &mut Vec<QueuedEvent>) {
    if is_paused(table, now) || table.meta.phase != Phase::VoteContinue {
        return;
    }
    let round_id = table.meta.round_id;
    let total_players = table.players.len();
    let votes = table.votes.get(&round_id).cloned().unwrap_or_default();
    let deadline = table.meta.vote_deadline_ts;

    if !force_timeout && deadline != 0 && now <= deadline && votes.len() < total_players {
        return;
    }

    let no_vote_as = table.meta.no_vote_counts_as;
    let mut yes = 0u32;
    let mut no = 0u32;
    for player_id in table.players.keys() {
        match votes.get(player_id) {
            Some(Vote::Yes) => yes += 1,
            Some(Vote::No) => no += 1,
            None => {
                if no_vote_as == Vote::Yes {
                    yes += 1;
                } else {
                    no += 1;
                }
            }
        }
    }

    let should_end = no > yes || (yes == no && table.meta.tie_result == TieResult::End);
    if should_end {
        table.meta.phase = Phase::SessionEnded;
        table.votes.remove(&round_id);
        emit(events, "VOTE_RESULT", json!({"result": "END", "yes": yes, "no": no}));
        emit(events, "SESSION_ENDED", json!({"table_id": table.table_id}));
        return;
    }

    table.votes.remove(&round_id);
    apply_pending_config(table);
    table.meta.phase = Phase::WaitingForBets;
    table.meta.round_id += 1;
    table.meta.bet_deadline_ts = bet_deadline(table, now);
    table.meta.vote_deadline_ts = 0;
    table.meta.clear_pending();
    table.meta.dealer_revealed = false;
    clear_bets(table);
    clear_hands(table);
    emit(events, "VOTE_RESULT", json!({"result": "CONTINUE", "yes": yes, "no": no}));
    emit(events, "PHASE_CHANGED", json!({"phase": "WAITING_FOR_BETS"}));
}

pub(crate) fn apply_pending_config(table: &mut TableRecord) {
    let Some(pending) = table.meta.pending_config.take() else { return };
    if let Some(v) = pending.starting_bankroll {
        table.meta.starting_bankroll = v;
    }
    if let Some(v) = pending.min_bet {
        table.meta.min_bet = v;
    }
    if let Some(v) = pending.max_bet {
        table.meta.max_bet = v;
    }
    if let Some(v) = pending.shoe_decks {
        table.meta.shoe_decks = v;
    }
    if let Some(v) = pending.reshuffle_when_remaining_pct {
        table.meta.reshuffle_when_remaining_pct = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use blackjack_shared::Settings;
    use rand::SeedableRng;

    fn seeded_rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    fn fresh_table(store: &MemoryStore, settings: &Settings, seats: u32) -> String {
        let table_id = "t1".to_string();
        store.with_table(&table_id, |_| {});
        let _ = store.ensure_table(&table_id, settings, "s1");
        store.with_table(&table_id, |table| {
            for seat in 1..=seats {
                let player_id = format!("p{seat}");
                table.seats.insert(seat, player_id.clone());
                table.players.insert(
                    player_id.clone(),
                    crate::state::PlayerRecord {
                        player_id: player_id.clone(),
                        seat,
                        name: format!("Player {seat}"),
                        bankroll: 1000,
                        status: PlayerStatus::Active,
                        bet: 0,
                        bet_submitted: false,
                        hand_ids: Vec::new(),
                        reconnect_token: format!("tok-{seat}"),
                        last_seen_ts: 0,
                    },
                );
            }
            table.meta.phase = Phase::WaitingForBets;
        });
        table_id
    }

    #[test]
    fn place_bet_debits_bankroll_and_marks_submitted() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        let mut rng = seeded_rng();

        let (snapshot, events) = place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        let player = snapshot.players.get("p1").unwrap();
        assert_eq!(player.bankroll, 980);
        assert!(player.bet_submitted);
        assert!(events.iter().any(|e| e.event_type == "BET_PLACED"));
    }

    #[test]
    fn duplicate_request_id_applies_bet_once() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        let mut rng = seeded_rng();

        place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        let (snapshot, events) = place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        assert_eq!(snapshot.players.get("p1").unwrap().bankroll, 980);
        assert!(events.is_empty());
    }

    #[test]
    fn both_players_betting_schedules_deal() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        let mut rng = seeded_rng();

        place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        let (snapshot, _) = place_bet(&store, &clock, &mut rng, &table_id, "p2", 20, "req-2").unwrap();
        assert!(snapshot.meta.deal_pending);
        assert!(snapshot.meta.pause_until_ts > 0);
    }

    #[test]
    fn deal_initial_deals_two_cards_per_bettor_and_dealer() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        let mut rng = seeded_rng();

        place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        place_bet(&store, &clock, &mut rng, &table_id, "p2", 20, "req-2").unwrap();
        clock.advance(1000);
        let (snapshot, _) = advance_deal_pending(&store, &clock, &mut rng, &table_id).unwrap();
        assert_eq!(snapshot.meta.phase, Phase::DealInitial);
        for seat in 1..=2 {
            let pid = format!("p{seat}");
            let hand_id = snapshot.players[&pid].hand_ids[0].clone();
            assert_eq!(snapshot.hands[&hand_id].cards.len(), 2);
        }
        let dealer_hand_id = snapshot.meta.dealer_hand_id.clone().unwrap();
        assert_eq!(snapshot.hands[&dealer_hand_id].cards.len(), 2);
    }

    #[test]
    fn double_requires_two_card_hand_and_sufficient_bankroll() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 1);
        let mut rng = seeded_rng();

        place_bet(&store, &clock, &mut rng, &table_id, "p1", 20, "req-1").unwrap();
        clock.advance(1000);
        advance_deal_pending(&store, &clock, &mut rng, &table_id).unwrap();
        clock.advance(timing::DEAL_SHUFFLE_MS + 10_000);
        let (snapshot, _) = advance_turn_start(&store, &clock, &table_id).unwrap();
        assert_eq!(snapshot.meta.phase, Phase::PlayerTurns);

        let (snapshot, events) = action(&store, &clock, &mut rng, &table_id, "p1", Action::Double, "req-3").unwrap();
        assert_eq!(snapshot.players["p1"].bet, 40);
        assert!(events.iter().any(|e| e.event_type == "BET_DOUBLED"));
    }

    #[test]
    fn vote_tie_with_continue_rule_reopens_betting() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        store.with_table(&table_id, |table| {
            table.meta.phase = Phase::VoteContinue;
            table.meta.round_id = 1;
            table.meta.tie_result = TieResult::Continue;
            table.meta.vote_deadline_ts = 5000;
        });

        vote_continue(&store, &clock, &table_id, "p1", Vote::Yes, "v1").unwrap();
        let (snapshot, events) = vote_continue(&store, &clock, &table_id, "p2", Vote::No, "v2").unwrap();
        assert_eq!(snapshot.meta.phase, Phase::WaitingForBets);
        assert_eq!(snapshot.meta.round_id, 2);
        assert!(events.iter().any(|e| e.event_type == "VOTE_RESULT" && e.payload["result"] == "CONTINUE"));
    }

    #[test]
    fn vote_tie_with_end_rule_ends_session() {
        let store = MemoryStore::new();
        let settings = Settings::default();
        let clock = FakeClock::new(0);
        let table_id = fresh_table(&store, &settings, 2);
        store.with_table(&table_id, |table| {
            table.meta.phase = Phase::VoteContinue;
            table.meta.round_id = 1;
            table.meta.tie_result = TieResult::End;
            table.meta.vote_deadline_ts = 5000;
        });

        vote_continue(&store, &clock, &table_id, "p1", Vote::Yes, "v1").unwrap();
        let (snapshot, _) = vote_continue(&store, &clock, &table_id, "p2", Vote::No, "v2").unwrap();
        assert_eq!(snapshot.meta.phase, Phase::SessionEnded);
    }
}
