//! Table aggregate: the structured record every round-engine operation
//! reads and mutates under the table lock.
//!
//! The reference implementation keeps this as a string-typed Redis hash
//! (`meta`) alongside several satellite hashes/sets. Per the design note on
//! re-modeling a dynamic string-typed meta hash, this is instead one typed
//! Rust record, persisted by the store as a single blob per table and
//! mutated in place while the table lock is held.

use std::collections::HashMap;

use blackjack_shared::{DealerStep, NoBetBehavior, Phase, Soft17Mode, Soft17Rule, TieResult, Vote};
use serde::{Deserialize, Serialize};

// ============================================================================
// META (Phase + deadlines + pending sub-states + staged config)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub phase: Phase,
    pub session_id: String,
    pub round_id: u64,
    pub turn_seat: u32,
    pub dealer_hand_id: Option<String>,
    pub dealer_soft_17_rule: Option<Soft17Rule>,
    pub dealer_revealed: bool,
    pub dealer_step: DealerStep,

    // Deadlines and pending sub-state timestamps (absolute wall-clock ms).
    pub bet_deadline_ts: i64,
    pub vote_deadline_ts: i64,
    pub pending_advance_ts: i64,
    pub pending_advance_seat: u32,
    pub pending_bust_announce_ts: i64,
    pub pending_bust_seat: u32,
    pub pending_bust_player_id: Option<String>,
    pub pending_double_due_ts: i64,
    pub pending_double_seat: u32,
    pub pending_double_player_id: Option<String>,
    pub pending_double_hand_id: Option<String>,
    pub pause_until_ts: i64,
    pub deal_pending: bool,
    pub turn_start_due_ts: i64,
    pub dealer_step_due_ts: i64,
    pub settle_pending: bool,
    pub settle_collect_started: bool,

    // Active-round config snapshot (copied from Settings at session start).
    pub starting_bankroll: i64,
    pub min_bet: i64,
    pub max_bet: i64,
    pub shoe_decks: u32,
    pub reshuffle_when_remaining_pct: f64,
    pub dealer_soft_17_mode: Soft17Mode,
    pub no_bet_behavior: NoBetBehavior,
    pub no_vote_counts_as: Vote,
    pub tie_result: TieResult,
    pub auto_end_if_no_active_bettors: bool,
    pub bet_time_seconds: u64,
    pub vote_time_seconds: u64,
    pub blackjack_payout: f64,

    // Staged by ADMIN_CONFIG; applied at the next round boundary.
    pub pending_config: Option<PendingConfig>,

    /// Monotonic per-table counter backing lexicographically-ordered event ids.
    pub event_seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingConfig {
    pub starting_bankroll: Option<i64>,
    pub min_bet: Option<i64>,
    pub max_bet: Option<i64>,
    pub shoe_decks: Option<u32>,
    pub reshuffle_when_remaining_pct: Option<f64>,
}

impl TableMeta {
    pub fn new(settings: &blackjack_shared::Settings, session_id: String) -> Self {
        Self {
            phase: Phase::Lobby,
            session_id,
            round_id: 0,
            turn_seat: 0,
            dealer_hand_id: None,
            dealer_soft_17_rule: None,
            dealer_revealed: false,
            dealer_step: DealerStep::None,
            bet_deadline_ts: 0,
            vote_deadline_ts: 0,
            pending_advance_ts: 0,
            pending_advance_seat: 0,
            pending_bust_announce_ts: 0,
            pending_bust_seat: 0,
            pending_bust_player_id: None,
            pending_double_due_ts: 0,
            pending_double_seat: 0,
            pending_double_player_id: None,
            pending_double_hand_id: None,
            pause_until_ts: 0,
            deal_pending: false,
            turn_start_due_ts: 0,
            dealer_step_due_ts: 0,
            settle_pending: false,
            settle_collect_started: false,
            starting_bankroll: settings.starting_bankroll,
            min_bet: settings.min_bet,
            max_bet: settings.max_bet,
            shoe_decks: settings.shoe_decks,
            reshuffle_when_remaining_pct: settings.reshuffle_when_remaining_pct,
            dealer_soft_17_mode: settings.dealer_soft_17_mode,
            no_bet_behavior: settings.no_bet_behavior,
            no_vote_counts_as: settings.no_vote_counts_as,
            tie_result: settings.tie_result,
            auto_end_if_no_active_bettors: settings.auto_end_if_no_active_bettors,
            bet_time_seconds: settings.bet_time_seconds,
            vote_time_seconds: settings.vote_time_seconds,
            blackjack_payout: settings.blackjack_payout,
            pending_config: None,
            event_seq: 0,
        }
    }

    /// Extends (never shortens) the animation pause.
    pub fn extend_pause(&mut self, until_ts: i64) {
        self.pause_until_ts = self.pause_until_ts.max(until_ts);
    }

    pub fn is_paused(&self, now_ms: i64) -> bool {
        now_ms < self.pause_until_ts
    }

    /// Allocates the next lexicographically-monotonic event id for this table.
    pub fn next_event_seq(&mut self) -> u64 {
        self.event_seq += 1;
        self.event_seq
    }

    /// Clears every pending sub-state field. Called on every phase change so
    /// a stale pending field from the previous phase can never leak forward.
    pub fn clear_pending(&mut self) {
        self.pending_advance_ts = 0;
        self.pending_advance_seat = 0;
        self.pending_bust_announce_ts = 0;
        self.pending_bust_seat = 0;
        self.pending_bust_player_id = None;
        self.pending_double_due_ts = 0;
        self.pending_double_seat = 0;
        self.pending_double_player_id = None;
        self.pending_double_hand_id = None;
        self.deal_pending = false;
        self.turn_start_due_ts = 0;
        self.dealer_step_due_ts = 0;
        self.settle_pending = false;
        self.settle_collect_started = false;
    }
}

// ============================================================================
// PLAYERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: String,
    pub seat: u32,
    pub name: String,
    pub bankroll: i64,
    pub status: PlayerStatus,
    pub bet: i64,
    pub bet_submitted: bool,
    pub hand_ids: Vec<String>,
    pub reconnect_token: String,
    pub last_seen_ts: i64,
}

impl PlayerRecord {
    pub fn is_eligible_to_bet(&self, min_bet: i64) -> bool {
        self.status == PlayerStatus::Active && self.bankroll >= min_bet
    }
}

// ============================================================================
// HANDS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandRecord {
    pub cards: Vec<String>,
    pub total: u32,
    pub is_soft: bool,
    pub face_down: bool,
}

// ============================================================================
// SHOE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShoeMeta {
    pub decks: u32,
    pub cut_index: usize,
}

// ============================================================================
// TABLE AGGREGATE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_id: String,
    pub meta: TableMeta,
    /// seat (1..=seat_count) -> player_id
    pub seats: HashMap<u32, String>,
    pub players: HashMap<String, PlayerRecord>,
    pub hands: HashMap<String, HandRecord>,
    pub shoe: Vec<String>,
    pub shoe_meta: ShoeMeta,
    pub ready: std::collections::HashSet<String>,
    /// round_id -> (player_id -> vote)
    pub votes: HashMap<u64, HashMap<String, Vote>>,
}

impl TableRecord {
    pub fn new(table_id: String, settings: &blackjack_shared::Settings, session_id: String) -> Self {
        Self {
            table_id,
            meta: TableMeta::new(settings, session_id),
            seats: HashMap::new(),
            players: HashMap::new(),
            hands: HashMap::new(),
            shoe: Vec::new(),
            shoe_meta: ShoeMeta::default(),
            ready: std::collections::HashSet::new(),
            votes: HashMap::new(),
        }
    }

    pub fn active_players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values().filter(|p| p.status == PlayerStatus::Active)
    }

    pub fn eligible_bettors(&self) -> Vec<&PlayerRecord> {
        let min_bet = self.meta.min_bet;
        self.active_players()
            .filter(|p| p.is_eligible_to_bet(min_bet))
            .collect()
    }

    pub fn betting_players(&self) -> Vec<&PlayerRecord> {
        self.active_players().filter(|p| p.bet > 0).collect()
    }

    pub fn player_at_seat(&self, seat: u32) -> Option<&PlayerRecord> {
        self.seats.get(&seat).and_then(|pid| self.players.get(pid))
    }
}
