//! Process-wide configuration, loaded once from the environment.
//!
//! Mirrors the reference implementation's settings module field for field;
//! every component that needs a config value is handed this struct (or an
//! `Arc` of it) rather than reading the environment itself.

use std::env;

use thiserror::Error;

use crate::{NoBetBehavior, Soft17Mode, TieResult};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub table_id: String,
    pub seat_count: u32,
    pub shoe_decks: u32,
    pub reshuffle_when_remaining_pct: f64,
    pub dealer_soft_17_mode: Soft17Mode,
    pub blackjack_payout: f64,
    pub starting_bankroll: i64,
    pub min_bet: i64,
    pub max_bet: i64,
    pub bet_time_seconds: u64,
    pub vote_time_seconds: u64,
    pub reconnect_grace_seconds: u64,
    pub min_players_to_start: u32,
    pub require_ready: bool,
    pub allow_join_during_session: bool,
    pub no_bet_behavior: NoBetBehavior,
    pub no_vote_counts_as: crate::Vote,
    pub tie_result: TieResult,
    pub auto_end_if_no_active_bettors: bool,
    pub show_dealer_rule: bool,
    pub bust_pause_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            table_id: "default".to_string(),
            seat_count: 5,
            shoe_decks: 6,
            reshuffle_when_remaining_pct: 0.25,
            dealer_soft_17_mode: Soft17Mode::RandomPerRound,
            blackjack_payout: 1.5,
            starting_bankroll: 1000,
            min_bet: 10,
            max_bet: 200,
            bet_time_seconds: 0,
            vote_time_seconds: 15,
            reconnect_grace_seconds: 300,
            min_players_to_start: 2,
            require_ready: true,
            allow_join_during_session: false,
            no_bet_behavior: NoBetBehavior::SitOutRound,
            no_vote_counts_as: crate::Vote::No,
            tie_result: TieResult::Continue,
            auto_end_if_no_active_bettors: true,
            show_dealer_rule: true,
            bust_pause_ms: 1000,
        }
    }
}

impl Settings {
    /// Builds settings from environment variables, falling back to
    /// [`Settings::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        Ok(Self {
            table_id: env_or("BJ_TABLE_ID", defaults.table_id),
            seat_count: env_parsed("BJ_SEAT_COUNT", defaults.seat_count)?,
            shoe_decks: env_parsed("BJ_SHOE_DECKS", defaults.shoe_decks)?,
            reshuffle_when_remaining_pct: env_parsed(
                "BJ_RESHUFFLE_PCT",
                defaults.reshuffle_when_remaining_pct,
            )?,
            dealer_soft_17_mode: env_enum(
                "BJ_DEALER_SOFT17_MODE",
                defaults.dealer_soft_17_mode,
                Soft17Mode::parse,
            )?,
            blackjack_payout: env_parsed("BJ_BLACKJACK_PAYOUT", defaults.blackjack_payout)?,
            starting_bankroll: env_parsed("BJ_STARTING_BANKROLL", defaults.starting_bankroll)?,
            min_bet: env_parsed("BJ_MIN_BET", defaults.min_bet)?,
            max_bet: env_parsed("BJ_MAX_BET", defaults.max_bet)?,
            bet_time_seconds: env_parsed("BJ_BET_TIME_SECONDS", defaults.bet_time_seconds)?,
            vote_time_seconds: env_parsed("BJ_VOTE_TIME_SECONDS", defaults.vote_time_seconds)?,
            reconnect_grace_seconds: env_parsed(
                "BJ_RECONNECT_GRACE_SECONDS",
                defaults.reconnect_grace_seconds,
            )?,
            min_players_to_start: env_parsed(
                "BJ_MIN_PLAYERS_TO_START",
                defaults.min_players_to_start,
            )?,
            require_ready: env_parsed("BJ_REQUIRE_READY", defaults.require_ready)?,
            allow_join_during_session: env_parsed(
                "BJ_ALLOW_JOIN_DURING_SESSION",
                defaults.allow_join_during_session,
            )?,
            no_bet_behavior: env_enum(
                "BJ_NO_BET_BEHAVIOR",
                defaults.no_bet_behavior,
                NoBetBehavior::parse,
            )?,
            no_vote_counts_as: env_enum("BJ_NO_VOTE_COUNTS_AS", defaults.no_vote_counts_as, |s| {
                match s.to_ascii_uppercase().as_str() {
                    "YES" => Some(crate::Vote::Yes),
                    "NO" => Some(crate::Vote::No),
                    _ => None,
                }
            })?,
            tie_result: env_enum("BJ_TIE_RESULT", defaults.tie_result, TieResult::parse)?,
            auto_end_if_no_active_bettors: env_parsed(
                "BJ_AUTO_END_IF_NO_ACTIVE_BETTORS",
                defaults.auto_end_if_no_active_bettors,
            )?,
            show_dealer_rule: env_parsed("BJ_SHOW_DEALER_RULE", defaults.show_dealer_rule)?,
            bust_pause_ms: env_parsed("BJ_BUST_PAUSE_MS", defaults.bust_pause_ms)?,
        })
    }
}

fn env_or(key: &'static str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { field: key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_enum<T>(
    key: &'static str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse(&raw).ok_or(ConfigError::InvalidValue { field: key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_implementation() {
        let s = Settings::default();
        assert_eq!(s.seat_count, 5);
        assert_eq!(s.shoe_decks, 6);
        assert_eq!(s.min_bet, 10);
        assert_eq!(s.max_bet, 200);
        assert_eq!(s.starting_bankroll, 1000);
        assert_eq!(s.vote_time_seconds, 15);
        assert_eq!(s.reconnect_grace_seconds, 300);
        assert_eq!(s.bust_pause_ms, 1000);
    }
}
