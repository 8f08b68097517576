//! Blackjack table server - shared domain types
//!
//! Card and hand representation, round phases, the message protocol, and the
//! strategy analyzer all live here so they can be used by the round engine
//! without depending on any particular store or transport.

pub mod analyzer;
pub mod config;
pub mod protocol;
pub mod shoe;

pub use config::Settings;
pub use shoe::hand_value;

use serde::{Deserialize, Serialize};

// ============================================================================
// CARD REPRESENTATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[repr(u8)]
pub enum Suit {
    Spades = 0,
    Hearts = 1,
    Diamonds = 2,
    Clubs = 3,
}

impl Suit {
    pub fn code(&self) -> char {
        match self {
            Suit::Spades => 'S',
            Suit::Hearts => 'H',
            Suit::Diamonds => 'D',
            Suit::Clubs => 'C',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'S' => Some(Suit::Spades),
            'H' => Some(Suit::Hearts),
            'D' => Some(Suit::Diamonds),
            'C' => Some(Suit::Clubs),
            _ => None,
        }
    }

    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[repr(u8)]
pub enum Rank {
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
    Ten = 10,
    Jack = 11,
    Queen = 12,
    King = 13,
    Ace = 14,
}

impl Rank {
    /// Blackjack value before ace soft-promotion (aces count as 1 here).
    pub fn base_value(&self) -> u32 {
        match self {
            Rank::Jack | Rank::Queen | Rank::King => 10,
            Rank::Ace => 1,
            r => *r as u32,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }

    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];
}

/// A single playing card, represented on the wire and in the store as an
/// `"RankSuit"` code string ("TS", "10H", "AC", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }

    pub fn code(&self) -> String {
        format!("{}{}", self.rank.code(), self.suit.code())
    }

    /// Parses a card code such as "TS", "10H", "AC". Accepts both the single
    /// letter ten ("T") and the numeric form ("10").
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() < 2 {
            return None;
        }
        let (rank_part, suit_part) = code.split_at(code.len() - 1);
        let suit = Suit::from_code(suit_part.chars().next()?)?;
        let rank = match rank_part.to_ascii_uppercase().as_str() {
            "2" => Rank::Two,
            "3" => Rank::Three,
            "4" => Rank::Four,
            "5" => Rank::Five,
            "6" => Rank::Six,
            "7" => Rank::Seven,
            "8" => Rank::Eight,
            "9" => Rank::Nine,
            "10" | "T" => Rank::Ten,
            "J" => Rank::Jack,
            "Q" => Rank::Queen,
            "K" => Rank::King,
            "A" => Rank::Ace,
            _ => return None,
        };
        Some(Card::new(suit, rank))
    }
}

// ============================================================================
// ROUND PHASES (state machine)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Lobby,
    WaitingForBets,
    DealInitial,
    PlayerTurns,
    DealerTurn,
    Settle,
    VoteContinue,
    SessionEnded,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lobby => "LOBBY",
            Phase::WaitingForBets => "WAITING_FOR_BETS",
            Phase::DealInitial => "DEAL_INITIAL",
            Phase::PlayerTurns => "PLAYER_TURNS",
            Phase::DealerTurn => "DEALER_TURN",
            Phase::Settle => "SETTLE",
            Phase::VoteContinue => "VOTE_CONTINUE",
            Phase::SessionEnded => "SESSION_ENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "LOBBY" => Phase::Lobby,
            "WAITING_FOR_BETS" => Phase::WaitingForBets,
            "DEAL_INITIAL" => Phase::DealInitial,
            "PLAYER_TURNS" => Phase::PlayerTurns,
            "DEALER_TURN" => Phase::DealerTurn,
            "SETTLE" => Phase::Settle,
            "VOTE_CONTINUE" => Phase::VoteContinue,
            "SESSION_ENDED" => Phase::SessionEnded,
            _ => return None,
        })
    }
}

/// Stepwise sub-state of `DEALER_TURN`, ticker-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DealerStep {
    #[default]
    None,
    Reveal,
    RevealWait,
    Draw,
}

impl DealerStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealerStep::None => "",
            DealerStep::Reveal => "REVEAL",
            DealerStep::RevealWait => "REVEAL_WAIT",
            DealerStep::Draw => "DRAW",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "REVEAL" => DealerStep::Reveal,
            "REVEAL_WAIT" => DealerStep::RevealWait,
            "DRAW" => DealerStep::Draw,
            _ => DealerStep::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Hit,
    Stand,
    Double,
    Next,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hit => "hit",
            Action::Stand => "stand",
            Action::Double => "double",
            Action::Next => "next",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    Disconnected,
}

/// Dealer stand/hit-on-soft-17 rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Soft17Rule {
    S17,
    H17,
}

impl Soft17Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Soft17Rule::S17 => "S17",
            Soft17Rule::H17 => "H17",
        }
    }

    /// Case-insensitive, restricted to {S17, H17}.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "S17" => Some(Soft17Rule::S17),
            "H17" => Some(Soft17Rule::H17),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Soft17Mode {
    S17,
    H17,
    RandomPerRound,
}

impl Soft17Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "S17" => Some(Soft17Mode::S17),
            "H17" => Some(Soft17Mode::H17),
            "RANDOM_PER_ROUND" => Some(Soft17Mode::RandomPerRound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoBetBehavior {
    SitOutRound,
    AutoMinBet,
}

impl NoBetBehavior {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SIT_OUT_ROUND" => Some(NoBetBehavior::SitOutRound),
            "AUTO_MIN_BET" => Some(NoBetBehavior::AutoMinBet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieResult {
    Continue,
    End,
}

impl TieResult {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONTINUE" => Some(TieResult::Continue),
            "END" => Some(TieResult::End),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_code_round_trips() {
        for &suit in Suit::ALL.iter() {
            for &rank in Rank::ALL.iter() {
                let card = Card::new(suit, rank);
                let parsed = Card::parse(&card.code()).unwrap();
                assert_eq!(card, parsed);
            }
        }
    }

    #[test]
    fn card_parse_accepts_rank_only_and_numeric_ten() {
        assert_eq!(Card::parse("TS").unwrap().rank, Rank::Ten);
        assert_eq!(Card::parse("10H").unwrap().rank, Rank::Ten);
        assert_eq!(Card::parse("AC").unwrap().rank, Rank::Ace);
    }

    #[test]
    fn phase_round_trips_through_string() {
        for phase in [
            Phase::Lobby,
            Phase::WaitingForBets,
            Phase::DealInitial,
            Phase::PlayerTurns,
            Phase::DealerTurn,
            Phase::Settle,
            Phase::VoteContinue,
            Phase::SessionEnded,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn soft17_rule_parse_is_case_insensitive() {
        assert_eq!(Soft17Rule::parse("s17"), Some(Soft17Rule::S17));
        assert_eq!(Soft17Rule::parse("H17"), Some(Soft17Rule::H17));
        assert_eq!(Soft17Rule::parse("hard17"), None);
    }
}
