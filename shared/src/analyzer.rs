//! Expected-value / strategy analyzer.
//!
//! A self-contained port of the reference implementation's infinite-deck
//! dealer-outcome model: given a player's hand and the dealer's upcard, it
//! scores stand/hit/double by expected value, a concave-utility risk score,
//! and a variance-penalized "security level".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Soft17Rule;

/// A single infinite-deck card draw and its probability. Tens are weighted
/// 4/13 (T, J, Q, K); every other rank (including ace) is 1/13.
const DRAW_OUTCOMES: [(CardDraw, f64); 10] = [
    (CardDraw::Ace, 1.0 / 13.0),
    (CardDraw::Pip(2), 1.0 / 13.0),
    (CardDraw::Pip(3), 1.0 / 13.0),
    (CardDraw::Pip(4), 1.0 / 13.0),
    (CardDraw::Pip(5), 1.0 / 13.0),
    (CardDraw::Pip(6), 1.0 / 13.0),
    (CardDraw::Pip(7), 1.0 / 13.0),
    (CardDraw::Pip(8), 1.0 / 13.0),
    (CardDraw::Pip(9), 1.0 / 13.0),
    (CardDraw::Pip(10), 4.0 / 13.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardDraw {
    Ace,
    Pip(u32),
}

/// Parses a flexible card token: numeric (`1` meaning ace, `2..=10`),
/// suited ("TS", "10H", "AC"), or rank-only ("A", "T", "K").
pub fn parse_card_token(raw: &str) -> Result<CardDraw, String> {
    let raw = raw.trim().to_ascii_uppercase();
    if raw.is_empty() {
        return Err("empty card value".to_string());
    }
    const RANKS: [&str; 13] = [
        "A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K", // T kept below
    ];
    let _ = RANKS;
    let mut token = raw.as_str();
    if token.len() >= 2 {
        let (rank_part, suit_part) = token.split_at(token.len() - 1);
        if matches!(suit_part, "S" | "H" | "D" | "C")
            && matches!(rank_part, "A" | "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9" | "10" | "T"
                | "J" | "Q" | "K")
        {
            token = rank_part;
        }
    }
    match token {
        "A" => Ok(CardDraw::Ace),
        "T" | "10" | "J" | "Q" | "K" => Ok(CardDraw::Pip(10)),
        "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9" => {
            Ok(CardDraw::Pip(token.parse().unwrap()))
        }
        _ => Err(format!("invalid card token: {raw}")),
    }
}

/// Reduces a running (total, soft_aces) pair by demoting soft aces (-10,
/// -1 soft_ace) while the total is over 21.
fn normalize_total(total: i64, soft_aces: i64) -> (i64, i64) {
    let mut total = total;
    let mut soft_aces = soft_aces.max(0);
    while total > 21 && soft_aces > 0 {
        total -= 10;
        soft_aces -= 1;
    }
    (total, soft_aces)
}

pub fn add_card_to_total(total: i64, soft_aces: i64, card: CardDraw) -> (i64, i64) {
    let (next_total, next_soft) = match card {
        CardDraw::Ace => (total + 11, soft_aces + 1),
        CardDraw::Pip(v) => (total + v as i64, soft_aces),
    };
    normalize_total(next_total, next_soft)
}

/// A fully resolved player hand state as (total, soft_aces).
pub fn player_state_from_cards(cards: &[CardDraw]) -> (i64, i64) {
    let mut total = 0i64;
    let mut soft_aces = 0i64;
    for &c in cards {
        let (t, s) = add_card_to_total(total, soft_aces, c);
        total = t;
        soft_aces = s;
    }
    (total, soft_aces)
}

/// Probability distribution over dealer terminal outcomes {17,18,19,20,21,bust}.
#[derive(Debug, Clone, Copy, Default)]
struct Outcomes6([f64; 6]);

impl Outcomes6 {
    fn bucket(total: i64) -> Self {
        let mut buckets = [0.0; 6];
        buckets[(total - 17) as usize] = 1.0;
        Outcomes6(buckets)
    }

    fn bust() -> Self {
        Outcomes6([0.0, 0.0, 0.0, 0.0, 0.0, 1.0])
    }

    fn add_weighted(&mut self, other: &Outcomes6, weight: f64) {
        for i in 0..6 {
            self.0[i] += other.0[i] * weight;
        }
    }

    fn to_dealer_distribution(self) -> DealerDistribution {
        DealerDistribution {
            p17: self.0[0],
            p18: self.0[1],
            p19: self.0[2],
            p20: self.0[3],
            p21: self.0[4],
            bust: self.0[5],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DealerDistribution {
    #[serde(rename = "17")]
    pub p17: f64,
    #[serde(rename = "18")]
    pub p18: f64,
    #[serde(rename = "19")]
    pub p19: f64,
    #[serde(rename = "20")]
    pub p20: f64,
    #[serde(rename = "21")]
    pub p21: f64,
    pub bust: f64,
}

impl DealerDistribution {
    pub fn sum(&self) -> f64 {
        self.p17 + self.p18 + self.p19 + self.p20 + self.p21 + self.bust
    }
}

fn dealer_finish_probs(
    total: i64,
    soft_aces: i64,
    rule: Soft17Rule,
    memo: &mut HashMap<(i64, i64), Outcomes6>,
) -> Outcomes6 {
    let (total, soft_aces) = normalize_total(total, soft_aces);
    if total > 21 {
        return Outcomes6::bust();
    }
    if let Some(cached) = memo.get(&(total, soft_aces)) {
        return *cached;
    }

    let is_soft = soft_aces > 0;
    let should_draw = total < 17 || (total == 17 && is_soft && rule == Soft17Rule::H17);
    let result = if !should_draw {
        if (17..=21).contains(&total) {
            Outcomes6::bucket(total)
        } else {
            Outcomes6::bust()
        }
    } else {
        let mut acc = Outcomes6::default();
        for &(card, prob) in DRAW_OUTCOMES.iter() {
            let (next_total, next_soft) = add_card_to_total(total, soft_aces, card);
            let child = dealer_finish_probs(next_total, next_soft, rule, memo);
            acc.add_weighted(&child, prob);
        }
        acc
    };
    memo.insert((total, soft_aces), result);
    result
}

/// Dealer's terminal outcome distribution given their upcard, playing out
/// the hidden hole card and subsequent hits per `rule`.
pub fn dealer_distribution(upcard: CardDraw, rule: Soft17Rule) -> DealerDistribution {
    let (base_total, base_soft) = add_card_to_total(0, 0, upcard);
    let mut memo = HashMap::new();
    let mut acc = Outcomes6::default();
    for &(hidden, prob) in DRAW_OUTCOMES.iter() {
        let (next_total, next_soft) = add_card_to_total(base_total, base_soft, hidden);
        let child = dealer_finish_probs(next_total, next_soft, rule, &mut memo);
        acc.add_weighted(&child, prob);
    }
    acc.to_dealer_distribution()
}

/// A (delta, probability) outcome pair, deduplicated by delta and sorted
/// ascending.
pub type DeltaOutcome = (f64, f64);

fn aggregate_outcomes(entries: impl IntoIterator<Item = DeltaOutcome>) -> Vec<DeltaOutcome> {
    let mut buckets: Vec<(f64, f64)> = Vec::new();
    for (delta, prob) in entries {
        if prob <= 0.0 {
            continue;
        }
        if let Some(existing) = buckets.iter_mut().find(|(d, _)| *d == delta) {
            existing.1 += prob;
        } else {
            buckets.push((delta, prob));
        }
    }
    buckets.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    buckets
}

pub fn stand_delta_distribution(
    player_total: i64,
    dealer_upcard: CardDraw,
    bet: f64,
    rule: Soft17Rule,
) -> Vec<DeltaOutcome> {
    if player_total > 21 {
        return vec![(-bet, 1.0)];
    }
    let dist = dealer_distribution(dealer_upcard, rule);
    let pairs = [
        (17i64, dist.p17),
        (18, dist.p18),
        (19, dist.p19),
        (20, dist.p20),
        (21, dist.p21),
    ];
    let mut outcomes = Vec::with_capacity(6);
    for (dealer_total, prob) in pairs {
        let delta = match player_total.cmp(&dealer_total) {
            std::cmp::Ordering::Greater => bet,
            std::cmp::Ordering::Less => -bet,
            std::cmp::Ordering::Equal => 0.0,
        };
        outcomes.push((delta, prob));
    }
    outcomes.push((bet, dist.bust));
    aggregate_outcomes(outcomes)
}

pub fn ev_of(outcomes: &[DeltaOutcome]) -> f64 {
    outcomes.iter().map(|(delta, prob)| delta * prob).sum()
}

pub fn hit_one_step_delta_distribution(
    player_total: i64,
    player_soft_aces: i64,
    dealer_upcard: CardDraw,
    bet: f64,
    rule: Soft17Rule,
) -> Vec<DeltaOutcome> {
    let mut outcomes = Vec::new();
    for &(card, draw_prob) in DRAW_OUTCOMES.iter() {
        let (next_total, _) = add_card_to_total(player_total, player_soft_aces, card);
        if next_total > 21 {
            outcomes.push((-bet, draw_prob));
            continue;
        }
        for (delta, prob) in stand_delta_distribution(next_total, dealer_upcard, bet, rule) {
            outcomes.push((delta, draw_prob * prob));
        }
    }
    aggregate_outcomes(outcomes)
}

pub fn double_delta_distribution(
    player_total: i64,
    player_soft_aces: i64,
    dealer_upcard: CardDraw,
    bet: f64,
    rule: Soft17Rule,
) -> Vec<DeltaOutcome> {
    let stake = bet * 2.0;
    let mut outcomes = Vec::new();
    for &(card, draw_prob) in DRAW_OUTCOMES.iter() {
        let (next_total, _) = add_card_to_total(player_total, player_soft_aces, card);
        if next_total > 21 {
            outcomes.push((-stake, draw_prob));
            continue;
        }
        for (delta, prob) in stand_delta_distribution(next_total, dealer_upcard, stake, rule) {
            outcomes.push((delta, draw_prob * prob));
        }
    }
    aggregate_outcomes(outcomes)
}

/// Concave-utility expectation: `Σ p·√max(bankroll+δ, 0)`.
pub fn expected_utility(bankroll: f64, outcomes: &[DeltaOutcome]) -> f64 {
    outcomes
        .iter()
        .map(|(delta, prob)| prob * (bankroll + delta).max(0.0).sqrt())
        .sum()
}

/// `(score, mean, variance)` where `score = E[delta] - lambda * sqrt(Var[delta])`.
pub fn security_level(outcomes: &[DeltaOutcome], risk_lambda: f64) -> (f64, f64, f64) {
    let mu = ev_of(outcomes);
    let variance: f64 = outcomes
        .iter()
        .map(|(delta, prob)| prob * (delta - mu).powi(2))
        .sum();
    let score = mu - risk_lambda * variance.max(0.0).sqrt();
    (score, mu, variance)
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionAnalysis {
    pub allowed: bool,
    pub ev: Option<f64>,
    pub utility_score: Option<f64>,
    pub security_score: Option<f64>,
    pub variance: Option<f64>,
    pub outcomes: Vec<OutcomeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeEntry {
    pub delta: f64,
    pub prob: f64,
}

fn serialize_outcomes(outcomes: &[DeltaOutcome]) -> Vec<OutcomeEntry> {
    outcomes
        .iter()
        .map(|&(delta, prob)| OutcomeEntry { delta, prob })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub ev_maximizer: Option<&'static str>,
    pub risk_averse: Option<&'static str>,
    pub security_level: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub player_total: i64,
    pub player_soft_aces: i64,
    pub dealer_distribution: DealerDistribution,
    pub stand: ActionAnalysis,
    pub hit: ActionAnalysis,
    pub double: ActionAnalysis,
    pub recommendations: Recommendations,
}

/// `can_double` is true only when the hand has exactly two cards and the
/// bankroll can cover the stake, unless explicitly overridden.
pub fn infer_can_double(card_count: Option<usize>, bet: f64, bankroll: f64, infer: bool) -> bool {
    if !infer {
        return true;
    }
    if bet <= 0.0 || bankroll < bet {
        return false;
    }
    matches!(card_count, Some(2))
}

fn recommend(candidates: [(&'static str, Option<f64>, bool); 3]) -> Option<&'static str> {
    let mut best_name = None;
    let mut best_score = f64::NEG_INFINITY;
    for (name, score, allowed) in candidates {
        if !allowed {
            continue;
        }
        if let Some(score) = score {
            if score > best_score {
                best_score = score;
                best_name = Some(name);
            }
        }
    }
    best_name
}

/// Top-level orchestrator matching the `/strategy/blackjack` response shape.
#[allow(clippy::too_many_arguments)]
pub fn analyze_decision_state(
    player_total: i64,
    player_soft_aces: i64,
    card_count: Option<usize>,
    dealer_upcard: CardDraw,
    bet: i64,
    bankroll: i64,
    rule: Soft17Rule,
    can_double: Option<bool>,
    infer_can_double_flag: bool,
    risk_lambda: f64,
) -> AnalysisResult {
    let bet_f = bet as f64;
    let bankroll_f = bankroll as f64;
    let allow_double = can_double
        .unwrap_or_else(|| infer_can_double(card_count, bet_f, bankroll_f, infer_can_double_flag));

    let stand_outcomes = stand_delta_distribution(player_total, dealer_upcard, bet_f, rule);
    let hit_outcomes =
        hit_one_step_delta_distribution(player_total, player_soft_aces, dealer_upcard, bet_f, rule);
    let double_outcomes = if allow_double {
        double_delta_distribution(player_total, player_soft_aces, dealer_upcard, bet_f, rule)
    } else {
        Vec::new()
    };

    let (stand_score, stand_mu, stand_var) = security_level(&stand_outcomes, risk_lambda);
    let (hit_score, hit_mu, hit_var) = security_level(&hit_outcomes, risk_lambda);
    let double_metrics = allow_double.then(|| security_level(&double_outcomes, risk_lambda));

    let stand = ActionAnalysis {
        allowed: true,
        ev: Some(stand_mu),
        utility_score: Some(expected_utility(bankroll_f, &stand_outcomes)),
        security_score: Some(stand_score),
        variance: Some(stand_var),
        outcomes: serialize_outcomes(&stand_outcomes),
    };
    let hit = ActionAnalysis {
        allowed: true,
        ev: Some(hit_mu),
        utility_score: Some(expected_utility(bankroll_f, &hit_outcomes)),
        security_score: Some(hit_score),
        variance: Some(hit_var),
        outcomes: serialize_outcomes(&hit_outcomes),
    };
    let double = ActionAnalysis {
        allowed: allow_double,
        ev: double_metrics.map(|(_, mu, _)| mu),
        utility_score: allow_double.then(|| expected_utility(bankroll_f, &double_outcomes)),
        security_score: double_metrics.map(|(score, _, _)| score),
        variance: double_metrics.map(|(_, _, var)| var),
        outcomes: serialize_outcomes(&double_outcomes),
    };

    let recommendations = Recommendations {
        ev_maximizer: recommend([
            ("stand", stand.ev, stand.allowed),
            ("hit", hit.ev, hit.allowed),
            ("double", double.ev, double.allowed),
        ]),
        risk_averse: recommend([
            ("stand", stand.utility_score, stand.allowed),
            ("hit", hit.utility_score, hit.allowed),
            ("double", double.utility_score, double.allowed),
        ]),
        security_level: recommend([
            ("stand", stand.security_score, stand.allowed),
            ("hit", hit.security_score, hit.allowed),
            ("double", double.security_score, double.allowed),
        ]),
    };

    AnalysisResult {
        player_total,
        player_soft_aces,
        dealer_distribution: dealer_distribution(dealer_upcard, rule),
        stand,
        hit,
        double,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dealer_distribution_sums_to_one() {
        for upcard in [CardDraw::Ace, CardDraw::Pip(6), CardDraw::Pip(10)] {
            for rule in [Soft17Rule::S17, Soft17Rule::H17] {
                let dist = dealer_distribution(upcard, rule);
                assert!((dist.sum() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn delta_distributions_sum_to_one_and_are_sorted() {
        let outcomes = hit_one_step_delta_distribution(14, 0, CardDraw::Pip(10), 10.0, Soft17Rule::S17);
        let total: f64 = outcomes.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let deltas: Vec<f64> = outcomes.iter().map(|(d, _)| *d).collect();
        let mut sorted = deltas.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(deltas, sorted);
    }

    #[test]
    fn stand_on_bust_total_is_certain_loss() {
        let outcomes = stand_delta_distribution(22, CardDraw::Pip(6), 10.0, Soft17Rule::S17);
        assert_eq!(outcomes, vec![(-10.0, 1.0)]);
    }

    #[test]
    fn hard_16_vs_10_recommends_hit_over_stand() {
        let result = analyze_decision_state(
            16,
            0,
            Some(2),
            CardDraw::Pip(10),
            10,
            100,
            Soft17Rule::S17,
            None,
            false,
            1.0,
        );
        assert!(result.stand.ev.unwrap() < result.hit.ev.unwrap());
        assert_eq!(result.recommendations.ev_maximizer, Some("hit"));
        assert!((result.dealer_distribution.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn infer_can_double_requires_exactly_two_cards_and_bankroll_cover() {
        assert!(infer_can_double(Some(2), 10.0, 100.0, true));
        assert!(!infer_can_double(Some(3), 10.0, 100.0, true));
        assert!(!infer_can_double(Some(2), 10.0, 5.0, true));
        assert!(infer_can_double(Some(3), 10.0, 5.0, false));
    }

    #[test]
    fn parse_card_token_accepts_suited_rank_only_and_ten_variants() {
        assert_eq!(parse_card_token("TS").unwrap(), CardDraw::Pip(10));
        assert_eq!(parse_card_token("10H").unwrap(), CardDraw::Pip(10));
        assert_eq!(parse_card_token("AC").unwrap(), CardDraw::Ace);
        assert_eq!(parse_card_token("7").unwrap(), CardDraw::Pip(7));
    }
}
