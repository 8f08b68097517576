//! Turns one authoritative table record into the per-recipient views the
//! wire protocol promises: a player never sees another player's down cards,
//! the dealer hole card is phase-gated, and private announcements reach only
//! their target seat.

use std::collections::HashMap;

use blackjack_shared::Phase;
use serde_json::{json, Value};

use crate::events::StoredEvent;
use crate::state::{HandRecord, TableRecord};

/// Redacts a `CARD_DEALT{to: "player", ...}` payload to the form persisted
/// in the event stream: the card itself is dropped, `face_down` forced true.
/// Cards dealt to the dealer are never redacted.
pub fn redact_card_dealt_for_storage(payload: &Value) -> Value {
    if payload.get("to").and_then(Value::as_str) != Some("player") {
        return payload.clone();
    }
    let mut redacted = payload.clone();
    if let Some(obj) = redacted.as_object_mut() {
        obj.insert("card".to_string(), Value::Null);
        obj.insert("face_down".to_string(), Value::Bool(true));
    }
    redacted
}

/// Live fanout: reconstructs the real card from the pre-redaction payload
/// for the owning seat only; every other recipient gets the redacted form
/// already computed for storage.
pub fn personalize_card_dealt_live(
    full_payload: &Value,
    owner_seat: Option<u32>,
    viewer_seat: Option<u32>,
) -> Value {
    match (owner_seat, viewer_seat) {
        (Some(owner), Some(viewer)) if owner == viewer => full_payload.clone(),
        _ => redact_card_dealt_for_storage(full_payload),
    }
}

/// Sync replay: stored events are already redacted, so reconstruction goes
/// through the persisted hand by `(hand_id, card_index)`. Falls back to
/// staying face-down if the card can't be resolved, rather than leaking a
/// blank entry or guessing.
pub fn personalize_card_dealt_replay(
    payload: &Value,
    owner_seat: Option<u32>,
    viewer_seat: Option<u32>,
    hands: &HashMap<String, HandRecord>,
) -> Value {
    if owner_seat.is_none() || owner_seat != viewer_seat {
        return payload.clone();
    }
    let hand_id = match payload.get("hand_id").and_then(Value::as_str) {
        Some(id) => id,
        None => return payload.clone(),
    };
    let card_index = match payload.get("card_index").and_then(Value::as_u64) {
        Some(i) => i as usize,
        None => return payload.clone(),
    };
    let card = hands
        .get(hand_id)
        .and_then(|hand| hand.cards.get(card_index))
        .cloned();
    match card {
        Some(card) => {
            let mut reconstructed = payload.clone();
            if let Some(obj) = reconstructed.as_object_mut() {
                obj.insert("card".to_string(), Value::String(card));
                obj.insert("face_down".to_string(), Value::Bool(false));
            }
            reconstructed
        }
        None => payload.clone(),
    }
}

/// Returns `None` when the event must not be delivered to this viewer
/// (a private announcement targeting a different seat).
pub fn personalize_announcement(payload: &Value, viewer_seat: Option<u32>) -> Option<Value> {
    let target_seat = payload.get("target_seat").and_then(Value::as_u64).map(|s| s as u32);
    if let Some(target) = target_seat {
        if Some(target) != viewer_seat {
            return None;
        }
    }
    let mut stripped = payload.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove("target_seat");
    }
    Some(stripped)
}

/// Personalizes one already-stored event for a SYNC replay recipient.
/// Returns `None` if the event must be withheld from this viewer.
pub fn personalize_stored_event(
    event: &StoredEvent,
    viewer_seat: Option<u32>,
    hands: &HashMap<String, HandRecord>,
) -> Option<Value> {
    match event.event_type.as_str() {
        "CARD_DEALT" => Some(personalize_card_dealt_replay(
            &event.payload,
            event.owner_seat,
            viewer_seat,
            hands,
        )),
        "ANNOUNCEMENT" => personalize_announcement(&event.payload, viewer_seat),
        _ => Some(event.payload.clone()),
    }
}

/// Player-facing hand view: full detail for the viewer's own hands, only
/// totals/card-count for everyone else's, nothing revealing individual cards.
fn hand_view(hand_id: &str, hand: &HandRecord, reveal_cards: bool) -> Value {
    if reveal_cards {
        json!({
            "hand_id": hand_id,
            "cards": hand.cards,
            "total": hand.total,
            "is_soft": hand.is_soft,
        })
    } else {
        json!({
            "hand_id": hand_id,
            "card_count": hand.cards.len(),
        })
    }
}

/// Dealer's public hand view: upcard only during `PLAYER_TURNS`; governed by
/// `dealer_revealed` from `DEALER_TURN` onward; fully visible at and after
/// `SETTLE`.
fn dealer_hand_view(table: &TableRecord) -> Value {
    let hand_id = match &table.meta.dealer_hand_id {
        Some(id) => id,
        None => return Value::Null,
    };
    let hand = match table.hands.get(hand_id) {
        Some(h) => h,
        None => return Value::Null,
    };
    let fully_visible = match table.meta.phase {
        Phase::PlayerTurns => false,
        Phase::DealerTurn => table.meta.dealer_revealed,
        Phase::Settle | Phase::VoteContinue | Phase::SessionEnded => true,
        Phase::Lobby | Phase::WaitingForBets | Phase::DealInitial => false,
    };
    if fully_visible {
        json!({
            "hand_id": hand_id,
            "cards": hand.cards,
            "total": hand.total,
            "is_soft": hand.is_soft,
        })
    } else {
        json!({
            "hand_id": hand_id,
            "upcard": hand.cards.first(),
        })
    }
}

/// Builds the full table snapshot for `viewer_player_id`, redacting other
/// players' hand contents and the dealer's hole card per phase.
pub fn build_snapshot(table: &TableRecord, viewer_player_id: Option<&str>) -> Value {
    let viewer_seat = viewer_player_id
        .and_then(|pid| table.players.get(pid))
        .map(|p| p.seat);

    let mut seats = serde_json::Map::new();
    for (seat, player_id) in &table.seats {
        let Some(player) = table.players.get(player_id) else { continue };
        let is_owner = viewer_seat == Some(*seat);
        let hands: Vec<Value> = player
            .hand_ids
            .iter()
            .filter_map(|hid| table.hands.get(hid).map(|h| hand_view(hid, h, is_owner)))
            .collect();
        seats.insert(
            seat.to_string(),
            json!({
                "player_id": player.player_id,
                "seat": player.seat,
                "name": player.name,
                "bankroll": player.bankroll,
                "status": player.status,
                "bet": player.bet,
                "bet_submitted": player.bet_submitted,
                "hands": hands,
            }),
        );
    }

    json!({
        "table_id": table.table_id,
        "phase": table.meta.phase,
        "session_id": table.meta.session_id,
        "round_id": table.meta.round_id,
        "turn_seat": table.meta.turn_seat,
        "seats": seats,
        "dealer": dealer_hand_view(table),
        "viewer_seat": viewer_seat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_only_touches_player_destined_cards() {
        let dealer_payload = json!({"to": "dealer", "card": "AS", "face_down": false});
        assert_eq!(redact_card_dealt_for_storage(&dealer_payload), dealer_payload);

        let player_payload = json!({"to": "player", "seat": 1, "card": "AS", "face_down": false});
        let redacted = redact_card_dealt_for_storage(&player_payload);
        assert_eq!(redacted["card"], Value::Null);
        assert_eq!(redacted["face_down"], Value::Bool(true));
    }

    #[test]
    fn live_personalization_reveals_only_to_owner() {
        let payload = json!({"to": "player", "seat": 2, "card": "KH", "face_down": false});
        let owner_view = personalize_card_dealt_live(&payload, Some(2), Some(2));
        assert_eq!(owner_view["card"], "KH");

        let other_view = personalize_card_dealt_live(&payload, Some(2), Some(1));
        assert_eq!(other_view["card"], Value::Null);
    }

    #[test]
    fn announcement_with_target_seat_is_withheld_from_others() {
        let payload = json!({"title": "Your turn", "target_seat": 3});
        assert!(personalize_announcement(&payload, Some(1)).is_none());
        let delivered = personalize_announcement(&payload, Some(3)).unwrap();
        assert!(delivered.get("target_seat").is_none());
    }

    #[test]
    fn replay_reconstructs_from_persisted_hand_by_index() {
        let mut hands = HashMap::new();
        hands.insert(
            "h1".to_string(),
            HandRecord {
                cards: vec!["7H".to_string(), "QD".to_string()],
                total: 17,
                is_soft: false,
                face_down: false,
            },
        );
        let payload = json!({
            "to": "player", "seat": 1, "hand_id": "h1", "card_index": 1,
            "card": Value::Null, "face_down": true,
        });
        let reconstructed = personalize_card_dealt_replay(&payload, Some(1), Some(1), &hands);
        assert_eq!(reconstructed["card"], "QD");

        let still_hidden = personalize_card_dealt_replay(&payload, Some(1), Some(2), &hands);
        assert_eq!(still_hidden["card"], Value::Null);
    }
}
