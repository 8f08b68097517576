//! End-to-end lifecycle tests: lobby join through bet, deal, play, dealer,
//! settle, and continue-vote, driven by `FakeClock` rather than real sleeps.

use blackjack_shared::{Action, Phase, Settings, Vote};
use blackjack_table::round::{self, FakeClock};
use blackjack_table::service;
use blackjack_table::store::{MemoryStore, Store};

fn seeded_rng() -> rand::rngs::StdRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::seed_from_u64(42)
}

/// Joins two players, readying both so the table auto-starts its session,
/// then places a bet for each and drives the deal to completion.
#[test]
fn full_round_runs_bet_through_settle_and_reopens_for_vote() {
    let store = MemoryStore::new();
    let settings = Settings::default();
    let clock = FakeClock::new(0);
    let table_id = "t1";
    let mut rng = seeded_rng();

    let join_a = service::join_table(&store, &clock, &settings, table_id, "p1", "Alice", "tok-1", || {
        "sess-a".to_string()
    })
    .unwrap();
    assert_eq!(join_a.0.meta.phase, Phase::Lobby);

    service::join_table(&store, &clock, &settings, table_id, "p2", "Bob", "tok-2", || "sess-b".to_string()).unwrap();

    service::ready_toggle(&store, &clock, &settings, table_id, "p1", || "sess-c".to_string()).unwrap();
    let (snapshot, _) =
        service::ready_toggle(&store, &clock, &settings, table_id, "p2", || "sess-d".to_string()).unwrap();
    assert_eq!(snapshot.meta.phase, Phase::WaitingForBets, "both ready should auto-start the session");

    round::place_bet(&store, &clock, &mut rng, table_id, "p1", 20, "bet-1").unwrap();
    let (snapshot, _) = round::place_bet(&store, &clock, &mut rng, table_id, "p2", 20, "bet-2").unwrap();
    assert!(snapshot.meta.deal_pending);

    clock.advance(5000);
    let (snapshot, _) = round::advance_deal_pending(&store, &clock, &mut rng, table_id).unwrap();
    assert_eq!(snapshot.meta.phase, Phase::DealInitial);

    clock.advance(10_000);
    let (snapshot, _) = round::advance_turn_start(&store, &clock, table_id).unwrap();
    assert_eq!(snapshot.meta.phase, Phase::PlayerTurns);
    let first_seat = snapshot.meta.turn_seat;
    assert!(first_seat == 1 || first_seat == 2);

    let first_player = if first_seat == 1 { "p1" } else { "p2" };
    let second_player = if first_seat == 1 { "p2" } else { "p1" };

    let (snapshot, _) =
        round::action(&store, &clock, &mut rng, table_id, first_player, Action::Stand, "act-1").unwrap();
    assert_eq!(snapshot.meta.phase, Phase::PlayerTurns, "dealer turn starts only after both players act");

    let (mut snapshot, _) =
        round::action(&store, &clock, &mut rng, table_id, second_player, Action::Stand, "act-2").unwrap();
    assert_eq!(snapshot.meta.phase, Phase::DealerTurn);

    for _ in 0..30 {
        if snapshot.meta.phase != Phase::DealerTurn {
            break;
        }
        clock.advance(2000);
        let (next, _) = round::advance_dealer(&store, &clock, &mut rng, table_id).unwrap();
        snapshot = next;
    }
    assert_eq!(snapshot.meta.phase, Phase::Settle, "dealer should finish drawing and settle within 30 ticks");

    clock.advance(2000);
    let (snapshot, events) = round::advance_settle(&store, &clock, table_id).unwrap();
    assert!(events.iter().any(|e| e.event_type == "CHIPS_COLLECT"));
    assert_eq!(snapshot.meta.phase, Phase::Settle, "first settle pass only announces chip collection");

    clock.advance(2000);
    let (snapshot, events) = round::advance_settle(&store, &clock, table_id).unwrap();
    assert_eq!(snapshot.meta.phase, Phase::VoteContinue);
    assert!(events.iter().any(|e| e.event_type == "PAYOUT"));
    assert!(events.iter().any(|e| e.event_type == "HANDS_REVEALED"));
    assert!(snapshot.hands.is_empty(), "hands are cleared once settlement completes");

    let (snapshot, _) = round::vote_continue(&store, &clock, table_id, "p1", Vote::Yes, "vote-1").unwrap();
    assert_eq!(snapshot.meta.phase, Phase::VoteContinue, "still waiting on the second vote");
    let (snapshot, events) = round::vote_continue(&store, &clock, table_id, "p2", Vote::Yes, "vote-2").unwrap();
    assert_eq!(snapshot.meta.phase, Phase::WaitingForBets, "unanimous yes reopens betting");
    assert_eq!(snapshot.meta.round_id, 2);
    assert!(events.iter().any(|e| e.event_type == "VOTE_RESULT"));
}

#[test]
fn reconnect_token_resolves_to_the_same_player_identity() {
    let store = MemoryStore::new();
    let first = service::hello(&store, None, || "player-1".to_string(), || "reconnect-1".to_string());
    let resumed = service::hello(&store, Some(&first.reconnect_token), || "should-not-be-used".to_string(), || {
        "should-not-be-used".to_string()
    });
    assert_eq!(resumed.player_id, first.player_id);
}

#[test]
fn join_denied_when_table_full() {
    let store = MemoryStore::new();
    let mut settings = Settings::default();
    settings.seat_count = 1;
    let clock = FakeClock::new(0);

    service::join_table(&store, &clock, &settings, "full-table", "p1", "Alice", "tok-1", || "sess-a".to_string())
        .unwrap();
    let err = service::join_table(&store, &clock, &settings, "full-table", "p2", "Bob", "tok-2", || {
        "sess-b".to_string()
    })
    .unwrap_err();
    assert!(matches!(err, service::LobbyError::JoinDenied(_)));
}

#[test]
fn disconnected_player_is_reaped_only_past_grace_period() {
    let store = MemoryStore::new();
    let settings = Settings::default();
    let clock = FakeClock::new(0);
    let table_id = "grace-table";

    service::join_table(&store, &clock, &settings, table_id, "p1", "Alice", "tok-1", || "sess-a".to_string())
        .unwrap();
    service::mark_disconnected(&store, &clock, table_id, "p1");

    clock.advance((settings.reconnect_grace_seconds as i64 - 1) * 1000);
    assert!(store.get_table(table_id).unwrap().players.contains_key("p1"));
}
