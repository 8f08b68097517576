//! Bridges the round engine's "return queued events after the lock is
//! released" contract to the outside world: append each event to the
//! per-table stream, then fan it out to every connected socket, reconstructing
//! the live (non-redacted) view for each recipient.

use blackjack_shared::protocol::ServerMessage;

use crate::connection::ConnectionManager;
use crate::events;
use crate::personalization::{personalize_announcement, personalize_card_dealt_live, redact_card_dealt_for_storage};
use crate::round::QueuedEvent;
use crate::state::TableRecord;
use crate::store::Store;

/// Appends `queued` to the table's event stream and broadcasts each one,
/// personalized per recipient. Called only after the operation that produced
/// them has released the table lock, per the round engine's emit-then-
/// broadcast contract.
pub fn flush(store: &dyn Store, connections: &ConnectionManager, table: &TableRecord, queued: Vec<QueuedEvent>) {
    for event in queued {
        let stored_payload = if event.event_type == "CARD_DEALT" {
            redact_card_dealt_for_storage(&event.payload)
        } else {
            event.payload.clone()
        };

        let seq = store
            .with_table(&table.table_id, |t| t.meta.next_event_seq())
            .unwrap_or(0);
        let stored = events::append(
            store,
            &table.table_id,
            &event.event_type,
            &table.meta.session_id,
            table.meta.round_id,
            stored_payload,
            event.owner_seat,
            seq,
        );

        connections.broadcast_personalized(&table.table_id, |_player_id, viewer_seat| {
            let payload = match event.event_type.as_str() {
                "CARD_DEALT" => personalize_card_dealt_live(&event.payload, event.owner_seat, viewer_seat),
                "ANNOUNCEMENT" => personalize_announcement(&event.payload, viewer_seat)?,
                _ => event.payload.clone(),
            };
            Some(ServerMessage::Event {
                event_id: stored.event_id.clone(),
                event_type: stored.event_type.clone(),
                session_id: stored.session_id.clone(),
                round_id: stored.round_id,
                payload,
            })
        });
    }
}
