//! Tracks open WebSocket connections and the player/table binding each one
//! has acquired via HELLO/JOIN_TABLE, and offers broadcast primitives that
//! the round engine's post-unlock event flush uses.

use std::collections::HashMap;
use std::sync::Mutex;

use blackjack_shared::protocol::ServerMessage;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub type ConnectionId = u64;

struct Connection {
    sender: UnboundedSender<ServerMessage>,
    player_id: Option<String>,
    table_id: Option<String>,
    seat: Option<u32>,
}

/// Registry of live sockets, guarded by a single mutex. Sends are fire-and-
/// forget over an unbounded channel; a send failing means the socket's read
/// loop has already torn the connection down, so it's reaped in place.
#[derive(Default)]
pub struct ConnectionManager {
    inner: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, sender: UnboundedSender<ServerMessage>) {
        self.inner.lock().unwrap().insert(
            id,
            Connection {
                sender,
                player_id: None,
                table_id: None,
                seat: None,
            },
        );
    }

    pub fn remove(&self, id: ConnectionId) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub fn bind_player(&self, id: ConnectionId, player_id: String) {
        if let Some(conn) = self.inner.lock().unwrap().get_mut(&id) {
            conn.player_id = Some(player_id);
        }
    }

    pub fn bind_table(&self, id: ConnectionId, table_id: String, seat: Option<u32>) {
        if let Some(conn) = self.inner.lock().unwrap().get_mut(&id) {
            conn.table_id = Some(table_id);
            conn.seat = seat;
        }
    }

    pub fn send(&self, id: ConnectionId, message: ServerMessage) {
        let dead = {
            let inner = self.inner.lock().unwrap();
            match inner.get(&id) {
                Some(conn) => conn.sender.send(message).is_err(),
                None => false,
            }
        };
        if dead {
            debug!(connection_id = id, "dropping dead connection on send failure");
            self.remove(id);
        }
    }

    /// Sends the same message to every connection bound to `table_id`.
    pub fn broadcast(&self, table_id: &str, message: ServerMessage) {
        let targets: Vec<ConnectionId> = {
            let inner = self.inner.lock().unwrap();
            inner
                .iter()
                .filter(|(_, c)| c.table_id.as_deref() == Some(table_id))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in targets {
            self.send(id, message.clone());
        }
    }

    /// Calls `build` once per connection bound to `table_id`, passing the
    /// connection's `(player_id, seat)`; sends whatever it returns, or skips
    /// the connection on `None`.
    pub fn broadcast_personalized(
        &self,
        table_id: &str,
        mut build: impl FnMut(Option<&str>, Option<u32>) -> Option<ServerMessage>,
    ) {
        let targets: Vec<(ConnectionId, Option<String>, Option<u32>)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .iter()
                .filter(|(_, c)| c.table_id.as_deref() == Some(table_id))
                .map(|(id, c)| (*id, c.player_id.clone(), c.seat))
                .collect()
        };
        for (id, player_id, seat) in targets {
            if let Some(message) = build(player_id.as_deref(), seat) {
                self.send(id, message);
            }
        }
    }
}
