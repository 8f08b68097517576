//! Blackjack table server - table-side domain logic.
//!
//! Owns the store abstraction, the per-table lock, the event stream, the
//! round engine's phase state machine, pre-round lobby operations,
//! personalization of the event/snapshot views, the connection registry, and
//! the 1Hz ticker that drives every time-based transition.

pub mod connection;
pub mod dispatch;
pub mod events;
pub mod lock;
pub mod personalization;
pub mod round;
pub mod service;
pub mod state;
pub mod store;
pub mod ticker;

pub use connection::{ConnectionId, ConnectionManager};
pub use lock::{LockError, TableLock};
pub use round::{Clock, RoundError, SystemClock};
pub use service::LobbyError;
pub use state::{PlayerRecord, PlayerStatus, TableMeta, TableRecord};
pub use store::{MemoryStore, Store};

use thiserror::Error;

use blackjack_shared::protocol::ProtocolError;

/// Top-level error surfaced to the WS dispatcher, unifying every failure
/// mode a table operation can produce into the wire's `ErrorCode` taxonomy.
#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Round(#[from] RoundError),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}

impl From<service::LobbyError> for ProtocolError {
    fn from(value: service::LobbyError) -> Self {
        match value {
            service::LobbyError::TableNotFound => ProtocolError::Unhandled("table not found".into()),
            service::LobbyError::Lock(e) => ProtocolError::Unhandled(e.to_string()),
            service::LobbyError::JoinDenied(msg) => ProtocolError::JoinDenied(msg),
            service::LobbyError::ReadyDenied(msg) => ProtocolError::ReadyDenied(msg),
            service::LobbyError::StartDenied(msg) => ProtocolError::StartDenied(msg),
            service::LobbyError::ConfigDenied(msg) => ProtocolError::AdminDenied(msg),
        }
    }
}

impl From<round::RoundError> for ProtocolError {
    fn from(value: round::RoundError) -> Self {
        match value {
            round::RoundError::TableNotFound => ProtocolError::Unhandled("table not found".into()),
            round::RoundError::Lock(e) => ProtocolError::Unhandled(e.to_string()),
            round::RoundError::BetDenied(msg) => ProtocolError::BetDenied(msg),
            round::RoundError::ActionDenied(msg) => ProtocolError::ActionDenied(msg),
            round::RoundError::VoteDenied(msg) => ProtocolError::VoteDenied(msg),
        }
    }
}

impl From<TableError> for ProtocolError {
    fn from(value: TableError) -> Self {
        match value {
            TableError::Round(e) => e.into(),
            TableError::Lobby(e) => e.into(),
        }
    }
}
