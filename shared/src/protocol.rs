//! Wire message protocol: client -> server requests, server -> client
//! responses and events, and the WS error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Action, Vote};

/// Client -> server messages, tagged on `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Hello {
        nickname: String,
        #[serde(default)]
        reconnect_token: Option<String>,
    },
    JoinTable {
        table_id: String,
    },
    ReadyToggle,
    StartSession,
    AdminConfig {
        #[serde(default)]
        config: serde_json::Map<String, Value>,
    },
    PlaceBet {
        amount: i64,
        request_id: String,
    },
    Action {
        action: Action,
        request_id: String,
    },
    VoteContinue {
        vote: Vote,
        request_id: String,
    },
    Sync {
        #[serde(default)]
        last_event_id: Option<String>,
    },
}

/// Server -> client control messages (distinct from the event stream).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Welcome {
        player_id: String,
        reconnect_token: String,
    },
    Snapshot {
        snapshot: Value,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    SessionEnded {
        table_id: String,
    },
    /// A stream event relayed live or replayed during SYNC.
    Event {
        event_id: String,
        #[serde(rename = "type")]
        event_type: String,
        session_id: String,
        round_id: u64,
        payload: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadJson,
    BadRequest,
    HelloRequired,
    JoinRequired,
    JoinDenied,
    ReadyDenied,
    StartDenied,
    AdminDenied,
    BetDenied,
    ActionDenied,
    VoteDenied,
    Unhandled,
}

/// The WS-facing error taxonomy every domain error converts into, so the
/// connection layer has one place that maps errors onto `ERROR{code,message}`
/// frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message")]
    BadJson,
    #[error("{0}")]
    BadRequest(String),
    #[error("HELLO must be the first message")]
    HelloRequired,
    #[error("JOIN_TABLE must precede this message")]
    JoinRequired,
    #[error("{0}")]
    JoinDenied(String),
    #[error("{0}")]
    ReadyDenied(String),
    #[error("{0}")]
    StartDenied(String),
    #[error("{0}")]
    AdminDenied(String),
    #[error("{0}")]
    BetDenied(String),
    #[error("{0}")]
    ActionDenied(String),
    #[error("{0}")]
    VoteDenied(String),
    #[error("{0}")]
    Unhandled(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::BadJson => ErrorCode::BadJson,
            ProtocolError::BadRequest(_) => ErrorCode::BadRequest,
            ProtocolError::HelloRequired => ErrorCode::HelloRequired,
            ProtocolError::JoinRequired => ErrorCode::JoinRequired,
            ProtocolError::JoinDenied(_) => ErrorCode::JoinDenied,
            ProtocolError::ReadyDenied(_) => ErrorCode::ReadyDenied,
            ProtocolError::StartDenied(_) => ErrorCode::StartDenied,
            ProtocolError::AdminDenied(_) => ErrorCode::AdminDenied,
            ProtocolError::BetDenied(_) => ErrorCode::BetDenied,
            ProtocolError::ActionDenied(_) => ErrorCode::ActionDenied,
            ProtocolError::VoteDenied(_) => ErrorCode::VoteDenied,
            ProtocolError::Unhandled(_) => ErrorCode::Unhandled,
        }
    }
}
