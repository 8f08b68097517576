//! Process entry point: the WS table endpoint, the strategy HTTP endpoint,
//! and the 1Hz background lifecycle ticker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use blackjack_shared::analyzer;
use blackjack_shared::protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
use blackjack_shared::{Settings, Soft17Rule};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use blackjack_table::connection::{ConnectionId, ConnectionManager};
use blackjack_table::personalization::{build_snapshot, personalize_stored_event};
use blackjack_table::round::{self, Clock, SystemClock};
use blackjack_table::store::{MemoryStore, Store};
use blackjack_table::{dispatch, events, service, ticker};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    connections: Arc<ConnectionManager>,
    settings: Arc<Settings>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Arc::new(Settings::from_env().expect("invalid configuration"));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let connections = Arc::new(ConnectionManager::new());

    tokio::spawn(ticker::run(
        store.clone(),
        clock.clone(),
        connections.clone(),
        settings.clone(),
    ));

    let state = AppState {
        store,
        clock,
        connections,
        settings,
    };

    let app = Router::new()
        .route("/ws/blackjack", get(ws_handler))
        .route("/strategy/blackjack", post(strategy_handler))
        .with_state(state);

    let addr: SocketAddr = std::env::var("BJ_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .expect("invalid BJ_BIND_ADDR");
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}

// ============================================================================
// /strategy/blackjack
// ============================================================================

#[derive(Debug, Deserialize)]
struct StrategyRequest {
    player_cards: Option<Vec<String>>,
    player_total: Option<i64>,
    #[serde(default)]
    player_soft_aces: i64,
    dealer_upcard: String,
    bet: i64,
    bankroll: i64,
    #[serde(default = "default_rule")]
    rule: Soft17Rule,
    #[serde(default)]
    can_double: Option<bool>,
    #[serde(default)]
    infer_can_double: bool,
    #[serde(default = "default_risk_lambda")]
    risk_lambda: f64,
}

fn default_rule() -> Soft17Rule {
    Soft17Rule::S17
}

fn default_risk_lambda() -> f64 {
    1.0
}

async fn strategy_handler(Json(req): Json<StrategyRequest>) -> impl IntoResponse {
    let dealer_upcard = match analyzer::parse_card_token(&req.dealer_upcard) {
        Ok(card) => card,
        Err(message) => {
            return (axum::http::StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({"detail": message})))
                .into_response();
        }
    };

    let (player_total, player_soft_aces, card_count) = match &req.player_cards {
        Some(cards) if !cards.is_empty() => {
            let mut parsed = Vec::with_capacity(cards.len());
            for raw in cards {
                match analyzer::parse_card_token(raw) {
                    Ok(card) => parsed.push(card),
                    Err(message) => {
                        return (
                            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                            Json(serde_json::json!({"detail": message})),
                        )
                            .into_response();
                    }
                }
            }
            let (total, soft_aces) = analyzer::player_state_from_cards(&parsed);
            (total, soft_aces, Some(parsed.len()))
        }
        _ => match req.player_total {
            Some(total) => (total, req.player_soft_aces, None),
            None => {
                return (
                    axum::http::StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({"detail": "Provide either player_cards or player_total"})),
                )
                    .into_response();
            }
        },
    };

    let result = analyzer::analyze_decision_state(
        player_total,
        player_soft_aces,
        card_count,
        dealer_upcard,
        req.bet,
        req.bankroll,
        req.rule,
        req.can_double,
        req.infer_can_double,
        req.risk_lambda,
    );
    Json(serde_json::to_value(result).unwrap()).into_response()
}

// ============================================================================
// /ws/blackjack
// ============================================================================

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct Session {
    player_id: Option<String>,
    reconnect_token: Option<String>,
    nickname: Option<String>,
    table_id: Option<String>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id: ConnectionId = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.connections.register(connection_id, tx);

    let outbound = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Some(message) = rx.recv().await {
            let text = serde_json::to_string(&message).unwrap_or_default();
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        player_id: None,
        reconnect_token: None,
        nickname: None,
        table_id: None,
    };

    use futures_util::StreamExt;
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        let client_message = match parsed {
            Ok(m) => m,
            Err(err) => {
                state.connections.send(
                    connection_id,
                    ServerMessage::Error {
                        code: ErrorCode::BadJson,
                        message: "Invalid JSON payload".into(),
                        details: Some(serde_json::json!({"error": err.to_string()})),
                    },
                );
                continue;
            }
        };

        if !dispatch_message(&state, connection_id, &mut session, client_message).await {
            break;
        }
    }

    if let (Some(table_id), Some(player_id)) = (&session.table_id, &session.player_id) {
        service::mark_disconnected(&*state.store, &*state.clock, table_id, player_id);
    }
    state.connections.remove(connection_id);
    outbound.abort();
}

/// Handles one parsed client message. Returns `false` when the connection
/// should be torn down (send failure reaching the client).
async fn dispatch_message(
    state: &AppState,
    connection_id: ConnectionId,
    session: &mut Session,
    message: ClientMessage,
) -> bool {
    match message {
        ClientMessage::Hello { nickname, reconnect_token } => {
            let result = service::hello(
                &*state.store,
                reconnect_token.as_deref(),
                || uuid_like("player"),
                || uuid_like("reconnect"),
            );
            session.player_id = Some(result.player_id.clone());
            session.reconnect_token = Some(result.reconnect_token.clone());
            session.nickname = Some(nickname);
            state.connections.bind_player(connection_id, result.player_id.clone());
            send(state, connection_id, ServerMessage::Welcome {
                player_id: result.player_id,
                reconnect_token: result.reconnect_token,
            })
        }
        other => {
            let (Some(player_id), Some(nickname)) = (session.player_id.clone(), session.nickname.clone()) else {
                return send(
                    state,
                    connection_id,
                    ServerMessage::Error {
                        code: ErrorCode::HelloRequired,
                        message: "Send HELLO before other messages".into(),
                        details: None,
                    },
                );
            };
            dispatch_table_message(state, connection_id, session, &player_id, &nickname, other).await
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn dispatch_table_message(
    state: &AppState,
    connection_id: ConnectionId,
    session: &mut Session,
    player_id: &str,
    nickname: &str,
    message: ClientMessage,
) -> bool {
    if let ClientMessage::JoinTable { table_id } = message {
        let reconnect_token = session.reconnect_token.clone().unwrap_or_default();
        let result = service::join_table(
            &*state.store,
            &*state.clock,
            &state.settings,
            &table_id,
            player_id,
            nickname,
            &reconnect_token,
            || uuid_like("session"),
        );
        return match result {
            Ok((snapshot, events)) => {
                session.table_id = Some(table_id.clone());
                let seat = snapshot.players.get(player_id).map(|p| p.seat);
                state.connections.bind_table(connection_id, table_id, seat);
                if !send_snapshot(state, connection_id, &snapshot, Some(player_id)) {
                    return false;
                }
                service::touch_last_seen(&*state.store, &*state.clock, &snapshot.table_id, player_id);
                dispatch::flush(&*state.store, &state.connections, &snapshot, events);
                true
            }
            Err(err) => send_error(state, connection_id, ErrorCode::JoinDenied, err.to_string()),
        };
    }

    let Some(table_id) = session.table_id.clone() else {
        return send(
            state,
            connection_id,
            ServerMessage::Error {
                code: ErrorCode::JoinRequired,
                message: "Send JOIN_TABLE before lobby actions".into(),
                details: None,
            },
        );
    };

    match message {
        ClientMessage::ReadyToggle => {
            let result =
                service::ready_toggle(&*state.store, &*state.clock, &state.settings, &table_id, player_id, || {
                    uuid_like("session")
                });
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::StartSession => {
            let result =
                service::start_session(&*state.store, &*state.clock, &state.settings, &table_id, || {
                    uuid_like("session")
                });
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::AdminConfig { config } => {
            let result = service::admin_config(
                &*state.store,
                &*state.clock,
                &table_id,
                config_i64(&config, "starting_bankroll"),
                config_i64(&config, "min_bet"),
                config_i64(&config, "max_bet"),
                config_u32(&config, "shoe_decks"),
                config_f64(&config, "reshuffle_when_remaining_pct"),
            );
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::PlaceBet { amount, request_id } => {
            let mut rng = rand::thread_rng();
            let result = round::place_bet(
                &*state.store,
                &*state.clock,
                &mut rng,
                &table_id,
                player_id,
                amount,
                &request_id,
            );
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::Action { action, request_id } => {
            let mut rng = rand::thread_rng();
            let result = round::action(
                &*state.store,
                &*state.clock,
                &mut rng,
                &table_id,
                player_id,
                action,
                &request_id,
            );
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::VoteContinue { vote, request_id } => {
            let result =
                round::vote_continue(&*state.store, &*state.clock, &table_id, player_id, vote, &request_id);
            finish(state, connection_id, &table_id, player_id, result.map_err(ProtocolError::from))
        }
        ClientMessage::Sync { last_event_id } => {
            let Some(snapshot) = state.store.get_table(&table_id) else {
                return send_error(state, connection_id, ErrorCode::BadRequest, "table not found".into());
            };
            if !send_snapshot(state, connection_id, &snapshot, Some(player_id)) {
                return false;
            }
            let viewer_seat = snapshot.players.get(player_id).map(|p| p.seat);
            let stored_events = match &last_event_id {
                Some(id) => events::after(&*state.store, &table_id, id),
                None => events::tail(&*state.store, &table_id),
            };
            for stored in stored_events {
                let Some(payload) = personalize_stored_event(&stored, viewer_seat, &snapshot.hands) else {
                    continue;
                };
                if !send(
                    state,
                    connection_id,
                    ServerMessage::Event {
                        event_id: stored.event_id,
                        event_type: stored.event_type,
                        session_id: stored.session_id,
                        round_id: stored.round_id,
                        payload,
                    },
                ) {
                    return false;
                }
            }
            true
        }
        ClientMessage::Hello { .. } | ClientMessage::JoinTable { .. } => unreachable!("handled above"),
    }
}

fn finish(
    state: &AppState,
    connection_id: ConnectionId,
    table_id: &str,
    player_id: &str,
    result: Result<(blackjack_table::TableRecord, Vec<round::QueuedEvent>), ProtocolError>,
) -> bool {
    match result {
        Ok((snapshot, events)) => {
            if !send_snapshot(state, connection_id, &snapshot, Some(player_id)) {
                return false;
            }
            service::touch_last_seen(&*state.store, &*state.clock, table_id, player_id);
            dispatch::flush(&*state.store, &state.connections, &snapshot, events);
            true
        }
        Err(err) => send_error(state, connection_id, err.code(), err.to_string()),
    }
}

fn send_snapshot(
    state: &AppState,
    connection_id: ConnectionId,
    table: &blackjack_table::TableRecord,
    viewer_player_id: Option<&str>,
) -> bool {
    send(
        state,
        connection_id,
        ServerMessage::Snapshot {
            snapshot: build_snapshot(table, viewer_player_id),
        },
    )
}

fn send_error(state: &AppState, connection_id: ConnectionId, code: ErrorCode, message: String) -> bool {
    send(state, connection_id, ServerMessage::Error { code, message, details: None })
}

fn send(state: &AppState, connection_id: ConnectionId, message: ServerMessage) -> bool {
    state.connections.send(connection_id, message);
    true
}

fn config_i64(config: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    config.get(key).and_then(Value::as_i64)
}

fn config_u32(config: &serde_json::Map<String, Value>, key: &str) -> Option<u32> {
    config.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn config_f64(config: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(Value::as_f64)
}

/// A process-local unique id: a random 128-bit token plus a label prefix.
/// No UUID crate in the dependency stack, so this rolls its own from a
/// cryptographically random source.
fn uuid_like(prefix: &str) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{hex}")
}
