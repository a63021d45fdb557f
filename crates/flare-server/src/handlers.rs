//! Connection handlers for the flare server.
//!
//! This module owns the connection lifecycle: the handshake, the
//! per-connection relay loop, presence notifications, and the HTTP surface
//! (room provisioning and health).

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::reaper;
use anyhow::Result;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use flare_core::{
    generate_room_id, next_connection_id, validate_room_id, ConnectionId, ConnectionState,
    RegistryConfig, Room, RoomRegistry,
};
use flare_protocol::{check_well_formed, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The room registry.
    pub registry: Arc<RoomRegistry>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry_config = RegistryConfig {
            room_ttl: config.rooms.ttl(),
        };

        Self {
            registry: Arc::new(RoomRegistry::with_config(registry_config)),
            config,
        }
    }
}

/// Identifying parameters supplied with the WebSocket handshake.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    /// Room identifier; required.
    room: Option<String>,
    /// Free-form role label, used for presence display only.
    role: Option<String>,
}

/// Room provisioning response.
#[derive(Debug, Serialize)]
struct NewRoomResponse {
    #[serde(rename = "roomId")]
    room_id: String,
}

/// Build the HTTP/WebSocket router.
fn app(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/api/new-room", get(new_room_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let _reaper = reaper::spawn(Arc::clone(&state.registry), config.rooms.reap_interval());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("flare server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// The single shutdown cancellation point: resolves when ctrl-c arrives.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Allocate a fresh room identifier and register an empty room for it.
///
/// An unavailable random source fails this one request with a server error;
/// existing rooms are unaffected and no partial identifier leaks out.
async fn new_room_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NewRoomResponse>, StatusCode> {
    let room_id = generate_room_id().map_err(|error| {
        error!(%error, "Room provisioning failed");
        metrics::record_error("provisioning");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state.registry.resolve_or_create(&room_id);
    debug!(room = %room_id, "Provisioned room");

    Ok(Json(NewRoomResponse { room_id }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, params, state))
}

/// Refuse a handshake with a policy close; no room side effects.
async fn refuse(mut socket: WebSocket, reason: &'static str) {
    metrics::record_error("handshake");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Handle a WebSocket connection from handshake to close.
async fn handle_websocket(socket: WebSocket, params: ConnectParams, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = next_connection_id();
    let mut conn_state = ConnectionState::Connecting;
    debug!(connection = connection_id, state = ?conn_state, "WebSocket connected");

    // Handshake: a connection without a valid room identifier is refused
    // before it touches any room, with a close reason that distinguishes the
    // failure from a normal close.
    let room_id = match params.room.as_deref() {
        None | Some("") => {
            debug!(connection = connection_id, "Rejecting connection without room id");
            refuse(socket, "room required").await;
            return;
        }
        Some(id) => match validate_room_id(id) {
            Ok(()) => id.to_string(),
            Err(reason) => {
                debug!(connection = connection_id, room = %id, reason, "Rejecting room id");
                refuse(socket, "invalid room").await;
                return;
            }
        },
    };

    let role = params
        .role
        .filter(|role| !role.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let room = state.registry.resolve_or_create(&room_id);
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<Arc<str>>(state.config.limits.outbound_queue);

    let clients = room.join(connection_id, role.clone(), outbound_tx);
    conn_state = ConnectionState::Open;
    debug!(
        connection = connection_id,
        room = %room_id,
        %role,
        state = ?conn_state,
        "Connection open"
    );

    // The join is announced to everyone already in the room; the new member
    // learns the state it joined from its greeting instead.
    room.announce(&ServerEvent::peer_join(role.clone()), Some(connection_id));

    let (mut sink, mut stream) = socket.split();

    // Greeting first, so the client's first frame echoes what it joined as.
    let hello = ServerEvent::hello(room_id.clone(), role.clone(), clients);
    match hello.encode() {
        Ok(text) => {
            metrics::record_message(text.len(), "outbound");
            if sink.send(Message::Text(text)).await.is_err() {
                conn_state = ConnectionState::Closed;
            }
        }
        Err(error) => {
            warn!(connection = connection_id, %error, "Failed to encode greeting");
            conn_state = ConnectionState::Closed;
        }
    }

    while conn_state.is_open() {
        tokio::select! {
            biased;

            // Drain the bounded outbound queue filled by room fan-out.
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sink.send(Message::Text(text.to_string())).await.is_err() {
                            conn_state = ConnectionState::Closed;
                        }
                    }
                    None => conn_state = ConnectionState::Closed,
                }
            }

            // Receive from the WebSocket.
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => relay(&room, connection_id, text),
                    Some(Ok(Message::Binary(data))) => {
                        // Some transports deliver text frames as binary;
                        // coerce and run the same well-formedness check.
                        match String::from_utf8(data) {
                            Ok(text) => relay(&room, connection_id, text),
                            Err(_) => {
                                debug!(connection = connection_id, "Dropping non-UTF-8 frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            conn_state = ConnectionState::Closed;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = connection_id, "Received close frame");
                        conn_state = ConnectionState::Closed;
                    }
                    Some(Err(error)) => {
                        warn!(connection = connection_id, %error, "WebSocket error");
                        metrics::record_error("websocket");
                        conn_state = ConnectionState::Closed;
                    }
                    None => {
                        debug!(connection = connection_id, "WebSocket stream ended");
                        conn_state = ConnectionState::Closed;
                    }
                }
            }
        }
    }

    // Cleanup runs exactly once, on every exit path: graceful close, abrupt
    // disconnect, or a dead transport. The member leaves its room and the
    // remaining members hear about it.
    if room.leave(connection_id).is_some() {
        room.announce(&ServerEvent::peer_leave(role), None);
    }
    debug!(
        connection = connection_id,
        room = %room_id,
        state = ?conn_state,
        "Connection closed"
    );
}

/// Validate an inbound payload and fan it out to the sender's room-mates.
///
/// Malformed payloads are dropped without closing the connection and without
/// surfacing anything to the sender.
fn relay(room: &Room, connection_id: ConnectionId, text: String) {
    metrics::record_message(text.len(), "inbound");

    if let Err(error) = check_well_formed(&text) {
        debug!(connection = connection_id, room = %room.id(), %error, "Dropping malformed payload");
        metrics::record_error("malformed");
        return;
    }

    let len = text.len();
    let recipients = room.broadcast(&Arc::from(text), Some(connection_id));
    metrics::record_message(len, "broadcast");
    trace!(connection = connection_id, room = %room.id(), recipients, "Relayed payload");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite};
    use tower::ServiceExt;

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.metrics.enabled = false;
        Arc::new(AppState::new(config))
    }

    async fn start_server() -> (SocketAddr, Arc<AppState>) {
        let state = test_state();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (addr, state)
    }

    async fn connect(addr: &SocketAddr, room: &str, role: &str) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{addr}/ws?room={room}&role={role}"))
            .await
            .unwrap();
        ws
    }

    async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("websocket error");

            match msg {
                tungstenite::Message::Text(text) => {
                    return serde_json::from_str(&text).unwrap();
                }
                tungstenite::Message::Ping(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_requires_room() {
        let (addr, state) = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws?role=caller"))
            .await
            .unwrap();

        match ws.next().await.unwrap().unwrap() {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(
                    frame.code,
                    tungstenite::protocol::frame::coding::CloseCode::Policy
                );
                assert_eq!(frame.reason, "room required");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        assert_eq!(state.registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_between_room_mates() {
        let (addr, _state) = start_server().await;

        let mut a = connect(&addr, "ROOM1", "caller").await;
        let hello_a = recv_json(&mut a).await;
        assert_eq!(hello_a["type"], "hello");
        assert_eq!(hello_a["roomId"], "ROOM1");
        assert_eq!(hello_a["role"], "caller");
        assert_eq!(hello_a["clients"], 1);

        let mut b = connect(&addr, "ROOM1", "dispatcher").await;
        let hello_b = recv_json(&mut b).await;
        assert_eq!(hello_b["clients"], 2);

        // A hears about B joining; B itself does not.
        let join = recv_json(&mut a).await;
        assert_eq!(join["type"], "peer-join");
        assert_eq!(join["role"], "dispatcher");

        a.send(tungstenite::Message::Text(
            r#"{"type":"offer","sdp":"x"}"#.into(),
        ))
        .await
        .unwrap();

        let offer = recv_json(&mut b).await;
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["sdp"], "x");

        // B leaves; A is notified. If A had been echoed its own offer, it
        // would arrive here instead and fail the assertion.
        b.close(None).await.unwrap();
        let leave = recv_json(&mut a).await;
        assert_eq!(leave["type"], "peer-leave");
        assert_eq!(leave["role"], "dispatcher");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_not_fatal() {
        let (addr, _state) = start_server().await;

        let mut a = connect(&addr, "ROOM2", "caller").await;
        recv_json(&mut a).await;
        let mut b = connect(&addr, "ROOM2", "dispatcher").await;
        recv_json(&mut b).await;
        recv_json(&mut a).await; // peer-join

        a.send(tungstenite::Message::Text("not json".into()))
            .await
            .unwrap();
        a.send(tungstenite::Message::Text(r#"[1,2,3]"#.into()))
            .await
            .unwrap();
        a.send(tungstenite::Message::Text(r#"{"type":"mode"}"#.into()))
            .await
            .unwrap();

        // Only the well-formed object arrives; the sender stayed open the
        // whole time, or the third send would have failed.
        let relayed = recv_json(&mut b).await;
        assert_eq!(relayed["type"], "mode");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let (addr, _state) = start_server().await;

        let mut a = connect(&addr, "ROOMA", "caller").await;
        recv_json(&mut a).await;
        let mut b = connect(&addr, "ROOMA", "dispatcher").await;
        recv_json(&mut b).await;
        recv_json(&mut a).await; // peer-join
        let mut c = connect(&addr, "ROOMB", "caller").await;
        recv_json(&mut c).await;

        a.send(tungstenite::Message::Text(r#"{"type":"offer"}"#.into()))
            .await
            .unwrap();

        let relayed = recv_json(&mut b).await;
        assert_eq!(relayed["type"], "offer");

        let cross_room = tokio::time::timeout(Duration::from_millis(200), c.next()).await;
        assert!(cross_room.is_err(), "no cross-room delivery expected");
    }

    #[tokio::test]
    async fn test_provisioning_endpoint() {
        let state = test_state();
        let router = app(Arc::clone(&state));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/new-room")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let room_id = json["roomId"].as_str().unwrap();

        assert_eq!(room_id.len(), 6);
        assert!(state.registry.contains(room_id));
    }

    #[tokio::test]
    async fn test_provisioned_room_is_joinable() {
        let (addr, state) = start_server().await;

        let room_id = generate_room_id().unwrap();
        state.registry.resolve_or_create(&room_id);

        let mut ws = connect(&addr, &room_id, "caller").await;
        let hello = recv_json(&mut ws).await;
        assert_eq!(hello["roomId"], room_id.as_str());
        assert_eq!(hello["clients"], 1);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app(test_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
