//! Connection handlers for Parlor server.
//!
//! This module handles the connection lifecycle, inbound frame processing
//! and the HTTP query endpoints.

use crate::config::Config;
use crate::error::{frame_code, ApiError};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parlor_core::{ChatError, ChatMessage, ConnectionId, Delivery, Hub, RouteRequest};
use parlor_protocol::{codec, codes, ClientFrame, Encoding, ServerFrame};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The chat core.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: Hub, config: Config) -> Self {
        Self { hub, config }
    }
}

/// Build the HTTP/WebSocket application.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/create_room", post(create_room))
        .route("/history/:key", get(history))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener until the server stops.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, hub: Hub) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parlor server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(hub, config))).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.sessions.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": stats.sessions,
        "rooms": state.hub.rooms.len().await,
    }))
}

/// One entry of the room listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomEntry {
    pub name: String,
}

/// Body of a room creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: String,
}

/// Outcome of a room creation request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub success: bool,
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomEntry>> {
    let rooms = state
        .hub
        .list_rooms()
        .await
        .into_iter()
        .map(|name| RoomEntry { name })
        .collect();
    Json(rooms)
}

/// A duplicate or invalid name is reported as `success: false`; storage
/// failures are server errors.
async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let name = request.name.trim();
    match state.hub.create_room(name).await {
        Ok(()) => {
            metrics::record_room_created();
            info!(room = %name, "Room created");
            Ok(Json(CreateRoomResponse { success: true }))
        }
        Err(ChatError::DuplicateRoom(_) | ChatError::InvalidRoomName(_)) => {
            debug!(room = %name, "Room not created");
            Ok(Json(CreateRoomResponse { success: false }))
        }
        Err(e) => {
            metrics::record_error("storage");
            Err(e.into())
        }
    }
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let messages = state.hub.history(&key).await.map_err(|e| {
        metrics::record_error("storage");
        ApiError::from(e)
    })?;
    Ok(Json(messages))
}

/// WebSocket query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// `json` (default) or `msgpack`.
    #[serde(default)]
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let encoding = match params.format.as_deref().map(str::parse::<Encoding>) {
        None => Encoding::Json,
        Some(Ok(encoding)) => encoding,
        Some(Err(e)) => return ApiError::BadRequest(e.to_string()).into_response(),
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, encoding))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, encoding: Encoding) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let sessions = state.hub.sessions.clone();

    let (connection, mut outbox) = sessions.connect().await;
    debug!(connection = %connection, ?encoding, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let connected = ServerFrame::connected(connection.as_u64());
    if let Err(e) = send_frame(&mut sender, encoding, &connected).await {
        error!(connection = %connection, error = %e, "Failed to send connected frame");
        sessions.disconnect(connection).await;
        return;
    }

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some(delivery) = outbox.recv() => {
                let frame = delivery_frame(&delivery);
                if send_frame(&mut sender, encoding, &frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame(text.len(), "inbound");
                        let reply = match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, connection, &state).await,
                            Err(e) => Some(malformed(connection, &e)),
                        };
                        if let Some(reply) = reply {
                            if send_frame(&mut sender, encoding, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let mut replies = Vec::new();
                        loop {
                            match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    if let Some(reply) = handle_frame(frame, connection, &state).await {
                                        replies.push(reply);
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    // The stream is out of sync; drop what is buffered.
                                    read_buffer.clear();
                                    replies.push(malformed(connection, &e));
                                    break;
                                }
                            }
                        }

                        let mut closed = false;
                        for reply in &replies {
                            if send_frame(&mut sender, encoding, reply).await.is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    sessions.disconnect(connection).await;
    metrics::set_active_rooms(sessions.stats().await.active_rooms);
    debug!(connection = %connection, "WebSocket disconnected");
}

fn malformed(connection: ConnectionId, err: &codec::ProtocolError) -> ServerFrame {
    debug!(connection = %connection, error = %err, "Malformed frame");
    metrics::record_error("malformed_frame");
    ServerFrame::error(codes::MALFORMED_FRAME, err.to_string())
}

/// Handle a decoded frame, returning a reply for the sender if there is one.
async fn handle_frame(
    frame: ClientFrame,
    connection: ConnectionId,
    state: &AppState,
) -> Option<ServerFrame> {
    if let Err(e) = frame.validate() {
        debug!(connection = %connection, kind = frame.kind(), error = %e, "Rejected frame");
        return Some(ServerFrame::error(codes::INVALID_FRAME, e.to_string()));
    }

    let hub = &state.hub;
    let result = match frame {
        ClientFrame::JoinRoom {
            display_name,
            room_name,
        } => {
            let result = hub.sessions.join(connection, &display_name, &room_name).await;
            metrics::set_active_rooms(hub.sessions.stats().await.active_rooms);
            result.map(|created| {
                if created {
                    metrics::record_room_created();
                }
            })
        }

        ClientFrame::LeaveRoom {
            display_name,
            room_name,
        } => hub.sessions.leave(connection, &display_name, &room_name).await,

        ClientFrame::Message {
            display_name,
            room_name,
            body,
            private_target,
        } => {
            let start = Instant::now();
            let request = RouteRequest {
                display_name,
                room: room_name,
                body,
                private_target,
            };
            hub.router.route(connection, request).await.map(|report| {
                metrics::record_routed(
                    report.message.is_private(),
                    report.dropped,
                    start.elapsed().as_secs_f64(),
                );
            })
        }

        ClientFrame::Ping { timestamp } => return Some(ServerFrame::pong(timestamp)),
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            if matches!(e, ChatError::StorageUnavailable(_)) {
                metrics::record_error("storage");
            }
            warn!(connection = %connection, error = %e, "Event rejected");
            Some(ServerFrame::error(frame_code(&e), e.to_string()))
        }
    }
}

/// Map a queued delivery to its wire frame.
fn delivery_frame(delivery: &Delivery) -> ServerFrame {
    match delivery {
        Delivery::Message(event) => ServerFrame::Message {
            id: event.id,
            room: event.room.clone(),
            sender: event.sender.clone(),
            receiver: event.receiver.clone(),
            body: event.body.clone(),
            timestamp: event.timestamp,
        },
        Delivery::OnlineUsers(users) => {
            metrics::record_presence_update();
            ServerFrame::online_users(users.to_vec())
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSink, encoding: Encoding, frame: &ServerFrame) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_core::MessageEvent;

    #[test]
    fn test_delivery_frame_message() {
        let event = MessageEvent::system("Dev", "alice joined Dev");
        let frame = delivery_frame(&Delivery::Message(Arc::new(event)));

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["sender"], "System");
        assert_eq!(value["room"], "Dev");
        assert!(value["receiver"].is_null());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_delivery_frame_presence() {
        let users: Arc<[String]> = vec!["alice".to_string(), "bob".to_string()].into();
        let frame = delivery_frame(&Delivery::OnlineUsers(users));
        assert_eq!(
            frame,
            ServerFrame::online_users(vec!["alice".to_string(), "bob".to_string()])
        );
    }
}
