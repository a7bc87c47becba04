//! End-to-end tests against a live server on an ephemeral port.

use futures_util::{SinkExt, StreamExt};
use parlor_protocol::{codec, codes, ClientFrame, ServerFrame};
use parlor_server::config::StorageBackend;
use parlor_server::{build_hub, serve, AppState, Config};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> String {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config.metrics.enabled = false;

    let hub = build_hub(&config).await.unwrap();
    let state = Arc::new(AppState::new(hub, config));

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { serve(listener, state).await.unwrap() });

    format!("http://{}:{}", addr.ip(), addr.port())
}

async fn connect(base: &str) -> Client {
    let url = format!("{}/ws", base.replacen("http", "ws", 1));
    let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let first = next_frame(&mut client).await;
    assert!(matches!(first, ServerFrame::Connected { version: 1, .. }));
    client
}

async fn send(client: &mut Client, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).unwrap();
    client.send(WsMessage::Text(text)).await.unwrap();
}

async fn next_frame(client: &mut Client) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match message {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            WsMessage::Binary(data) => return codec::decode(&data).unwrap(),
            _ => continue,
        }
    }
}

/// Skip frames until one matches.
async fn wait_for(client: &mut Client, pred: impl Fn(&ServerFrame) -> bool) -> ServerFrame {
    loop {
        let frame = next_frame(client).await;
        if pred(&frame) {
            return frame;
        }
    }
}

fn is_chat(frame: &ServerFrame) -> bool {
    matches!(frame, ServerFrame::Message { id: Some(_), .. })
}

fn is_notice(body: &'static str) -> impl Fn(&ServerFrame) -> bool {
    move |frame| matches!(frame, ServerFrame::Message { id: None, body: b, .. } if b == body)
}

#[tokio::test]
async fn room_message_round_trip_over_websocket() {
    let base = start_server().await;
    let http = reqwest::Client::new();

    let created: Value = http
        .post(format!("{base}/create_room"))
        .json(&json!({"name": "Dev"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created, json!({"success": true}));

    let mut a = connect(&base).await;
    let mut b = connect(&base).await;

    send(&mut a, &ClientFrame::join_room("A", "Dev")).await;
    wait_for(&mut a, is_notice("A joined Dev")).await;
    send(&mut b, &ClientFrame::join_room("B", "Dev")).await;
    wait_for(&mut b, is_notice("B joined Dev")).await;

    send(&mut a, &ClientFrame::message("A", "Dev", "hi")).await;

    match wait_for(&mut b, is_chat).await {
        ServerFrame::Message {
            sender,
            body,
            receiver,
            room,
            ..
        } => {
            assert_eq!(sender, "A");
            assert_eq!(body, "hi");
            assert_eq!(receiver, None);
            assert_eq!(room.as_deref(), Some("Dev"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let history: Value = http
        .get(format!("{base}/history/Dev"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sender"], "A");
    assert_eq!(entries[0]["body"], "hi");
    assert!(entries[0]["receiver"].is_null());
}

#[tokio::test]
async fn private_message_reaches_only_the_target() {
    let base = start_server().await;
    let mut a = connect(&base).await;
    let mut b = connect(&base).await;
    let mut c = connect(&base).await;

    send(&mut a, &ClientFrame::join_room("A", "Dev")).await;
    wait_for(&mut a, is_notice("A joined Dev")).await;
    send(&mut b, &ClientFrame::join_room("B", "Main")).await;
    wait_for(&mut b, is_notice("B joined Main")).await;
    send(&mut c, &ClientFrame::join_room("C", "Dev")).await;
    wait_for(&mut c, is_notice("C joined Dev")).await;

    send(&mut a, &ClientFrame::private_message("A", "Dev", "psst", "B")).await;

    match wait_for(&mut b, is_chat).await {
        ServerFrame::Message { receiver, body, .. } => {
            assert_eq!(receiver.as_deref(), Some("B"));
            assert_eq!(body, "psst");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    // A follow-up room message is the first chat message C sees.
    send(&mut a, &ClientFrame::message("A", "Dev", "public")).await;
    match wait_for(&mut c, is_chat).await {
        ServerFrame::Message { body, .. } => assert_eq!(body, "public"),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn presence_snapshot_follows_disconnects() {
    let base = start_server().await;
    let mut a = connect(&base).await;
    let mut b = connect(&base).await;

    send(&mut a, &ClientFrame::join_room("A", "Main")).await;
    send(&mut b, &ClientFrame::join_room("B", "Main")).await;
    wait_for(&mut a, |f| {
        matches!(f, ServerFrame::OnlineUsers { users } if users.len() == 2)
    })
    .await;

    b.close(None).await.unwrap();

    wait_for(&mut a, is_notice("B disconnected")).await;
    let frame = wait_for(&mut a, |f| matches!(f, ServerFrame::OnlineUsers { .. })).await;
    assert_eq!(frame, ServerFrame::online_users(vec!["A".to_string()]));
}

#[tokio::test]
async fn rooms_endpoints_report_duplicates() {
    let base = start_server().await;
    let http = reqwest::Client::new();

    let rooms: Value = http
        .get(format!("{base}/rooms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms, json!([{"name": "Main"}]));

    for (body, expected) in [
        (json!({"name": "Ops"}), true),
        (json!({"name": "Ops"}), false),
        (json!({"name": ""}), false),
        (json!({}), false),
    ] {
        let response: Value = http
            .post(format!("{base}/rooms"))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["success"], expected, "body: {body}");
    }

    let rooms: Value = http
        .get(format!("{base}/rooms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms, json!([{"name": "Main"}, {"name": "Ops"}]));
}

#[tokio::test]
async fn malformed_and_invalid_frames_get_error_replies() {
    let base = start_server().await;
    let mut a = connect(&base).await;

    a.send(WsMessage::Text("not json".to_string())).await.unwrap();
    match next_frame(&mut a).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, codes::MALFORMED_FRAME),
        other => panic!("unexpected frame: {other:?}"),
    }

    send(&mut a, &ClientFrame::message("A", "Main", "")).await;
    match next_frame(&mut a).await {
        ServerFrame::Error { code, .. } => assert_eq!(code, codes::INVALID_FRAME),
        other => panic!("unexpected frame: {other:?}"),
    }

    // Still usable afterwards.
    send(&mut a, &ClientFrame::Ping { timestamp: Some(7) }).await;
    assert_eq!(next_frame(&mut a).await, ServerFrame::pong(Some(7)));
}

#[tokio::test]
async fn msgpack_clients_interoperate_with_json_clients() {
    let base = start_server().await;
    let url = format!("{}/ws?format=msgpack", base.replacen("http", "ws", 1));
    let (mut packed, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert!(matches!(
        next_frame(&mut packed).await,
        ServerFrame::Connected { .. }
    ));
    let mut plain = connect(&base).await;

    let join = codec::encode(&ClientFrame::join_room("P", "Main")).unwrap();
    packed.send(WsMessage::Binary(join.to_vec())).await.unwrap();
    wait_for(&mut packed, is_notice("P joined Main")).await;
    send(&mut plain, &ClientFrame::join_room("J", "Main")).await;
    wait_for(&mut plain, is_notice("J joined Main")).await;

    send(&mut plain, &ClientFrame::message("J", "Main", "hello packed")).await;
    match wait_for(&mut packed, is_chat).await {
        ServerFrame::Message { sender, body, .. } => {
            assert_eq!(sender, "J");
            assert_eq!(body, "hello packed");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn health_reports_counters() {
    let base = start_server().await;
    let _a = connect(&base).await;

    let health: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["rooms"], 1);
    assert_eq!(health["sessions"], 1);
}
