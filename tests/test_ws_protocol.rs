//! Wire-level tests: real WebSocket clients against a bound `WsServer`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rupture::config::SessionConfig;
use rupture::hub::SessionHub;
use rupture::observability::EventEmitter;
use rupture::transport::{WsConfig, WsServer};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

struct Gallery {
    server: WsServer,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl Gallery {
    async fn open() -> Self {
        let cancel = CancellationToken::new();
        let (hub, _task) = SessionHub::spawn(
            SessionConfig {
                seed: Some(11),
                ..SessionConfig::default()
            },
            64,
            Arc::new(EventEmitter::noop()),
            cancel.clone(),
        );
        let config = WsConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_message_size: 64 * 1024,
            public_dir: None,
        };
        let (server, addr) = WsServer::bind(config, hub, cancel.clone()).await.unwrap();
        Self {
            server,
            addr,
            cancel,
        }
    }

    /// Connects a client and consumes its `initial-state` frame.
    async fn visitor(&self) -> (Client, Value) {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket handshake failed");
        let first = next_frame(&mut ws).await;
        (ws, first)
    }

    async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.server.connection_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {expected} open connections, found {}",
            self.server.connection_count()
        );
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("receive failed");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn assert_quiet(ws: &mut Client) {
    if let Ok(frame) = tokio::time::timeout(QUIET_PERIOD, ws.next()).await {
        panic!("expected no frame, got {frame:?}");
    }
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::text(text)).await.expect("send failed");
}

fn gaze_points(frame: &Value) -> usize {
    frame["data"]["gazePoints"].as_array().unwrap().len()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_round_trip_between_two_clients() {
    let gallery = Gallery::open().await;

    let (mut a, a_initial) = gallery.visitor().await;
    assert_eq!(a_initial["event"], "initial-state");
    assert_eq!(a_initial["data"]["watchers"], 0);
    assert_eq!(a_initial["data"]["phase"], "waiting");

    let (mut b, b_initial) = gallery.visitor().await;
    assert_eq!(b_initial["event"], "initial-state");
    gallery.wait_for_connections(2).await;

    send_text(&mut a, r#"{"event":"join-as","data":"audience"}"#).await;
    for ws in [&mut a, &mut b] {
        let update = next_frame(ws).await;
        assert_eq!(update["event"], "state-update");
        assert_eq!(update["data"]["watchers"], 1);
        assert_eq!(update["data"]["phase"], "waiting");
    }

    send_text(&mut a, r#"{"event":"gaze-start"}"#).await;
    for ws in [&mut a, &mut b] {
        let update = next_frame(ws).await;
        assert_eq!(update["event"], "state-update");
        assert_eq!(update["data"]["watchers"], 1);
        assert_eq!(gaze_points(&update), 1);
        assert!(update["data"]["gazePoints"][0]["id"].is_u64());
    }

    // Undecodable frames are dropped without a reply or a close.
    send_text(&mut a, "this is not json").await;
    send_text(&mut a, r#"{"event":"gaze-strat"}"#).await;
    a.send(Message::binary(vec![0x01, 0x02])).await.unwrap();
    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;

    send_text(&mut a, r#"{"event":"gaze-hold"}"#).await;
    let held = next_frame(&mut a).await;
    assert_eq!(held["event"], "state-update");
    assert!(held["data"]["totalPressure"].as_f64().unwrap() > 0.5);
    next_frame(&mut b).await;

    a.close(None).await.unwrap();
    let update = next_frame(&mut b).await;
    assert_eq!(update["event"], "state-update");
    assert_eq!(update["data"]["watchers"], 0);
    assert_eq!(gaze_points(&update), 0);
    assert_quiet(&mut b).await;

    gallery.wait_for_connections(1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn experiencer_join_is_silent() {
    let gallery = Gallery::open().await;
    let (mut observer, _) = gallery.visitor().await;
    let (mut experiencer, _) = gallery.visitor().await;

    send_text(&mut experiencer, r#"{"event":"join-as","data":"experiencer"}"#).await;
    assert_quiet(&mut observer).await;

    // Gaze from a non-watcher changes nothing.
    send_text(&mut experiencer, r#"{"event":"gaze-start"}"#).await;
    assert_quiet(&mut observer).await;

    send_text(&mut experiencer, r#"{"event":"trigger-transmutation"}"#).await;
    let update = next_frame(&mut observer).await;
    assert_eq!(update["data"]["phase"], "transmutation");
    assert_eq!(update["data"]["watchers"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_sees_current_state_first() {
    let gallery = Gallery::open().await;
    let (mut a, _) = gallery.visitor().await;
    send_text(&mut a, r#"{"event":"join-as","data":"audience"}"#).await;
    send_text(&mut a, r#"{"event":"gaze-start"}"#).await;
    next_frame(&mut a).await;
    next_frame(&mut a).await;

    let (_late, initial) = gallery.visitor().await;
    assert_eq!(initial["event"], "initial-state");
    assert_eq!(initial["data"]["watchers"], 1);
    assert_eq!(gaze_points(&initial), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_open_sockets() {
    let gallery = Gallery::open().await;
    let (mut ws, _) = gallery.visitor().await;

    gallery.cancel.cancel();
    let end = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
        .await
        .expect("socket should close on shutdown");
    assert!(
        matches!(end, None | Some(Ok(Message::Close(_)) | Err(_))),
        "unexpected frame: {end:?}"
    );
}
