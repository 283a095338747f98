//! Integration tests for the correlated request channel
//!
//! A scripted relay built on tokio-tungstenite stands in for the design
//! plugin's channel relay; every test talks to it over a real socket.

use designbridge_core::config::TransportConfig;
use designbridge_core::transport::{ConnectionState, Transport, TransportError};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(3);

/// Local relay accepting any number of connections
struct Relay {
    port: u16,
    connections: mpsc::UnboundedReceiver<Peer>,
}

impl Relay {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(Peer { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self { port, connections }
    }

    async fn next_peer(&mut self) -> Peer {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection reached the relay")
            .expect("relay stopped")
    }

    /// True if a connection arrives within `window`
    async fn connects_within(&mut self, window: Duration) -> bool {
        matches!(timeout(window, self.connections.recv()).await, Ok(Some(_)))
    }
}

/// Server side of one client socket
struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    async fn recv(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("client sent nothing")
                .expect("client went away")
                .expect("socket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// True if the client sends a text frame within `window`
    async fn receives_within(&mut self, window: Duration) -> bool {
        matches!(
            timeout(window, self.ws.next()).await,
            Ok(Some(Ok(Message::Text(_))))
        )
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string())).await.unwrap();
    }

    async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({ "id": request["id"], "result": result }))
            .await;
    }

    async fn close(mut self, code: CloseCode, reason: &'static str) {
        let _ = self
            .ws
            .close(Some(CloseFrame {
                code,
                reason: reason.into(),
            }))
            .await;
        // Drain until the client acknowledges
        while let Some(Ok(_)) = self.ws.next().await {}
    }
}

fn test_config() -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        timeout_extensions: 3,
        base_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        stale_after: Duration::from_secs(300),
        sweep_interval: Duration::from_secs(60),
        settled_history: 64,
    }
}

async fn connect(relay: &mut Relay, config: TransportConfig) -> (Transport, Peer) {
    let transport = Transport::new(config);
    let base = transport.config().base_backoff;
    assert_ok!(transport.connect("127.0.0.1", relay.port, base).await);
    let peer = relay.next_peer().await;
    (transport, peer)
}

async fn join(transport: &Transport, peer: &mut Peer, channel: &str) {
    let answer = async {
        let frame = peer.recv().await;
        assert_eq!(frame["type"], "join");
        assert_eq!(frame["channel"], channel);
        assert_eq!(frame["message"]["command"], "join");
        peer.reply(&frame, json!({ "channel": channel })).await;
    };
    let (joined, _) = tokio::join!(transport.join_channel(channel), answer);
    assert_ok!(joined);
}

async fn connect_and_join(relay: &mut Relay, config: TransportConfig) -> (Transport, Peer) {
    let (transport, mut peer) = connect(relay, config).await;
    join(&transport, &mut peer, "abc").await;
    (transport, peer)
}

fn unrelated_broadcast() -> Value {
    json!({ "type": "system", "message": "Another client joined", "channel": "abc" })
}

/// Poll until the pending table holds `expected` entries
async fn pending_settles_to(transport: &Transport, expected: usize) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if transport.pending_count() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_direct_reply_resolves_call() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;
    assert_eq!(transport.current_channel().as_deref(), Some("abc"));

    let answer = async {
        let frame = peer.recv().await;
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["channel"], "abc");
        assert_eq!(frame["message"]["command"], "ping");
        assert_eq!(frame["message"]["id"], frame["id"]);
        assert_eq!(frame["message"]["params"]["commandId"], frame["id"]);
        peer.reply(&frame, json!("pong")).await;
    };

    let (result, _) = tokio::join!(transport.send("ping", json!({}), None), answer);
    assert_eq!(result.unwrap(), json!("pong"));
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_reply_shapes_and_peer_errors() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    // Result nested under `message`
    let answer = async {
        let frame = peer.recv().await;
        peer.send(json!({ "id": frame["id"], "message": { "result": { "name": "Doc" } } }))
            .await;
    };
    let (nested, _) = tokio::join!(transport.send("get_document_info", json!({}), None), answer);
    assert_eq!(nested.unwrap(), json!({ "name": "Doc" }));

    // Whole envelope echoed back with the result inside
    let answer = async {
        let frame = peer.recv().await;
        peer.send(json!({
            "type": "broadcast",
            "message": { "id": frame["id"], "result": [1, 2, 3] }
        }))
        .await;
    };
    let (reverse, _) = tokio::join!(transport.send("get_styles", json!({}), None), answer);
    assert_eq!(reverse.unwrap(), json!([1, 2, 3]));

    // Error field becomes a rejection with the peer's message
    let answer = async {
        let frame = peer.recv().await;
        peer.send(json!({ "id": frame["id"], "error": "Node not found: 9:9" }))
            .await;
    };
    let (failed, _) = tokio::join!(
        transport.send("get_node_info", json!({ "nodeId": "9:9" }), None),
        answer
    );
    assert_eq!(
        failed.unwrap_err(),
        TransportError::Peer("Node not found: 9:9".to_string())
    );
}

#[tokio::test]
async fn test_commands_require_a_channel() {
    // Never connected: the gate fails before any connection attempt
    let transport = Transport::new(test_config());
    assert_eq!(
        transport.send("ping", json!({}), None).await.unwrap_err(),
        TransportError::channel_required("ping")
    );
    assert_eq!(transport.state(), ConnectionState::Closed);

    // Connected but not joined: nothing reaches the socket
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect(&mut relay, test_config()).await;
    for command in ["get_selection", "create_rectangle", "move_node"] {
        assert_eq!(
            transport.send(command, json!({}), None).await.unwrap_err(),
            TransportError::channel_required(command)
        );
    }
    assert!(!peer.receives_within(Duration::from_millis(200)).await);
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_join_preconditions() {
    let transport = Transport::new(test_config());
    assert_eq!(
        transport.join_channel("abc").await.unwrap_err(),
        TransportError::NotConnected
    );
    assert_eq!(
        transport.join_channel("  ").await.unwrap_err(),
        TransportError::InvalidChannel("  ".to_string())
    );
    assert!(transport.current_channel().is_none());
}

#[tokio::test]
async fn test_progress_keeps_slow_call_alive() {
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(400);
    config.timeout_extensions = 0;

    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, config).await;

    let started = Instant::now();
    let answer = async {
        let frame = peer.recv().await;
        for (delay, percent) in [(200, 40), (300, 80)] {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            peer.send(json!({
                "type": "progress_update",
                "id": frame["id"],
                "message": { "data": {
                    "commandType": "slow_op",
                    "progress": percent,
                    "status": "in_progress",
                    "message": "working"
                }}
            }))
            .await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        peer.reply(&frame, json!({ "done": true })).await;
    };

    let (result, _) = tokio::join!(transport.send("slow_op", json!({}), None), answer);
    assert_eq!(result.unwrap(), json!({ "done": true }));
    assert!(started.elapsed() >= Duration::from_millis(800));
}

#[tokio::test]
async fn test_silent_peer_times_out_after_every_extension() {
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(100);
    config.timeout_extensions = 3;

    let mut relay = Relay::start().await;
    let (transport, _peer) = connect_and_join(&mut relay, config).await;

    let started = Instant::now();
    let err = transport.send("op", json!({}), None).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, TransportError::Timeout { ref command, .. } if command == "op"));
    assert!(elapsed >= Duration::from_millis(400), "gave up after {:?}", elapsed);
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_close_rejects_call_and_reconnects() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let answer = async {
        peer.recv().await;
        peer.close(CloseCode::Away, "relay restarting").await;
    };
    let (result, _) = tokio::join!(transport.send("op", json!({}), None), answer);

    assert_eq!(
        result.unwrap_err(),
        TransportError::connection_closed(1001, "relay restarting")
    );
    assert_eq!(transport.pending_count(), 0);

    // Backoff is capped at 200ms, so the retry arrives quickly
    let mut peer = relay.next_peer().await;
    let mut states = transport.subscribe_state();
    assert_ok!(
        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Open))
            .await
            .unwrap()
    );

    // A fresh socket carries no membership
    assert!(transport.current_channel().is_none());
    assert_err!(transport.send("ping", json!({}), None).await);
    join(&transport, &mut peer, "def").await;
    assert_eq!(transport.current_channel().as_deref(), Some("def"));
}

#[tokio::test]
async fn test_close_rejects_every_pending_call() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let calls: Vec<_> = (0..5)
        .map(|i| {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&format!("op_{}", i), json!({}), None).await })
        })
        .collect();

    for _ in 0..5 {
        peer.recv().await;
    }
    assert_eq!(transport.pending_count(), 5);
    peer.close(CloseCode::Error, "internal error").await;

    for call in calls {
        let result = call.await.unwrap();
        assert_eq!(
            result.unwrap_err(),
            TransportError::connection_closed(1011, "internal error")
        );
    }
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let answer = async {
        let frame = peer.recv().await;
        peer.reply(&frame, json!("first")).await;
        peer.reply(&frame, json!("again")).await;
    };
    let (first, _) = tokio::join!(transport.send("ping", json!({}), None), answer);
    assert_eq!(first.unwrap(), json!("first"));

    // Without duplicate tracking the late copy would be handed to this call
    let answer = async {
        let frame = peer.recv().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        peer.reply(&frame, json!("second")).await;
    };
    let (second, _) = tokio::join!(transport.send("ping", json!({}), None), answer);
    assert_eq!(second.unwrap(), json!("second"));
}

#[tokio::test]
async fn test_broadcast_reply_is_matched_by_command_shape() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let document = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send("get_document_info", json!({}), None).await })
    };
    let first = peer.recv().await;
    let selection = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send("get_selection", json!({}), None).await })
    };
    let second = peer.recv().await;

    let selection_frame = [&first, &second]
        .into_iter()
        .find(|f| f["message"]["command"] == "get_selection")
        .cloned()
        .unwrap();

    // No identifier anywhere, only the shape of a page
    let page = json!({ "type": "PAGE", "name": "Page 1", "children": [] });
    peer.send(page.clone()).await;

    let result = timeout(WAIT, document).await.unwrap().unwrap();
    assert_eq!(result.unwrap(), page);
    assert_eq!(transport.pending_count(), 1);
    assert!(!selection.is_finished());

    peer.reply(&selection_frame, json!({ "selectionCount": 0, "selection": [] }))
        .await;
    let result = timeout(WAIT, selection).await.unwrap().unwrap();
    assert_eq!(result.unwrap()["selectionCount"], 0);
}

#[tokio::test]
async fn test_unrelated_broadcasts_are_dropped() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let answer = async {
        let frame = peer.recv().await;
        peer.send(json!({ "type": "system", "message": "Another client joined", "channel": "abc" }))
            .await;
        peer.send(json!({ "sender": "You", "message": { "id": frame["id"], "command": "ping" } }))
            .await;
        peer.send(json!("not an object")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.pending_count(), 1);
        peer.reply(&frame, json!("pong")).await;
    };
    let (result, _) = tokio::join!(transport.send("ping", json!({}), None), answer);
    assert_eq!(result.unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_lazy_connect_after_drop() {
    let mut relay = Relay::start().await;
    let (transport, peer) = connect_and_join(&mut relay, test_config()).await;

    let mut states = transport.subscribe_state();
    peer.close(CloseCode::Away, "bye").await;
    assert_ok!(
        timeout(WAIT, states.wait_for(|s| *s != ConnectionState::Open))
            .await
            .unwrap()
    );
    assert!(transport.current_channel().is_none());

    // The call reopens the socket, then finds the membership gone
    let err = transport.send("ping", json!({}), None).await.unwrap_err();
    assert_eq!(err, TransportError::channel_required("ping"));
    assert!(transport.is_connected());
    assert!(relay.connects_within(WAIT).await);
}

#[tokio::test]
async fn test_client_close_is_terminal() {
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, test_config()).await;

    let call = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send("op", json!({}), None).await })
    };
    peer.recv().await;

    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(transport.current_channel().is_none());

    let result = timeout(WAIT, call).await.unwrap().unwrap();
    assert_eq!(
        result.unwrap_err(),
        TransportError::connection_closed(1000, "closed by client")
    );

    // No reconnect, and no lazy connect either
    assert!(!relay.connects_within(Duration::from_millis(400)).await);
    assert_eq!(
        transport.join_channel("abc").await.unwrap_err(),
        TransportError::NotConnected
    );

    // An explicit connect starts over
    assert_ok!(
        transport
            .connect("127.0.0.1", relay.port, Duration::from_millis(50))
            .await
    );
    assert!(relay.connects_within(WAIT).await);
}

#[tokio::test]
async fn test_connect_is_idempotent_and_times_out_without_relay() {
    let mut relay = Relay::start().await;
    let (transport, _peer) = connect(&mut relay, test_config()).await;

    assert_ok!(
        transport
            .connect("127.0.0.1", relay.port, Duration::from_millis(50))
            .await
    );
    assert!(!relay.connects_within(Duration::from_millis(200)).await);

    // Nothing listens on the port of a dropped listener
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = test_config();
    config.connect_timeout = Duration::from_millis(300);
    let unreachable = Transport::new(config);
    let err = unreachable
        .connect("127.0.0.1", port, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectTimeout { .. }));
    unreachable.close().await;
}

#[tokio::test]
async fn test_sweep_does_not_cut_short_a_running_timeout() {
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(200);
    config.timeout_extensions = 3;
    config.stale_after = Duration::from_millis(250);
    config.sweep_interval = Duration::from_millis(1);

    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, config).await;

    let started = Instant::now();
    let chatter = async {
        peer.recv().await;
        // Frames keep arriving, so the sweep runs throughout the call
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            peer.send(unrelated_broadcast()).await;
        }
    };
    let (result, _) = tokio::join!(
        async {
            let result = transport.send("op", json!({}), None).await;
            (result, started.elapsed())
        },
        chatter
    );
    let (result, elapsed) = result;

    assert!(
        matches!(result, Err(TransportError::Timeout { ref command, .. }) if command == "op"),
        "unexpected outcome {:?}",
        result
    );
    assert!(elapsed >= Duration::from_millis(800), "gave up after {:?}", elapsed);
    assert_eq!(transport.pending_count(), 0);
}

#[tokio::test]
async fn test_abandoned_call_is_swept_on_a_later_frame() {
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(200);
    config.timeout_extensions = 0;
    config.stale_after = Duration::from_millis(100);
    config.sweep_interval = Duration::from_secs(1);

    let created = Instant::now();
    let mut relay = Relay::start().await;
    let (transport, mut peer) = connect_and_join(&mut relay, config).await;

    // The caller gives up; nothing drives its timeout any more
    let call = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send("export_node_as_image", json!({}), None).await })
    };
    peer.recv().await;
    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());
    assert_eq!(transport.pending_count(), 1);

    // Stale by now, but the sweep interval has not elapsed yet
    tokio::time::sleep_until(created + Duration::from_millis(500)).await;
    peer.send(unrelated_broadcast()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.pending_count(), 1);

    // Past the interval, the next frame triggers the sweep
    tokio::time::sleep_until(created + Duration::from_millis(1200)).await;
    peer.send(unrelated_broadcast()).await;
    assert!(pending_settles_to(&transport, 0).await);

    // The socket and membership are untouched
    assert!(transport.is_connected());
    assert_eq!(transport.current_channel().as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_connect_issued_during_close_keeps_its_state() {
    let mut relay = Relay::start().await;
    let (transport, _old_peer) = connect_and_join(&mut relay, test_config()).await;

    let (_, reconnected) = tokio::join!(
        transport.close(),
        transport.connect("127.0.0.1", relay.port, Duration::from_millis(50))
    );
    assert_ok!(reconnected);
    let _peer = relay.next_peer().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.state(), ConnectionState::Open);
    assert!(transport.current_channel().is_none());
}
