//! End-to-end tests: a real gateway on an ephemeral port, real WebSocket
//! clients, and wiremock standing in for the recognition and chat services.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use facegate_server::GatewayServer;
use facegate_server::shutdown::Drain;
use facegate_settings::GatewaySettings;
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_IMAGE: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRg==";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    addr: SocketAddr,
    server: GatewayServer,
    serve: JoinHandle<()>,
    recognition: MockServer,
    chat: MockServer,
}

/// Boot a gateway wired to fresh mock backends.
async fn boot(configure: impl FnOnce(&mut GatewaySettings)) -> Harness {
    let recognition = MockServer::start().await;
    let chat = MockServer::start().await;

    let mut settings = GatewaySettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.recognition.base_url = recognition.uri();
    settings.chat.base_url = chat.uri();
    configure(&mut settings);

    let handle = PrometheusBuilder::new().build_recorder().handle();
    let server = GatewayServer::new(settings, handle).unwrap();
    let (addr, serve) = server.listen().await.unwrap();

    Harness {
        addr,
        server,
        serve,
        recognition,
        chat,
    }
}

/// Connect and wait until the gateway has registered the session.
async fn connect(h: &Harness) -> WsStream {
    let before = h.server.registry().len();
    let (ws, _resp) = connect_async(format!("ws://{}/ws", h.addr)).await.unwrap();
    timeout(TIMEOUT, async {
        while h.server.registry().len() <= before {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session was not registered");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert nothing but control frames arrive within `window`.
async fn assert_silent(ws: &mut WsStream, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

fn frame(image: &str) -> Value {
    json!({"type": "frame", "image": image})
}

fn chat(query: &str) -> Value {
    json!({"type": "chat", "query": query})
}

// ── Recognition ──

#[tokio::test]
async fn frame_round_trip_delivers_payload_verbatim() {
    let h = boot(|_| {}).await;
    let payload = json!({"matches": [{"name": "Alice", "confidence": 0.91, "bbox": [10, 20, 110, 140]}]});
    Mock::given(method("POST"))
        .and(path("/recognize"))
        .and(body_json(json!({"image": FRAME_IMAGE})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payload.clone())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&h.recognition)
        .await;

    let mut ws = connect(&h).await;
    let started = Instant::now();
    send_json(&mut ws, frame(FRAME_IMAGE)).await;

    let msg = recv_json(&mut ws).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(msg, json!({"type": "recognition", "payload": payload}));
}

#[tokio::test]
async fn connecting_sends_nothing_before_a_request() {
    let h = boot(|_| {}).await;
    let mut ws = connect(&h).await;
    assert_silent(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn back_to_back_frames_second_is_busy() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/recognize"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"matches": []}))
                .set_delay(Duration::from_millis(600)),
        )
        .expect(1)
        .mount(&h.recognition)
        .await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, frame(FRAME_IMAGE)).await;
    send_json(&mut ws, frame(FRAME_IMAGE)).await;

    let started = Instant::now();
    let first = recv_json(&mut ws).await;
    assert_eq!(first, json!({"type": "recognition", "error": "Busy"}));
    assert!(started.elapsed() < Duration::from_millis(400));

    let second = recv_json(&mut ws).await;
    assert_eq!(second, json!({"type": "recognition", "payload": {"matches": []}}));
}

#[tokio::test]
async fn lane_is_free_again_after_result() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/recognize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"matches": []})))
        .expect(2)
        .mount(&h.recognition)
        .await;

    let mut ws = connect(&h).await;
    for _ in 0..2 {
        send_json(&mut ws, frame(FRAME_IMAGE)).await;
        let msg = recv_json(&mut ws).await;
        assert!(msg.get("payload").is_some(), "unexpected: {msg}");
    }
}

// ── Chat ──

#[tokio::test]
async fn chat_times_out_at_configured_deadline() {
    let h = boot(|s| s.chat.deadline_ms = 300).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "too late"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    let started = Instant::now();
    send_json(&mut ws, chat("Who registered last?")).await;

    let msg = recv_json(&mut ws).await;
    let elapsed = started.elapsed();
    assert_eq!(msg, json!({"type": "chat_response", "error": "Timeout"}));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn chat_and_frame_are_independent_lanes() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "Alice registered at 10:00"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.chat)
        .await;
    Mock::given(method("POST"))
        .and(path("/recognize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"matches": []})))
        .mount(&h.recognition)
        .await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, chat("Who registered last?")).await;
    send_json(&mut ws, frame(FRAME_IMAGE)).await;

    let first = recv_json(&mut ws).await;
    let second = recv_json(&mut ws).await;
    assert_eq!(first["type"], "recognition");
    assert_eq!(second["type"], "chat_response");
    assert_eq!(second["payload"]["answer"], "Alice registered at 10:00");
}

#[tokio::test]
async fn backend_error_status_is_reported() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("index unavailable"))
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, chat("hello")).await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(
        msg,
        json!({"type": "chat_response", "error": "backend returned 500: index unavailable"})
    );
}

#[tokio::test]
async fn unreachable_backend_is_reported() {
    let h = boot(|s| s.chat.base_url = "http://127.0.0.1:1".into()).await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, chat("hello")).await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "chat_response");
    assert!(
        msg["error"].as_str().unwrap().starts_with("backend unreachable"),
        "unexpected: {msg}"
    );
}

#[tokio::test]
async fn retry_recovers_from_transient_failure() {
    let h = boot(|s| {
        s.retry.max_retries = 2;
        s.retry.base_delay_ms = 10;
    })
    .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&h.chat)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "ok"})))
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, chat("hello")).await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg, json!({"type": "chat_response", "payload": {"answer": "ok"}}));
}

// ── Robustness and isolation ──

#[tokio::test]
async fn malformed_messages_are_ignored_and_connection_stays_open() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "still here"})))
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    ws.send(Message::Text("not json at all".into())).await.unwrap();
    send_json(&mut ws, json!({"type": "video", "image": "x"})).await;
    send_json(&mut ws, json!({"type": "frame"})).await;
    send_json(&mut ws, json!([1, 2, 3])).await;
    ws.send(Message::Binary(vec![0xff, 0xfe, 0x00].into())).await.unwrap();
    assert_silent(&mut ws, Duration::from_millis(200)).await;

    send_json(&mut ws, chat("are you there?")).await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg, json!({"type": "chat_response", "payload": {"answer": "still here"}}));
    assert!(h.recognition.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn binary_utf8_frames_are_accepted() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "binary ok"})))
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    let raw = chat("hi").to_string().into_bytes();
    ws.send(Message::Binary(raw.into())).await.unwrap();
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["payload"]["answer"], "binary ok");
}

#[tokio::test]
async fn results_are_isolated_between_connections() {
    let h = boot(|_| {}).await;
    for who in ["A", "B"] {
        Mock::given(method("POST"))
            .and(path("/recognize"))
            .and(body_json(json!({"image": format!("data:image/jpeg;base64,{who}")})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"matches": [{"name": who}]}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&h.recognition)
            .await;
    }

    let mut ws_a = connect(&h).await;
    let mut ws_b = connect(&h).await;

    send_json(&mut ws_a, frame("data:image/jpeg;base64,A")).await;
    send_json(&mut ws_b, frame("data:image/jpeg;base64,B")).await;

    let a = recv_json(&mut ws_a).await;
    let b = recv_json(&mut ws_b).await;
    assert_eq!(a["payload"]["matches"][0]["name"], "A");
    assert_eq!(b["payload"]["matches"][0]["name"], "B");
    assert_silent(&mut ws_a, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn disconnect_mid_flight_cleans_up() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "nobody listening"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&h.chat)
        .await;

    let mut ws = connect(&h).await;
    send_json(&mut ws, chat("hello")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    ws.close(None).await.unwrap();
    drop(ws);

    let drained = timeout(TIMEOUT, async {
        while !h.server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "connection was not unregistered");

    // A new connection is unaffected by the abandoned request.
    let mut ws = connect(&h).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_silent(&mut ws, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn silent_client_is_disconnected_by_heartbeat() {
    let h = boot(|s| {
        s.server.heartbeat_interval_secs = 1;
        s.server.pong_timeout_secs = 1;
    })
    .await;
    // Never read, so Pings go unanswered.
    let _ws = connect(&h).await;
    assert_eq!(h.server.registry().len(), 1);

    let drained = timeout(TIMEOUT, async {
        while !h.server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "unresponsive client was not disconnected");
}

#[tokio::test]
async fn responsive_client_survives_heartbeat() {
    let h = boot(|s| {
        s.server.heartbeat_interval_secs = 1;
        s.server.pong_timeout_secs = 1;
    })
    .await;
    let mut ws = connect(&h).await;

    // Reading lets the client answer Pings.
    assert_silent(&mut ws, Duration::from_millis(3_500)).await;
    assert_eq!(h.server.registry().len(), 1);
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let h = boot(|s| s.server.max_connections = 1).await;
    let _ws = connect(&h).await;

    let err = connect_async(format!("ws://{}/ws", h.addr)).await.unwrap_err();
    assert_matches!(err, tungstenite::Error::Http(resp) if resp.status() == 503);
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let h = boot(|_| {}).await;
    let mut ws = connect(&h).await;

    h.server.shutdown().begin();

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "session stayed open after shutdown");
}

#[tokio::test]
async fn drain_returns_after_sessions_unregister() {
    let h = boot(|_| {}).await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "too late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&h.chat)
        .await;

    let mut ws_a = connect(&h).await;
    let _ws_b = connect(&h).await;
    send_json(&mut ws_a, chat("still thinking?")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = h.server.shutdown().drain(h.serve, TIMEOUT).await;
    assert_eq!(outcome, Drain::Complete);
    assert!(h.server.registry().is_empty());
}

// ── REST surface ──

#[tokio::test]
async fn health_reports_live_connections() {
    let h = boot(|_| {}).await;
    let _ws = connect(&h).await;

    let body: Value = reqwest::get(format!("http://{}/health", h.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn last_registered_is_relayed() {
    let h = boot(|_| {}).await;
    let upstream = json!({"id": 7, "name": "Alice", "registered_at": "2024-05-01T10:00:00"});
    Mock::given(method("GET"))
        .and(path("/metadata/last"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream.clone()))
        .mount(&h.recognition)
        .await;

    let resp = reqwest::get(format!("http://{}/api/metadata/last-registered", h.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), upstream);
}

#[tokio::test]
async fn register_is_relayed_with_upstream_status() {
    let h = boot(|_| {}).await;
    let request = json!({"name": "Bob", "image": FRAME_IMAGE});
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(body_json(request.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "registered", "name": "Bob"})))
        .expect(1)
        .mount(&h.recognition)
        .await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/register", h.addr))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "registered");
}

#[tokio::test]
async fn passthrough_times_out_with_504() {
    let h = boot(|s| s.recognition.deadline_ms = 200).await;
    Mock::given(method("GET"))
        .and(path("/metadata/count"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"count": 2}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&h.recognition)
        .await;

    let resp = reqwest::get(format!("http://{}/api/metadata/count", h.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"error": "Timeout"}));
}
