//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use facegate_core::{DecodeError, Failure, InboundRequest, OutboundResult, codec};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::context::GatewayContext;
use crate::dispatcher::DispatchOutcome;
use crate::forwarder::Forwarded;
use crate::metrics::{
    GATEWAY_BUSY_TOTAL, GATEWAY_DECODE_ERRORS_TOTAL, GATEWAY_REQUESTS_TOTAL,
    GATEWAY_RESULTS_DROPPED_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::sequencer::Admission;

/// What the session did with one inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// Undecodable; logged and discarded with no reply.
    Dropped(DecodeError),
    /// A request of the same kind was pending; a `Busy` failure was dispatched.
    Busy(DispatchOutcome),
    /// Admitted; the forward task resolves the lane and dispatches the result.
    Forwarding(JoinHandle<()>),
}

/// Handle a text frame.
pub fn handle_text(
    ctx: &Arc<GatewayContext>,
    connection: &Arc<ClientConnection>,
    text: &str,
) -> Inbound {
    handle_inbound(ctx, connection, codec::decode_str(text), text.len())
}

/// Handle a binary frame. Only UTF-8 payloads decode.
pub fn handle_binary(
    ctx: &Arc<GatewayContext>,
    connection: &Arc<ClientConnection>,
    data: &[u8],
) -> Inbound {
    handle_inbound(ctx, connection, codec::decode(data), data.len())
}

/// Admit and forward one decoded message.
///
/// Never blocks on the backend: admitted requests run on their own task, so
/// the read loop is free to take the next frame immediately.
fn handle_inbound(
    ctx: &Arc<GatewayContext>,
    connection: &Arc<ClientConnection>,
    decoded: Result<InboundRequest, DecodeError>,
    len: usize,
) -> Inbound {
    let request = match decoded {
        Ok(request) => request,
        Err(err) => {
            warn!(connection_id = %connection.id, len, error = %err, "dropping undecodable message");
            counter!(GATEWAY_DECODE_ERRORS_TOTAL).increment(1);
            return Inbound::Dropped(err);
        }
    };

    let kind = request.kind();
    let pending = match connection.sequencer().admit(kind) {
        Admission::Admitted(pending) => pending,
        Admission::Busy => {
            debug!(connection_id = %connection.id, %kind, "request rejected, lane busy");
            counter!(GATEWAY_BUSY_TOTAL, "kind" => kind.as_str()).increment(1);
            let busy = OutboundResult::failure(connection.id.clone(), kind, Failure::busy());
            return Inbound::Busy(ctx.dispatcher.dispatch(&busy));
        }
    };

    counter!(GATEWAY_REQUESTS_TOTAL, "kind" => kind.as_str()).increment(1);
    debug!(
        connection_id = %connection.id,
        %kind,
        deadline_ms = u64::try_from(pending.remaining().as_millis()).unwrap_or(u64::MAX),
        "request admitted"
    );

    let forwarder = ctx.forwarders.for_kind(kind).clone();
    let tasks = ctx.tasks.clone();
    let ctx = ctx.clone();
    let connection = connection.clone();
    Inbound::Forwarding(tasks.spawn(async move {
        let forwarded = forwarder.forward(&request, &pending).await;
        // Free the lane before delivery so the client may send the next
        // request as soon as it sees this result.
        let _ = connection.sequencer().resolve(&pending);
        match forwarded {
            Forwarded::Completed(result) if !pending.cancel.is_cancelled() => {
                debug!(connection_id = %connection.id, %kind, failure = ?result.failure_kind(), "result ready");
                let _ = ctx.dispatcher.dispatch(&result);
            }
            _ => {
                debug!(connection_id = %connection.id, %kind, "result discarded, connection closing");
                counter!(GATEWAY_RESULTS_DROPPED_TOTAL, "reason" => "cancelled").increment(1);
            }
        }
    }))
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection
/// 2. Forwards queued outbound messages and sends periodic Pings
/// 3. Hands inbound frames to [`handle_text`] or [`handle_binary`]
/// 4. On close, error, heartbeat timeout or shutdown: cancels pending
///    requests, unregisters, and stops the writer
#[instrument(skip_all, fields(connection_id = tracing::field::Empty))]
pub async fn run_ws_session(ws: WebSocket, ctx: Arc<GatewayContext>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (connection, mut send_rx) = ctx.registry.register();
    let _ = tracing::Span::current().record("connection_id", tracing::field::display(&connection.id));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let heartbeat = ctx.heartbeat;
    let writer_conn = connection.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer_conn.check_alive() && writer_conn.last_seen_elapsed() > heartbeat.timeout {
                        warn!(timeout = ?heartbeat.timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader = async {
        while let Some(frame) = ws_rx.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "websocket read error");
                    break;
                }
            };
            connection.touch();
            match msg {
                Message::Text(text) => {
                    let _ = handle_text(&ctx, &connection, text.as_str());
                }
                Message::Binary(data) => {
                    let _ = handle_binary(&ctx, &connection, &data);
                }
                Message::Close(_) => {
                    info!("client sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    };

    tokio::select! {
        () = reader => {}
        _ = &mut writer => debug!("writer stopped"),
        () = connection.sequencer().cancelled() => info!("server shutting down, closing connection"),
    }

    let cancelled = connection.sequencer().cancel_all();
    let _ = ctx.registry.unregister(&connection.id);
    writer.abort();

    info!(cancelled, dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Forwarders, Heartbeat};
    use crate::dispatcher::ResultDispatcher;
    use crate::forwarder::{BackendError, InferenceBackend, InferenceForwarder, RetryPolicy};
    use crate::registry::ConnectionRegistry;
    use crate::sequencer::Deadlines;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use facegate_core::RequestKind;
    use serde_json::{Value, json};
    use tokio_util::task::TaskTracker;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Echoes the request body after `delay`.
    struct EchoBackend {
        delay: Duration,
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        async fn infer(&self, body: &Value) -> Result<Value, BackendError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "echo": body }))
        }
    }

    fn make_ctx(delay: Duration) -> Arc<GatewayContext> {
        let registry = Arc::new(ConnectionRegistry::new(
            16,
            Deadlines::default(),
            CancellationToken::new(),
        ));
        let forwarder = |kind| {
            Arc::new(InferenceForwarder::new(
                kind,
                Arc::new(EchoBackend { delay }),
                RetryPolicy::disabled(),
            ))
        };
        Arc::new(GatewayContext {
            dispatcher: ResultDispatcher::new(registry.clone()),
            registry,
            forwarders: Forwarders {
                recognition: forwarder(RequestKind::Recognition),
                chat: forwarder(RequestKind::Chat),
            },
            heartbeat: Heartbeat {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(60),
            },
            tasks: TaskTracker::new(),
        })
    }

    async fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
    }

    const FRAME: &str = r#"{"type":"frame","image":"data:image/jpeg;base64,AAA"}"#;
    const CHAT: &str = r#"{"type":"chat","query":"Who registered last?"}"#;

    #[tokio::test]
    async fn undecodable_message_is_dropped_silently() {
        let ctx = make_ctx(Duration::ZERO);
        let (conn, mut rx) = ctx.registry.register();

        assert_matches!(
            handle_text(&ctx, &conn, "not json"),
            Inbound::Dropped(DecodeError::InvalidJson(_))
        );
        assert_matches!(
            handle_text(&ctx, &conn, r#"{"type":"frame"}"#),
            Inbound::Dropped(DecodeError::MissingField { .. })
        );
        assert_matches!(
            handle_binary(&ctx, &conn, &[0xff, 0xfe]),
            Inbound::Dropped(DecodeError::NotUtf8)
        );
        assert!(rx.try_recv().is_err());
        assert!(!conn.sequencer().is_pending(RequestKind::Recognition));
    }

    #[tokio::test]
    async fn admitted_frame_delivers_payload() {
        let ctx = make_ctx(Duration::from_millis(5));
        let (conn, mut rx) = ctx.registry.register();

        let Inbound::Forwarding(task) = handle_text(&ctx, &conn, FRAME) else {
            panic!("expected admission");
        };
        task.await.unwrap();

        let msg = next_json(&mut rx).await;
        assert_eq!(msg["type"], "recognition");
        assert_eq!(msg["payload"]["echo"]["image"], "data:image/jpeg;base64,AAA");
        assert!(!conn.sequencer().is_pending(RequestKind::Recognition));
    }

    #[tokio::test(start_paused = true)]
    async fn second_frame_while_pending_is_busy() {
        let ctx = make_ctx(Duration::from_secs(1));
        let (conn, mut rx) = ctx.registry.register();

        let Inbound::Forwarding(first) = handle_text(&ctx, &conn, FRAME) else {
            panic!("expected admission");
        };
        assert_matches!(
            handle_text(&ctx, &conn, FRAME),
            Inbound::Busy(DispatchOutcome::Delivered)
        );

        let busy = next_json(&mut rx).await;
        assert_eq!(busy, json!({"type":"recognition","error":"Busy"}));

        first.await.unwrap();
        let result = next_json(&mut rx).await;
        assert_eq!(result["type"], "recognition");
        assert!(result.get("payload").is_some());
    }

    #[tokio::test]
    async fn utf8_binary_frame_is_admitted() {
        let ctx = make_ctx(Duration::ZERO);
        let (conn, mut rx) = ctx.registry.register();

        let Inbound::Forwarding(task) = handle_binary(&ctx, &conn, CHAT.as_bytes()) else {
            panic!("expected admission");
        };
        task.await.unwrap();
        assert_eq!(next_json(&mut rx).await["type"], "chat_response");
    }

    #[tokio::test]
    async fn forward_tasks_are_tracked() {
        let ctx = make_ctx(Duration::from_millis(20));
        let (conn, _rx) = ctx.registry.register();

        let Inbound::Forwarding(_task) = handle_text(&ctx, &conn, FRAME) else {
            panic!("expected admission");
        };
        assert_eq!(ctx.tasks.len(), 1);
        ctx.tasks.close();
        ctx.tasks.wait().await;
        assert!(ctx.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chat_and_frame_run_concurrently() {
        let ctx = make_ctx(Duration::from_secs(1));
        let (conn, mut rx) = ctx.registry.register();

        let Inbound::Forwarding(a) = handle_text(&ctx, &conn, FRAME) else {
            panic!("expected frame admission");
        };
        let Inbound::Forwarding(b) = handle_text(&ctx, &conn, CHAT) else {
            panic!("expected chat admission");
        };
        a.await.unwrap();
        b.await.unwrap();

        let mut types = vec![
            next_json(&mut rx).await["type"].as_str().unwrap().to_owned(),
            next_json(&mut rx).await["type"].as_str().unwrap().to_owned(),
        ];
        types.sort();
        assert_eq!(types, vec!["chat_response", "recognition"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_discards_in_flight_result() {
        let ctx = make_ctx(Duration::from_secs(5));
        let (conn, mut rx) = ctx.registry.register();

        let Inbound::Forwarding(task) = handle_text(&ctx, &conn, CHAT) else {
            panic!("expected admission");
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(conn.sequencer().cancel_all(), 1);
        let _ = ctx.registry.unregister(&conn.id);

        task.await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!conn.sequencer().is_pending(RequestKind::Chat));
    }
}
