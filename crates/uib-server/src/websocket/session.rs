//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uib_auth::ClientMeta;
use uib_broker::{ClientConnection, ConnectRequest, Outbound};
use uib_core::{ClientId, ConnectionId, Frame, InstanceId};

use super::batch::{frame_kind, next_frame};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_FRAMES_WRITTEN_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL, WS_INVALID_FRAMES_TOTAL,
    WS_SESSION_DURATION_SECONDS,
};
use crate::server::AppState;

/// How long the writer may take to flush and close after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything resolved from the upgrade request.
#[derive(Debug)]
pub struct SessionParams {
    /// Target instance.
    pub instance: InstanceId,
    /// Durable client id (from cookie or freshly generated).
    pub client_id: ClientId,
    /// Page the client was loaded from.
    pub page_name: Option<String>,
    /// Browser tab id.
    pub tab_id: Option<String>,
    /// Reconnect attempts reported by the client.
    pub reconnect_count: u32,
    /// Remote address and channel security.
    pub meta: ClientMeta,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Sends the `open` frame
/// 2. Registers the session with the broker (which queues `client connect`)
/// 3. Drains the outbound queue into packed frames and sends periodic pings
/// 4. Feeds inbound frames to the broker
/// 5. Reports the disconnect and closes with a reason
#[instrument(skip_all, fields(instance = %params.instance, client_id = %params.client_id))]
pub async fn run_ws_session(mut ws: WebSocket, params: SessionParams, state: AppState) {
    let config = Arc::clone(&state.config);
    let (connection, queue) =
        ClientConnection::channel(ConnectionId::new(), config.client_queue_capacity);
    let connection = Arc::new(connection);
    let connection_id = connection.id.clone();
    let instance = params.instance;
    let started = Instant::now();

    let open = Frame::Open {
        connection_id: connection_id.clone(),
        client_id: params.client_id.clone(),
        ping_interval_ms: config.ping_interval_ms,
        ping_timeout_ms: config.ping_timeout_ms,
        max_payload_bytes: config.max_payload_bytes,
    };
    if !send_frame(&mut ws, &open).await {
        debug!(conn_id = %connection_id, "client went away before open");
        return;
    }

    let request = ConnectRequest {
        connection: Arc::clone(&connection),
        client_id: Some(params.client_id),
        page_name: params.page_name,
        tab_id: params.tab_id,
        reconnect_count: params.reconnect_count,
        meta: params.meta,
    };
    if let Err(err) = state.broker.on_connect(&instance, request).await {
        warn!(conn_id = %connection_id, error = %err, "session rejected");
        let _ = send_frame(&mut ws, &Frame::Close { reason: err.to_string() }).await;
        let _ = SinkExt::close(&mut ws).await;
        return;
    }

    let (ws_tx, mut ws_rx) = ws.split();

    let writer = tokio::spawn(run_writer(
        ws_tx,
        queue,
        Arc::clone(&connection),
        config.ping_interval(),
        config.max_payload_bytes,
    ));
    let writer_abort = writer.abort_handle();

    let heartbeat = {
        let connection = Arc::clone(&connection);
        let instance = instance.clone();
        let cancel = connection.closed_token();
        let (interval, timeout) = (config.ping_interval(), config.ping_timeout());
        tokio::spawn(async move {
            let result = run_heartbeat(Arc::clone(&connection), interval, timeout, cancel).await;
            if result == HeartbeatResult::TimedOut {
                warn!(conn_id = %connection.id, "client unresponsive, disconnecting");
                counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL, "instance" => instance.to_string()).increment(1);
                connection.disconnect("ping timeout");
            }
        })
    };

    let closed = connection.closed_token();
    let reason = loop {
        tokio::select! {
            () = closed.cancelled() => {
                break connection.close_reason().unwrap_or_else(|| "server close".to_owned());
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = match Frame::parse(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(conn_id = %connection_id, error = %e, "invalid frame ignored");
                            counter!(WS_INVALID_FRAMES_TOTAL).increment(1);
                            continue;
                        }
                    };
                    if let Some(reason) = handle_frame(&state, &instance, &connection, frame).await {
                        break reason;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(conn_id = %connection_id, len = data.len(), "binary frame ignored");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break "transport close".to_owned(),
                Some(Err(e)) => break format!("transport error: {e}"),
            }
        }
    };

    state.broker.on_disconnect(&instance, &connection_id, &reason);
    connection.disconnect(reason.clone());
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(conn_id = %connection_id, "writer did not finish in time");
        writer_abort.abort();
    }
    heartbeat.abort();

    histogram!(WS_SESSION_DURATION_SECONDS, "instance" => instance.to_string())
        .record(started.elapsed().as_secs_f64());
    info!(conn_id = %connection_id, reason = %reason, "session ended");
}

/// Apply one inbound frame. Returns the close reason when the client
/// ends the session.
async fn handle_frame(
    state: &AppState,
    instance: &InstanceId,
    connection: &Arc<ClientConnection>,
    frame: Frame,
) -> Option<String> {
    // Any traffic proves the client is alive.
    connection.mark_alive();
    match frame {
        Frame::Pong {} => None,
        Frame::Message(message) => {
            state
                .broker
                .on_client_message(instance, &connection.id, message)
                .await;
            None
        }
        Frame::Batch { messages } => {
            for message in messages {
                state
                    .broker
                    .on_client_message(instance, &connection.id, message)
                    .await;
            }
            None
        }
        Frame::Close { reason } => Some(reason),
        other @ (Frame::Open { .. } | Frame::Ping {} | Frame::Ack { .. }) => {
            debug!(conn_id = %connection.id, kind = frame_kind(&other), "unexpected frame from client ignored");
            None
        }
    }
}

/// Drain the outbound queue into the socket.
///
/// Everything already queued is packed before each write. On disconnect
/// the remaining queue is flushed, then a `close` frame with the reason is
/// sent and the socket closed.
async fn run_writer<S>(
    mut ws_tx: S,
    mut queue: mpsc::Receiver<Outbound>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    limit: Option<usize>,
) where
    S: Sink<Message> + Unpin,
{
    let closed = connection.closed_token();
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;
    let mut pending = VecDeque::new();

    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => break,
            item = queue.recv() => {
                let Some(item) = item else { break };
                pending.push_back(item);
                while let Ok(more) = queue.try_recv() {
                    pending.push_back(more);
                }
                if !flush(&mut ws_tx, &mut pending, limit).await {
                    return;
                }
            }
            _ = ping.tick() => {
                if !send_frame(&mut ws_tx, &Frame::Ping {}).await {
                    return;
                }
            }
        }
    }

    while let Ok(more) = queue.try_recv() {
        pending.push_back(more);
    }
    if flush(&mut ws_tx, &mut pending, limit).await {
        let reason = connection
            .close_reason()
            .unwrap_or_else(|| "server close".to_owned());
        let _ = send_frame(&mut ws_tx, &Frame::Close { reason }).await;
    }
    let _ = ws_tx.close().await;
}

/// Write every pending item. Returns `false` once the socket is gone.
async fn flush<S>(ws_tx: &mut S, pending: &mut VecDeque<Outbound>, limit: Option<usize>) -> bool
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = next_frame(pending, limit) {
        if !send_frame(ws_tx, &frame).await {
            return false;
        }
    }
    true
}

/// Serialize and send one frame. Returns `false` if the socket is gone.
async fn send_frame<S>(ws_tx: &mut S, frame: &Frame) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to serialize frame");
            return true;
        }
    };
    if ws_tx.send(Message::Text(text.into())).await.is_err() {
        return false;
    }
    counter!(WS_FRAMES_WRITTEN_TOTAL, "kind" => frame_kind(frame)).increment(1);
    true
}
