//! Per-connection WebSocket handling.
//!
//! Open: assign an id, send `welcome`, push to the waiting room.
//! Close (for any reason): drop the outbound sender, set the participant's
//! closed flag, then publish the id through the closure hub. The flag must be
//! set before the notification goes out.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::types::ParticipantId;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::closure::ClosureHub;
use crate::errors::ServerError;
use crate::observability::metrics;
use crate::participant::Participant;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::waiting_room::WaitingRoom;

/// Outbound messages buffered per connection before sends start failing.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Bound on flushing queued messages after the reader side has closed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared by every connection handler.
pub(crate) struct ConnectionState {
    pub(crate) closure_hub: Arc<ClosureHub>,
    pub(crate) waiting_room: Arc<WaitingRoom>,
    pub(crate) max_connections: usize,
    pub(crate) next_id: AtomicU64,
    pub(crate) active: AtomicUsize,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl ConnectionState {
    pub(crate) fn new(
        closure_hub: Arc<ClosureHub>,
        waiting_room: Arc<WaitingRoom>,
        max_connections: usize,
    ) -> Self {
        Self {
            closure_hub,
            waiting_room,
            max_connections,
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn allocate_id(&self) -> ParticipantId {
        ParticipantId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Reserve a connection slot, or `None` at capacity.
    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.max_connections;
        let acquired = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        metrics::set_connections_active(acquired + 1);
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Holds one unit of the connection limit until dropped.
struct ConnectionSlot {
    state: Arc<ConnectionState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let previous = self.state.active.fetch_sub(1, Ordering::SeqCst);
        metrics::set_connections_active(previous.saturating_sub(1));
    }
}

/// `GET /ws`
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ConnectionState>>,
) -> Response {
    if state.cancel.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, ServerError::Draining.to_string()).into_response();
    }

    let Some(slot) = state.try_acquire() else {
        warn!(
            target: "table.transport",
            max_connections = state.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.on_upgrade(move |socket| {
        let id = state.allocate_id();
        let tracker = state.tracker.clone();
        tracker.track_future(handle_socket(socket, state, slot, id))
    })
}

#[instrument(skip_all, name = "table.transport.connection", fields(participant_id = %id))]
async fn handle_socket(
    socket: WebSocket,
    state: Arc<ConnectionState>,
    _slot: ConnectionSlot,
    id: ParticipantId,
) {
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_DEPTH);
    let outbound = Arc::new(tx);
    let participant = Participant::new(id, &outbound);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message).map_err(ServerError::from) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "table.transport", error = %e, "Dropping unserializable message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    info!(target: "table.transport", "Connection opened");
    participant.send(ServerMessage::Welcome { participant_id: id });
    state.waiting_room.push(Arc::clone(&participant));

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                debug!(target: "table.transport", "Closing connection for shutdown");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_client_text(id, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = ServerError::Transport(e.to_string());
                    debug!(target: "table.transport", error = %e, "Connection error");
                    break;
                }
            },
        }
    }

    drop(outbound);
    participant.mark_closed();
    let purged = state.closure_hub.notify(id);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(target: "table.transport", "Writer did not drain in time");
    }

    info!(
        target: "table.transport",
        purged,
        connected_ms = participant.connected_for().num_milliseconds(),
        "Connection closed"
    );
}

fn handle_client_text(id: ParticipantId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Chat { text }) => {
            debug!(
                target: "table.transport",
                participant_id = %id,
                len = text.len(),
                "Chat message received"
            );
        }
        Err(e) => {
            debug!(
                target: "table.transport",
                participant_id = %id,
                error = %e,
                "Ignoring unrecognized client frame"
            );
        }
    }
}
