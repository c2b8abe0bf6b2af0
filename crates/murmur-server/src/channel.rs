//! Server side of the realtime delivery channel.
//!
//! One WebSocket per authenticated client session. Outbound events are
//! queued on a bounded [`ChannelHandle`]; pushes never wait for space or
//! for the client, they fail instead.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::{ChatError, ClientEvent, ServerEvent, UserId};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ChannelHandle {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue `event` without waiting.
    pub fn push(&self, event: ServerEvent) -> Result<(), ChatError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => ChatError::Delivery(format!("connection {} queue full", self.id)),
            TrySendError::Closed(_) => ChatError::Delivery(format!("connection {} closed", self.id)),
        })
    }
}

/// `GET /ws` -- the identity is resolved before the upgrade, so an
/// unauthenticated handshake is refused with 401.
pub async fn channel_upgrade(
    ws: WebSocketUpgrade,
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_channel(socket, identity, state))
}

async fn run_channel(socket: WebSocket, identity: UserId, state: AppState) {
    let (handle, mut outbound) = ChannelHandle::new(state.config.channel_buffer);
    let conn = handle.id();

    state.registry.register(identity.clone(), handle).await;
    info!(user = %identity, conn = %conn, "Channel connected");
    state.router.publish_presence().await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    // Every sender is gone: the registry replaced this
                    // connection with a newer one.
                    debug!(user = %identity, conn = %conn, "Channel superseded, closing");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                };
                match event.to_json() {
                    Ok(frame) => {
                        if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                            debug!(user = %identity, error = %e, "Channel write failed");
                            break;
                        }
                    }
                    Err(e) => warn!(user = %identity, error = %e, "Dropping unencodable event"),
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let Err(err) = handle_frame(&state, &identity, text.as_str()).await else {
                            continue;
                        };
                        let fatal = err.is_fatal();
                        if let Ok(reply) = err.to_event().to_json() {
                            let _ = sink.send(WsMessage::Text(reply.into())).await;
                        }
                        if fatal {
                            warn!(user = %identity, error = %err, "Closing channel after fatal error");
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Binary(_))) => {
                        debug!(user = %identity, "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user = %identity, error = %e, "Channel read failed");
                        break;
                    }
                }
            }
        }
    }

    if state.registry.unregister(&identity, conn).await {
        state.router.publish_presence().await;
    }
    info!(user = %identity, conn = %conn, "Channel disconnected");
}

async fn handle_frame(state: &AppState, identity: &UserId, frame: &str) -> Result<(), ServerError> {
    let event = ClientEvent::from_json(frame).map_err(|e| {
        debug!(user = %identity, error = %e, "Malformed client frame");
        ServerError::Validation(e.to_string())
    })?;
    state.router.relay(identity, event).await?;
    Ok(())
}
