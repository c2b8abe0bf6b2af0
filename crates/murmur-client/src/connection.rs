//! The client end of the realtime channel.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as Frame};

use murmur_shared::constants::CHANNEL_BUFFER;
use murmur_shared::{ClientEvent, ServerEvent};

use crate::bus::EventBus;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Outbound half of a channel. Cloneable; emitting never waits on the server.
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<ClientEvent>,
}

impl ChannelSender {
    pub(crate) fn new(outbound: mpsc::Sender<ClientEvent>) -> Self {
        Self { outbound }
    }

    /// Queue an event for the server. Fire-and-forget.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        self.outbound
            .try_send(event)
            .map_err(|e| ClientError::Connectivity(format!("channel unavailable: {e}")))
    }
}

/// An open channel. Inbound events are dispatched to the [`EventBus`];
/// the connection closes when this value is dropped.
pub struct ChannelConnection {
    sender: ChannelSender,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ChannelConnection {
    pub async fn connect(config: &ClientConfig, bus: Arc<EventBus>) -> Result<Self> {
        let url = config.channel_url()?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                    ClientError::Auth("channel handshake refused".into())
                }
                other => ClientError::Connectivity(other.to_string()),
            })?;
        tracing::info!(server = %config.server_url, "Channel open");

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let (mut sink, mut stream) = socket.split();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Fires on close() and on drop of the connection.
                    _ = &mut shutdown_rx => {
                        let _ = sink.send(Frame::Close(None)).await;
                        break;
                    }
                    outbound = rx.recv() => {
                        let Some(event) = outbound else {
                            let _ = sink.send(Frame::Close(None)).await;
                            break;
                        };
                        match event.to_json() {
                            Ok(json) => {
                                if let Err(e) = sink.send(Frame::text(json)).await {
                                    tracing::warn!(error = %e, "Channel write failed");
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                        }
                    }
                    inbound = stream.next() => match inbound {
                        Some(Ok(Frame::Text(text))) => match ServerEvent::from_json(text.as_str()) {
                            Ok(event) => bus.dispatch(event),
                            Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
                        },
                        Some(Ok(Frame::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Channel read failed");
                            break;
                        }
                    },
                }
            }
            tracing::info!("Channel closed");
        });

        Ok(Self {
            sender: ChannelSender::new(tx),
            shutdown,
            task,
        })
    }

    /// Handle for emitting events, usable after the connection is moved.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        self.sender.emit(event)
    }

    /// Whether the server side has gone away.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Close gracefully and wait for the reader to finish.
    pub async fn close(self) {
        let ChannelConnection { shutdown, task, .. } = self;
        let _ = shutdown.send(());
        let _ = task.await;
    }
}
