use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{channel, Receiver};
use tokio_util::sync::CancellationToken;

use crate::batchrelay::handler::RelayHandler;
use crate::batchrelay::net::events::{handle_frame, reply_to};
use crate::batchrelay::registry::{Channel, ConnectionHandle};
use crate::batchrelay::types::UserId;
use crate::error::{ErrorCode, RelayError};
use crate::protocol::message::ServerMessage;

/// One open client channel.
///
/// Reading happens on the task serving the upgrade; writing happens on a
/// separate task fed through the bounded queue behind `channel`. Dropping the
/// connection unregisters it.
pub struct Connection {
    handle: ConnectionHandle,
    channel: Channel,
    cancel: CancellationToken,
    handler: Arc<RelayHandler>,
}

impl Connection {
    /// Registers the socket for `user_id` and serves it until it closes
    pub async fn serve(socket: WebSocket, user_id: UserId, handler: Arc<RelayHandler>) {
        let (sink, stream) = socket.split();
        let (write_tx, write_rx) = channel::<ServerMessage>(handler.channel_capacity);
        let cancel = handler.connection_token();

        let channel = Channel::new(user_id, write_tx, cancel.clone());
        let handle = handler.handle_connect(channel.clone());
        let connection = Connection {
            handle,
            channel,
            cancel: cancel.clone(),
            handler: handler.clone(),
        };

        let writer = tokio::spawn(Connection::write_task(sink, write_rx, cancel, handler.send_timeout()));

        if let Err(e) = connection.read_task(stream).await {
            warn!("Read task error on connection {}: {}", connection.handle.id, e);
        }

        drop(connection);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Write task error: {}", e),
            Err(e) => error!("Write task panicked: {}", e),
        }
    }

    async fn read_task(&self, stream: SplitStream<WebSocket>) -> Result<(), RelayError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            res = self.read(stream) => res,
        }
    }

    async fn read(&self, mut stream: SplitStream<WebSocket>) -> Result<(), RelayError> {
        debug!("Starting read loop for connection {}", self.handle.id);
        while let Some(frame) = stream.next().await {
            let frame = frame
                .map_err(|e| RelayError::new(ErrorCode::ChannelClosed, format!("Failed to read frame: {}", e)))?;

            match frame {
                Message::Text(text) => handle_frame(&self.handler, &self.channel, &text).await,
                Message::Binary(_) => {
                    let err = RelayError::new(ErrorCode::UnsupportedFrame, "Binary frames are not supported");
                    reply_to(&self.handler, &self.channel, ServerMessage::error(err.message())).await;
                }
                // axum queues the pong itself
                Message::Ping(_) | Message::Pong(_) => {
                    debug!("Heartbeat frame on connection {}", self.handle.id);
                }
                Message::Close(_) => {
                    debug!("Close frame on connection {}", self.handle.id);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn write_task(
        mut sink: SplitSink<WebSocket, Message>,
        mut rx: Receiver<ServerMessage>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<(), RelayError> {
        debug!("Starting write task");
        let result = loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = rx.recv() => match next {
                    Some(msg) => msg,
                    None => break Ok(()),
                },
            };

            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} message: {}", msg.message_type(), e);
                    continue;
                }
            };

            match tokio::time::timeout(timeout, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => debug!("Wrote {} message", msg.message_type()),
                Ok(Err(e)) => {
                    break Err(RelayError::new(ErrorCode::ChannelSendFailure, format!("Failed to write message: {}", e)))
                }
                Err(_) => {
                    break Err(RelayError::new(
                        ErrorCode::ChannelSendFailure,
                        format!("Write timed out after {:?}", timeout),
                    ))
                }
            }
        };

        // A dead writer takes the reader down with it
        cancel.cancel();
        let _ = tokio::time::timeout(timeout, sink.send(Message::Close(None))).await;
        info!("Write task completed");
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handler.handle_disconnect(&self.handle);
        info!("Connection {} cleanup completed", self.handle.id);
    }
}
