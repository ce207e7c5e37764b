use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use smallvec::SmallVec;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batchrelay::types::{ConnectionId, UserId};
use crate::error::{ErrorCode, RelayError};
use crate::protocol::message::ServerMessage;

/// Most users keep one or two tabs open
pub type Channels = SmallVec<[Channel; 2]>;

/// Outbound side of one client connection.
///
/// Messages are queued here and written to the socket by the connection's
/// writer task.
#[derive(Clone, Debug)]
pub struct Channel {
    id: ConnectionId,
    user_id: UserId,
    tx: Sender<ServerMessage>,
    cancel: CancellationToken,
}

impl Channel {
    pub fn new(user_id: impl Into<UserId>, tx: Sender<ServerMessage>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Queue a message, waiting at most `timeout` for room
    pub async fn push(&self, msg: ServerMessage, timeout: Duration) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::new(ErrorCode::ChannelClosed, format!("connection {} is closed", self.id)));
        }
        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RelayError::new(
                ErrorCode::ChannelSendFailure,
                format!("send to connection {} timed out after {:?}", self.id, timeout),
            )),
            Err(SendTimeoutError::Closed(_)) => {
                Err(RelayError::new(ErrorCode::ChannelClosed, format!("connection {} is closed", self.id)))
            }
        }
    }

    pub fn close(&self) {
        debug!("Closing channel {}", self.id);
        self.cancel.cancel();
    }
}

/// Returned by `register`, used to unregister exactly that connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
}

/// Registry of all open channels, keyed by user
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Channels>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, user_id: impl Into<UserId>, channel: Channel) -> ConnectionHandle {
        let user_id = user_id.into();
        let handle = ConnectionHandle {
            id: channel.id(),
            user_id: user_id.clone(),
        };

        let open = {
            let mut channels = self.connections.entry(user_id.clone()).or_default();
            channels.push(channel);
            channels.len()
        };
        info!("User {} connected ({} open connection(s)), connection {}", user_id, open, handle.id);
        handle
    }

    /// Removes one connection. Returns how many connections the user still has.
    pub fn unregister(&self, handle: &ConnectionHandle) -> usize {
        self.unregister_then(handle, |_| {})
    }

    /// Removes one connection and, if it was the user's last, runs `on_last`
    /// before the user's entry is dropped.
    ///
    /// `on_last` runs under the user's entry lock, so a new connection for the
    /// same user cannot register until it returns. It must not touch this
    /// registry.
    pub fn unregister_then(&self, handle: &ConnectionHandle, on_last: impl FnOnce(&str)) -> usize {
        let remaining = match self.connections.entry(handle.user_id.clone()) {
            Entry::Occupied(mut channels) => {
                channels.get_mut().retain(|c| c.id() != handle.id);
                let remaining = channels.get().len();
                if remaining == 0 {
                    on_last(&handle.user_id);
                    channels.remove();
                }
                remaining
            }
            Entry::Vacant(_) => {
                debug!("Connection {} already unregistered", handle.id);
                return 0;
            }
        };

        info!("User {} disconnected ({} open connection(s) left), connection {}", handle.user_id, remaining, handle.id);
        remaining
    }

    /// Snapshot of a user's open channels, possibly empty
    pub fn channels_for(&self, user_id: &str) -> Channels {
        match self.connections.get(user_id) {
            Some(channels) => channels.iter().filter(|c| !c.is_closed()).cloned().collect(),
            None => Channels::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn user_count(&self) -> usize {
        self.connections.len()
    }

    /// Closes every channel and empties the registry
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.connections.retain(|_, channels| {
            for channel in channels.iter() {
                channel.close();
                closed += 1;
            }
            false
        });
        info!("Closed {} connection(s)", closed);
        closed
    }
}
