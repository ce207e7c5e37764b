use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use crate::batchrelay::registry::ConnectionRegistry;
use crate::batchrelay::types::UserId;
use crate::protocol::message::ServerMessage;

/// Pushes completion messages onto subscribers' open channels
pub struct Dispatcher {
    clients: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(clients: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            clients,
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Delivers `batch_completed` to every open channel of every subscriber.
    ///
    /// Each channel is pushed concurrently and independently; a failed or slow
    /// channel only loses its own copy. Returns the number of distinct
    /// subscribers that got at least one copy.
    pub async fn notify(
        &self,
        batch_id: &str,
        payload: &Map<String, Value>,
        subscriber_ids: &HashSet<UserId>,
    ) -> usize {
        let message = ServerMessage::batch_completed(batch_id, payload.clone());
        let mut deliveries = JoinSet::new();

        for user_id in subscriber_ids {
            let channels = self.clients.channels_for(user_id);
            if channels.is_empty() {
                debug!("User {} has no open channel for batch {}", user_id, batch_id);
                continue;
            }

            for channel in channels {
                let message = message.clone();
                let timeout = self.send_timeout;
                deliveries.spawn(async move {
                    let result = channel.push(message, timeout).await;
                    (channel, result)
                });
            }
        }

        let mut notified: HashSet<UserId> = HashSet::with_capacity(subscriber_ids.len());
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((channel, Ok(()))) => {
                    debug!("Notification for batch {} queued on connection {}", batch_id, channel.id());
                    notified.insert(channel.user_id().to_string());
                }
                Ok((channel, Err(e))) => {
                    warn!(
                        "Failed to notify user {} on connection {} about batch {}: {}",
                        channel.user_id(),
                        channel.id(),
                        batch_id,
                        e
                    );
                }
                Err(e) => error!("Delivery task for batch {} failed: {}", batch_id, e),
            }
        }

        info!("Batch {} delivered to {}/{} subscriber(s)", batch_id, notified.len(), subscriber_ids.len());
        notified.len()
    }
}
