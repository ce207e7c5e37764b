use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::batchrelay::dispatcher::Dispatcher;
use crate::batchrelay::registry::{Channel, ConnectionHandle, ConnectionRegistry};
use crate::batchrelay::subscriptions::SubscriptionManager;
use crate::error::RelayError;
use crate::protocol::types::CompletionEvent;

/// Routes subscriptions, completions and connection lifecycle
pub struct RelayHandler {
    pub subscriptions: Arc<SubscriptionManager>,
    pub clients: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
    pub channel_capacity: usize,
    shutdown: CancellationToken,
}

impl RelayHandler {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        clients: Arc<ConnectionRegistry>,
        send_timeout: Duration,
        channel_capacity: usize,
    ) -> Self {
        Self {
            subscriptions,
            dispatcher: Dispatcher::new(clients.clone(), send_timeout),
            clients,
            channel_capacity,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.dispatcher.send_timeout()
    }

    /// Token for a new connection; cancelled when the relay shuts down
    pub fn connection_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn handle_connect(&self, channel: Channel) -> ConnectionHandle {
        self.clients.register(channel.user_id().to_string(), channel)
    }

    /// Called when a connection closes. The user's subscriptions are reaped
    /// once their last connection is gone.
    pub fn handle_disconnect(&self, handle: &ConnectionHandle) {
        // Reaped under the registry's entry lock so a reconnecting tab cannot
        // subscribe in between and lose the new subscription.
        self.clients.unregister_then(handle, |user_id| {
            let abandoned = self.subscriptions.unsubscribe_all(user_id);
            debug!("User {} left, {} subscription(s) abandoned", user_id, abandoned);
        });
    }

    pub fn handle_subscribe(&self, batch_id: &str, user_id: &str) -> Result<(), RelayError> {
        info!("User {} subscribing to batch {}", user_id, batch_id);
        self.subscriptions.subscribe(batch_id, user_id)?;
        Ok(())
    }

    pub fn handle_unsubscribe(&self, batch_id: &str, user_id: &str) {
        info!("User {} unsubscribing from batch {}", user_id, batch_id);
        self.subscriptions.unsubscribe(batch_id, user_id);
    }

    /// Fans a completion out to the batch's subscribers and returns how many
    /// were notified.
    ///
    /// Subscribers are taken out of the index before dispatch, so a batch is
    /// delivered at most once even if the worker reports it twice.
    pub async fn handle_completion(&self, event: &CompletionEvent) -> usize {
        let subscribers = self.subscriptions.clear(&event.batch_id);
        if subscribers.is_empty() {
            warn!("No subscribers for batch {}", event.batch_id);
            return 0;
        }

        info!("Notifying {} user(s) about batch {}", subscribers.len(), event.batch_id);
        self.dispatcher
            .notify(&event.batch_id, &event.payload, &subscribers)
            .await
    }

    /// Closes every connection and abandons every subscription
    pub fn shutdown(&self) {
        info!("Relay shutting down");
        self.shutdown.cancel();
        let closed = self.clients.close_all();
        let abandoned = self.subscriptions.clear_all();
        info!("Shutdown closed {} connection(s), abandoned {} subscription(s)", closed, abandoned);
    }
}
