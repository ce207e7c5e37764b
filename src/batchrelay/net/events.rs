use log::{debug, info, warn};

use crate::batchrelay::handler::RelayHandler;
use crate::batchrelay::registry::Channel;
use crate::protocol::message::{ClientMessage, ServerMessage};
use crate::protocol::types::Action;

/// Handles one text frame and answers on the same channel
pub async fn handle_frame(handler: &RelayHandler, channel: &Channel, text: &str) {
    let reply = match ClientMessage::parse(text) {
        Ok(msg) => match msg.action {
            Action::Subscribe => handle_subscribe(handler, channel, msg.batch_id),
            Action::Unsubscribe => handle_unsubscribe(handler, channel, msg.batch_id),
        },
        Err(e) => {
            warn!("Rejected message from user {}: {}", channel.user_id(), e);
            ServerMessage::error(e.message())
        }
    };
    reply_to(handler, channel, reply).await;
}

pub fn handle_subscribe(handler: &RelayHandler, channel: &Channel, batch_id: String) -> ServerMessage {
    match handler.handle_subscribe(&batch_id, channel.user_id()) {
        Ok(()) => {
            info!("User {} subscribed to batch {}", channel.user_id(), batch_id);
            ServerMessage::Subscribed { batch_id }
        }
        Err(e) => ServerMessage::error(e.message()),
    }
}

pub fn handle_unsubscribe(handler: &RelayHandler, channel: &Channel, batch_id: String) -> ServerMessage {
    handler.handle_unsubscribe(&batch_id, channel.user_id());
    info!("User {} unsubscribed from batch {}", channel.user_id(), batch_id);
    ServerMessage::Unsubscribed { batch_id }
}

pub async fn reply_to(handler: &RelayHandler, channel: &Channel, reply: ServerMessage) {
    let kind = reply.message_type();
    match channel.push(reply, handler.send_timeout()).await {
        Ok(()) => debug!("Queued {} reply on connection {}", kind, channel.id()),
        Err(e) => warn!("Failed to reply on connection {}: {}", channel.id(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::batchrelay::registry::ConnectionRegistry;
    use crate::batchrelay::subscriptions::SubscriptionManager;

    fn setup() -> (RelayHandler, Channel, mpsc::Receiver<ServerMessage>) {
        let handler = RelayHandler::new(
            Arc::new(SubscriptionManager::new()),
            Arc::new(ConnectionRegistry::new()),
            Duration::from_millis(50),
            4,
        );
        let (tx, rx) = mpsc::channel(4);
        let channel = Channel::new("u1", tx, handler.connection_token());
        handler.handle_connect(channel.clone());
        (handler, channel, rx)
    }

    #[tokio::test]
    async fn subscribe_is_acknowledged() {
        let (handler, channel, mut rx) = setup();

        handle_frame(&handler, &channel, r#"{"action":"subscribe","batch_id":"batch_1"}"#).await;

        let reply = rx.try_recv().unwrap().to_value();
        assert_eq!(reply["type"], "subscribed");
        assert_eq!(reply["batch_id"], "batch_1");
        assert!(handler.subscriptions.subscribers_of("batch_1").contains("u1"));
    }

    #[tokio::test]
    async fn unsubscribe_is_acknowledged() {
        let (handler, channel, mut rx) = setup();
        handler.handle_subscribe("batch_1", "u1").unwrap();

        handle_frame(&handler, &channel, r#"{"action":"unsubscribe","batch_id":"batch_1"}"#).await;

        assert_eq!(rx.try_recv().unwrap().to_value()["type"], "unsubscribed");
        assert!(handler.subscriptions.subscribers_of("batch_1").is_empty());
    }

    #[tokio::test]
    async fn bad_frames_get_an_error_reply() {
        let (handler, channel, mut rx) = setup();

        handle_frame(&handler, &channel, r#"{"action":"subscribe"}"#).await;
        handle_frame(&handler, &channel, r#"{"action":"publish","batch_id":"b"}"#).await;

        assert_eq!(
            rx.try_recv().unwrap().to_value(),
            json!({"type": "error", "message": "batch_id is required"})
        );
        assert_eq!(
            rx.try_recv().unwrap().to_value()["message"],
            "Unknown action: publish. Use 'subscribe' or 'unsubscribe'"
        );
        assert_eq!(handler.subscriptions.batch_count(), 0);
    }
}
