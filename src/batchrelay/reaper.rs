use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::batchrelay::handler::RelayHandler;

/// Starts a background task that periodically abandons subscriptions older
/// than `ttl`. The task stops when the relay shuts down.
pub fn start_reaper_task(handler: Arc<RelayHandler>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
    info!("Starting subscription reaper: ttl={:?}, interval={:?}", ttl, interval);
    let shutdown = handler.shutdown_token();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Subscription reaper stopped");
                    return;
                }
                _ = sleep(interval) => reap_once(&handler, ttl),
            }
        }
    })
}

fn reap_once(handler: &RelayHandler, ttl: Duration) {
    let reaped = handler.subscriptions.reap_expired(ttl);
    if reaped > 0 {
        info!("Reaped {} expired subscription(s)", reaped);
    } else {
        debug!("No expired subscriptions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batchrelay::registry::ConnectionRegistry;
    use crate::batchrelay::subscriptions::SubscriptionManager;

    fn handler() -> Arc<RelayHandler> {
        Arc::new(RelayHandler::new(
            Arc::new(SubscriptionManager::new()),
            Arc::new(ConnectionRegistry::new()),
            Duration::from_millis(50),
            4,
        ))
    }

    #[tokio::test]
    async fn expired_subscriptions_are_reaped() {
        let handler = handler();
        handler.handle_subscribe("batch_1", "u1").unwrap();

        let task = start_reaper_task(handler.clone(), Duration::ZERO, Duration::from_millis(10));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.subscriptions.batch_count(), 0);
        handler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn fresh_subscriptions_survive() {
        let handler = handler();
        handler.handle_subscribe("batch_1", "u1").unwrap();

        let task = start_reaper_task(handler.clone(), Duration::from_secs(3600), Duration::from_millis(10));
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.subscriptions.batch_count(), 1);
        handler.shutdown();
        task.await.unwrap();
    }
}
