use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};
use dashmap::DashMap;

use crate::batchrelay::types::{Subscriptions, UserId};
use crate::error::{ErrorCode, RelayError};

/// Stores batch subscriptions in a thread-safe manner
#[derive(Default)]
pub struct SubscriptionManager {
    inner: Subscriptions,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Adds a subscription. Returns `false` if the user was already subscribed.
    pub fn subscribe(&self, batch_id: &str, user_id: &str) -> Result<bool, RelayError> {
        if batch_id.is_empty() {
            return Err(RelayError::new(ErrorCode::InvalidMessage, "batch_id is required"));
        }

        let mut users = self.inner.entry(batch_id.to_string()).or_insert_with(HashMap::new);
        let added = match users.entry(user_id.to_string()) {
            // Re-subscribing refreshes the TTL clock
            Entry::Occupied(mut existing) => {
                existing.insert(Instant::now());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        };
        drop(users);

        debug!("User {} subscribed to batch {} (new: {})", user_id, batch_id, added);
        Ok(added)
    }

    /// Removes a subscription
    pub fn unsubscribe(&self, batch_id: &str, user_id: &str) -> bool {
        let removed = match self.inner.get_mut(batch_id) {
            Some(mut entry) => entry.remove(user_id).is_some(),
            None => {
                debug!("Batch {} not found for unsubscribe", batch_id);
                return false;
            }
        };

        // Drop the batch once nobody is waiting on it
        if self.inner.remove_if(batch_id, |_, users| users.is_empty()).is_some() {
            debug!("Removed empty batch {}", batch_id);
        }

        debug!("User {} unsubscribed from batch {} (removed: {})", user_id, batch_id, removed);
        removed
    }

    /// Snapshot of all users subscribed to a batch
    pub fn subscribers_of(&self, batch_id: &str) -> HashSet<UserId> {
        match self.inner.get(batch_id) {
            Some(entry) => entry.keys().cloned().collect(),
            None => HashSet::new(),
        }
    }

    /// Removes a batch and returns the users that were waiting on it
    pub fn clear(&self, batch_id: &str) -> HashSet<UserId> {
        match self.inner.remove(batch_id) {
            Some((_, users)) => {
                debug!("Cleared {} subscriptions for batch {}", users.len(), batch_id);
                users.into_keys().collect()
            }
            None => HashSet::new(),
        }
    }

    /// Unsubscribes a user from every batch
    pub fn unsubscribe_all(&self, user_id: &str) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, users| {
            if users.remove(user_id).is_some() {
                removed += 1;
            }
            !users.is_empty()
        });

        if removed > 0 {
            info!("User {} unsubscribed from {} batches", user_id, removed);
        }
        removed
    }

    /// Abandons subscriptions older than `ttl`
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let mut reaped = 0;
        self.inner.retain(|batch_id, users| {
            users.retain(|user_id, subscribed_at| {
                let keep = subscribed_at.elapsed() < ttl;
                if !keep {
                    debug!("Subscription of {} to batch {} expired", user_id, batch_id);
                    reaped += 1;
                }
                keep
            });
            !users.is_empty()
        });
        reaped
    }

    /// Abandons everything, returns how many subscriptions were dropped
    pub fn clear_all(&self) -> usize {
        let mut dropped = 0;
        self.inner.retain(|_, users| {
            dropped += users.len();
            false
        });
        dropped
    }

    pub fn batch_count(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let subs = SubscriptionManager::new();
        assert!(subs.subscribe("batch_1", "u1").unwrap());
        assert!(!subs.subscribe("batch_1", "u1").unwrap());
        assert!(!subs.subscribe("batch_1", "u1").unwrap());

        let users = subs.subscribers_of("batch_1");
        assert_eq!(users.len(), 1);
        assert!(users.contains("u1"));
    }

    #[test]
    fn empty_batch_id_is_rejected() {
        let subs = SubscriptionManager::new();
        let err = subs.subscribe("", "u1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
        assert_eq!(subs.batch_count(), 0);

        // Any non-empty id is an id
        assert!(subs.subscribe(" ", "u1").unwrap());
        assert!(subs.subscribers_of(" ").contains("u1"));
    }

    #[test]
    fn unknown_batch_has_no_subscribers() {
        let subs = SubscriptionManager::new();
        assert!(subs.subscribers_of("nope").is_empty());
        assert!(subs.clear("nope").is_empty());
    }

    #[test]
    fn unsubscribe_drops_empty_batches() {
        let subs = SubscriptionManager::new();
        subs.subscribe("batch_1", "u1").unwrap();
        subs.subscribe("batch_1", "u2").unwrap();

        assert!(subs.unsubscribe("batch_1", "u1"));
        assert!(!subs.unsubscribe("batch_1", "u1"));
        assert_eq!(subs.batch_count(), 1);

        assert!(subs.unsubscribe("batch_1", "u2"));
        assert_eq!(subs.batch_count(), 0);
    }

    #[test]
    fn clear_returns_and_removes_subscribers() {
        let subs = SubscriptionManager::new();
        subs.subscribe("batch_1", "u1").unwrap();
        subs.subscribe("batch_1", "u2").unwrap();
        subs.subscribe("batch_2", "u1").unwrap();

        let cleared = subs.clear("batch_1");
        assert_eq!(cleared, HashSet::from(["u1".to_string(), "u2".to_string()]));
        assert!(subs.subscribers_of("batch_1").is_empty());
        assert_eq!(subs.subscribers_of("batch_2").len(), 1);
    }

    #[test]
    fn unsubscribe_all_only_touches_that_user() {
        let subs = SubscriptionManager::new();
        subs.subscribe("batch_1", "u1").unwrap();
        subs.subscribe("batch_2", "u1").unwrap();
        subs.subscribe("batch_2", "u2").unwrap();

        assert_eq!(subs.unsubscribe_all("u1"), 2);
        assert_eq!(subs.batch_count(), 1);
        assert_eq!(subs.subscribers_of("batch_2"), HashSet::from(["u2".to_string()]));
    }

    #[test]
    fn reap_expired_honours_ttl() {
        let subs = SubscriptionManager::new();
        subs.subscribe("batch_1", "u1").unwrap();
        subs.subscribe("batch_2", "u2").unwrap();

        assert_eq!(subs.reap_expired(Duration::from_secs(3600)), 0);
        assert_eq!(subs.batch_count(), 2);

        assert_eq!(subs.reap_expired(Duration::ZERO), 2);
        assert_eq!(subs.batch_count(), 0);
    }

    #[test]
    fn clear_all_counts_dropped_subscriptions() {
        let subs = SubscriptionManager::new();
        subs.subscribe("batch_1", "u1").unwrap();
        subs.subscribe("batch_1", "u2").unwrap();
        subs.subscribe("batch_2", "u1").unwrap();

        assert_eq!(subs.clear_all(), 3);
        assert_eq!(subs.batch_count(), 0);
    }
}
