use std::collections::HashMap;
use std::time::Instant;
use dashmap::DashMap;
use uuid::Uuid;

/// Already-authenticated user identity
pub type UserId = String;

/// Opaque batch identifier issued by the batch-creation API
pub type BatchId = String;

/// Unique id of one live channel
pub type ConnectionId = Uuid;

/// Mapping: batch → subscribed users and when they subscribed
pub type Subscriptions = DashMap<BatchId, HashMap<UserId, Instant>>;
