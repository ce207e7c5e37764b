use log::debug;
use serde_json::{Map, Value};

use crate::error::{ErrorCode, RelayError};
use crate::protocol::types::Action;

/// A message sent by a client over its channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub action: Action,
    pub batch_id: String,
}

impl ClientMessage {
    /// Parse a text frame. The batch id is checked before the action.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| RelayError::new(ErrorCode::InvalidMessage, "Invalid JSON message"))?;

        let batch_id = value
            .get("batch_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::new(ErrorCode::InvalidMessage, "batch_id is required"))?;

        let action: Action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("none")
            .parse()?;

        debug!("Parsed client message: {} {}", action.as_str(), batch_id);
        Ok(Self {
            action,
            batch_id: batch_id.to_string(),
        })
    }
}

/// A message pushed by the relay to a client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Subscribed { batch_id: String },
    Unsubscribed { batch_id: String },
    BatchCompleted { batch_id: String, payload: Map<String, Value> },
    Error { message: String },
}

impl ServerMessage {
    pub fn batch_completed(batch_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::BatchCompleted {
            batch_id: batch_id.into(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::BatchCompleted { .. } => "batch_completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        match self {
            Self::Subscribed { batch_id } => {
                fields.insert("batch_id".into(), Value::from(batch_id.as_str()));
                fields.insert(
                    "message".into(),
                    Value::from(format!("Successfully subscribed to batch {}", batch_id)),
                );
            }
            Self::Unsubscribed { batch_id } => {
                fields.insert("batch_id".into(), Value::from(batch_id.as_str()));
                fields.insert(
                    "message".into(),
                    Value::from(format!("Successfully unsubscribed from batch {}", batch_id)),
                );
            }
            Self::BatchCompleted { batch_id, payload } => {
                // Passthrough first so the relay's own keys always win
                fields.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
                fields.insert("batch_id".into(), Value::from(batch_id.as_str()));
            }
            Self::Error { message } => {
                fields.insert("message".into(), Value::from(message.as_str()));
            }
        }
        fields.insert("type".into(), Value::from(self.message_type()));
        Value::Object(fields)
    }

    /// Serialise as a JSON text frame
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_subscribe_and_unsubscribe() {
        let msg = ClientMessage::parse(r#"{"action":"subscribe","batch_id":"batch_1"}"#).unwrap();
        assert_eq!(msg.action, Action::Subscribe);
        assert_eq!(msg.batch_id, "batch_1");

        let msg = ClientMessage::parse(r#"{"action":"unsubscribe","batch_id":"batch_1"}"#).unwrap();
        assert_eq!(msg.action, Action::Unsubscribe);
    }

    #[test]
    fn missing_batch_id_wins_over_unknown_action() {
        let err = ClientMessage::parse(r#"{"action":"dance"}"#).unwrap_err();
        assert_eq!(err.message(), "batch_id is required");

        let err = ClientMessage::parse(r#"{"action":"subscribe","batch_id":""}"#).unwrap_err();
        assert_eq!(err.message(), "batch_id is required");
    }

    #[test]
    fn whitespace_batch_id_is_kept_as_is() {
        let msg = ClientMessage::parse(r#"{"action":"subscribe","batch_id":"  "}"#).unwrap();
        assert_eq!(msg.batch_id, "  ");
    }

    #[test]
    fn missing_action_is_unknown() {
        let err = ClientMessage::parse(r#"{"batch_id":"b"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
        assert!(err.message().starts_with("Unknown action: none"));
    }

    #[test]
    fn garbage_is_invalid_json() {
        let err = ClientMessage::parse("{not json").unwrap_err();
        assert_eq!(err.message(), "Invalid JSON message");
    }

    #[test]
    fn batch_completed_flattens_payload() {
        let payload = json!({"app_id": "com.example.app", "total_reviews_analyzed": 1500});
        let msg = ServerMessage::batch_completed("batch_abc123", payload.as_object().unwrap().clone());
        assert_eq!(
            msg.to_value(),
            json!({
                "type": "batch_completed",
                "batch_id": "batch_abc123",
                "app_id": "com.example.app",
                "total_reviews_analyzed": 1500
            })
        );
    }

    #[test]
    fn payload_cannot_override_type_or_batch_id() {
        let payload = json!({"type": "spoofed", "batch_id": "other"});
        let msg = ServerMessage::batch_completed("real", payload.as_object().unwrap().clone());
        let value = msg.to_value();
        assert_eq!(value["type"], "batch_completed");
        assert_eq!(value["batch_id"], "real");
    }

    #[test]
    fn acknowledgement_shape() {
        let value: Value = serde_json::from_str(
            &ServerMessage::Subscribed { batch_id: "b1".into() }.encode().unwrap(),
        )
        .unwrap();
        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["batch_id"], "b1");
        assert_eq!(value["message"], "Successfully subscribed to batch b1");
    }
}
