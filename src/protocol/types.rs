use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorCode, RelayError};

/// Actions a client may send over its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl FromStr for Action {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            other => Err(RelayError::new(
                ErrorCode::InvalidMessage,
                format!("Unknown action: {}. Use 'subscribe' or 'unsubscribe'", other),
            )),
        }
    }
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A batch completion reported by an external worker.
///
/// `payload` holds every field of the event except `batch_id` and is passed
/// through to subscribers untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub batch_id: String,
    pub payload: Map<String, Value>,
}

impl CompletionEvent {
    /// Parse a webhook body
    pub fn parse(raw: &[u8]) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| {
            RelayError::new(ErrorCode::MalformedEvent, format!("Invalid JSON body: {}", e))
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RelayError> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            _ => {
                return Err(RelayError::new(
                    ErrorCode::MalformedEvent,
                    "Completion event must be a JSON object",
                ))
            }
        };

        let batch_id = match fields.remove("batch_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(RelayError::new(ErrorCode::MalformedEvent, "batch_id is required"))
            }
            Some(_) => {
                return Err(RelayError::new(ErrorCode::MalformedEvent, "batch_id must be a string"))
            }
        };

        debug!("Parsed completion event for batch {} with {} payload fields", batch_id, fields.len());
        Ok(Self {
            batch_id,
            payload: fields,
        })
    }
}

/// Body answered by the completion webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    pub message: String,
    pub batch_id: String,
    pub subscribers_notified: usize,
}

impl WebhookResponse {
    pub fn success(batch_id: impl Into<String>, subscribers_notified: usize) -> Self {
        Self {
            status: "success".into(),
            message: format!(
                "Batch completion notification sent to {} user(s)",
                subscribers_notified
            ),
            batch_id: batch_id.into(),
            subscribers_notified,
        }
    }
}

/// Body accepted by the batch trigger proxy and forwarded to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub batch_id: String,
    pub app_id: String,
}

impl TriggerRequest {
    pub fn parse(raw: &[u8]) -> Result<Self, RelayError> {
        let request: Self = serde_json::from_slice(raw).map_err(|e| {
            RelayError::new(ErrorCode::InvalidMessage, format!("Invalid trigger request: {}", e))
        })?;
        if request.batch_id.is_empty() {
            return Err(RelayError::new(ErrorCode::InvalidMessage, "batch_id is required"));
        }
        if request.app_id.is_empty() {
            return Err(RelayError::new(ErrorCode::InvalidMessage, "app_id is required"));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_event_keeps_payload_without_batch_id() {
        let event = CompletionEvent::from_value(json!({
            "batch_id": "batch_abc123",
            "app_id": "com.example.app",
            "total_reviews_analyzed": 1500
        }))
        .unwrap();

        assert_eq!(event.batch_id, "batch_abc123");
        assert_eq!(event.payload.len(), 2);
        assert_eq!(event.payload["app_id"], "com.example.app");
        assert!(!event.payload.contains_key("batch_id"));
    }

    #[test]
    fn completion_event_requires_batch_id() {
        for body in [
            json!({"app_id": "com.example.app"}),
            json!({"batch_id": ""}),
            json!({"batch_id": null}),
        ] {
            let err = CompletionEvent::from_value(body).unwrap_err();
            assert_eq!(err.code(), ErrorCode::MalformedEvent);
            assert_eq!(err.message(), "batch_id is required");
        }

        let err = CompletionEvent::from_value(json!({"batch_id": 42})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
    }

    #[test]
    fn completion_event_takes_batch_id_verbatim() {
        let event = CompletionEvent::from_value(json!({"batch_id": " batch 7 "})).unwrap();
        assert_eq!(event.batch_id, " batch 7 ");

        let event = CompletionEvent::from_value(json!({"batch_id": "   "})).unwrap();
        assert_eq!(event.batch_id, "   ");
    }

    #[test]
    fn completion_event_rejects_non_objects() {
        let err = CompletionEvent::parse(b"[1, 2]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);

        let err = CompletionEvent::parse(b"not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert_eq!("subscribe".parse::<Action>().unwrap(), Action::Subscribe);
        assert_eq!("unsubscribe".parse::<Action>().unwrap(), Action::Unsubscribe);
        let err = "publish".parse::<Action>().unwrap_err();
        assert_eq!(err.message(), "Unknown action: publish. Use 'subscribe' or 'unsubscribe'");
    }

    #[test]
    fn trigger_request_requires_both_ids() {
        let ok = TriggerRequest::parse(br#"{"batch_id":"b1","app_id":"a1"}"#).unwrap();
        assert_eq!(ok.batch_id, "b1");

        assert!(TriggerRequest::parse(br#"{"batch_id":"","app_id":"a1"}"#).is_err());
        assert!(TriggerRequest::parse(br#"{"batch_id":"b1"}"#).is_err());
    }

    #[test]
    fn webhook_response_reports_count() {
        let response = WebhookResponse::success("batch_abc123", 2);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "message": "Batch completion notification sent to 2 user(s)",
                "batch_id": "batch_abc123",
                "subscribers_notified": 2
            })
        );
    }
}
