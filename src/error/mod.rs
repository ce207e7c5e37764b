//! Error module for the batch relay
//!
//! This module defines the error type and numeric error codes used throughout
//! the relay, and how they are rendered as HTTP responses.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use thiserror::Error;

/// Numeric error code, grouped by range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Protocol errors (0x0001-0x0100)
    InvalidMessage = 0x0001,
    MalformedEvent = 0x0002,
    UnsupportedFrame = 0x0003,

    // Delivery errors (0x0101-0x0200)
    ChannelSendFailure = 0x0101,
    ChannelClosed = 0x0102,

    // Upstream errors (0x0201-0x0300)
    UpstreamUnavailable = 0x0201,
    UpstreamRejected = 0x0202,
    UpstreamAuth = 0x0203,
    UnknownUpstream = 0x0204,

    // System errors (0x0301-0x0400)
    InternalServerError = 0x0301,
    ConfigInvalid = 0x0302,

    // Client errors (0x0401-0x0500)
    Unauthorized = 0x0401,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the error code category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            0x0001..=0x0100 => ErrorCategory::Protocol,
            0x0101..=0x0200 => ErrorCategory::Delivery,
            0x0201..=0x0300 => ErrorCategory::Upstream,
            0x0301..=0x0400 => ErrorCategory::System,
            0x0401..=0x0500 => ErrorCategory::Client,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Get a human-readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "Invalid channel message",
            Self::MalformedEvent => "Completion event is malformed",
            Self::UnsupportedFrame => "Unsupported channel frame",
            Self::ChannelSendFailure => "Failed to push message on channel",
            Self::ChannelClosed => "Channel is closed",
            Self::UpstreamUnavailable => "Batch worker is unreachable",
            Self::UpstreamRejected => "Batch worker rejected the request",
            Self::UpstreamAuth => "No credential available for batch worker",
            Self::UnknownUpstream => "Unknown batch worker",
            Self::InternalServerError => "Unexpected server error",
            Self::ConfigInvalid => "Invalid configuration",
            Self::Unauthorized => "Missing or invalid credentials",
        }
    }

    /// HTTP status used when this error reaches an HTTP caller
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidMessage | Self::MalformedEvent | Self::UnsupportedFrame => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownUpstream => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamRejected => StatusCode::BAD_GATEWAY,
            Self::ChannelSendFailure
            | Self::ChannelClosed
            | Self::UpstreamAuth
            | Self::InternalServerError
            | Self::ConfigInvalid => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::MalformedEvent => "MALFORMED_EVENT",
            Self::UnsupportedFrame => "UNSUPPORTED_FRAME",
            Self::ChannelSendFailure => "CHANNEL_SEND_FAILURE",
            Self::ChannelClosed => "CHANNEL_CLOSED",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamRejected => "UPSTREAM_REJECTED",
            Self::UpstreamAuth => "UPSTREAM_AUTH",
            Self::UnknownUpstream => "UNKNOWN_UPSTREAM",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.as_u16())
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Protocol,
    Delivery,
    Upstream,
    System,
    Client,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "Protocol"),
            Self::Delivery => write!(f, "Delivery"),
            Self::Upstream => write!(f, "Upstream"),
            Self::System => write!(f, "System"),
            Self::Client => write!(f, "Client"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{code}: {message}")]
    Standard {
        code: ErrorCode,
        message: String,
    },

    /// A batch worker answered with a non-success status
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus {
        status: u16,
        body: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl RelayError {
    /// Create a new standard error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard {
            code,
            message: message.into(),
        }
    }

    /// Error code, `InternalServerError` for anything that is not a standard error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Standard { code, .. } => *code,
            Self::UpstreamStatus { .. } => ErrorCode::UpstreamRejected,
            _ => ErrorCode::InternalServerError,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Standard { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            // Forward the worker's own error status; anything else is a bad gateway.
            Self::UpstreamStatus { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            _ => self.code().http_status(),
        }
    }

    /// JSON body sent to HTTP callers
    pub fn to_body(&self) -> Map<String, Value> {
        let code = self.code();
        let mut body = Map::new();
        body.insert("status".into(), Value::from("error"));
        body.insert("error".into(), Value::from(code.name()));
        body.insert("code".into(), Value::from(code.as_u16()));
        body.insert("message".into(), Value::from(self.message()));
        body.insert("timestamp".into(), Value::from(chrono::Utc::now().to_rfc3339()));
        body
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(Value::Object(self.to_body()))).into_response()
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<String> for RelayError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

impl From<&str> for RelayError {
    fn from(message: &str) -> Self {
        Self::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_into_their_ranges() {
        assert_eq!(ErrorCode::MalformedEvent.category(), ErrorCategory::Protocol);
        assert_eq!(ErrorCode::ChannelSendFailure.category(), ErrorCategory::Delivery);
        assert_eq!(ErrorCode::UpstreamUnavailable.category(), ErrorCategory::Upstream);
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::System);
        assert_eq!(ErrorCode::Unauthorized.category(), ErrorCategory::Client);
    }

    #[test]
    fn upstream_unavailable_is_503() {
        let err = RelayError::new(ErrorCode::UpstreamUnavailable, "connection refused");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "UPSTREAM_UNAVAILABLE (0x0201): connection refused");
    }

    #[test]
    fn upstream_status_is_forwarded_when_it_is_an_error() {
        let err = RelayError::UpstreamStatus { status: 422, body: "bad batch".into() };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), ErrorCode::UpstreamRejected);

        let odd = RelayError::UpstreamStatus { status: 302, body: String::new() };
        assert_eq!(odd.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn body_carries_code_and_message() {
        let body = RelayError::new(ErrorCode::MalformedEvent, "batch_id is required").to_body();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "MALFORMED_EVENT");
        assert_eq!(body["code"], 2);
        assert_eq!(body["message"], "batch_id is required");
        assert!(body.contains_key("timestamp"));
    }

    #[test]
    fn plain_errors_map_to_internal() {
        let err = RelayError::from("boom");
        assert_eq!(err.code(), ErrorCode::InternalServerError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
