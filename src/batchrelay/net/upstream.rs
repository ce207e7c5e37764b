use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use log::{debug, error, info, warn};
use serde_json::{json, Value};

use crate::batchrelay::auth::authenticate_request;
use crate::batchrelay::config::UpstreamConfig;
use crate::batchrelay::net::server::AppState;
use crate::error::{ErrorCode, RelayError};
use crate::protocol::types::TriggerRequest;

/// Outbound HTTP client for the configured batch workers
pub struct UpstreamClient {
    http: reqwest::Client,
    upstreams: HashMap<String, UpstreamConfig>,
}

impl UpstreamClient {
    pub fn new(upstreams: &[UpstreamConfig], timeout: Duration) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::new(ErrorCode::ConfigInvalid, format!("Failed to build HTTP client: {}", e)))?;

        let upstreams = upstreams
            .iter()
            .map(|upstream| (upstream.kind.clone(), upstream.clone()))
            .collect();

        Ok(Self { http, upstreams })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.upstreams.keys().map(String::as_str)
    }

    /// Asks the worker for `kind` to start processing a batch.
    ///
    /// Never retries. A worker that cannot be reached is `UpstreamUnavailable`;
    /// a worker that answers with an error status is forwarded as-is.
    pub async fn trigger(&self, kind: &str, request: &TriggerRequest) -> Result<Value, RelayError> {
        let upstream = self
            .upstreams
            .get(kind)
            .ok_or_else(|| RelayError::new(ErrorCode::UnknownUpstream, format!("Unknown batch kind: {}", kind)))?;

        let token = match upstream.resolve_token() {
            Some(token) => Some(token),
            None if upstream.allow_unauthenticated => {
                warn!("No credential for upstream {}, calling it unauthenticated", kind);
                None
            }
            None => {
                error!("No credential for upstream {} and unauthenticated calls are disabled", kind);
                return Err(RelayError::new(
                    ErrorCode::UpstreamAuth,
                    format!("Failed to authenticate with {} service", kind),
                ));
            }
        };

        let endpoint = upstream.endpoint();
        debug!("Calling upstream {} at {}", kind, endpoint);
        let mut call = self.http.post(&endpoint).json(request);
        if let Some(token) = token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            error!("Failed to connect to upstream {}: {}", kind, e);
            RelayError::new(ErrorCode::UpstreamUnavailable, "Could not connect to batch processing service")
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            error!("Failed to read response from upstream {}: {}", kind, e);
            RelayError::new(ErrorCode::UpstreamUnavailable, "Batch processing service response was cut off")
        })?;

        if !status.is_success() {
            error!("Upstream {} returned error {}: {}", kind, status.as_u16(), text);
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// POST /batch/{kind}/trigger
///
/// Authenticated proxy in front of the batch workers so clients never hold
/// worker credentials.
pub async fn trigger_batch(
    Path(kind): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, RelayError> {
    let user_id = authenticate_request(state.auth.as_ref(), &headers)?;
    let request = TriggerRequest::parse(&body)?;
    info!("User {} triggering {} batch {}", user_id, kind, request.batch_id);

    let upstream_response = state.upstreams.trigger(&kind, &request).await?;
    info!("Triggered {} batch {}", kind, request.batch_id);

    Ok(Json(json!({
        "status": "success",
        "message": "Batch processing triggered successfully",
        "batch_id": request.batch_id,
        "upstream_response": upstream_response,
    })))
}
