use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{info, warn};
use serde_json::Value;

use crate::batchrelay::net::server::AppState;
use crate::protocol::types::{CompletionEvent, WebhookResponse};

/// POST /webhook/batch-completed
///
/// Called by batch workers once results are stored. A batch nobody is waiting
/// on is answered with `subscribers_notified: 0`, not an error.
pub async fn batch_completed(State(state): State<AppState>, body: Bytes) -> Response {
    let event = match CompletionEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Rejected completion webhook: {}", e);
            let mut body = e.to_body();
            body.insert("batch_id".into(), Value::Null);
            body.insert("subscribers_notified".into(), Value::from(0));
            return (e.status_code(), Json(Value::Object(body))).into_response();
        }
    };

    info!("Completion webhook received for batch {}", event.batch_id);
    let notified = state.handler.handle_completion(&event).await;
    Json(WebhookResponse::success(event.batch_id, notified)).into_response()
}
