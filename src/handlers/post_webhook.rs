use crate::models::event::UNKNOWN_EVENT_TYPE;
use crate::models::report::ApiError;
use crate::services::post_webhook::{post_webhook, EVENT_HEADER};
use crate::services::signature::SIGNATURE_HEADER;
use crate::State as AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

#[tracing::instrument(skip(state, headers, body), fields(event_type))]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let event_type = header(EVENT_HEADER);
    tracing::Span::current().record("event_type", event_type.unwrap_or(UNKNOWN_EVENT_TYPE));
    info!(body_length = body.len(), "Webhook request received");

    let event = post_webhook(
        event_type,
        header(SIGNATURE_HEADER),
        &body,
        Utc::now(),
        state.webhook_secret.as_ref(),
    )?;

    // Storage failures are logged and still acknowledged.
    match state.store.append(&event).await {
        Ok(id) => debug!(id, "Event saved"),
        Err(err) => error!(%err, "Failed to save event"),
    }

    info!(
        repository = event.repository.as_deref(),
        action = event.action.as_deref(),
        "Webhook processed successfully"
    );
    Ok(Json(json!({"status": "received"})))
}
