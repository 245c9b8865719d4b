use crate::models::report::Result;
use crate::State as AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Liveness check. Does not touch the store.
#[tracing::instrument(skip(state))]
pub async fn ping_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(json!({
        "status": "ok",
        "recent_order": state.store.recent_order().to_string(),
        "signature_verification": state.webhook_secret.is_some(),
    })))
}
