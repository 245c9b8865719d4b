use crate::services::tools::{self, ToolOutput, ToolRequest, ToolSpec, TOOLS};
use crate::State as AppState;
use axum::extract::State;
use axum::Json;

#[tracing::instrument]
pub async fn list_tools_handler() -> Json<&'static [ToolSpec]> {
    Json(TOOLS.as_slice())
}

#[tracing::instrument(skip(state))]
pub async fn call_tool_handler(
    State(state): State<AppState>,
    Json(request): Json<ToolRequest>,
) -> Json<ToolOutput> {
    Json(tools::call(&state, request).await)
}
