use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let sync_queue = state.sync_queue.status().await.ok();

    let status = if database && sync_queue.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if status == StatusCode::OK { "ok" } else { "degraded" },
        "database": database,
        "syncQueueLength": sync_queue.map(|s| s.queue_length),
        "failedBackgroundTasks": state.background.failed_count(),
    });
    (status, Json(body))
}
