use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let settings = &state.config.rate_limit;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "rateLimit": {
                "windowMs": settings.window().as_millis() as u64,
                "maxRequests": settings.max_requests(),
                "trackedClients": state.limiter.len()
            }
        })),
    )
        .into_response()
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "statusCode": 404, "message": "Not Found" })),
    )
        .into_response()
}
