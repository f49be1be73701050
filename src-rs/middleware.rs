use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, State},
    http::{header::RETRY_AFTER, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::{rate_limit::Decision, state::AppState};

#[derive(Debug, Serialize)]
struct RateLimitedBody {
    #[serde(rename = "statusCode")]
    status_code: u16,
    message: &'static str,
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let socket_addr = request
        .extensions()
        .get::<SocketAddr>()
        .copied()
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|value| value.0)
        });
    let key = state
        .client_keys
        .client_key(request.headers(), socket_addr);

    match state.limiter.check(&key) {
        Decision::Admit => next.run(request).await,
        Decision::Reject { retry_after } => {
            tracing::warn!(
                client = %key,
                path = %request.uri().path(),
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            too_many_requests(retry_after)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitedBody {
            status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            message: "Too Many Requests",
        }),
    )
        .into_response();

    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    response
}

/// Whole seconds, rounded up; never zero so clients always back off.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}
