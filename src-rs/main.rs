mod client_key;
mod clock;
mod config;
mod handlers;
mod middleware;
mod rate_limit;
mod state;
mod sweeper;

use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{http::Method, middleware as axum_middleware, routing::get, Router};
use config::Config;
use state::AppState;
use sweeper::Sweeper;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::warn!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_env()?;
    if config.trust_proxy {
        tracing::warn!(
            "TRUST_PROXY is enabled. Rate limiting keys will be taken from X-Forwarded-For / X-Real-IP."
        );
    }

    let state = AppState::new(config.clone());
    tracing::info!(
        window_ms = config.rate_limit.window().as_millis() as u64,
        max_requests = config.rate_limit.max_requests(),
        sweep_interval_ms = config.rate_limit.sweep_interval().as_millis() as u64,
        "Rate limiter initialized"
    );

    let sweeper = Sweeper::start(state.limiter.clone(), config.rate_limit.sweep_interval());

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(port = config.port, "Running in HTTP mode.");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed");

    sweeper.stop().await;
    tracing::info!("Server stopped");

    served
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(executable_path) = env::current_exe() {
        if let Some(executable_dir) = executable_path.parent() {
            roots.push(executable_dir.to_path_buf());
        }
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots {
        if !seen_roots.insert(root.clone()) {
            continue;
        }

        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    Ok(loaded)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(error = %error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header::RETRY_AFTER, Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        clock::ManualClock,
        rate_limit::{InMemoryRateLimiter, RateLimitSettings},
    };

    fn test_app(trust_proxy: bool) -> (Router, Arc<InMemoryRateLimiter>, Arc<ManualClock>) {
        let settings =
            RateLimitSettings::new(Duration::from_millis(1000), 2, Duration::from_secs(60))
                .unwrap();
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(InMemoryRateLimiter::with_clock(settings, clock.clone()));
        let config = Config {
            port: 0,
            trust_proxy,
            rate_limit: settings,
        };
        let state = AppState::with_limiter(config, limiter.clone());
        (build_router(state), limiter, clock)
    }

    async fn get_from(app: &Router, uri: &str, peer: &str) -> Response {
        let peer: SocketAddr = peer.parse().unwrap();
        let request = Request::builder()
            .uri(uri)
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_requests_over_quota_get_429() {
        let (app, _limiter, _clock) = test_app(false);

        for _ in 0..2 {
            let response = get_from(&app, "/health", "10.0.0.1:4000").await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = get_from(&app, "/health", "10.0.0.1:4001").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["statusCode"], 429);
        assert_eq!(body["message"], "Too Many Requests");
    }

    #[tokio::test]
    async fn test_health_reports_configured_limits() {
        let (app, _limiter, _clock) = test_app(false);

        let response = get_from(&app, "/health", "10.0.0.1:4000").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rateLimit"]["windowMs"], 1000);
        assert_eq!(body["rateLimit"]["maxRequests"], 2);
        assert_eq!(body["rateLimit"]["trackedClients"], 1);
    }

    #[tokio::test]
    async fn test_other_clients_are_unaffected() {
        let (app, _limiter, _clock) = test_app(false);

        for _ in 0..3 {
            get_from(&app, "/health", "10.0.0.1:4000").await;
        }

        let response = get_from(&app, "/health", "10.0.0.2:4000").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_window_expiry_readmits_client() {
        let (app, limiter, clock) = test_app(false);

        for _ in 0..2 {
            get_from(&app, "/health", "10.0.0.1:4000").await;
        }
        let response = get_from(&app, "/health", "10.0.0.1:4000").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::from_millis(1001));
        let response = get_from(&app, "/health", "10.0.0.1:4000").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(limiter.window("10.0.0.1").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_unmatched_routes_are_limited_too() {
        let (app, limiter, _clock) = test_app(false);

        let response = get_from(&app, "/jobs", "10.0.0.1:4000").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(limiter.window("10.0.0.1").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_missing_connect_info_uses_unknown_key() {
        let (app, limiter, _clock) = test_app(false);

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(limiter.window("unknown").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_trust_proxy_keys_by_forwarded_for() {
        let (app, limiter, _clock) = test_app(true);

        let request = Request::builder()
            .uri("/health")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .extension(ConnectInfo("10.0.0.1:4000".parse::<SocketAddr>().unwrap()))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(limiter.window("203.0.113.9").is_some());
        assert!(limiter.window("10.0.0.1").is_none());
    }
}
