//! HTTP surface: routing, handlers and error mapping

mod error;
mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::service::LlmService;

/// Build the application router over a shared service
pub fn router(service: Arc<LlmService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/encode", post(handlers::encode))
        .route("/decode", post(handlers::decode))
        .route("/generate", post(handlers::generate))
        .with_state(service)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    id = %uuid::Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

/// Serve on `listener` until `shutdown` resolves, letting in-flight
/// requests finish.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<LlmService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
