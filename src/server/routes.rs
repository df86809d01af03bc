//! Router configuration for the web server.

use std::any::Any;

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{rate_limit, request_slot, require_auth};
use super::response::ApiError;
use super::AppState;
use crate::error::ProcessingError;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    // Layers run outermost-last: auth, then rate limit, then the request slot.
    let processing = Router::new()
        .route("/pdf/extract", post(handlers::extract_pdf))
        .route("/pdf/preview", post(handlers::preview_pdf))
        .route("/image/extract", post(handlers::extract_image))
        .route_layer(from_fn_with_state(state.clone(), request_slot))
        .route_layer(from_fn_with_state(state.clone(), rate_limit))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let internal = Router::new()
        .route("/metrics", get(handlers::metrics))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(internal)
        .merge(processing)
        .layer(DefaultBodyLimit::max(state.settings.max_json_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "request",
                    id = %uuid::Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError(ProcessingError::Internal(format!("panic: {}", detail))).into_response()
}
