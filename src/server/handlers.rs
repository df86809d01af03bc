//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use tracing::info;

use super::response::{parse_json, ApiError};
use super::AppState;
use crate::download::{validate_url, MAX_URL_LEN};
use crate::error::ProcessingError;
use crate::extract::DocumentRef;
use crate::hybrid::{ExtractOptions, ExtractionResult, HybridOptions, PreviewResult};
use crate::image::{process_image_ocr, validate_image_url, ImageExtractionResult};

/// Version reported by the health endpoint.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body of `/pdf/extract` and `/pdf/preview`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtractRequest {
    #[serde(default)]
    pub presigned_url: String,
    #[serde(default)]
    pub options: ExtractOptions,
}

/// Body of `/image/extract`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageExtractRequest {
    #[serde(default)]
    pub image_url: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active: usize,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    active_requests: usize,
    total_requests: u64,
    max_concurrent_requests: usize,
    ocr_slots_in_use: usize,
    max_ocr_concurrent: usize,
    rate_limited_clients: usize,
}

fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ProcessingError> {
    body.map_err(|e| ProcessingError::BadRequest(e.body_text()))
}

/// Time left until `deadline`, zero once it has passed.
fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Parse and validate an extract/preview body, resolving options against the
/// configured defaults.
fn prepare_extract(
    state: &AppState,
    body: Result<Bytes, BytesRejection>,
) -> Result<(String, HybridOptions), ProcessingError> {
    let body = read_body(body)?;
    let request: ExtractRequest = parse_json(&body)?;
    validate_url("presignedUrl", &request.presigned_url, MAX_URL_LEN)?;
    let options = HybridOptions::resolve(&request.options, &state.hybrid_defaults)?;
    Ok((request.presigned_url.trim().to_string(), options))
}

/// Liveness with a capacity signal for load balancers.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.metrics.active();
    let threshold = state.admission.max_requests() as f64 * state.settings.health_degrade_ratio;

    let (status, code) = if active as f64 >= threshold {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    } else {
        ("healthy", StatusCode::OK)
    };

    (
        code,
        Json(HealthResponse {
            status,
            active,
            version: VERSION,
        }),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        active_requests: state.metrics.active(),
        total_requests: state.metrics.total(),
        max_concurrent_requests: state.admission.max_requests(),
        ocr_slots_in_use: state.admission.in_flight_ocr(),
        max_ocr_concurrent: state.admission.max_ocr(),
        rate_limited_clients: state.limiter.tracked_clients().await,
    })
}

/// Download a PDF and extract its text, OCR'ing pages as needed.
pub async fn extract_pdf(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let (url, options) = prepare_extract(&state, body)?;
    let deadline = Instant::now() + state.settings.extract_timeout;

    let file = timeout_at(deadline, state.downloader.fetch_pdf(&url))
        .await
        .map_err(|_| ProcessingError::download("download timed out"))??;
    let doc = DocumentRef::new(url, file.path());

    // Reserved up front from the options alone, before any page is scored.
    let ocr_lease = if options.ocr_may_be_needed() {
        Some(state.admission.acquire_ocr_slot(remaining(deadline)).await?)
    } else {
        None
    };

    let result = timeout_at(deadline, state.processor.process_hybrid(&doc, &options))
        .await
        .map_err(|_| ProcessingError::Timeout("extraction"))?;

    if let Some(lease) = ocr_lease {
        state.admission.release(lease);
    }

    info!(
        "Extract finished: success={} pages={} ocr={} savings={}%",
        result.success, result.total_pages, result.ocr_pages, result.cost_savings_percent
    );
    Ok(Json(result))
}

/// Download a PDF and report whether it would need OCR.
pub async fn preview_pdf(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<PreviewResult>, ApiError> {
    let (url, options) = prepare_extract(&state, body)?;
    let deadline = Instant::now() + state.settings.preview_timeout;

    let file = timeout_at(deadline, state.downloader.fetch_pdf(&url))
        .await
        .map_err(|_| ProcessingError::download("download timed out"))??;
    let doc = DocumentRef::new(url, file.path());

    let result = timeout_at(deadline, state.processor.process_preview(&doc, &options))
        .await
        .map_err(|_| ProcessingError::Timeout("preview"))?;

    info!(
        "Preview finished: success={} pages={} needs_ocr={}",
        result.success, result.total_pages, result.needs_ocr
    );
    Ok(Json(result))
}

/// OCR a single image by URL.
pub async fn extract_image(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ImageExtractionResult>, ApiError> {
    let body = read_body(body)?;
    let request: ImageExtractRequest = parse_json(&body)?;
    validate_image_url(&request.image_url, state.settings.max_image_url_len)?;

    let deadline = Instant::now() + state.settings.image_extract_timeout;
    let lease = state.admission.acquire_ocr_slot(remaining(deadline)).await?;

    let result = timeout_at(
        deadline,
        process_image_ocr(
            state.processor.gateway(),
            &request.image_url,
            &state.settings.default_ocr_model,
            state.settings.max_image_url_len,
        ),
    )
    .await
    .map_err(|_| ProcessingError::Timeout("image extraction"))?;
    state.admission.release(lease);

    info!("Image extract finished: success={}", result.success);
    Ok(Json(result))
}
