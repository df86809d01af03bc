//! HTTP service for document extraction.
//!
//! Exposes the hybrid extractor, preview and image OCR behind shared-secret
//! authentication, per-client rate limiting and admission control.

mod handlers;
mod middleware;
mod response;
mod routes;

pub use handlers::{ExtractRequest, ImageExtractRequest};
pub use middleware::{SharedSecret, AUTH_HEADER};
pub use response::{parse_json, ApiError};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::Settings;
use crate::download::Downloader;
use crate::extract::{PageSource, PopplerSource};
use crate::hybrid::{HybridDefaults, HybridProcessor};
use crate::ocr::{MistralGateway, OcrGateway};
use crate::rate_limit::ClientRateLimiter;

/// Hybrid processor over type-erased backends.
pub type Processor = HybridProcessor<Arc<dyn PageSource>, Arc<dyn OcrGateway>>;

/// Request counters for health and metrics.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    active: AtomicUsize,
    total: AtomicU64,
}

impl ServerMetrics {
    /// Count a request as active until the returned guard drops.
    pub fn begin(&self) -> ActiveRequest<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::Relaxed);
        ActiveRequest { metrics: self }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Guard for one in-flight request.
pub struct ActiveRequest<'a> {
    metrics: &'a ServerMetrics,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hybrid_defaults: Arc<HybridDefaults>,
    pub processor: Arc<Processor>,
    pub admission: Arc<AdmissionController>,
    pub limiter: Arc<ClientRateLimiter>,
    pub downloader: Downloader,
    pub metrics: Arc<ServerMetrics>,
    pub secret: SharedSecret,
}

impl AppState {
    /// Build state with poppler and the Mistral gateway as backends.
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let source: Arc<dyn PageSource> = Arc::new(PopplerSource::new(settings.poppler_config()));
        let gateway: Arc<dyn OcrGateway> = Arc::new(MistralGateway::new(
            settings.mistral_api_key.clone(),
            settings.mistral_ocr_url.clone(),
        )?);
        Self::with_backends(settings, source, gateway)
    }

    /// Build state around the given page source and OCR gateway.
    pub fn with_backends(
        settings: Settings,
        source: Arc<dyn PageSource>,
        gateway: Arc<dyn OcrGateway>,
    ) -> anyhow::Result<Self> {
        let downloader = Downloader::new(settings.max_pdf_bytes, settings.download_timeout)?;

        Ok(Self {
            hybrid_defaults: Arc::new(settings.hybrid_defaults()),
            processor: Arc::new(HybridProcessor::new(source, gateway)),
            admission: Arc::new(AdmissionController::new(
                settings.max_concurrent_requests,
                settings.max_ocr_concurrent,
            )),
            limiter: Arc::new(ClientRateLimiter::new(
                settings.rate_limit_every,
                settings.rate_limit_burst,
            )),
            downloader,
            metrics: Arc::new(ServerMetrics::default()),
            secret: SharedSecret::new(&settings.internal_shared_secret),
            settings: Arc::new(settings),
        })
    }
}

/// Start the web server and run until Ctrl+C or SIGTERM.
pub async fn serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;

    let metrics = state.metrics.clone();
    let reset_task = ClientRateLimiter::spawn_reset_task(
        state.limiter.clone(),
        state.settings.cleanup_interval,
        move |_| {
            tracing::info!(
                "Stats: active={} total={}",
                metrics.active(),
                metrics.total()
            );
        },
    );

    tracing::info!(
        "Limits: {} concurrent requests, {} concurrent OCR calls",
        state.admission.max_requests(),
        state.admission.max_ocr()
    );
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    reset_task.abort();
    tracing::info!("Server stopped");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
