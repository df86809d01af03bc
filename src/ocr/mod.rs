//! OCR gateway abstraction.
//!
//! The hybrid pipeline issues at most one batched OCR call per document, so the
//! gateway contract is a single request carrying every page to recognize.

mod mistral;

pub use mistral::{MistralGateway, DEFAULT_BASE_URL};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the OCR provider.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("missing MISTRAL_API_KEY")]
    MissingApiKey,

    #[error("ocr provider error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid ocr response: {0}")]
    InvalidResponse(String),

    #[error("ocr request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One recognized page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// Zero-indexed page number.
    pub index: u32,
    pub markdown: String,
}

/// A batched OCR call over one document.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrRequest {
    /// URL the provider fetches the document from.
    pub document_url: String,
    pub model: String,
    /// Zero-indexed pages. Empty means the provider's default (every page).
    pub pages: Vec<u32>,
    pub extract_header: bool,
    pub extract_footer: bool,
}

/// An OCR provider.
#[async_trait]
pub trait OcrGateway: Send + Sync {
    /// Recognize the requested pages of a document in one call.
    async fn run_ocr(&self, request: &OcrRequest) -> Result<Vec<OcrPage>, OcrError>;

    /// Recognize a single image fetched by the provider from `image_url`.
    async fn run_image_ocr(&self, image_url: &str, model: &str)
        -> Result<Vec<OcrPage>, OcrError>;
}

#[async_trait]
impl<T: OcrGateway + ?Sized> OcrGateway for Arc<T> {
    async fn run_ocr(&self, request: &OcrRequest) -> Result<Vec<OcrPage>, OcrError> {
        (**self).run_ocr(request).await
    }

    async fn run_image_ocr(&self, image_url: &str, model: &str)
        -> Result<Vec<OcrPage>, OcrError> {
        (**self).run_image_ocr(image_url, model).await
    }
}
