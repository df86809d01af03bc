//! Text-layer extraction from documents.

mod poppler;

pub use poppler::{PopplerConfig, PopplerSource};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessingError;

/// A document being processed.
///
/// `local_path` is read by the page source; `source_url` is handed to the OCR
/// provider, which fetches the document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub source_url: String,
    pub local_path: PathBuf,
}

impl DocumentRef {
    pub fn new(source_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            local_path: local_path.into(),
        }
    }
}

/// Source of page counts and per-page text-layer content.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Total number of pages in the document.
    async fn page_count(&self, doc: &DocumentRef) -> Result<u32, ProcessingError>;

    /// Embedded text of one 1-indexed page.
    async fn page_text(&self, doc: &DocumentRef, page: u32) -> Result<String, ProcessingError>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn page_count(&self, doc: &DocumentRef) -> Result<u32, ProcessingError> {
        (**self).page_count(doc).await
    }

    async fn page_text(&self, doc: &DocumentRef, page: u32) -> Result<String, ProcessingError> {
        (**self).page_text(doc, page).await
    }
}
