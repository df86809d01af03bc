//! fileproc - hybrid document text extraction.
//!
//! Reads the embedded text layer of each PDF page, scores how trustworthy it
//! is, and sends only the pages that need it to an OCR provider in one batched
//! call. Served over HTTP with shared-secret auth, per-client rate limiting and
//! bounded admission pools.

pub mod admission;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod hybrid;
pub mod image;
pub mod ocr;
pub mod quality;
pub mod rate_limit;
pub mod server;

pub use error::ProcessingError;
