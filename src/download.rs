//! Document download into temporary storage.
//!
//! Downloads a presigned URL to a private temp directory, streaming with a byte
//! cap and verifying the result really is a PDF. Object stores happily return
//! XML or HTML error pages with a 200, so the magic bytes are checked.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::ProcessingError;

/// Files smaller than this cannot be a usable PDF.
const MIN_PDF_BYTES: u64 = 100;

/// Default maximum accepted URL length.
pub const MAX_URL_LEN: usize = 2048;

/// Check that `raw` is an absolute http(s) URL no longer than `max_len`.
pub fn validate_url(field: &str, raw: &str, max_len: usize) -> Result<Url, ProcessingError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProcessingError::validation(format!("{} required", field)));
    }
    if raw.len() > max_len {
        return Err(ProcessingError::validation(format!("{} too long", field)));
    }

    let url = Url::parse(raw)
        .map_err(|_| ProcessingError::validation(format!("{} must be http/https", field)))?;
    let is_http = matches!(url.scheme(), "http" | "https") && url.host_str().is_some();
    if !is_http {
        return Err(ProcessingError::validation(format!(
            "{} must be http/https",
            field
        )));
    }
    Ok(url)
}

/// A downloaded file. The temp directory is removed on drop.
#[derive(Debug)]
pub struct DownloadedFile {
    _dir: TempDir,
    path: PathBuf,
    size: u64,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// HTTP downloader for source documents.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(max_bytes: u64, timeout: Duration) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fileproc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProcessingError::Internal(format!("http client: {}", e)))?;

        Ok(Self { client, max_bytes })
    }

    /// Download a PDF from `url` into a fresh temp directory.
    pub async fn fetch_pdf(&self, url: &str) -> Result<DownloadedFile, ProcessingError> {
        let dir = tempfile::Builder::new()
            .prefix("pdfproc-")
            .tempdir()
            .map_err(|e| ProcessingError::download(format!("temp dir: {}", e)))?;
        let path = dir.path().join("doc.pdf");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProcessingError::download(format!("download: {}", e.without_url())))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProcessingError::download(format!(
                "download failed: HTTP {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.is_empty()
            && !content_type.contains("pdf")
            && !content_type.contains("octet-stream")
        {
            return Err(ProcessingError::download(format!(
                "invalid content-type: {}",
                content_type
            )));
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ProcessingError::download(format!("create: {}", e)))?;

        let mut size: u64 = 0;
        let mut header: Vec<u8> = Vec::with_capacity(8);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProcessingError::download(format!("download: {}", e.without_url())))?
        {
            size += chunk.len() as u64;
            if size > self.max_bytes {
                return Err(ProcessingError::download(format!(
                    "PDF exceeds {}MB limit",
                    self.max_bytes >> 20
                )));
            }
            if header.len() < 8 {
                let take = (8 - header.len()).min(chunk.len());
                header.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| ProcessingError::download(format!("write: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| ProcessingError::download(format!("write: {}", e)))?;

        if size < MIN_PDF_BYTES {
            return Err(ProcessingError::download("PDF too small (likely invalid)"));
        }
        check_pdf_magic(&header)?;

        debug!("Downloaded {} bytes to {}", size, path.display());
        Ok(DownloadedFile {
            _dir: dir,
            path,
            size,
        })
    }
}

fn check_pdf_magic(header: &[u8]) -> Result<(), ProcessingError> {
    let is_pdf = infer::get(header).is_some_and(|kind| kind.mime_type() == "application/pdf");
    if is_pdf {
        return Ok(());
    }

    let preview: String = String::from_utf8_lossy(&header[..header.len().min(5)])
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    Err(ProcessingError::download(format!(
        "downloaded file is not a PDF (starts with {:?}); presigned URL may be expired or invalid",
        preview
    )))
}
