//! Error taxonomy shared by the extraction pipeline and the HTTP layer.

use thiserror::Error;

use crate::admission::CapacityError;
use crate::ocr::OcrError;

/// Maximum length of an error message surfaced to callers.
const MAX_MESSAGE_LEN: usize = 300;

/// Errors that can occur while handling an extraction request.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Request body could not be parsed.
    #[error("{0}")]
    BadRequest(String),

    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// A bounded pool is exhausted.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Document fetch or parsing failure from the page source.
    #[error("{0}")]
    Source(String),

    /// Document download failed.
    #[error("{0}")]
    Download(String),

    /// OCR gateway failure.
    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("Invalid authentication")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    /// The request ran past its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Unexpected fault, reported generically.
    #[error("Internal server error")]
    Internal(String),
}

impl ProcessingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ProcessingError::Validation(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        ProcessingError::Source(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        ProcessingError::Download(msg.into())
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::BadRequest(_) => "bad_request",
            ProcessingError::Validation(_) => "validation_failed",
            ProcessingError::Capacity(CapacityError::Requests) => "capacity",
            ProcessingError::Capacity(CapacityError::Ocr) => "ocr_capacity",
            ProcessingError::Source(_) => "source_failed",
            ProcessingError::Download(_) => "download_failed",
            ProcessingError::Ocr(_) => "ocr_failed",
            ProcessingError::Unauthorized => "unauthorized",
            ProcessingError::RateLimited => "rate_limit",
            ProcessingError::Timeout(_) => "timeout",
            ProcessingError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to callers.
    pub fn public_message(&self) -> String {
        sanitize_message(&self.to_string())
    }
}

/// Strip internal details from an error message before it leaves the process.
///
/// Temp directory paths become `[tmp]`, bearer tokens are masked and the
/// message is truncated.
pub fn sanitize_message(msg: &str) -> String {
    let tmp = std::env::temp_dir();
    let tmp = tmp.to_string_lossy();
    let tmp = tmp.trim_end_matches('/');

    let mut out = if tmp.is_empty() {
        msg.to_string()
    } else {
        msg.replace(tmp, "[tmp]")
    };

    if let Some(idx) = out.find("Bearer ") {
        let rest = &out[idx + "Bearer ".len()..];
        let token_end = rest
            .find(|c: char| c.is_whitespace() || c == '"')
            .unwrap_or(rest.len());
        out.replace_range(idx + "Bearer ".len()..idx + "Bearer ".len() + token_end, "***");
    }

    truncate_chars(&out, MAX_MESSAGE_LEN)
}

/// Truncate to `max` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_distinguish_capacity_pools() {
        assert_eq!(
            ProcessingError::Capacity(CapacityError::Requests).code(),
            "capacity"
        );
        assert_eq!(
            ProcessingError::Capacity(CapacityError::Ocr).code(),
            "ocr_capacity"
        );
    }

    #[test]
    fn test_sanitize_replaces_temp_dir() {
        let tmp = std::env::temp_dir().join("pdfproc-abc").join("doc.pdf");
        let msg = format!("open {}: no such file", tmp.display());
        let clean = sanitize_message(&msg);
        assert!(clean.starts_with("open [tmp]"));
    }

    #[test]
    fn test_sanitize_masks_bearer_token() {
        let clean = sanitize_message("request failed: Authorization: Bearer sk-secret-123 rejected");
        assert!(!clean.contains("sk-secret-123"));
        assert!(clean.contains("Bearer ***"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let long = "x".repeat(1000);
        let clean = sanitize_message(&long);
        assert_eq!(clean.len(), MAX_MESSAGE_LEN + 3);
        assert!(clean.ends_with("..."));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("abc", 5), "abc");
    }
}
