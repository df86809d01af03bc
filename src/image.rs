//! OCR for standalone images.
//!
//! The image is never downloaded here: the URL goes straight to the OCR
//! provider, which fetches it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::download::validate_url;
use crate::error::{truncate_chars, ProcessingError};
use crate::ocr::{OcrError, OcrGateway};

/// Separator between pages when a provider splits one image into several.
const IMAGE_PAGE_SEPARATOR: &str = "\n\n-----\n\n";

static ZERO_WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[\u{200B}-\u{200D}\u{FEFF}\u{00AD}\u{2060}]").unwrap());
static STANDALONE_IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\w-]*(?:img|image|figure|fig|photo|pic)[\w-]*\.(?:jpeg|jpg|png|gif|webp|svg|bmp|tiff?)[ \t]*$")
        .unwrap()
});
static STANDALONE_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\w-]+\.(?:jpeg|jpg|png|gif|webp|svg|bmp|tiff?)[ \t]*$").unwrap()
});
static TRAILING_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{4,}").unwrap());

/// Result of image OCR.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExtractionResult {
    pub success: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageExtractionResult {
    fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            error: Some(msg.into()),
        }
    }
}

/// Check an image URL: http(s), bounded length, and not a PDF.
pub fn validate_image_url(raw: &str, max_len: usize) -> Result<(), ProcessingError> {
    validate_url("imageUrl", raw, max_len)?;

    let lower = raw.trim().to_lowercase();
    if lower.ends_with(".pdf") || lower.contains(".pdf?") {
        return Err(ProcessingError::validation(
            "PDF files should use the /pdf/extract endpoint, not /image/extract",
        ));
    }
    Ok(())
}

/// OCR one image by URL and return cleaned markdown.
pub async fn process_image_ocr<G: OcrGateway + ?Sized>(
    gateway: &G,
    image_url: &str,
    model: &str,
    max_url_len: usize,
) -> ImageExtractionResult {
    if let Err(e) = validate_image_url(image_url, max_url_len) {
        return ImageExtractionResult::failure(e.to_string());
    }

    let pages = match gateway.run_image_ocr(image_url.trim(), model).await {
        Ok(pages) => pages,
        Err(e) => {
            warn!("Image OCR failed: {}", e);
            return ImageExtractionResult::failure(friendly_ocr_error(&e));
        }
    };

    let parts: Vec<&str> = pages
        .iter()
        .map(|p| p.markdown.trim())
        .filter(|md| !md.is_empty() && *md != ".")
        .collect();
    if parts.is_empty() {
        return ImageExtractionResult::failure("no content extracted from image");
    }

    ImageExtractionResult {
        success: true,
        text: clean_ocr_text(&parts.join(IMAGE_PAGE_SEPARATOR)),
        error: None,
    }
}

/// Light cleanup of raw OCR markdown.
///
/// Strips invisible characters and lines that are nothing but an image file
/// name, normalizes line endings and caps runs of blank lines.
pub fn clean_ocr_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = ZERO_WIDTH.replace_all(text, "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = STANDALONE_IMAGE_NAME.replace_all(&text, "");
    let text = STANDALONE_FILE_NAME.replace_all(&text, "");
    let text = TRAILING_SPACES.replace_all(&text, "");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n\n");
    text.trim().to_string()
}

/// Turn a provider error into a message fit for callers.
fn friendly_ocr_error(err: &OcrError) -> String {
    let msg = err.to_string();
    let lower = msg.to_lowercase();

    if matches!(err, OcrError::Api { status: 404, .. }) || lower.contains("not found") {
        return "Image URL not accessible (404)".to_string();
    }
    if matches!(err, OcrError::Api { status: 403, .. }) || lower.contains("forbidden") {
        return "Access denied to image URL".to_string();
    }
    if let OcrError::Http(e) = err {
        if e.is_timeout() {
            return "Request timeout, try again later".to_string();
        }
        if e.is_connect() {
            return "Network error, check connectivity".to_string();
        }
    }
    if lower.contains("timeout") {
        return "Request timeout, try again later".to_string();
    }

    truncate_chars(&msg, 300)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrPage, OcrRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeGateway {
        result: Mutex<Option<Result<Vec<OcrPage>, OcrError>>>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl FakeGateway {
        fn returning(result: Result<Vec<OcrPage>, OcrError>) -> Self {
            Self {
                result: Mutex::new(Some(result)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OcrGateway for FakeGateway {
        async fn run_ocr(&self, _request: &OcrRequest) -> Result<Vec<OcrPage>, OcrError> {
            Ok(Vec::new())
        }

        async fn run_image_ocr(&self, url: &str, model: &str) -> Result<Vec<OcrPage>, OcrError> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), model.to_string()));
            self.result.lock().unwrap().take().unwrap()
        }
    }

    fn page(index: u32, markdown: &str) -> OcrPage {
        OcrPage {
            index,
            markdown: markdown.to_string(),
        }
    }

    #[test]
    fn test_clean_ocr_text() {
        let raw = "Title\u{200B}\r\n\r\nimg-0.jpeg\nphoto_12.png  \nBody text   \n\n\n\n\n\nEnd";
        assert_eq!(clean_ocr_text(raw), "Title\n\n\nBody text\n\n\nEnd");
    }

    #[test]
    fn test_validate_image_url() {
        assert!(validate_image_url("https://cdn.example.com/a.png", 2048).is_ok());
        assert!(validate_image_url("https://cdn.example.com/a.PDF", 2048).is_err());
        assert!(validate_image_url("https://cdn.example.com/a.pdf?sig=x", 2048).is_err());
        assert!(validate_image_url("file:///etc/passwd", 2048).is_err());
    }

    #[tokio::test]
    async fn test_joins_non_empty_pages() {
        let gateway = FakeGateway::returning(Ok(vec![
            page(0, "First part"),
            page(1, "."),
            page(2, "  "),
            page(3, "Second part"),
        ]));
        let result =
            process_image_ocr(&gateway, "https://cdn.example.com/a.png", "mistral-ocr-latest", 2048)
                .await;

        assert!(result.success);
        assert_eq!(result.text, "First part\n\n-----\n\nSecond part");
        assert_eq!(
            gateway.seen.lock().unwrap()[0],
            (
                "https://cdn.example.com/a.png".to_string(),
                "mistral-ocr-latest".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_empty_result_is_failure() {
        let gateway = FakeGateway::returning(Ok(vec![page(0, "")]));
        let result = process_image_ocr(&gateway, "https://x.example.com/a.png", "m", 2048).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no content extracted from image"));
    }

    #[tokio::test]
    async fn test_provider_errors_are_friendly() {
        let gateway = FakeGateway::returning(Err(OcrError::Api {
            status: 404,
            body: "{\"detail\":\"missing\"}".to_string(),
        }));
        let result = process_image_ocr(&gateway, "https://x.example.com/a.png", "m", 2048).await;
        assert_eq!(result.error.as_deref(), Some("Image URL not accessible (404)"));

        let gateway = FakeGateway::returning(Err(OcrError::Api {
            status: 403,
            body: String::new(),
        }));
        let result = process_image_ocr(&gateway, "https://x.example.com/a.png", "m", 2048).await;
        assert_eq!(result.error.as_deref(), Some("Access denied to image URL"));
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_gateway() {
        let gateway = FakeGateway::returning(Ok(Vec::new()));
        let result = process_image_ocr(&gateway, "https://x.example.com/doc.pdf", "m", 2048).await;
        assert!(!result.success);
        assert!(gateway.seen.lock().unwrap().is_empty());
    }
}
