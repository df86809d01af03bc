//! Mistral OCR API gateway.
//!
//! Requires `MISTRAL_API_KEY`. The provider fetches the document itself from a
//! URL, so nothing is uploaded from this process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{OcrError, OcrGateway, OcrPage, OcrRequest};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.mistral.ai";

/// Maximum number of error-body bytes kept from a failed response.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Largest successful response body accepted from the provider.
const MAX_RESPONSE_BODY: usize = 64 << 20;

#[derive(Debug, Serialize)]
struct OcrRequestBody<'a> {
    model: &'a str,
    document: DocumentSpec<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extract_header: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extract_footer: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pages: Vec<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentSpec<'a> {
    DocumentUrl { document_url: &'a str },
    ImageUrl { image_url: &'a str },
}

#[derive(Debug, Deserialize)]
struct OcrResponseBody {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

/// OCR gateway backed by the Mistral `/v1/ocr` endpoint.
pub struct MistralGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl MistralGateway {
    /// Create a gateway. A missing key is reported per call, not here.
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fileproc/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("MISTRAL_API_KEY not set; OCR requests will fail");
        }

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/ocr", self.base_url)
    }

    async fn send(&self, body: &OcrRequestBody<'_>) -> Result<Vec<OcrPage>, OcrError> {
        let api_key = self.api_key.as_deref().ok_or(OcrError::MissingApiKey)?;

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = read_capped(response, MAX_ERROR_BODY).await;
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = read_limited(response, MAX_RESPONSE_BODY).await?;
        let parsed: OcrResponseBody = serde_json::from_slice(&bytes)
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;

        debug!("OCR returned {} pages", parsed.pages.len());
        Ok(parsed.pages)
    }
}

#[async_trait]
impl OcrGateway for MistralGateway {
    async fn run_ocr(&self, request: &OcrRequest) -> Result<Vec<OcrPage>, OcrError> {
        let mut pages = request.pages.clone();
        pages.sort_unstable();
        pages.dedup();

        let body = OcrRequestBody {
            model: &request.model,
            document: DocumentSpec::DocumentUrl {
                document_url: &request.document_url,
            },
            extract_header: Some(request.extract_header),
            extract_footer: Some(request.extract_footer),
            pages,
        };

        debug!(
            model = %request.model,
            pages = body.pages.len(),
            "Sending document OCR request"
        );
        self.send(&body).await
    }

    async fn run_image_ocr(
        &self,
        image_url: &str,
        model: &str,
    ) -> Result<Vec<OcrPage>, OcrError> {
        let body = OcrRequestBody {
            model,
            document: DocumentSpec::ImageUrl { image_url },
            extract_header: None,
            extract_footer: None,
            pages: Vec::new(),
        };

        debug!(model = %model, "Sending image OCR request");
        self.send(&body).await
    }
}

/// Read a whole response body, failing once it grows past `cap` bytes.
async fn read_limited(mut response: reqwest::Response, cap: usize) -> Result<Vec<u8>, OcrError> {
    let too_large = || OcrError::InvalidResponse(format!("response body exceeds {} bytes", cap));
    if response.content_length().is_some_and(|len| len > cap as u64) {
        return Err(too_large());
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > cap {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Read at most `cap` bytes of a response body as lossy UTF-8.
async fn read_capped(mut response: reqwest::Response, cap: usize) -> String {
    let mut buf = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        let room = cap - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
