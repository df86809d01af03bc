//! Configuration management for fileproc using the prefer crate.
//!
//! Settings are layered: built-in defaults, then an optional config file
//! (discovered by prefer or named on the command line), then environment
//! variables. Invalid or non-positive values never replace a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::extract::PopplerConfig;
use crate::hybrid::HybridDefaults;
use crate::ocr::DEFAULT_BASE_URL;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Minimum length of the shared secret required to serve.
const MIN_SECRET_LEN: usize = 32;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("INTERNAL_SHARED_SECRET must be at least 32 characters")]
    WeakSecret,
}

/// Effective service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub internal_shared_secret: String,
    pub mistral_api_key: Option<String>,
    pub mistral_ocr_url: String,

    pub max_concurrent_requests: usize,
    pub max_ocr_concurrent: usize,
    pub max_json_body_bytes: usize,
    pub max_pdf_bytes: u64,

    pub extract_timeout: Duration,
    pub preview_timeout: Duration,
    pub image_extract_timeout: Duration,
    pub download_timeout: Duration,
    pub pdfinfo_timeout: Duration,
    pub pdftotext_timeout: Duration,

    pub rate_limit_every: Duration,
    pub rate_limit_burst: u32,
    pub cleanup_interval: Duration,

    /// Health reports degraded once active requests reach this share of capacity.
    pub health_degrade_ratio: f64,
    pub max_image_url_len: usize,
    /// How long a request may queue for a slot. Zero fails fast.
    pub request_slot_wait: Duration,

    pub default_min_words: usize,
    pub default_ocr_trigger_ratio: f64,
    pub default_page_separator: String,
    pub default_ocr_model: String,

    /// Config file the settings were loaded from, if any.
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let hybrid = HybridDefaults::default();
        let poppler = PopplerConfig::default();
        Self {
            port: DEFAULT_PORT,
            internal_shared_secret: String::new(),
            mistral_api_key: None,
            mistral_ocr_url: DEFAULT_BASE_URL.to_string(),

            max_concurrent_requests: 15,
            max_ocr_concurrent: 3,
            max_json_body_bytes: 2 << 20,
            max_pdf_bytes: 200 << 20,

            extract_timeout: Duration::from_secs(160),
            preview_timeout: Duration::from_secs(60),
            image_extract_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(25),
            pdfinfo_timeout: poppler.pdfinfo_timeout,
            pdftotext_timeout: poppler.pdftotext_timeout,

            rate_limit_every: Duration::from_millis(600),
            rate_limit_burst: 20,
            cleanup_interval: Duration::from_secs(5 * 60),

            health_degrade_ratio: 0.9,
            max_image_url_len: crate::download::MAX_URL_LEN,
            request_slot_wait: Duration::ZERO,

            default_min_words: hybrid.min_words_threshold,
            default_ocr_trigger_ratio: hybrid.ocr_trigger_ratio,
            default_page_separator: hybrid.page_separator,
            default_ocr_model: hybrid.ocr_model,

            source_path: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, a config file and the environment.
    ///
    /// When `config_path` is `None`, prefer discovers a `fileproc` config in
    /// its standard locations. A missing file is not an error; an unreadable
    /// or malformed one is.
    pub async fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let path = match config_path {
            Some(path) => Some(expand_path(path)),
            None => discover_config().await,
        };
        if let Some(path) = path {
            let file = FileConfig::load_from_path(&path).await?;
            file.apply_to(&mut settings);
            settings.source_path = Some(path);
        }

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let positive = |key: &str| var(key).and_then(|v| v.parse::<u64>().ok()).filter(|&n| n > 0);
        let ratio = |key: &str| var(key).and_then(|v| parse_ratio(&v));
        let duration = |key: &str| var(key).and_then(|v| parse_duration(&v));

        if let Some(port) = var("PORT").and_then(|v| v.parse::<u16>().ok()).filter(|&p| p > 0) {
            self.port = port;
        }
        if let Some(secret) = var("INTERNAL_SHARED_SECRET") {
            self.internal_shared_secret = secret;
        }
        if let Some(key) = var("MISTRAL_API_KEY") {
            self.mistral_api_key = Some(key);
        }
        if let Some(url) = var("MISTRAL_OCR_URL") {
            self.mistral_ocr_url = url;
        }

        set_from(&mut self.max_concurrent_requests, positive("MAX_CONCURRENT_REQUESTS"));
        set_from(&mut self.max_ocr_concurrent, positive("MAX_OCR_CONCURRENT"));
        set_from(&mut self.max_json_body_bytes, positive("MAX_JSON_BODY_BYTES"));
        set_from(&mut self.max_pdf_bytes, positive("MAX_PDF_BYTES"));

        set_if(&mut self.extract_timeout, duration("EXTRACT_TIMEOUT"));
        set_if(&mut self.preview_timeout, duration("PREVIEW_TIMEOUT"));
        set_if(&mut self.image_extract_timeout, duration("IMAGE_EXTRACT_TIMEOUT"));
        set_if(&mut self.download_timeout, duration("DOWNLOAD_TIMEOUT"));
        set_if(&mut self.pdfinfo_timeout, duration("PDFINFO_TIMEOUT"));
        set_if(&mut self.pdftotext_timeout, duration("PDFTOTEXT_TIMEOUT"));

        set_if(&mut self.rate_limit_every, duration("RATE_LIMIT_EVERY"));
        set_from(&mut self.rate_limit_burst, positive("RATE_LIMIT_BURST"));
        set_if(&mut self.cleanup_interval, duration("CLEANUP_INTERVAL"));

        set_if(&mut self.health_degrade_ratio, ratio("HEALTH_DEGRADE_RATIO"));
        set_from(&mut self.max_image_url_len, positive("MAX_IMAGE_URL_LEN"));
        set_if(&mut self.request_slot_wait, duration("REQUEST_SLOT_WAIT"));

        set_from(&mut self.default_min_words, positive("DEFAULT_MIN_WORDS"));
        set_if(&mut self.default_ocr_trigger_ratio, ratio("DEFAULT_OCR_TRIGGER_RATIO"));
        if let Some(sep) = lookup("DEFAULT_PAGE_SEPARATOR").filter(|s| !s.is_empty()) {
            // Separators are mostly whitespace, so this one is taken untrimmed.
            self.default_page_separator = sep;
        }
        if let Some(model) = var("DEFAULT_OCR_MODEL") {
            self.default_ocr_model = model;
        }
    }

    /// Check that the settings are usable for serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.internal_shared_secret.trim().chars().count() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        Ok(())
    }

    /// Default listen address for the server.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn hybrid_defaults(&self) -> HybridDefaults {
        HybridDefaults {
            min_words_threshold: self.default_min_words,
            ocr_trigger_ratio: self.default_ocr_trigger_ratio,
            page_separator: self.default_page_separator.clone(),
            ocr_model: self.default_ocr_model.clone(),
        }
    }

    pub fn poppler_config(&self) -> PopplerConfig {
        PopplerConfig {
            pdfinfo_timeout: self.pdfinfo_timeout,
            pdftotext_timeout: self.pdftotext_timeout,
        }
    }
}

fn set_if<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_from<T: TryFrom<u64>>(slot: &mut T, value: Option<u64>) {
    if let Some(value) = value.and_then(|v| T::try_from(v).ok()) {
        *slot = value;
    }
}

/// Parse a ratio in `(0, 1]`.
fn parse_ratio(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|r| *r > 0.0 && *r <= 1.0)
}

/// Parse a duration such as `500ms`, `25s`, `5m`, `1h` or bare seconds.
///
/// Returns `None` for malformed or non-positive values.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;

    let secs = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Expand `~` in a user-supplied path.
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

async fn discover_config() -> Option<PathBuf> {
    match prefer::load("fileproc").await {
        Ok(config) => config.source_path().map(|p| p.to_path_buf()),
        Err(_) => None,
    }
}

/// A duration in a config file: bare seconds or a string with a unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    fn resolve(&self) -> Option<Duration> {
        match self {
            DurationValue::Seconds(0) => None,
            DurationValue::Seconds(n) => Some(Duration::from_secs(*n)),
            DurationValue::Text(s) => parse_duration(s),
        }
    }
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    port: Option<u16>,
    internal_shared_secret: Option<String>,
    mistral_api_key: Option<String>,
    mistral_ocr_url: Option<String>,

    max_concurrent_requests: Option<usize>,
    max_ocr_concurrent: Option<usize>,
    max_json_body_bytes: Option<usize>,
    max_pdf_bytes: Option<u64>,

    extract_timeout: Option<DurationValue>,
    preview_timeout: Option<DurationValue>,
    image_extract_timeout: Option<DurationValue>,
    download_timeout: Option<DurationValue>,
    pdfinfo_timeout: Option<DurationValue>,
    pdftotext_timeout: Option<DurationValue>,

    rate_limit_every: Option<DurationValue>,
    rate_limit_burst: Option<u32>,
    cleanup_interval: Option<DurationValue>,

    health_degrade_ratio: Option<f64>,
    max_image_url_len: Option<usize>,
    request_slot_wait: Option<DurationValue>,

    default_min_words: Option<usize>,
    default_ocr_trigger_ratio: Option<f64>,
    default_page_separator: Option<String>,
    default_ocr_model: Option<String>,
}

impl FileConfig {
    /// Load from a specific path; the format follows the file extension.
    async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    fn apply_to(&self, settings: &mut Settings) {
        let text = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let duration = |v: &Option<DurationValue>| v.as_ref().and_then(DurationValue::resolve);
        let count = |v: Option<usize>| v.filter(|&n| n > 0);
        let ratio = |v: Option<f64>| v.filter(|r| *r > 0.0 && *r <= 1.0);

        set_if(&mut settings.port, self.port.filter(|&p| p > 0));
        set_if(&mut settings.internal_shared_secret, text(&self.internal_shared_secret));
        if let Some(key) = text(&self.mistral_api_key) {
            settings.mistral_api_key = Some(key);
        }
        set_if(&mut settings.mistral_ocr_url, text(&self.mistral_ocr_url));

        set_if(&mut settings.max_concurrent_requests, count(self.max_concurrent_requests));
        set_if(&mut settings.max_ocr_concurrent, count(self.max_ocr_concurrent));
        set_if(&mut settings.max_json_body_bytes, count(self.max_json_body_bytes));
        set_if(&mut settings.max_pdf_bytes, self.max_pdf_bytes.filter(|&n| n > 0));

        set_if(&mut settings.extract_timeout, duration(&self.extract_timeout));
        set_if(&mut settings.preview_timeout, duration(&self.preview_timeout));
        set_if(&mut settings.image_extract_timeout, duration(&self.image_extract_timeout));
        set_if(&mut settings.download_timeout, duration(&self.download_timeout));
        set_if(&mut settings.pdfinfo_timeout, duration(&self.pdfinfo_timeout));
        set_if(&mut settings.pdftotext_timeout, duration(&self.pdftotext_timeout));

        set_if(&mut settings.rate_limit_every, duration(&self.rate_limit_every));
        set_if(&mut settings.rate_limit_burst, self.rate_limit_burst.filter(|&n| n > 0));
        set_if(&mut settings.cleanup_interval, duration(&self.cleanup_interval));

        set_if(&mut settings.health_degrade_ratio, ratio(self.health_degrade_ratio));
        set_if(&mut settings.max_image_url_len, count(self.max_image_url_len));
        set_if(&mut settings.request_slot_wait, duration(&self.request_slot_wait));

        set_if(&mut settings.default_min_words, count(self.default_min_words));
        set_if(&mut settings.default_ocr_trigger_ratio, ratio(self.default_ocr_trigger_ratio));
        if let Some(sep) = self.default_page_separator.clone().filter(|s| !s.is_empty()) {
            settings.default_page_separator = sep;
        }
        set_if(&mut settings.default_ocr_model, text(&self.default_ocr_model));
    }
}
