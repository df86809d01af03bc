//! Extraction options and their resolution against configured defaults.

use serde::Deserialize;

use crate::error::ProcessingError;

/// Options as supplied by a caller. Absent fields take configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtractOptions {
    pub min_words_threshold: Option<i64>,
    pub page_separator: Option<String>,
    pub include_page_numbers: Option<bool>,
    pub ocr_trigger_ratio: Option<f64>,
    #[serde(default)]
    pub pages: Vec<i64>,
    pub extract_header: Option<bool>,
    pub extract_footer: Option<bool>,
    pub ocr_model: Option<String>,
}

/// Service-wide defaults applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridDefaults {
    pub min_words_threshold: usize,
    pub ocr_trigger_ratio: f64,
    pub page_separator: String,
    pub ocr_model: String,
}

impl Default for HybridDefaults {
    fn default() -> Self {
        Self {
            min_words_threshold: 20,
            ocr_trigger_ratio: 0.25,
            page_separator: "\n\n---\n\n".to_string(),
            ocr_model: "mistral-ocr-latest".to_string(),
        }
    }
}

/// Fully resolved options for one extraction. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridOptions {
    pub min_words_threshold: usize,
    /// OCR the whole selection once the flagged fraction exceeds this.
    pub ocr_trigger_ratio: f64,
    pub page_separator: String,
    pub include_page_numbers: bool,
    /// Requested 1-indexed pages, unnormalized. Empty selects every page.
    pub pages: Vec<i64>,
    pub ocr_model: String,
    pub extract_header: bool,
    pub extract_footer: bool,
}

impl HybridOptions {
    /// Apply defaults to caller options.
    ///
    /// Non-positive word thresholds and empty separators or models fall back to
    /// the defaults. A trigger ratio outside `(0, 1]` is rejected.
    pub fn resolve(
        options: &ExtractOptions,
        defaults: &HybridDefaults,
    ) -> Result<Self, ProcessingError> {
        let ocr_trigger_ratio = match options.ocr_trigger_ratio {
            None => defaults.ocr_trigger_ratio,
            Some(r) if r > 0.0 && r <= 1.0 => r,
            Some(r) => {
                return Err(ProcessingError::validation(format!(
                    "ocrTriggerRatio must be in (0, 1], got {}",
                    r
                )))
            }
        };

        let min_words_threshold = options
            .min_words_threshold
            .filter(|&n| n > 0)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(defaults.min_words_threshold);

        let page_separator = options
            .page_separator
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| defaults.page_separator.clone());

        let ocr_model = options
            .ocr_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&defaults.ocr_model)
            .to_string();

        Ok(Self {
            min_words_threshold,
            ocr_trigger_ratio,
            page_separator,
            include_page_numbers: options.include_page_numbers.unwrap_or(true),
            pages: options.pages.clone(),
            ocr_model,
            extract_header: options.extract_header.unwrap_or(false),
            extract_footer: options.extract_footer.unwrap_or(false),
        })
    }

    /// Whether this request might issue an OCR call.
    ///
    /// Decided from the options alone, before any page is scored, so an OCR
    /// slot is reserved even for documents that end up needing none.
    pub fn ocr_may_be_needed(&self) -> bool {
        self.ocr_trigger_ratio > 0.0
    }
}

impl Default for HybridOptions {
    fn default() -> Self {
        let defaults = HybridDefaults::default();
        Self {
            min_words_threshold: defaults.min_words_threshold,
            ocr_trigger_ratio: defaults.ocr_trigger_ratio,
            page_separator: defaults.page_separator,
            include_page_numbers: true,
            pages: Vec::new(),
            ocr_model: defaults.ocr_model,
            extract_header: false,
            extract_footer: false,
        }
    }
}

/// Normalize a requested page subset against the document's page count.
///
/// Dedupes, sorts ascending and drops out-of-range pages. An empty result
/// (including an empty request) selects every page.
pub fn select_pages(requested: &[i64], total_pages: u32) -> Vec<u32> {
    let mut selected: Vec<u32> = requested
        .iter()
        .filter(|&&p| p >= 1 && p <= i64::from(total_pages))
        .filter_map(|&p| u32::try_from(p).ok())
        .collect();
    selected.sort_unstable();
    selected.dedup();

    if selected.is_empty() {
        (1..=total_pages).collect()
    } else {
        selected
    }
}
