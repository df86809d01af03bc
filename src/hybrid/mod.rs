//! Hybrid text-layer/OCR extraction.
//!
//! Every selected page is read from the text layer and scored. Pages that score
//! poorly are sent to OCR in a single batched call; if too large a share of the
//! document needs OCR, the whole selection is OCR'd instead so adjacent pages
//! come from one consistent source.

mod combine;
mod options;

pub use combine::{combine, light_clean};
pub use options::{select_pages, ExtractOptions, HybridDefaults, HybridOptions};

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::sanitize_message;
use crate::extract::{DocumentRef, PageSource};
use crate::ocr::{OcrGateway, OcrRequest};
use crate::quality::{self, PageEvaluation};

/// Where a page's final text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtractionMethod {
    #[serde(rename = "text-layer")]
    TextLayer,
    #[serde(rename = "ocr")]
    Ocr,
}

/// Final text for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageExtractionResult {
    pub page_number: u32,
    pub text: String,
    pub method: ExtractionMethod,
    pub word_count: usize,
}

/// Result of a full extraction.
///
/// `text_layer_pages + ocr_pages == pages.len()`, and `pages` is strictly
/// ascending by page number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub text: String,
    pub pages: Vec<PageExtractionResult>,
    pub total_pages: u32,
    pub text_layer_pages: usize,
    pub ocr_pages: usize,
    pub cost_savings_percent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    fn failure(msg: impl AsRef<str>) -> Self {
        Self {
            success: false,
            text: String::new(),
            pages: Vec::new(),
            total_pages: 0,
            text_layer_pages: 0,
            ocr_pages: 0,
            cost_savings_percent: 0,
            error: Some(sanitize_message(msg.as_ref())),
        }
    }
}

/// Result of an OCR-free preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub success: bool,
    pub needs_ocr: bool,
    pub total_pages: u32,
    pub text_layer_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which pages to send to OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrPlan {
    /// Every page's text layer is good enough.
    Skip,
    /// Only the flagged pages (1-indexed).
    Flagged(Vec<u32>),
    /// The whole selection (1-indexed).
    AllSelected(Vec<u32>),
}

impl OcrPlan {
    /// Decide OCR scope from the flagged pages of a selection.
    pub fn decide(selected: &[u32], flagged: &[u32], trigger_ratio: f64) -> Self {
        if flagged.is_empty() || selected.is_empty() {
            return OcrPlan::Skip;
        }
        let ratio = flagged.len() as f64 / selected.len() as f64;
        if ratio > trigger_ratio {
            OcrPlan::AllSelected(selected.to_vec())
        } else {
            OcrPlan::Flagged(flagged.to_vec())
        }
    }

    /// 1-indexed pages to OCR.
    pub fn pages(&self) -> &[u32] {
        match self {
            OcrPlan::Skip => &[],
            OcrPlan::Flagged(pages) | OcrPlan::AllSelected(pages) => pages,
        }
    }

    /// Zero-indexed, ascending pages for the provider.
    pub fn zero_indexed(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.pages().iter().map(|p| p - 1).collect();
        pages.sort_unstable();
        pages
    }
}

/// Scored text layer of the selected pages.
#[derive(Debug)]
struct PageScan {
    total_pages: u32,
    selected: Vec<u32>,
    evaluations: Vec<PageEvaluation>,
    flagged: Vec<u32>,
}

impl PageScan {
    fn ocr_ratio(&self) -> f64 {
        if self.selected.is_empty() {
            0.0
        } else {
            self.flagged.len() as f64 / self.selected.len() as f64
        }
    }
}

/// Rounded percentage of pages served from the text layer.
pub fn cost_savings_percent(ocr_pages: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((1.0 - ocr_pages as f64 / total as f64) * 100.0).round() as u32
}

/// Text-layer-first extractor with OCR fallback.
pub struct HybridProcessor<S, G> {
    source: S,
    gateway: G,
}

impl<S: PageSource, G: OcrGateway> HybridProcessor<S, G> {
    pub fn new(source: S, gateway: G) -> Self {
        Self { source, gateway }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Extract text from every selected page, OCR'ing pages whose text layer
    /// is unreliable.
    pub async fn process_hybrid(&self, doc: &DocumentRef, options: &HybridOptions) -> ExtractionResult {
        let scan = match self.scan_pages(doc, options).await {
            Ok(scan) => scan,
            Err(msg) => return ExtractionResult::failure(msg),
        };

        let plan = OcrPlan::decide(&scan.selected, &scan.flagged, options.ocr_trigger_ratio);
        debug!(
            "{} of {} pages flagged (ratio {:.2}), plan: {:?}",
            scan.flagged.len(),
            scan.selected.len(),
            scan.ocr_ratio(),
            plan
        );

        let mut ocr_text: HashMap<u32, String> = HashMap::new();
        if plan != OcrPlan::Skip {
            let request = OcrRequest {
                document_url: doc.source_url.clone(),
                model: options.ocr_model.clone(),
                pages: plan.zero_indexed(),
                extract_header: options.extract_header,
                extract_footer: options.extract_footer,
            };

            match self.gateway.run_ocr(&request).await {
                Ok(pages) => {
                    for page in pages {
                        match page.index.checked_add(1) {
                            Some(number) if scan.selected.binary_search(&number).is_ok() => {
                                ocr_text.insert(number, light_clean(&page.markdown));
                            }
                            _ => debug!("Ignoring OCR page with unrequested index {}", page.index),
                        }
                    }
                }
                Err(e) => {
                    warn!("OCR failed: {}", e);
                    return ExtractionResult::failure(format!("ocr failed: {}", e));
                }
            }
        }

        let pages: Vec<PageExtractionResult> = scan
            .evaluations
            .into_iter()
            .map(|eval| match ocr_text.remove(&eval.page_number) {
                Some(text) if !text.is_empty() => PageExtractionResult {
                    page_number: eval.page_number,
                    word_count: quality::count_words(&text),
                    text,
                    method: ExtractionMethod::Ocr,
                },
                _ => PageExtractionResult {
                    page_number: eval.page_number,
                    text: eval.raw_text,
                    method: ExtractionMethod::TextLayer,
                    word_count: eval.word_count,
                },
            })
            .collect();

        let ocr_pages = pages
            .iter()
            .filter(|p| p.method == ExtractionMethod::Ocr)
            .count();
        let text_layer_pages = pages.len() - ocr_pages;
        let cost_savings = cost_savings_percent(ocr_pages, pages.len());

        info!(
            "Extracted {} pages ({} text layer, {} OCR, {}% savings)",
            pages.len(),
            text_layer_pages,
            ocr_pages,
            cost_savings
        );

        ExtractionResult {
            success: true,
            text: combine(&pages, &options.page_separator, options.include_page_numbers),
            pages,
            total_pages: scan.total_pages,
            text_layer_pages,
            ocr_pages,
            cost_savings_percent: cost_savings,
            error: None,
        }
    }

    /// Decide whether OCR would be needed without calling the OCR provider.
    pub async fn process_preview(&self, doc: &DocumentRef, options: &HybridOptions) -> PreviewResult {
        let scan = match self.scan_pages(doc, options).await {
            Ok(scan) => scan,
            Err(msg) => {
                return PreviewResult {
                    success: false,
                    needs_ocr: true,
                    total_pages: 0,
                    text_layer_pages: 0,
                    error: Some(sanitize_message(&msg)),
                }
            }
        };

        let needs_ocr = !scan.flagged.is_empty() && scan.ocr_ratio() > options.ocr_trigger_ratio;
        PreviewResult {
            success: true,
            needs_ocr,
            total_pages: scan.total_pages,
            text_layer_pages: scan.selected.len() - scan.flagged.len(),
            error: None,
        }
    }

    /// Count pages, select, then read and score each selected page in order.
    async fn scan_pages(&self, doc: &DocumentRef, options: &HybridOptions) -> Result<PageScan, String> {
        let total_pages = match self.source.page_count(doc).await {
            Ok(n) if n > 0 => n,
            Ok(n) => return Err(format!("page count failed: document reports {} pages", n)),
            Err(e) => return Err(format!("page count failed: {}", e)),
        };

        let selected = select_pages(&options.pages, total_pages);
        let mut evaluations = Vec::with_capacity(selected.len());
        let mut flagged = Vec::new();

        for &page in &selected {
            let raw = match self.source.page_text(doc, page).await {
                Ok(text) => light_clean(&text),
                Err(e) => {
                    debug!("Text layer unavailable for page {}: {}", page, e);
                    String::new()
                }
            };

            let eval = quality::score_page(page, &raw, options.min_words_threshold);
            debug!(
                "Page {}: {} words, score {:.2}, reasons {:?}",
                page, eval.word_count, eval.quality_score, eval.reasons
            );
            if eval.needs_ocr {
                flagged.push(page);
            }
            evaluations.push(eval);
        }

        Ok(PageScan {
            total_pages,
            selected,
            evaluations,
            flagged,
        })
    }
}
