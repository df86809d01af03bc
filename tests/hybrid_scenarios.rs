//! End-to-end behavior of the hybrid extractor through the public API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fileproc::admission::{AdmissionController, CapacityError};
use fileproc::extract::{DocumentRef, PageSource};
use fileproc::hybrid::{ExtractionMethod, ExtractionResult, HybridOptions, HybridProcessor};
use fileproc::ocr::{OcrError, OcrGateway, OcrPage, OcrRequest};
use fileproc::ProcessingError;

const PROSE: &str = "Residents gathered at the library on Thursday evening to discuss the \
    proposed changes to the downtown parking plan, which would replace several surface lots \
    with a mixed-use building containing apartments, retail space and a public garage. \
    Council members answered questions about traffic, construction noise and the expected \
    timeline before agreeing to hold a second hearing next month.";

const SPARSE: &str = "page header only";

struct ScriptedSource {
    pages: Vec<String>,
}

impl ScriptedSource {
    /// A document whose first `bad` pages have almost no text.
    fn with_bad_prefix(total: usize, bad: usize) -> Self {
        let pages = (0..total)
            .map(|i| if i < bad { SPARSE } else { PROSE }.to_string())
            .collect();
        Self { pages }
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn page_count(&self, _doc: &DocumentRef) -> Result<u32, ProcessingError> {
        Ok(self.pages.len() as u32)
    }

    async fn page_text(&self, _doc: &DocumentRef, page: u32) -> Result<String, ProcessingError> {
        Ok(self.pages[(page - 1) as usize].clone())
    }
}

#[derive(Default)]
struct RecordingGateway {
    requests: Mutex<Vec<OcrRequest>>,
}

#[async_trait]
impl OcrGateway for RecordingGateway {
    async fn run_ocr(&self, request: &OcrRequest) -> Result<Vec<OcrPage>, OcrError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(request
            .pages
            .iter()
            .map(|&index| OcrPage {
                index,
                markdown: format!("Recognized text of page {}", index + 1),
            })
            .collect())
    }

    async fn run_image_ocr(&self, _url: &str, _model: &str) -> Result<Vec<OcrPage>, OcrError> {
        Ok(Vec::new())
    }
}

fn doc() -> DocumentRef {
    DocumentRef::new("https://bucket.example.com/report.pdf?sig=abc", "/tmp/report.pdf")
}

fn options(min_words: usize, trigger: f64) -> HybridOptions {
    HybridOptions {
        min_words_threshold: min_words,
        ocr_trigger_ratio: trigger,
        ..HybridOptions::default()
    }
}

fn assert_invariants(result: &ExtractionResult) {
    assert!(result.success);
    assert_eq!(result.text_layer_pages + result.ocr_pages, result.pages.len());
    assert!(result.cost_savings_percent <= 100);
    assert!(result
        .pages
        .windows(2)
        .all(|w| w[0].page_number < w[1].page_number));
    assert!(result
        .pages
        .iter()
        .all(|p| p.page_number >= 1 && p.page_number <= result.total_pages));
}

#[tokio::test]
async fn few_bad_pages_are_ocrd_individually() {
    let gateway = Arc::new(RecordingGateway::default());
    let processor = HybridProcessor::new(ScriptedSource::with_bad_prefix(10, 2), gateway.clone());

    let result = processor.process_hybrid(&doc(), &options(20, 0.25)).await;

    assert_invariants(&result);
    assert_eq!(result.total_pages, 10);
    assert_eq!(result.text_layer_pages, 8);
    assert_eq!(result.ocr_pages, 2);
    assert_eq!(result.cost_savings_percent, 80);
    assert_eq!(result.pages[0].method, ExtractionMethod::Ocr);
    assert_eq!(result.pages[1].method, ExtractionMethod::Ocr);
    assert_eq!(result.pages[2].method, ExtractionMethod::TextLayer);

    let requests = gateway.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].pages, vec![0, 1]);
    assert_eq!(requests[0].document_url, doc().source_url);
}

#[tokio::test]
async fn many_bad_pages_ocr_the_whole_selection() {
    let gateway = Arc::new(RecordingGateway::default());
    let processor = HybridProcessor::new(ScriptedSource::with_bad_prefix(10, 6), gateway.clone());

    let result = processor.process_hybrid(&doc(), &options(20, 0.25)).await;

    assert_invariants(&result);
    assert_eq!(result.ocr_pages, 10);
    assert_eq!(result.text_layer_pages, 0);
    assert_eq!(result.cost_savings_percent, 0);
    assert_eq!(
        gateway.requests.lock().unwrap()[0].pages,
        (0..10).collect::<Vec<u32>>()
    );
}

#[tokio::test]
async fn clean_document_makes_no_ocr_call() {
    let gateway = Arc::new(RecordingGateway::default());
    let processor = HybridProcessor::new(ScriptedSource::with_bad_prefix(4, 0), gateway.clone());

    let result = processor.process_hybrid(&doc(), &options(20, 0.25)).await;

    assert_invariants(&result);
    assert_eq!(result.ocr_pages, 0);
    assert_eq!(result.cost_savings_percent, 100);
    assert!(result.text.starts_with("[Page 1]\n\n"));
    assert!(gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn requested_pages_are_normalized() {
    let gateway = Arc::new(RecordingGateway::default());
    let processor = HybridProcessor::new(ScriptedSource::with_bad_prefix(10, 0), gateway);

    let opts = HybridOptions {
        pages: vec![5, 2, 2, 999],
        ..options(20, 0.25)
    };
    let result = processor.process_hybrid(&doc(), &opts).await;

    assert_invariants(&result);
    let numbers: Vec<u32> = result.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![2, 5]);
    assert_eq!(result.total_pages, 10);
}

#[tokio::test]
async fn identical_inputs_give_identical_results() {
    let opts = options(20, 0.25);
    let first = HybridProcessor::new(
        ScriptedSource::with_bad_prefix(10, 3),
        RecordingGateway::default(),
    )
    .process_hybrid(&doc(), &opts)
    .await;
    let second = HybridProcessor::new(
        ScriptedSource::with_bad_prefix(10, 3),
        RecordingGateway::default(),
    )
    .process_hybrid(&doc(), &opts)
    .await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn preview_agrees_with_extraction_decision() {
    let processor = HybridProcessor::new(
        ScriptedSource::with_bad_prefix(10, 6),
        RecordingGateway::default(),
    );
    let preview = processor.process_preview(&doc(), &options(20, 0.25)).await;
    assert!(preview.success);
    assert!(preview.needs_ocr);
    assert_eq!(preview.text_layer_pages, 4);
    assert!(processor.gateway().requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn contended_pool_admits_everyone_eventually() {
    let admission = Arc::new(AdmissionController::new(4, 2));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let admission = admission.clone();
            tokio::spawn(async move {
                let lease = admission
                    .acquire_ocr_slot(Duration::from_secs(5))
                    .await
                    .unwrap();
                assert!(admission.in_flight_ocr() <= 2);
                tokio::time::sleep(Duration::from_millis(5)).await;
                admission.release(lease);
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(admission.in_flight_ocr(), 0);
    assert_eq!(admission.in_flight_requests(), 0);
}

#[tokio::test]
async fn exhausted_pool_reports_which_pool() {
    let admission = AdmissionController::new(1, 1);
    let _request = admission.acquire_request_slot(Duration::ZERO).await.unwrap();

    let err = admission
        .acquire_request_slot(Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err, CapacityError::Requests);

    let ocr = admission.acquire_ocr_slot(Duration::ZERO).await.unwrap();
    assert_eq!(
        admission.acquire_ocr_slot(Duration::ZERO).await.unwrap_err(),
        CapacityError::Ocr
    );
    drop(ocr);
    assert!(admission.acquire_ocr_slot(Duration::ZERO).await.is_ok());
}
