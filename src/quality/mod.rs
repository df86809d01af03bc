//! Text-layer quality scoring.
//!
//! Decides, page by page, whether embedded PDF text is reliable enough to use
//! directly or whether the page should be sent to OCR. The score is a sum of
//! many weak, independent signals rather than a trained model:
//! - penalties for sparse, scrambled or garbage-laden text
//! - small bonuses for content that legitimately looks unusual
//!   (tables of numbers, lists, equations)

mod features;

pub use features::{count_words, normalize, TextFeatures};

use serde::Serialize;

/// Scores below this need OCR.
pub const NEEDS_OCR_BELOW: f64 = 0.50;

/// Scores below this (but not needing OCR) are borderline.
pub const MAYBE_OCR_BELOW: f64 = 0.70;

const LOW_WORD_COUNT_PENALTY: f64 = 0.45;
const LOW_ALPHA_PENALTY: f64 = 0.35;
const GARBAGE_PENALTY: f64 = 0.40;
const FRAGMENTED_PENALTY: f64 = 0.25;
const LOW_UNIQUE_PENALTY: f64 = 0.15;
const REPEATED_CHARS_PENALTY: f64 = 0.10;
const PUNCTUATION_PENALTY: f64 = 0.20;
const SPACING_PENALTY: f64 = 0.30;

const NUMERIC_HEAVY_BONUS: f64 = 0.10;
const PROSE_BONUS: f64 = 0.05;
const STRUCTURED_BONUS: f64 = 0.15;
const MIXED_CONTENT_BONUS: f64 = 0.05;

/// Signal that contributed to a page's quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityReason {
    EmptyText,
    // Penalties
    LowWordCount,
    LowAlphaRatio,
    GarbageChars,
    FragmentedLines,
    LowUniqueWords,
    RepeatedChars,
    ExcessivePunctuation,
    AbnormalSpacing,
    // Bonuses
    NumericHeavy,
    ProseLike,
    StructuredContent,
    MixedContent,
}

impl QualityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyText => "empty_text",
            Self::LowWordCount => "low_word_count",
            Self::LowAlphaRatio => "low_alpha_ratio",
            Self::GarbageChars => "garbage_chars",
            Self::FragmentedLines => "fragmented_lines",
            Self::LowUniqueWords => "low_unique_words",
            Self::RepeatedChars => "repeated_chars",
            Self::ExcessivePunctuation => "excessive_punctuation",
            Self::AbnormalSpacing => "abnormal_spacing",
            Self::NumericHeavy => "numeric_heavy",
            Self::ProseLike => "prose_like",
            Self::StructuredContent => "structured_content",
            Self::MixedContent => "mixed_content",
        }
    }
}

impl std::fmt::Display for QualityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored page text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvaluation {
    /// 1-indexed page number (0 when scored outside a document).
    pub page_number: u32,
    pub raw_text: String,
    pub word_count: usize,
    pub quality_score: f64,
    pub reasons: Vec<QualityReason>,
    pub needs_ocr: bool,
    pub maybe_ocr: bool,
}

/// Score text without a page number attached.
pub fn score(text: &str, min_words: usize) -> PageEvaluation {
    score_page(0, text, min_words)
}

/// Score one page's text.
pub fn score_page(page_number: u32, text: &str, min_words: usize) -> PageEvaluation {
    let clean = normalize(text);
    let features = TextFeatures::compute(&clean);

    if features.word_count == 0 {
        return PageEvaluation {
            page_number,
            raw_text: text.to_string(),
            word_count: 0,
            quality_score: 0.0,
            reasons: vec![QualityReason::EmptyText],
            needs_ocr: true,
            maybe_ocr: false,
        };
    }

    let (raw_score, reasons) = apply_adjustments(&features, min_words);
    let quality_score = raw_score.clamp(0.0, 1.0);

    PageEvaluation {
        page_number,
        raw_text: text.to_string(),
        word_count: features.word_count,
        quality_score,
        reasons,
        needs_ocr: quality_score < NEEDS_OCR_BELOW,
        maybe_ocr: (NEEDS_OCR_BELOW..MAYBE_OCR_BELOW).contains(&quality_score),
    }
}

fn apply_adjustments(f: &TextFeatures, min_words: usize) -> (f64, Vec<QualityReason>) {
    let mut score = 1.0;
    let mut reasons = Vec::new();
    let mut adjust = |hit: bool, delta: f64, reason: QualityReason| {
        if hit {
            score += delta;
            reasons.push(reason);
        }
    };

    let enough_words = f.word_count >= min_words;

    adjust(
        !enough_words,
        -LOW_WORD_COUNT_PENALTY,
        QualityReason::LowWordCount,
    );
    adjust(
        f.alpha_ratio < 0.35,
        -LOW_ALPHA_PENALTY,
        QualityReason::LowAlphaRatio,
    );
    adjust(
        f.garbage_ratio > 0.01,
        -GARBAGE_PENALTY,
        QualityReason::GarbageChars,
    );
    adjust(
        f.line_count > 0 && f.short_line_ratio > 0.55 && f.avg_line_len < 25.0,
        -FRAGMENTED_PENALTY,
        QualityReason::FragmentedLines,
    );
    adjust(
        f.word_count > 30 && f.unique_word_ratio < 0.25,
        -LOW_UNIQUE_PENALTY,
        QualityReason::LowUniqueWords,
    );
    adjust(
        f.repeated_runs >= 3,
        -REPEATED_CHARS_PENALTY,
        QualityReason::RepeatedChars,
    );
    adjust(
        f.punct_ratio > 0.25,
        -PUNCTUATION_PENALTY,
        QualityReason::ExcessivePunctuation,
    );
    adjust(
        f.word_count >= 10 && f.single_char_word_ratio > 0.45,
        -SPACING_PENALTY,
        QualityReason::AbnormalSpacing,
    );

    adjust(
        f.digit_ratio > 0.25 && f.alpha_ratio < 0.20 && enough_words,
        NUMERIC_HEAVY_BONUS,
        QualityReason::NumericHeavy,
    );
    adjust(
        enough_words && f.alpha_ratio >= 0.60 && f.avg_line_len >= 40.0 && f.unique_word_ratio >= 0.35,
        PROSE_BONUS,
        QualityReason::ProseLike,
    );
    adjust(
        f.line_count >= 3 && f.list_line_ratio >= 0.30 && enough_words,
        STRUCTURED_BONUS,
        QualityReason::StructuredContent,
    );
    adjust(
        f.has_math_cluster && f.alpha_ratio >= 0.35 && enough_words,
        MIXED_CONTENT_BONUS,
        QualityReason::MixedContent,
    );

    (score, reasons)
}
