//! Text features used by the quality scorer.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static INLINE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static EXCESS_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{4,}").unwrap());

/// Bullets (`-`, `*`, `•`, ...), numbered (`1.`, `(2)`) and lettered (`a)`) list items.
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+•‣◦▪]|\(?\d{1,3}[.)]|\(?[A-Za-z][.)])\s+\S").unwrap()
});

/// Lines shorter than this count as "short" for fragmentation detection.
const SHORT_LINE_CHARS: usize = 20;

/// Minimum run length of one repeated character to count as a run.
const REPEATED_RUN_LEN: usize = 5;

/// Minimum math symbols on a single line to count as an equation-like cluster.
const MATH_CLUSTER_SYMBOLS: usize = 2;

const MATH_SYMBOLS: &[char] = &[
    '=', '+', '−', '×', '÷', '±', '≤', '≥', '≠', '≈', '∑', '∏', '∫', '√', '∞', '∂', '∆', '∇',
    '^', 'π', 'θ', 'λ', 'σ', 'μ',
];

/// Normalize extracted text before feature extraction.
///
/// Unifies line endings, collapses runs of spaces/tabs and caps consecutive
/// blank lines.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = INLINE_WHITESPACE.replace_all(&text, " ");
    let text = EXCESS_BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Feature vector computed over normalized page text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFeatures {
    pub word_count: usize,
    pub alpha_ratio: f64,
    pub digit_ratio: f64,
    pub punct_ratio: f64,
    pub whitespace_ratio: f64,
    pub garbage_ratio: f64,
    pub line_count: usize,
    pub avg_line_len: f64,
    pub short_line_ratio: f64,
    pub unique_word_ratio: f64,
    pub list_line_ratio: f64,
    pub has_math_cluster: bool,
    pub repeated_runs: usize,
    pub single_char_word_ratio: f64,
}

impl TextFeatures {
    /// Compute features over already-normalized text.
    pub fn compute(clean: &str) -> Self {
        let words: Vec<&str> = clean.split_whitespace().collect();
        let word_count = words.len();

        let mut total = 0usize;
        let mut alpha = 0usize;
        let mut digits = 0usize;
        let mut punct = 0usize;
        let mut whitespace = 0usize;
        let mut garbage = 0usize;
        for c in clean.chars() {
            total += 1;
            // Control characters count as garbage even when they are whitespace.
            if is_garbage(c) {
                garbage += 1;
            } else if c.is_alphabetic() {
                alpha += 1;
            } else if c.is_ascii_digit() {
                digits += 1;
            } else if c.is_whitespace() {
                whitespace += 1;
            } else if is_punctuation(c) {
                punct += 1;
            }
        }

        let lines: Vec<&str> = clean
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let (avg_line_len, short_line_ratio) = line_stats(&lines);

        let list_lines = lines.iter().filter(|l| LIST_ITEM.is_match(l)).count();
        let has_math_cluster = lines.iter().any(|l| {
            l.chars().filter(|c| MATH_SYMBOLS.contains(c)).count() >= MATH_CLUSTER_SYMBOLS
        });

        let single_char_words = words.iter().filter(|w| w.chars().count() == 1).count();

        Self {
            word_count,
            alpha_ratio: ratio(alpha, total),
            digit_ratio: ratio(digits, total),
            punct_ratio: ratio(punct, total),
            whitespace_ratio: ratio(whitespace, total),
            garbage_ratio: ratio(garbage, total),
            line_count: lines.len(),
            avg_line_len,
            short_line_ratio,
            unique_word_ratio: unique_word_ratio(&words),
            list_line_ratio: ratio(list_lines, lines.len()),
            has_math_cluster,
            repeated_runs: count_repeated_runs(clean),
            single_char_word_ratio: ratio(single_char_words, word_count),
        }
    }
}

fn is_garbage(c: char) -> bool {
    c == '\u{FFFD}' || (c.is_control() && c != '\n')
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '“' | '”' | '‘' | '’' | '–' | '—' | '…' | '•' | '·' | '«' | '»' | '¿' | '¡'
        )
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

fn line_stats(lines: &[&str]) -> (f64, f64) {
    if lines.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0usize;
    let mut short = 0usize;
    for line in lines {
        let len = line.chars().count();
        sum += len;
        if len < SHORT_LINE_CHARS {
            short += 1;
        }
    }
    (ratio(sum, lines.len()), ratio(short, lines.len()))
}

fn unique_word_ratio(words: &[&str]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let distinct: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    ratio(distinct.len(), words.len())
}

/// Count runs of `REPEATED_RUN_LEN`+ identical consecutive non-whitespace chars.
fn count_repeated_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut prev: Option<char> = None;
    let mut len = 0usize;

    for c in text.chars() {
        if Some(c) == prev {
            len += 1;
        } else {
            if len >= REPEATED_RUN_LEN && prev.is_some_and(|p| !p.is_whitespace()) {
                runs += 1;
            }
            prev = Some(c);
            len = 1;
        }
    }
    if len >= REPEATED_RUN_LEN && prev.is_some_and(|p| !p.is_whitespace()) {
        runs += 1;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings_and_spacing() {
        let text = "alpha\r\nbeta\rgamma   delta\t\tepsilon\n\n\n\n\nzeta  ";
        assert_eq!(normalize(text), "alpha\nbeta\ngamma delta epsilon\n\nzeta");
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   \n\t "), 0);
        assert_eq!(count_words("one two\nthree"), 3);
    }

    #[test]
    fn test_character_ratios() {
        let f = TextFeatures::compute("ab 12!");
        assert_eq!(f.word_count, 2);
        assert!((f.alpha_ratio - 2.0 / 6.0).abs() < 1e-9);
        assert!((f.digit_ratio - 2.0 / 6.0).abs() < 1e-9);
        assert!((f.punct_ratio - 1.0 / 6.0).abs() < 1e-9);
        assert!((f.whitespace_ratio - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(f.garbage_ratio, 0.0);
    }

    #[test]
    fn test_garbage_detection() {
        let f = TextFeatures::compute("ab\u{FFFD}\u{0007}");
        assert!((f.garbage_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_whitespace_controls_are_garbage() {
        let f = TextFeatures::compute("ab\x0Ccd\x0Bef\u{85}gh");
        assert!((f.garbage_ratio - 3.0 / 11.0).abs() < 1e-9);
        assert_eq!(f.whitespace_ratio, 0.0);
        assert_eq!(f.word_count, 4);
    }

    #[test]
    fn test_only_decimal_digits_count() {
        let f = TextFeatures::compute("12 ½ ² 3");
        assert!((f.digit_ratio - 3.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_stats() {
        let f = TextFeatures::compute("short\nthis line is definitely longer than twenty");
        assert_eq!(f.line_count, 2);
        assert!((f.short_line_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_list_lines_detected() {
        let f = TextFeatures::compute("- first item\n2. second item\n(c) third item\nplain line");
        assert!((f.list_line_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_math_cluster() {
        assert!(TextFeatures::compute("E = mc^2").has_math_cluster);
        assert!(!TextFeatures::compute("one plus one").has_math_cluster);
    }

    #[test]
    fn test_repeated_runs() {
        assert_eq!(count_repeated_runs("aaaaa bbbb ccccccc"), 2);
        assert_eq!(count_repeated_runs("end......"), 1);
        assert_eq!(count_repeated_runs("a     b"), 0);
    }

    #[test]
    fn test_single_char_words() {
        let f = TextFeatures::compute("T h i s is");
        assert!((f.single_char_word_ratio - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unique_word_ratio_is_case_insensitive() {
        let f = TextFeatures::compute("Word word WORD other");
        assert!((f.unique_word_ratio - 0.5).abs() < 1e-9);
    }
}
