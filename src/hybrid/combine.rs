//! Joining per-page results into one document.

use super::PageExtractionResult;

/// Unify line endings and trim.
pub fn light_clean(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Join page texts with `separator`, optionally prefixing `[Page N]` markers.
///
/// Pages whose text is empty after trimming contribute nothing, not even a
/// separator.
pub fn combine(pages: &[PageExtractionResult], separator: &str, include_page_numbers: bool) -> String {
    let parts: Vec<String> = pages
        .iter()
        .filter_map(|page| {
            let text = page.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(if include_page_numbers {
                format!("[Page {}]\n\n{}", page.page_number, text)
            } else {
                text.to_string()
            })
        })
        .collect();

    parts.join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::ExtractionMethod;

    fn page(n: u32, text: &str) -> PageExtractionResult {
        PageExtractionResult {
            page_number: n,
            text: text.to_string(),
            method: ExtractionMethod::TextLayer,
            word_count: crate::quality::count_words(text),
        }
    }

    #[test]
    fn test_combine_with_markers() {
        let pages = vec![page(1, "first"), page(2, "second")];
        assert_eq!(
            combine(&pages, "\n\n---\n\n", true),
            "[Page 1]\n\nfirst\n\n---\n\n[Page 2]\n\nsecond"
        );
    }

    #[test]
    fn test_combine_skips_empty_pages() {
        let pages = vec![page(1, "first"), page(2, "  \n "), page(3, "third")];
        assert_eq!(combine(&pages, " | ", false), "first | third");
    }

    #[test]
    fn test_combine_nothing() {
        assert_eq!(combine(&[], "\n", true), "");
        assert_eq!(combine(&[page(1, "")], "\n", true), "");
    }

    #[test]
    fn test_light_clean() {
        assert_eq!(light_clean("\r\n a\r\nb\rc \n"), "a\nb\nc");
    }
}
