//! Page source backed by poppler-utils (`pdfinfo` and `pdftotext`).

use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use super::{DocumentRef, PageSource};
use crate::error::ProcessingError;

static PAGES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)\s*$").unwrap());

/// Largest page count accepted from `pdfinfo`.
const MAX_PAGES: u32 = 50_000;

/// Per-page text output cap.
const MAX_PAGE_TEXT_BYTES: usize = 10 << 20;

/// Subprocess limits.
#[derive(Debug, Clone, Copy)]
pub struct PopplerConfig {
    pub pdfinfo_timeout: Duration,
    pub pdftotext_timeout: Duration,
}

impl Default for PopplerConfig {
    fn default() -> Self {
        Self {
            pdfinfo_timeout: Duration::from_secs(5),
            pdftotext_timeout: Duration::from_secs(10),
        }
    }
}

/// Reads PDFs from local disk with poppler command-line tools.
#[derive(Debug, Clone, Default)]
pub struct PopplerSource {
    config: PopplerConfig,
}

impl PopplerSource {
    pub fn new(config: PopplerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageSource for PopplerSource {
    async fn page_count(&self, doc: &DocumentRef) -> Result<u32, ProcessingError> {
        let mut cmd = Command::new("pdfinfo");
        cmd.arg(&doc.local_path);

        let output = run_tool(cmd, "pdfinfo", self.config.pdfinfo_timeout).await?;
        if !output.status.success() {
            return Err(ProcessingError::source(tool_failure(
                "pdfinfo failed",
                &output.stderr,
            )));
        }

        parse_page_count(&String::from_utf8_lossy(&output.stdout))
    }

    async fn page_text(&self, doc: &DocumentRef, page: u32) -> Result<String, ProcessingError> {
        if page < 1 {
            return Err(ProcessingError::source(format!(
                "invalid page number: {} (must be >= 1)",
                page
            )));
        }

        let page_arg = page.to_string();
        let mut cmd = Command::new("pdftotext");
        cmd.args(["-f", &page_arg, "-l", &page_arg])
            .args(["-layout", "-nopgbrk", "-enc", "UTF-8"])
            .arg(&doc.local_path)
            .arg("-");

        let output = run_tool(cmd, "pdftotext", self.config.pdftotext_timeout).await?;

        if !output.status.success() {
            return Err(ProcessingError::source(tool_failure(
                &format!("pdftotext page {} failed", page),
                &output.stderr,
            )));
        }

        if output.stdout.len() > MAX_PAGE_TEXT_BYTES {
            return Err(ProcessingError::source(format!(
                "extracted text too large: {} bytes",
                output.stdout.len()
            )));
        }

        debug!("pdftotext page {}: {} bytes", page, output.stdout.len());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Run a tool under a timeout. The child is killed if the future is dropped.
async fn run_tool(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<Output, ProcessingError> {
    cmd.kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(ProcessingError::source(
            format!("{} not found (install poppler-utils)", tool),
        )),
        Ok(Err(e)) => Err(ProcessingError::source(format!("{} failed: {}", tool, e))),
        Err(_) => Err(ProcessingError::source(format!(
            "{} timed out after {:?}",
            tool, timeout
        ))),
    }
}

/// Map poppler stderr to a user-facing message.
fn tool_failure(prefix: &str, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();

    if stderr.contains("Incorrect password") {
        "PDF is password protected".to_string()
    } else if stderr.contains("damaged") {
        "PDF file is damaged or corrupted".to_string()
    } else if stderr.is_empty() {
        prefix.to_string()
    } else {
        format!("{}: {}", prefix, stderr)
    }
}

fn parse_page_count(stdout: &str) -> Result<u32, ProcessingError> {
    let caps = PAGES_LINE
        .captures(stdout)
        .ok_or_else(|| ProcessingError::source("pdfinfo: pages field not found in output"))?;

    let count: u32 = caps[1]
        .parse()
        .map_err(|e| ProcessingError::source(format!("pdfinfo: invalid page count: {}", e)))?;

    if count == 0 || count > MAX_PAGES {
        return Err(ProcessingError::source(format!(
            "pdfinfo: unreasonable page count: {}",
            count
        )));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_count() {
        let out = "Title:          Report\nProducer:       LaTeX\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(out).unwrap(), 12);
    }

    #[test]
    fn test_parse_page_count_missing_field() {
        let err = parse_page_count("Title: x\n").unwrap_err();
        assert!(err.to_string().contains("pages field not found"));
    }

    #[test]
    fn test_parse_page_count_out_of_range() {
        assert!(parse_page_count("Pages:          0\n").is_err());
        assert!(parse_page_count("Pages:          60000\n").is_err());
    }

    #[test]
    fn test_tool_failure_messages() {
        assert_eq!(
            tool_failure("pdfinfo failed", b"Command Line Error: Incorrect password\n"),
            "PDF is password protected"
        );
        assert_eq!(
            tool_failure("pdfinfo failed", b"Syntax Error: PDF file is damaged"),
            "PDF file is damaged or corrupted"
        );
        assert_eq!(tool_failure("pdfinfo failed", b""), "pdfinfo failed");
        assert_eq!(
            tool_failure("pdftotext page 2 failed", b"I/O Error"),
            "pdftotext page 2 failed: I/O Error"
        );
    }

    #[tokio::test]
    async fn test_page_text_rejects_page_zero() {
        let source = PopplerSource::default();
        let doc = DocumentRef::new("https://x/doc.pdf", "/nonexistent/doc.pdf");
        let err = source.page_text(&doc, 0).await.unwrap_err();
        assert_eq!(err.code(), "source_failed");
    }

    #[tokio::test]
    async fn test_page_count_missing_file_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentRef::new("https://x/doc.pdf", dir.path().join("missing.pdf"));
        let err = PopplerSource::default().page_count(&doc).await.unwrap_err();
        assert_eq!(err.code(), "source_failed");
    }
}
