//! CLI command implementations.

use std::path::Path;

use anyhow::{bail, Context};
use console::style;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::config::Settings;
use crate::download::{validate_url, Downloader, MAX_URL_LEN};
use crate::extract::{DocumentRef, PopplerSource};
use crate::hybrid::{ExtractOptions, HybridOptions, HybridProcessor};
use crate::ocr::MistralGateway;
use crate::quality;

/// Widest page range accepted on the command line.
const MAX_PAGE_SPAN: i64 = 50_000;

/// Start the HTTP service.
pub async fn cmd_serve(settings: Settings, bind: Option<&str>) -> anyhow::Result<()> {
    settings.validate()?;

    let bind = match bind {
        Some(bind) => parse_bind_address(bind, settings.port),
        None => settings.bind_addr(),
    };

    println!(
        "{} Starting fileproc at http://{}",
        style("→").cyan(),
        bind
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings, &bind).await
}

/// Download a PDF and print the extraction result as JSON.
pub async fn cmd_extract(
    settings: &Settings,
    url: &str,
    pages: Option<&str>,
    ocr_trigger_ratio: Option<f64>,
    include_page_numbers: bool,
) -> anyhow::Result<()> {
    validate_url("url", url, MAX_URL_LEN)?;
    let request = ExtractOptions {
        pages: pages.map(parse_page_list).transpose()?.unwrap_or_default(),
        ocr_trigger_ratio,
        include_page_numbers: Some(include_page_numbers),
        ..Default::default()
    };
    let options = HybridOptions::resolve(&request, &settings.hybrid_defaults())?;

    let downloader = Downloader::new(settings.max_pdf_bytes, settings.download_timeout)?;
    let file = downloader.fetch_pdf(url).await?;
    eprintln!(
        "{} Downloaded {} bytes",
        style("→").cyan(),
        file.size()
    );

    let processor = processor(settings)?;
    let result = processor
        .process_hybrid(&DocumentRef::new(url, file.path()), &options)
        .await;

    print_json(&result)?;
    if !result.success {
        bail!(
            "extraction failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    eprintln!(
        "  {} {} pages: {} text layer, {} OCR ({}% saved)",
        style("✓").green(),
        result.total_pages,
        result.text_layer_pages,
        result.ocr_pages,
        result.cost_savings_percent
    );
    Ok(())
}

/// Report whether a local PDF would need OCR.
pub async fn cmd_preview(settings: &Settings, file: &Path, pages: Option<&str>) -> anyhow::Result<()> {
    if !file.is_file() {
        bail!("File not found: {}", file.display());
    }

    let request = ExtractOptions {
        pages: pages.map(parse_page_list).transpose()?.unwrap_or_default(),
        ..Default::default()
    };
    let options = HybridOptions::resolve(&request, &settings.hybrid_defaults())?;

    let processor = processor(settings)?;
    let doc = DocumentRef::new(file.display().to_string(), file);
    let result = processor.process_preview(&doc, &options).await;

    print_json(&result)?;
    if !result.success {
        bail!(
            "preview failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Score text from a file or stdin and print the evaluation.
pub async fn cmd_score(
    settings: &Settings,
    file: Option<&Path>,
    min_words: Option<usize>,
) -> anyhow::Result<()> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };

    let min_words = min_words
        .filter(|&n| n > 0)
        .unwrap_or(settings.default_min_words);
    let eval = quality::score(&text, min_words);

    let verdict = if eval.needs_ocr {
        style("needs OCR").red()
    } else if eval.maybe_ocr {
        style("borderline").yellow()
    } else {
        style("text layer OK").green()
    };
    eprintln!(
        "{} score {:.2} ({} words): {}",
        style("→").cyan(),
        eval.quality_score,
        eval.word_count,
        verdict
    );

    print_json(&eval)
}

fn processor(settings: &Settings) -> anyhow::Result<HybridProcessor<PopplerSource, MistralGateway>> {
    let source = PopplerSource::new(settings.poppler_config());
    let gateway = MistralGateway::new(
        settings.mistral_api_key.clone(),
        settings.mistral_ocr_url.clone(),
    )?;
    Ok(HybridProcessor::new(source, gateway))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:<default_port>
/// - Host and port: "0.0.0.0:3030"
fn parse_bind_address(bind: &str, default_port: u16) -> String {
    if let Ok(port) = bind.parse::<u16>() {
        return format!("127.0.0.1:{}", port);
    }

    if let Some((host, port)) = bind.rsplit_once(':') {
        if port.parse::<u16>().is_ok() {
            return format!("{}:{}", host, port);
        }
    }

    format!("{}:{}", bind, default_port)
}

/// Parse a page list like "1", "1-5" or "1,3,5-10".
///
/// Pages are returned as written; range checks happen once the document's
/// page count is known.
fn parse_page_list(spec: &str) -> anyhow::Result<Vec<i64>> {
    let mut pages = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: i64 = start
                .trim()
                .parse()
                .with_context(|| format!("Invalid page range: {}", part))?;
            let end: i64 = end
                .trim()
                .parse()
                .with_context(|| format!("Invalid page range: {}", part))?;
            if start > end || end - start > MAX_PAGE_SPAN {
                bail!("Invalid page range: {}", part);
            }
            pages.extend(start..=end);
        } else {
            pages.push(
                part.parse()
                    .with_context(|| format!("Invalid page number: {}", part))?,
            );
        }
    }

    Ok(pages)
}
