//! Command-line interface.
//!
//! Parses arguments, loads settings and dispatches to the command modules.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "fileproc")]
#[command(about = "Hybrid document text extraction: text layer first, OCR when needed")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP extraction service
    Serve {
        /// Bind address: "8080", "0.0.0.0" or "0.0.0.0:8080" (default: 0.0.0.0:$PORT)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Download a PDF and extract its text
    Extract {
        /// Presigned or public URL of the PDF
        url: String,
        /// Pages to extract (e.g., "1", "1-5", "1,3,5-10"). Default: all pages
        #[arg(short, long)]
        pages: Option<String>,
        /// OCR the whole selection once this share of pages needs it
        #[arg(long)]
        ocr_trigger_ratio: Option<f64>,
        /// Omit "[Page N]" markers from the combined text
        #[arg(long)]
        no_page_numbers: bool,
    },

    /// Report whether a local PDF would need OCR
    Preview {
        /// PDF file to inspect
        file: PathBuf,
        /// Pages to inspect (e.g., "1-5"). Default: all pages
        #[arg(short, long)]
        pages: Option<String>,
    },

    /// Score text quality from a file or stdin
    Score {
        /// Text file to score (reads stdin when omitted)
        file: Option<PathBuf>,
        /// Minimum word count before a page is considered sparse
        #[arg(short, long)]
        min_words: Option<usize>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).await?;

    if let Some(path) = &settings.source_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Serve { bind } => commands::cmd_serve(settings, bind.as_deref()).await,
        Commands::Extract {
            url,
            pages,
            ocr_trigger_ratio,
            no_page_numbers,
        } => {
            commands::cmd_extract(
                &settings,
                &url,
                pages.as_deref(),
                ocr_trigger_ratio,
                !no_page_numbers,
            )
            .await
        }
        Commands::Preview { file, pages } => {
            commands::cmd_preview(&settings, &file, pages.as_deref()).await
        }
        Commands::Score { file, min_words } => {
            commands::cmd_score(&settings, file.as_deref(), min_words).await
        }
    }
}
