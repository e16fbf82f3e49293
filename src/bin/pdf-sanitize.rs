//! CLI binary for pdf-sanitizer.
//!
//! Rebuilds a PDF on disk through the same pipeline the upload paths use
//! and writes the result next to it (or to `--output`).

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_sanitizer::{
    Outcome, Pipeline, SanitizationResult, SanitizeOptions, SanitizeProgress, SanitizerConfig,
    UploadFile,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Opening");
        bar.set_message("Decoding PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl SanitizeProgress for CliProgress {
    fn on_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(concat!(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] ",
            "{pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rebuilding");
    }

    fn on_page(&self, current: usize, _total: usize, message: &str) {
        self.bar.set_position(current as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_finish(&self, _sanitized: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rebuild invoice.pdf into invoice.sanitized.pdf
  pdf-sanitize invoice.pdf

  # Explicit output, sharper pages
  pdf-sanitize --scale 2.0 --quality 0.9 scan.pdf -o clean.pdf

  # Refuse to touch large documents, print a JSON summary
  pdf-sanitize --max-pages 50 --max-file-size-mb 20 --json upload.pdf

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH                 Path to libpdfium (when --worker-location is not given)
  PDF_SANITIZER_SCALE             Default for --scale
  PDF_SANITIZER_QUALITY           Default for --quality
  PDF_SANITIZER_MAX_FILE_SIZE_MB  Default for --max-file-size-mb
  PDF_SANITIZER_MAX_PAGES         Default for --max-pages
  PDF_SANITIZER_WORKER_LOCATION   Default for --worker-location

A file that cannot be rebuilt is copied to the output unchanged and a
warning is printed; the exit code stays 0 unless the file cannot be read
or written.
"#;

/// Rebuild a PDF from rasterised pages, dropping scripts, forms,
/// annotations and attachments.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-sanitize",
    version,
    about = "Rebuild a PDF from rasterised pages to strip active content",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to sanitize.
    input: PathBuf,

    /// Where to write the result. Default: <input stem>.sanitized.pdf
    #[arg(short, long, env = "PDF_SANITIZER_OUTPUT")]
    output: Option<PathBuf>,

    /// Raster scale in pixels per PDF point.
    #[arg(long, env = "PDF_SANITIZER_SCALE", default_value_t = 1.5)]
    scale: f32,

    /// JPEG quality in (0, 1].
    #[arg(long, env = "PDF_SANITIZER_QUALITY", default_value_t = 0.85)]
    quality: f32,

    /// Leave files larger than this many MiB untouched (0 = no limit).
    #[arg(long, env = "PDF_SANITIZER_MAX_FILE_SIZE_MB", default_value_t = 0)]
    max_file_size_mb: u64,

    /// Leave documents with more pages than this untouched (0 = no limit).
    #[arg(long, env = "PDF_SANITIZER_MAX_PAGES", default_value_t = 0)]
    max_pages: usize,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDF_SANITIZER_WORKER_LOCATION")]
    worker_location: Option<String>,

    /// Print a JSON summary to stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn shows_progress(&self) -> bool {
        !self.quiet && !self.no_progress && !self.json
    }

    /// Log level when `RUST_LOG` is unset. The progress bar replaces the
    /// per-file `info` lines, so only warnings get through while it runs.
    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else if self.shows_progress() {
            "warn"
        } else {
            "info"
        }
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    input: &'a Path,
    output: &'a Path,
    outcome: &'a Outcome,
    input_bytes: u64,
    output_bytes: u64,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = cli.shows_progress();
    let filter = cli.default_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut builder = SanitizerConfig::builder()
        .scale(cli.scale)
        .quality(cli.quality)
        .max_file_size_mb(cli.max_file_size_mb)
        .max_pages(cli.max_pages)
        .show_progress(false);
    if let Some(location) = &cli.worker_location {
        builder = builder.worker_location(location.clone());
    }
    let config = builder.build().context("Invalid options")?;

    let output = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));
    let file = UploadFile::from_path(&cli.input)
        .await
        .with_context(|| format!("Cannot read {}", cli.input.display()))?;

    // ── Run ──────────────────────────────────────────────────────────────
    let mut options = SanitizeOptions::default();
    if show_progress {
        options = options.with_progress(CliProgress::new());
    }
    let start = Instant::now();
    let result = Pipeline::new(config).sanitize(&file, &options).await;
    let elapsed = start.elapsed();

    write_atomic(&output, result.file.bytes())
        .await
        .with_context(|| format!("Cannot write {}", output.display()))?;

    if cli.json {
        let summary = Summary {
            input: &cli.input,
            output: &output,
            outcome: &result.outcome,
            input_bytes: file.size(),
            output_bytes: result.file.size(),
            elapsed_ms: elapsed.as_millis(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !cli.quiet {
        report(&result, &file, &output, elapsed);
    }
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}.sanitized.pdf"))
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

fn report(result: &SanitizationResult, original: &UploadFile, output: &Path, elapsed: Duration) {
    let took = dim(&format!("{:.1}s", elapsed.as_secs_f64()));
    match &result.outcome {
        Outcome::Sanitized { pages } => eprintln!(
            "{} {} pages rebuilt  {} → {} bytes  {}  {}",
            green("✔"),
            bold(&pages.to_string()),
            original.size(),
            result.file.size(),
            output.display(),
            took
        ),
        Outcome::NotApplicable => eprintln!(
            "{} {} is not a PDF, copied unchanged to {}",
            yellow("⚠"),
            original.name(),
            output.display()
        ),
        Outcome::Skipped(reason) | Outcome::Failed(reason) => eprintln!(
            "{} {}; original copied unchanged to {}",
            yellow("⚠"),
            reason,
            output.display()
        ),
        Outcome::AlreadySanitized => eprintln!(
            "{} already sanitized, copied to {}",
            green("✔"),
            output.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output(Path::new("/tmp/in/invoice.pdf")),
            PathBuf::from("/tmp/in/invoice.sanitized.pdf")
        );
        assert_eq!(default_output(Path::new("scan")), PathBuf::from("scan.sanitized.pdf"));
    }

    #[tokio::test]
    async fn write_atomic_replaces_target_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.pdf");
        std::fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"%PDF-1.5 new").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.5 new");
        assert!(!dir.path().join("out.pdf.tmp").exists());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "pdf-sanitize",
            "in.pdf",
            "--scale",
            "2",
            "--max-pages",
            "10",
            "--json",
        ]);
        assert_eq!(cli.input, PathBuf::from("in.pdf"));
        assert_eq!(cli.scale, 2.0);
        assert_eq!(cli.max_pages, 10);
        assert!(cli.json);
    }

    #[test]
    fn default_filter_follows_output_mode() {
        let filter = |args: &[&str]| {
            let cli = Cli::parse_from(["pdf-sanitize", "in.pdf"].iter().chain(args));
            cli.default_filter()
        };
        assert_eq!(filter(&[]), "warn");
        assert_eq!(filter(&["--no-progress"]), "info");
        assert_eq!(filter(&["--json"]), "info");
        assert_eq!(filter(&["--quiet"]), "error");
        assert_eq!(filter(&["--verbose"]), "debug");
        assert_eq!(filter(&["--verbose", "--quiet"]), "debug");
    }
}
