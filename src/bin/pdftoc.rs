//! CLI binary for edgequake-pdftoc.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs extraction and outline writing, and prints
//! results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdftoc::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use edgequake_pdftoc::{
    apply_toc_to_file, extract_toc, read_toc_json, toc_to_json, write_toc_file, AppliedOutline,
    ExtractionConfig, ExtractionFailure, ExtractionOutput, ExtractionProgressCallback,
    LopdfOutlineWriter, PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for a run whose reply could not be turned into entries.
const EXIT_DIAGNOSED: i32 = 2;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while pages render and while the
/// single model request is in flight, plus one log line per rendered page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Clear the spinner when a run ends in an error.
    fn abandon(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_render_start(&self, requested_pages: usize) {
        self.bar.set_prefix("Rendering");
        self.bar.set_message(format!("{requested_pages} TOC page(s)…"));
    }

    fn on_page_rendered(&self, page_num: usize, width: u32, height: u32) {
        self.bar.println(format!(
            "  {} Page {:>4}  {}",
            green("✓"),
            page_num,
            dim(&format!("{width}x{height} px")),
        ));
    }

    fn on_request_start(&self, images: usize, payload_bytes: usize) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message(format!(
            "waiting for the model ({images} image(s), {} KiB)…",
            payload_bytes / 1024
        ));
    }

    fn on_extraction_complete(&self, entries: usize, failure: Option<&str>) {
        self.bar.finish_and_clear();
        match failure {
            None => eprintln!(
                "{} {} TOC entries extracted",
                green("✔"),
                bold(&entries.to_string())
            ),
            Some(kind) => eprintln!("{} Extraction failed ({})", red("✘"), kind),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the TOC printed on pages 5-8 into an editable file
  pdftoc extract book.pdf --pages 5-8 -o toc.json

  # Fix titles or levels in toc.json, then write the outline.
  # Printed page 1 is the 13th page of the file, so the offset is 12.
  pdftoc apply book.pdf --toc toc.json --offset 12 -o book-toc.pdf

  # Both steps at once, without reviewing
  pdftoc run book.pdf --pages 5-8,10 --offset 12 -o book-toc.pdf

  # Use any OpenAI-compatible gateway
  pdftoc extract book.pdf --pages 3-4 --base-url http://localhost:4000/v1 --model gpt-4o-mini

  # Show the outline a PDF already has
  pdftoc show book-toc.pdf

OFFSET:
  offset = pdf_page - printed_page, measured at any page where both are known.
  Negative offsets are allowed. Targets outside the document are pinned to
  its first or last page.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          API key for the model endpoint (required for extract/run)
  PDFTOC_BASE_URL         API root of an OpenAI-compatible endpoint
  PDFTOC_MODEL            Vision model ID
  PDFTOC_DPI              Render DPI for TOC pages
  PDFIUM_LIB_PATH         Path to libpdfium, if not installed system-wide
  RUST_LOG                Override log filtering (e.g. edgequake_pdftoc=debug)
"#;

/// Extract a PDF's printed table of contents with a Vision LLM and write it
/// as the document outline.
#[derive(Parser, Debug)]
#[command(
    name = "pdftoc",
    version,
    about = "Rebuild PDF bookmarks from the printed table of contents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFTOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFTOC_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the TOC pages with the model and write an editable TOC file.
    Extract {
        #[command(flatten)]
        extract: ExtractArgs,

        /// Write the TOC file here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full extraction result (entries, diagnosis, stats) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write a (possibly edited) TOC file into the PDF as its outline.
    Apply {
        /// PDF to add the outline to.
        input: PathBuf,

        /// TOC file: {"toc": [...]} or a bare list of {level, title, page}.
        #[arg(long)]
        toc: PathBuf,

        /// PDF page minus printed page.
        #[arg(long, allow_negative_numbers = true)]
        offset: i64,

        /// Output PDF path (may equal the input).
        #[arg(short, long)]
        output: PathBuf,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "PDFTOC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Extract and apply in one go, without an editing step.
    Run {
        #[command(flatten)]
        extract: ExtractArgs,

        /// PDF page minus printed page.
        #[arg(long, allow_negative_numbers = true)]
        offset: i64,

        /// Output PDF path (may equal the input).
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the outline a PDF currently has.
    Show {
        input: PathBuf,

        /// Print as JSON instead of an indented list.
        #[arg(long)]
        json: bool,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "PDFTOC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

impl Command {
    fn shows_progress(&self) -> bool {
        match self {
            Command::Extract { extract, json, .. } => !extract.no_progress && !json,
            Command::Run { extract, .. } => !extract.no_progress,
            Command::Apply { .. } | Command::Show { .. } => false,
        }
    }
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PDF file with a printed table of contents.
    input: PathBuf,

    /// PDF pages holding the printed TOC: 5, 5-8, or 5-8,10.
    #[arg(long, env = "PDFTOC_PAGES")]
    pages: PageSelection,

    /// API key for the model endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API root of an OpenAI-compatible endpoint.
    #[arg(long, env = "PDFTOC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Vision model ID.
    #[arg(long, env = "PDFTOC_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDFTOC_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest edge of an image sent to the model, in pixels.
    #[arg(long, env = "PDFTOC_MAX_DIMENSION", default_value_t = 1024)]
    max_dimension: u32,

    /// JPEG quality (1–100) of the images sent to the model.
    #[arg(long, env = "PDFTOC_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Timeout for the model request in seconds.
    #[arg(long, env = "PDFTOC_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file containing a custom extraction instruction.
    #[arg(long, env = "PDFTOC_PROMPT")]
    prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFTOC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Disable the progress spinner.
    #[arg(long, env = "PDFTOC_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the spinner is active; it
    // provides the feedback that matters to the user.
    let show_progress = !cli.quiet && cli.command.shows_progress();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = (show_progress && !cli.verbose).then(CliProgressCallback::new);
    let result = match &cli.command {
        Command::Extract {
            extract,
            output,
            json,
        } => cmd_extract(extract, output.as_deref(), *json, cli.quiet, progress.clone()).await,
        Command::Apply {
            input,
            toc,
            offset,
            output,
            password,
        } => cmd_apply(input, toc, *offset, output, password.as_deref(), cli.quiet).await,
        Command::Run {
            extract,
            offset,
            output,
        } => cmd_run(extract, *offset, output, cli.quiet, progress.clone()).await,
        Command::Show {
            input,
            json,
            password,
        } => cmd_show(input, *json, password.as_deref()),
    };

    if let Some(cb) = progress {
        cb.abandon();
    }
    result
}

async fn cmd_extract(
    args: &ExtractArgs,
    output_path: Option<&Path>,
    json: bool,
    quiet: bool,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<()> {
    let output = run_extraction(args, progress).await?;

    if json {
        let text = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{text}");
    }
    if let Some(ref failure) = output.failure {
        exit_with_diagnosis(failure, quiet);
    }
    if json {
        return Ok(());
    }

    match output_path {
        Some(path) => {
            write_toc_file(path, &output.entries)
                .await
                .context("Failed to write TOC file")?;
            if !quiet {
                print_extraction_summary(&output, Some(path));
            }
        }
        None => {
            println!("{}", toc_to_json(&output.entries));
            if !quiet {
                print_extraction_summary(&output, None);
            }
        }
    }
    Ok(())
}

async fn cmd_apply(
    input: &Path,
    toc: &Path,
    offset: i64,
    output: &Path,
    password: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let text = tokio::fs::read_to_string(toc)
        .await
        .with_context(|| format!("Failed to read TOC file {:?}", toc))?;
    let entries = read_toc_json(&text).with_context(|| format!("Failed to parse {:?}", toc))?;

    let applied = tokio::task::block_in_place(|| {
        apply_toc_to_file(input, &entries, offset, output, password)
    })
    .context("Failed to write outline")?;

    if !quiet {
        print_apply_summary(&applied, output);
    }
    Ok(())
}

async fn cmd_run(
    args: &ExtractArgs,
    offset: i64,
    output: &Path,
    quiet: bool,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<()> {
    let extracted = run_extraction(args, progress).await?;
    if let Some(ref failure) = extracted.failure {
        exit_with_diagnosis(failure, quiet);
    }
    if extracted.entries.is_empty() {
        anyhow::bail!("The model found no TOC entries on pages {:?}", extracted.pages);
    }

    let applied = tokio::task::block_in_place(|| {
        apply_toc_to_file(
            &args.input,
            &extracted.entries,
            offset,
            output,
            args.password.as_deref(),
        )
    })
    .context("Failed to write outline")?;

    if !quiet {
        print_apply_summary(&applied, output);
        print_token_line(&extracted);
    }
    Ok(())
}

fn cmd_show(input: &Path, json: bool, password: Option<&str>) -> Result<()> {
    let writer = LopdfOutlineWriter::open(input, password)
        .with_context(|| format!("Failed to open {:?}", input))?;
    let outline = writer.outline().context("Failed to read outline")?;

    if json {
        let text = serde_json::to_string_pretty(&outline).context("Failed to serialise outline")?;
        println!("{text}");
        return Ok(());
    }
    if outline.is_empty() {
        eprintln!("{}", dim("(no outline)"));
        return Ok(());
    }
    for item in &outline {
        let indent = "  ".repeat(item.level.saturating_sub(1) as usize);
        println!("{indent}{}  {}", item.title, dim(&format!("p.{}", item.page)));
    }
    Ok(())
}

/// Build the config and run extraction, clearing the spinner on error.
async fn run_extraction(
    args: &ExtractArgs,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<ExtractionOutput> {
    let progress_cb = progress.map(|cb| cb as ProgressCallback);
    let config = build_config(args, progress_cb).await?;
    extract_toc(&args.input, &args.pages, &config)
        .await
        .context("TOC extraction failed")
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    args: &ExtractArgs,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .api_key(args.api_key.clone().unwrap_or_default())
        .base_url(args.base_url.clone())
        .model(args.model.clone())
        .dpi(args.dpi)
        .max_image_dimension(args.max_dimension)
        .jpeg_quality(args.jpeg_quality)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref path) = args.prompt {
        let instruction = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instruction from {:?}", path))?;
        builder = builder.instruction(instruction);
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder
        .build()
        .context("Invalid configuration (set OPENAI_API_KEY or pass --api-key)")
}

/// Print the diagnosis and exit without writing anything.
fn exit_with_diagnosis(failure: &ExtractionFailure, quiet: bool) -> ! {
    if !quiet {
        eprintln!("{} {}", red("✘"), bold("No TOC entries could be recovered."));
    }
    eprintln!("{failure}");
    std::process::exit(EXIT_DIAGNOSED);
}

fn print_extraction_summary(output: &ExtractionOutput, path: Option<&Path>) {
    if output.entries.is_empty() {
        eprintln!(
            "{} The model found no TOC entries on pages {:?}",
            cyan("⚠"),
            output.pages
        );
    }
    if let Some(path) = path {
        eprintln!(
            "{}  {} entries from {} page(s)  {}ms  →  {}",
            green("✔"),
            output.entries.len(),
            output.stats.pages_rendered,
            output.stats.total_duration_ms,
            bold(&path.display().to_string()),
        );
    }
    let skipped = output.stats.pages_requested.saturating_sub(output.stats.pages_rendered);
    if skipped > 0 {
        eprintln!("   {} page(s) skipped (out of range)", cyan(&skipped.to_string()));
    }
    print_token_line(output);
}

fn print_token_line(output: &ExtractionOutput) {
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&output.stats.input_tokens.to_string()),
        dim(&output.stats.output_tokens.to_string()),
    );
}

fn print_apply_summary(applied: &AppliedOutline, output: &Path) {
    eprintln!(
        "{}  {} bookmarks written ({} pages)  →  {}",
        if applied.dropped == 0 && applied.clamped == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        applied.entries,
        applied.page_count,
        bold(&output.display().to_string()),
    );
    if applied.dropped > 0 {
        eprintln!(
            "   {} entries dropped (unusable level, title or page)",
            red(&applied.dropped.to_string())
        );
    }
    if applied.clamped > 0 {
        eprintln!(
            "   {} entries pointed outside the document and were pinned (check --offset)",
            cyan(&applied.clamped.to_string())
        );
    }
}
