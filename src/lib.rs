//! # edgequake-pdftoc
//!
//! Recover a PDF's table of contents with a Vision Language Model and write
//! it back as the document outline (bookmarks).
//!
//! ## Why this crate?
//!
//! Scanned books and many exported PDFs have a printed TOC but no outline,
//! so viewers cannot navigate them. Text extraction is no help on scans, and
//! even on born-digital files dotted leaders and multi-column layouts break
//! it. Instead this crate rasterises the TOC pages, lets a VLM read them as a
//! human would, and returns `{level, title, page}` rows that are mapped
//! through a page offset into real PDF pages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + TOC pages
//!  │
//!  ├─ 1. Render  rasterise the TOC pages via pdfium (spawn_blocking)
//!  ├─ 2. Encode  bound to 1024 px, JPEG → base64
//!  ├─ 3. VLM     one chat-completions request with every page attached
//!  ├─ 4. Parse   recover {"toc": [...]} or diagnose the reply
//!  │        ┄┄ optional human edit of the rows ┄┄
//!  ├─ 5. Map     printed page + offset, clamped into the document
//!  └─ 6. Write   replace the outline via lopdf, save atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdftoc::{apply_toc_to_file, extract_toc, ExtractionConfig, PageSelection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .build()?;
//!     let pages: PageSelection = "5-7".parse()?;
//!
//!     let output = extract_toc("book.pdf", &pages, &config).await?;
//!     if let Some(failure) = &output.failure {
//!         eprintln!("no TOC recovered: {failure}");
//!         return Ok(());
//!     }
//!
//!     // Printed page 1 is the 13th page of the file.
//!     let applied = apply_toc_to_file("book.pdf", &output.entries, 12, "book-toc.pdf", None)?;
//!     eprintln!("{} bookmarks written", applied.entries);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdftoc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdftoc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{ExtractionFailure, TocError};
pub use extract::{
    apply_toc, apply_toc_to_file, extract_toc, extract_toc_from_images, extract_toc_sync,
    extract_toc_with, read_toc_json, toc_to_json, write_toc_file,
};
pub use output::{AppliedOutline, ExtractionOutput, ExtractionStats};
pub use pipeline::encode::{encode_page, ImagePayload};
pub use pipeline::llm::{ExtractionClient, ModelReply, RawReply};
pub use pipeline::mapper::{coerce_entry, map_entries, map_entries_with_report, MappingReport, OutlineEntry, TocEntry};
pub use pipeline::outline::{LopdfOutlineWriter, OutlineWriter};
pub use pipeline::parse::{parse_reply, ExtractionResult};
pub use pipeline::render::{PdfiumRenderer, RenderedPage, Renderer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
