//! Top-level entry points: extract a TOC from a PDF, apply one to a PDF.
//!
//! Extraction and application are separate so a human can review and edit
//! the rows in between. [`extract_toc`] renders the selected pages, sends
//! them to the model in one request and returns the unvalidated rows;
//! [`apply_toc_to_file`] maps those rows through the page offset and writes
//! them as the document outline.

use crate::config::{ExtractionConfig, PageSelection};
use crate::error::TocError;
use crate::output::{AppliedOutline, ExtractionOutput, ExtractionStats};
use crate::pipeline::encode::{encode_page, ImagePayload};
use crate::pipeline::input;
use crate::pipeline::llm::ExtractionClient;
use crate::pipeline::mapper::map_entries_with_report;
use crate::pipeline::outline::{LopdfOutlineWriter, OutlineWriter};
use crate::pipeline::parse::parse_reply;
use crate::pipeline::render::{PdfiumRenderer, RenderedPage, Renderer};
use image::DynamicImage;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Extract the TOC printed on `pages` of the PDF at `path`.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever the endpoint answered, including when
/// the answer could not be parsed (check `output.failure`).
///
/// # Errors
/// Returns `Err(TocError)` for fatal errors only:
/// - File not found / not a PDF / wrong password
/// - None of the selected pages exist
/// - The endpoint could not be reached or refused the request
pub async fn extract_toc(
    path: impl AsRef<Path>,
    pages: &PageSelection,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TocError> {
    let path = input::resolve_local(path)?;
    info!("Starting TOC extraction: {}", path.display());

    let renderer = PdfiumRenderer::new(path, config.password.clone())
        .with_progress(config.progress_callback.clone());
    extract_toc_with(renderer, pages, config).await
}

/// Like [`extract_toc`], with a caller-supplied [`Renderer`].
///
/// Rendering runs in `spawn_blocking`, so the renderer must be `Send + 'static`.
pub async fn extract_toc_with<R>(
    renderer: R,
    pages: &PageSelection,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TocError>
where
    R: Renderer + Send + 'static,
{
    let total_start = Instant::now();
    let client = ExtractionClient::new(config)?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_render_start(pages.len());
    }

    let render_start = Instant::now();
    let requested = pages.pages().to_vec();
    let dpi = config.dpi;
    let rendered = tokio::task::spawn_blocking(move || {
        let rendered = renderer.render_pages(&requested, dpi)?;
        if rendered.is_empty() {
            return Err(TocError::NoPagesRendered {
                total: renderer.page_count()?,
                requested,
            });
        }
        Ok(rendered)
    })
    .await
    .map_err(|e| TocError::Internal(format!("Render task panicked: {}", e)))??;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    let stats = ExtractionStats {
        pages_requested: pages.len(),
        pages_rendered: rendered.len(),
        render_duration_ms,
        ..Default::default()
    };
    run_extraction(&client, &rendered, stats, total_start, config).await
}

/// Extract a TOC from images that are already in memory.
///
/// Images are numbered 1, 2, … in the order given. No PDF is involved, so
/// `stats.render_duration_ms` is 0.
pub async fn extract_toc_from_images(
    images: &[DynamicImage],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TocError> {
    let total_start = Instant::now();
    if images.is_empty() {
        return Err(TocError::NoPagesRendered {
            requested: Vec::new(),
            total: 0,
        });
    }
    let client = ExtractionClient::new(config)?;

    let pages: Vec<RenderedPage> = images
        .iter()
        .enumerate()
        .map(|(i, image)| RenderedPage {
            page_num: i + 1,
            image: image.clone(),
        })
        .collect();

    let stats = ExtractionStats {
        pages_requested: pages.len(),
        pages_rendered: pages.len(),
        ..Default::default()
    };
    run_extraction(&client, &pages, stats, total_start, config).await
}

/// Synchronous wrapper around [`extract_toc`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_toc_sync(
    path: impl AsRef<Path>,
    pages: &PageSelection,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TocError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TocError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_toc(path, pages, config))
}

/// Map `entries` through `offset` and write them with `writer`.
///
/// Rows with unusable fields are dropped and counted; targets outside the
/// document are pinned to its first or last page.
pub fn apply_toc<W>(writer: &mut W, entries: &[Value], offset: i64) -> Result<AppliedOutline, TocError>
where
    W: OutlineWriter + ?Sized,
{
    let page_count = writer.page_count();
    let report = map_entries_with_report(entries, offset, page_count);
    let written = writer.write_outline(&report.entries)?;

    info!(
        "Applied outline: {} written, {} dropped, {} clamped (offset {}, {} pages)",
        written, report.dropped, report.clamped, offset, page_count
    );
    Ok(AppliedOutline {
        entries: written,
        dropped: report.dropped,
        clamped: report.clamped,
        page_count,
    })
}

/// Write `entries` as the outline of `source`, saving the result to `output`.
///
/// Any outline `source` already had is replaced. `output` may equal
/// `source`; the file is only replaced once the new one is fully written.
pub fn apply_toc_to_file(
    source: impl AsRef<Path>,
    entries: &[Value],
    offset: i64,
    output: impl AsRef<Path>,
    password: Option<&str>,
) -> Result<AppliedOutline, TocError> {
    let source = input::resolve_local(source)?;
    let mut writer = LopdfOutlineWriter::open(&source, password)?;
    let applied = apply_toc(&mut writer, entries, offset)?;
    writer.save(output)?;
    Ok(applied)
}

/// Parse an edited TOC file: `{"toc": [...]}` or a bare `[...]`.
pub fn read_toc_json(text: &str) -> Result<Vec<Value>, TocError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TocError::InvalidTocFile(e.to_string()))?;
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => match map.remove("toc") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(other) => Err(TocError::InvalidTocFile(format!(
                "'toc' must be a list, got {}",
                json_kind(&other)
            ))),
            None => Err(TocError::InvalidTocFile("object has no 'toc' key".into())),
        },
        other => Err(TocError::InvalidTocFile(format!(
            "expected an object or a list, got {}",
            json_kind(&other)
        ))),
    }
}

/// Render rows as the editable `{"toc": [...]}` document, pretty-printed.
pub fn toc_to_json(entries: &[Value]) -> String {
    let mut doc = serde_json::Map::new();
    doc.insert("toc".into(), Value::Array(entries.to_vec()));
    format!("{:#}", Value::Object(doc))
}

/// Write the editable TOC document to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_toc_file(path: impl AsRef<Path>, entries: &[Value]) -> Result<(), TocError> {
    let path = path.as_ref();
    let write_failed = |source| TocError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, toc_to_json(entries) + "\n")
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Encode, send and parse: the part shared by every extraction entry point.
async fn run_extraction(
    client: &ExtractionClient,
    pages: &[RenderedPage],
    mut stats: ExtractionStats,
    total_start: Instant,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TocError> {
    let payloads = pages
        .iter()
        .map(|p| {
            encode_page(&p.image, config.max_image_dimension, config.jpeg_quality).map_err(|e| {
                TocError::ImageEncodingFailed {
                    page: p.page_num,
                    detail: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<ImagePayload>, _>>()?;
    stats.payload_bytes = payloads.iter().map(|p| p.data.len()).sum();
    debug!(
        "Encoded {} pages, {} bytes base64",
        payloads.len(),
        stats.payload_bytes
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_request_start(payloads.len(), stats.payload_bytes);
    }

    let llm_start = Instant::now();
    let reply = client.extract(&payloads).await?;
    stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;
    (stats.input_tokens, stats.output_tokens) = reply.raw.usage();

    let result = parse_reply(&reply.raw);
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(
            result.entries.len(),
            result.failure.as_ref().map(|f| f.kind()),
        );
    }
    info!(
        "Extraction complete: {} entries from {} pages, {}ms total",
        result.entries.len(),
        pages.len(),
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        entries: result.entries,
        failure: result.failure,
        pages: pages.iter().map(|p| p.page_num).collect(),
        stats,
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mapper::OutlineEntry;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingWriter {
        pages: usize,
        written: Vec<OutlineEntry>,
    }

    impl OutlineWriter for RecordingWriter {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn write_outline(&mut self, outline: &[OutlineEntry]) -> Result<usize, TocError> {
            self.written = outline.to_vec();
            Ok(outline.len())
        }
    }

    #[test]
    fn apply_maps_and_counts() {
        let mut writer = RecordingWriter {
            pages: 30,
            ..Default::default()
        };
        let rows = [
            json!({"level": 1, "title": "Ch1", "page": 1}),
            json!({"level": 1, "title": "Roman", "page": "iv"}),
            json!({"level": 1, "title": "Index", "page": 99}),
        ];
        let applied = apply_toc(&mut writer, &rows, 4).unwrap();
        assert_eq!(
            applied,
            AppliedOutline {
                entries: 2,
                dropped: 1,
                clamped: 1,
                page_count: 30
            }
        );
        assert_eq!(writer.written[0].page, 5);
        assert_eq!(writer.written[1].page, 30);
    }

    #[test]
    fn read_toc_accepts_both_shapes() {
        let wrapped = read_toc_json(r#"{"toc": [{"level": 1, "title": "A", "page": 1}]}"#).unwrap();
        let bare = read_toc_json(r#"[{"level": 1, "title": "A", "page": 1}]"#).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped.len(), 1);
    }

    #[test]
    fn read_toc_rejects_other_shapes() {
        assert!(matches!(read_toc_json("not json"), Err(TocError::InvalidTocFile(_))));
        assert!(matches!(read_toc_json(r#"{"entries": []}"#), Err(TocError::InvalidTocFile(_))));
        let err = read_toc_json(r#"{"toc": "Chapter 1"}"#).unwrap_err();
        assert!(err.to_string().contains("a string"));
        assert!(read_toc_json("42").is_err());
    }

    #[test]
    fn toc_json_round_trips() {
        let rows = vec![json!({"level": 1, "title": "Intro", "page": 1})];
        let text = toc_to_json(&rows);
        assert!(text.contains('\n'), "expected pretty output: {text}");
        assert_eq!(read_toc_json(&text).unwrap(), rows);
    }

    #[tokio::test]
    async fn write_toc_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/toc.json");
        let rows = vec![json!({"level": 2, "title": "x", "page": 3})];
        write_toc_file(&path, &rows).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(read_toc_json(&text).unwrap(), rows);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn no_images_is_an_error() {
        let config = ExtractionConfig::builder().api_key("sk-test").build().unwrap();
        let err = extract_toc_from_images(&[], &config).await.unwrap_err();
        assert!(matches!(err, TocError::NoPagesRendered { .. }));
    }

    #[tokio::test]
    async fn missing_pdf_fails_before_rendering() {
        let config = ExtractionConfig::builder().api_key("sk-test").build().unwrap();
        let pages: PageSelection = "1".parse().unwrap();
        let err = extract_toc("/no/such/book.pdf", &pages, &config).await.unwrap_err();
        assert!(matches!(err, TocError::FileNotFound { .. }));
    }
}
