//! PDF rasterisation: render the selected TOC pages to `DynamicImage`.
//!
//! Rendering sits behind the [`Renderer`] trait so the rest of the pipeline
//! can be driven from any image source. [`PdfiumRenderer`] is the production
//! implementation. pdfium is blocking and not async-safe, so
//! [`crate::extract::extract_toc`] calls it from `spawn_blocking`.

use crate::error::TocError;
use crate::progress::ProgressCallback;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A rasterised page, tagged with its 1-based page number.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_num: usize,
    pub image: DynamicImage,
}

/// Turns 1-based page numbers into raster images.
pub trait Renderer {
    /// Total number of pages in the document.
    fn page_count(&self) -> Result<usize, TocError>;

    /// Render `pages` in the given order at `dpi`.
    ///
    /// Pages outside `[1, page_count]` are skipped with a warning, not
    /// reported as errors. Duplicates are rendered as often as listed.
    fn render_pages(&self, pages: &[usize], dpi: u32) -> Result<Vec<RenderedPage>, TocError>;
}

/// [`Renderer`] backed by pdfium.
#[derive(Clone)]
pub struct PdfiumRenderer {
    path: PathBuf,
    password: Option<String>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for PdfiumRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfiumRenderer")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PdfiumRenderer {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
            progress: None,
        }
    }

    /// Report each rendered page to `cb`.
    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Bind pdfium: `PDFIUM_LIB_PATH` first, then the system loader, then `./`.
    fn bind(&self) -> Result<Pdfium, TocError> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(&lib),
            _ => Pdfium::bind_to_system_library().or_else(|_| {
                Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path("./"))
            }),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| TocError::PdfiumBindingFailed(format!("{e:?}")))
    }

    fn load<'a>(&'a self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, TocError> {
        let password = self.password.as_deref();
        pdfium
            .load_pdf_from_file(&self.path, password)
            .map_err(|e| load_error(&self.path, password.is_some(), e))
    }
}

impl Renderer for PdfiumRenderer {
    fn page_count(&self) -> Result<usize, TocError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium)?;
        Ok(document.pages().len() as usize)
    }

    fn render_pages(&self, pages: &[usize], dpi: u32) -> Result<Vec<RenderedPage>, TocError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium)?;
        let doc_pages = document.pages();
        let total = doc_pages.len() as usize;
        info!("PDF loaded: {} pages", total);

        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let mut results = Vec::with_capacity(pages.len());

        for &page_num in pages {
            if page_num == 0 || page_num > total {
                warn!("Skipping page {} (out of range, total={})", page_num, total);
                continue;
            }

            let page = doc_pages
                .get((page_num - 1) as u16)
                .map_err(|e| TocError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{e:?}"),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                TocError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{e:?}"),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            if let Some(ref cb) = self.progress {
                cb.on_page_rendered(page_num, image.width(), image.height());
            }

            results.push(RenderedPage { page_num, image });
        }

        Ok(results)
    }
}

/// Classify a pdfium load failure.
fn load_error(path: &Path, had_password: bool, e: PdfiumError) -> TocError {
    let err_str = format!("{e:?}");
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            TocError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            TocError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        TocError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_failures_are_classified() {
        let path = Path::new("locked.pdf");
        let pw_error =
            || PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);

        assert!(matches!(
            load_error(path, false, pw_error()),
            TocError::PasswordRequired { .. }
        ));
        assert!(matches!(
            load_error(path, true, pw_error()),
            TocError::WrongPassword { .. }
        ));
        assert!(matches!(
            load_error(
                path,
                false,
                PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError)
            ),
            TocError::CorruptPdf { .. }
        ));
    }

    #[test]
    fn debug_redacts_password() {
        let renderer = PdfiumRenderer::new("book.pdf", Some("hunter2".into()));
        let dbg = format!("{renderer:?}");
        assert!(dbg.contains("book.pdf"));
        assert!(!dbg.contains("hunter2"));
    }
}
