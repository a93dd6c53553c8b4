//! Configuration types for TOC extraction.
//!
//! Every knob of an extraction run lives in [`ExtractionConfig`], built via
//! [`ExtractionConfigBuilder`]. The config is an explicit value passed into
//! each run; the library keeps no process-wide defaults and reads no
//! environment variables (the CLI maps those onto the builder).

use crate::error::TocError;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default OpenAI-compatible API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for one TOC extraction run.
///
/// # Example
/// ```rust
/// use edgequake_pdftoc::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .api_key("sk-test")
///     .base_url("https://gateway.example.com/v1/")
///     .model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoint(), "https://gateway.example.com/v1/chat/completions");
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Bearer credential for the model endpoint. Required.
    pub api_key: String,

    /// API root of an OpenAI-compatible endpoint. Default: [`DEFAULT_BASE_URL`].
    ///
    /// `/chat/completions` is appended; a trailing `/` is tolerated.
    pub base_url: String,

    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Rendering DPI used when rasterising TOC pages. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge of an image sent to the model, in pixels. Default: 1024.
    ///
    /// Larger renders are downscaled with their aspect ratio preserved;
    /// smaller ones are sent as-is.
    pub max_image_dimension: u32,

    /// JPEG quality (1–100) for the image payload. Default: 85.
    pub jpeg_quality: u8,

    /// Timeout for the whole model request in seconds. Default: 120.
    ///
    /// A single request carries every TOC page, so this is deliberately
    /// longer than a per-page budget would be.
    pub api_timeout_secs: u64,

    /// Custom instruction. If None, uses [`crate::prompts::TOC_EXTRACTION_PROMPT`].
    pub instruction: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dpi: 150,
            max_image_dimension: 1024,
            jpeg_quality: 85,
            api_timeout_secs: 120,
            instruction: None,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dpi", &self.dpi)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("instruction", &self.instruction.as_ref().map(|_| "<custom>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Full URL of the chat-completions endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim().to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(64);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, TocError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(TocError::InvalidConfig(
                "An API key is required (none is embedded).".into(),
            ));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(TocError::InvalidConfig(format!(
                "Base URL must be an http(s) URL, got '{}'",
                c.base_url
            )));
        }
        if c.model.trim().is_empty() {
            return Err(TocError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(TocError::InvalidConfig("API timeout must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Ordered list of 1-based PDF page numbers holding the printed TOC.
///
/// Parsed from range syntax such as `"5-8, 10"`. Order and duplicates are
/// kept exactly as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSelection(Vec<usize>);

/// Highest page number a selection may name; pdfium indexes pages with `u16`.
pub const MAX_PAGE: usize = u16::MAX as usize;

static RE_PAGE_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*(?:-\s*(\d+))?$").unwrap());

impl PageSelection {
    /// Build a selection from explicit page numbers.
    pub fn new(pages: Vec<usize>) -> Result<Self, TocError> {
        if pages.is_empty() {
            return Err(TocError::InvalidPageSelection {
                input: String::new(),
                reason: "no pages selected".into(),
            });
        }
        if pages.contains(&0) {
            return Err(TocError::InvalidPageSelection {
                input: format!("{pages:?}"),
                reason: "pages are 1-indexed, minimum is 1".into(),
            });
        }
        if pages.len() > MAX_PAGE || pages.iter().any(|&p| p > MAX_PAGE) {
            return Err(TocError::InvalidPageSelection {
                input: format!("{} page(s)", pages.len()),
                reason: format!("at most {MAX_PAGE} pages, each at most {MAX_PAGE}"),
            });
        }
        Ok(Self(pages))
    }

    /// The selected 1-based page numbers.
    pub fn pages(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for PageSelection {
    type Err = TocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| TocError::InvalidPageSelection {
            input: s.to_string(),
            reason,
        };

        let mut pages = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let caps = RE_PAGE_ITEM
                .captures(part)
                .ok_or_else(|| invalid(format!("'{part}' is not a page or a range")))?;
            let start: usize = caps[1]
                .parse()
                .map_err(|_| invalid(format!("'{}' is too large", &caps[1])))?;
            let end: usize = match caps.get(2) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is too large", m.as_str())))?,
                None => start,
            };
            if start == 0 {
                return Err(invalid("pages are 1-indexed, minimum is 1".into()));
            }
            if start > end {
                return Err(invalid(format!("range '{part}': start must be <= end")));
            }
            if end > MAX_PAGE {
                return Err(invalid(format!("page {end} is beyond the last addressable page {MAX_PAGE}")));
            }
            if pages.len() + (end - start + 1) > MAX_PAGE {
                return Err(invalid(format!("more than {MAX_PAGE} pages selected")));
            }
            pages.extend(start..=end);
        }

        if pages.is_empty() {
            return Err(invalid("no pages selected".into()));
        }
        Ok(Self(pages))
    }
}
