//! Error types for the edgequake-pdftoc library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`TocError`] — **Fatal**: the run cannot proceed at all (bad input file,
//!   wrong password, the model endpoint refused the request). Returned as
//!   `Err(TocError)` from the top-level `extract*` / `apply*` functions.
//!
//! * [`ExtractionFailure`] — **Diagnosis**: the endpoint answered, but the
//!   answer could not be turned into TOC entries (HTML landing page,
//!   unparseable text, provider error envelope). Stored inside
//!   [`crate::output::ExtractionOutput`] next to an empty entry list so the
//!   caller can show "zero entries, here is why" instead of crashing.
//!
//! Per-entry problems (a row whose `page` is not a number) are neither: the
//! row is dropped by [`crate::pipeline::mapper`] and counted in its report.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdftoc library.
#[derive(Debug, Error)]
pub enum TocError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The page selection string could not be parsed.
    #[error("Invalid page selection '{input}': {reason}\nUse e.g. '5-8, 10'.")]
    InvalidPageSelection { input: String, reason: String },

    /// The edited TOC file is not a JSON list of entries.
    #[error("Invalid TOC file: {0}")]
    InvalidTocFile(String),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// None of the selected pages exist in the document.
    #[error("No pages rendered: none of {requested:?} exist (document has {total} pages).\nCheck page numbers.")]
    NoPagesRendered { requested: Vec<usize>, total: usize },

    /// A rendered page could not be JPEG-encoded.
    #[error("Image encoding failed for page {page}: {detail}")]
    ImageEncodingFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH or install libpdfium where the system loader can find it."
    )]
    PdfiumBindingFailed(String),

    // ── Upstream (model endpoint) errors ──────────────────────────────────
    /// The endpoint rejected the request body as too large (HTTP 413).
    ///
    /// Callers can retry with fewer pages or a smaller `max_image_dimension`.
    #[error(
        "Request too large: {images} image(s), {payload_bytes} bytes of base64.\n\
Select fewer pages or lower --max-dimension."
    )]
    PayloadTooLarge { images: usize, payload_bytes: usize },

    /// The endpoint returned an authentication error (401/403).
    #[error("Authentication error from '{endpoint}' (HTTP {status}): {detail}")]
    AuthError {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// The endpoint returned HTTP 429.
    #[error("Rate limit exceeded at '{endpoint}'")]
    RateLimitExceeded {
        endpoint: String,
        retry_after_secs: Option<u64>,
    },

    /// The request did not complete within the configured timeout.
    #[error("API call timed out after {secs}s")]
    ApiTimeout { secs: u64 },

    /// Connection-level failure (DNS, TLS, refused, reset).
    #[error("Network error calling '{endpoint}': {detail}")]
    Network { endpoint: String, detail: String },

    /// Any other non-success status from the endpoint.
    #[error("LLM API error (HTTP {status}): {message}")]
    LlmApiError { status: u16, message: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// lopdf refused to build or serialise the outline.
    #[error("Failed to write outline into '{path}': {detail}")]
    OutlineWriteFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TocError {
    /// True for failures raised at the network boundary.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. }
                | Self::AuthError { .. }
                | Self::RateLimitExceeded { .. }
                | Self::ApiTimeout { .. }
                | Self::Network { .. }
                | Self::LlmApiError { .. }
        )
    }

    /// True when the endpoint rejected the request size.
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }

    /// True when repeating the same request unchanged may succeed.
    ///
    /// The pipeline never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::ApiTimeout { .. } | Self::Network { .. } => true,
            Self::LlmApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Why an extraction run produced zero entries.
///
/// Always paired with an empty entry list in
/// [`crate::pipeline::parse::ExtractionResult`]; a run never yields a partial
/// list alongside a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionFailure {
    /// The endpoint answered with an HTML page instead of JSON.
    #[error(
        "API returned HTML instead of JSON. Likely causes:\n\
  1. Base URL is incorrect (e.g. missing '/v1' suffix).\n\
  2. Endpoint is a dashboard/landing page, not the API.\n\
  3. A WAF or proxy is blocking the request.\n\
First bytes: {snippet:?}"
    )]
    RoutingMisconfiguration { snippet: String },

    /// The reply could not be coerced into a JSON TOC object.
    #[error("Malformed model reply: {reason}\nContent was: {content:?}")]
    MalformedReply { reason: String, content: String },

    /// The endpoint answered 2xx but with an `error` envelope.
    #[error("Provider returned an error: {message}")]
    ProviderError { message: String },
}

impl ExtractionFailure {
    /// Stable, short identifier for logs and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoutingMisconfiguration { .. } => "routing_misconfiguration",
            Self::MalformedReply { .. } => "malformed_reply",
            Self::ProviderError { .. } => "provider_error",
        }
    }
}
