//! Result types returned by the extraction and apply entry points.

use crate::error::ExtractionFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything an extraction run produced.
///
/// A diagnosed failure is not an `Err`: `entries` is then empty and
/// `failure` says why. Check [`ExtractionOutput::is_success`] before
/// presenting "no entries" as a genuine result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Raw TOC rows as returned by the model, unvalidated.
    pub entries: Vec<Value>,

    /// Set when the reply could not be turned into entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExtractionFailure>,

    /// 1-based pages that were rendered and sent, in request order.
    pub pages: Vec<usize>,

    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Timing and size figures for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the selection.
    pub pages_requested: usize,
    /// Pages actually rendered (out-of-range ones are skipped).
    pub pages_rendered: usize,
    /// Total base64 bytes of the image attachments.
    pub payload_bytes: usize,
    /// Prompt tokens reported by the endpoint (0 if not reported).
    pub input_tokens: u64,
    /// Completion tokens reported by the endpoint (0 if not reported).
    pub output_tokens: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Summary of an outline written into a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOutline {
    /// Outline items written.
    pub entries: usize,
    /// Rows dropped because a field could not be coerced.
    pub dropped: usize,
    /// Rows whose target page was pinned into the document.
    pub clamped: usize,
    /// Pages in the target document.
    pub page_count: usize,
}
