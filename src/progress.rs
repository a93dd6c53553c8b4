//! Progress-callback trait for extraction-run events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe a
//! run as it renders pages, sends the single model request, and parses the
//! reply. The CLI uses it to drive a spinner; a GUI could forward the events
//! to its own widgets.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdftoc::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_rendered(&self, page_num: usize, width: u32, height: u32) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}: {width}x{height}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .api_key("sk-test")
//!     .progress_callback(Arc::new(CountingCallback { rendered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline at each stage of a run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. A run is sequential, so events arrive in order, but
/// implementations must still be `Send + Sync` because the render stage runs
/// on a blocking thread.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before rendering starts.
    ///
    /// # Arguments
    /// * `requested_pages` — number of pages in the selection
    fn on_render_start(&self, requested_pages: usize) {
        let _ = requested_pages;
    }

    /// Called after each page has been rasterised.
    fn on_page_rendered(&self, page_num: usize, width: u32, height: u32) {
        let _ = (page_num, width, height);
    }

    /// Called just before the model request is sent.
    ///
    /// # Arguments
    /// * `images`        — number of image attachments
    /// * `payload_bytes` — total base64 size of the attachments
    fn on_request_start(&self, images: usize, payload_bytes: usize) {
        let _ = (images, payload_bytes);
    }

    /// Called once the reply has been parsed.
    ///
    /// # Arguments
    /// * `entries` — number of TOC entries recovered
    /// * `failure` — the diagnosis when no entries could be recovered
    fn on_extraction_complete(&self, entries: usize, failure: Option<&str>) {
        let _ = (entries, failure);
    }
}

/// A no-op implementation for callers that don't need progress events.
#[derive(Debug)]
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        rendered: AtomicUsize,
        payload: AtomicUsize,
        failure: Mutex<Option<String>>,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_rendered(&self, _page_num: usize, _width: u32, _height: u32) {
            self.rendered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_request_start(&self, _images: usize, payload_bytes: usize) {
            self.payload.store(payload_bytes, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, _entries: usize, failure: Option<&str>) {
            *self.failure.lock().unwrap() = failure.map(str::to_string);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_render_start(3);
        cb.on_page_rendered(5, 800, 1000);
        cb.on_request_start(3, 120_000);
        cb.on_extraction_complete(0, Some("malformed"));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_rendered(5, 10, 10);
        tracker.on_page_rendered(6, 10, 10);
        tracker.on_request_start(2, 4096);
        tracker.on_extraction_complete(0, Some("routing"));

        assert_eq!(tracker.rendered.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.payload.load(Ordering::SeqCst), 4096);
        assert_eq!(tracker.failure.lock().unwrap().as_deref(), Some("routing"));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_render_start(1);
        cb.on_extraction_complete(12, None);
    }
}
