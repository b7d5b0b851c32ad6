//! Progress-callback trait for per-stage render events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to receive
//! events as a request moves through the pipeline.
//!
//! # Example
//!
//! ```rust
//! use md2doc::{RenderConfig, RenderProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} finished in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(Arc::new(StageCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::OutputFormat;
use std::fmt;
use std::sync::Arc;

/// Pipeline stage reported to [`RenderProgressCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Sanitize,
    Parse,
    Tables,
    Diagrams,
    Build,
    Paginate,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Sanitize => "sanitize",
            Stage::Parse => "parse",
            Stage::Tables => "tables",
            Stage::Diagrams => "diagrams",
            Stage::Build => "build",
            Stage::Paginate => "paginate",
            Stage::Render => "render",
        };
        f.write_str(s)
    }
}

/// How one diagram block was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramOutcome {
    /// Rendered by the diagram tool during this request.
    Rendered,
    /// Served from the diagram cache.
    Cached,
    /// Replaced by a placeholder; carries the failure reason.
    Placeholder(String),
}

/// Called by the render pipeline as a request progresses.
///
/// Implementations must be `Send + Sync`: diagram events fire from
/// concurrently resolving futures, and one engine serves many requests.
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait RenderProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once per diagram block, in document order.
    ///
    /// # Arguments
    /// * `index`  : 0-based position among the request's diagram blocks
    /// * `outcome`: how the block was resolved
    fn on_diagram(&self, index: usize, outcome: &DiagramOutcome) {
        let _ = (index, outcome);
    }

    /// Called just before a backend is attempted.
    fn on_backend_attempt(&self, format: OutputFormat, backend: &str) {
        let _ = (format, backend);
    }

    /// Called when a backend is skipped or fails; the next one will be tried.
    fn on_backend_failed(&self, format: OutputFormat, backend: &str, error: &str) {
        let _ = (format, backend, error);
    }

    /// Called once with the size of the finished document.
    fn on_render_complete(&self, bytes: usize) {
        let _ = bytes;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<Stage>>,
        diagrams: AtomicUsize,
        failures: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl RenderProgressCallback for TrackingCallback {
        fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_diagram(&self, _index: usize, _outcome: &DiagramOutcome) {
            self.diagrams.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_failed(&self, _format: OutputFormat, _backend: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_render_complete(&self, bytes: usize) {
            self.bytes.store(bytes, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Parse);
        cb.on_stage_complete(Stage::Parse, 3);
        cb.on_diagram(0, &DiagramOutcome::Cached);
        cb.on_backend_attempt(OutputFormat::Pdf, "html-pdf");
        cb.on_backend_failed(OutputFormat::Pdf, "html-pdf", "missing");
        cb.on_render_complete(1024);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_complete(Stage::Parse, 1);
        tracker.on_stage_complete(Stage::Paginate, 2);
        tracker.on_diagram(0, &DiagramOutcome::Rendered);
        tracker.on_diagram(1, &DiagramOutcome::Placeholder("timeout".into()));
        tracker.on_backend_failed(OutputFormat::Docx, "pandoc", "exit 1");
        tracker.on_render_complete(2048);

        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::Parse, Stage::Paginate]
        );
        assert_eq!(tracker.diagrams.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.bytes.load(Ordering::SeqCst), 2048);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Diagrams.to_string(), "diagrams");
    }
}
