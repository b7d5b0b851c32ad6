//! Render results and statistics.

use crate::config::OutputFormat;
use crate::error::{BackendFailure, ParseError};
use crate::model::{DocumentMeta, Page};
use crate::pipeline::sanitize::sanitize_filename;
use crate::progress::DiagramOutcome;
use serde::Serialize;

/// A finished document.
#[derive(Debug, Clone, Serialize)]
pub struct RenderResult {
    /// The complete file. Never partial.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// Sanitized filename with the format's extension.
    pub filename: String,
    /// Name of the backend that produced `bytes`.
    pub backend: &'static str,
    pub stats: RenderStats,
}

/// Counters and timings for one render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderStats {
    pub page_count: usize,
    pub diagrams_rendered: usize,
    pub diagrams_cached: usize,
    /// Diagrams replaced by a placeholder.
    pub diagrams_failed: usize,
    /// `true` when an earlier backend in the chain was skipped or failed.
    pub fallback_used: bool,
    pub backend_failures: Vec<BackendFailure>,
    /// Constructs that degraded to plain text.
    pub parse_warnings: Vec<String>,
    pub total_duration_ms: u64,
    /// Sanitize through pagination.
    pub layout_duration_ms: u64,
    pub render_duration_ms: u64,
}

impl RenderStats {
    pub(crate) fn count_diagrams(&mut self, outcomes: &[DiagramOutcome]) {
        for outcome in outcomes {
            match outcome {
                DiagramOutcome::Rendered => self.diagrams_rendered += 1,
                DiagramOutcome::Cached => self.diagrams_cached += 1,
                DiagramOutcome::Placeholder(_) => self.diagrams_failed += 1,
            }
        }
    }
}

/// Pages and metadata ready for a backend.
#[derive(Debug, Clone)]
pub struct Layout {
    pub pages: Vec<Page>,
    pub meta: DocumentMeta,
    pub warnings: Vec<ParseError>,
    /// One entry per diagram block, in document order.
    pub diagrams: Vec<DiagramOutcome>,
}

/// Sanitize `requested` and give it the extension for `format`.
pub fn output_filename(requested: &str, format: OutputFormat) -> String {
    format!("{}.{}", sanitize_filename(requested), format.extension())
}
