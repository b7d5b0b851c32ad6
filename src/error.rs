//! Error types for the md2doc library.
//!
//! Two tiers of errors reflect two distinct failure modes:
//!
//! * [`Md2DocError`]: **Fatal**: the render cannot produce a document at
//!   all (every backend failed, bad configuration, output not writable).
//!   Returned as `Err(Md2DocError)` from [`crate::Engine::render`] and the
//!   `render*` helpers.
//!
//! * [`ParseError`], [`DiagramError`], [`BackendError`], [`ToolError`]:
//!   **Non-fatal**: one construct, one diagram or one backend failed, and the
//!   pipeline degrades (plain text, placeholder block, next backend). They are
//!   logged and surfaced in [`crate::output::RenderStats`] or inside
//!   [`Md2DocError::RenderFailed`] once nothing is left to fall back to.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::OutputFormat;

/// All fatal errors returned by the md2doc library.
#[derive(Debug, Error)]
pub enum Md2DocError {
    // ── Render errors ─────────────────────────────────────────────────────
    /// Every backend in the strategy list was skipped or failed.
    #[error("{format} rendering failed: no backend produced a document\n{}", describe_failures(.failures))]
    RenderFailed {
        format: OutputFormat,
        failures: Vec<BackendFailure>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (a blocking task panicked, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Md2DocError {
    /// Stable, machine-readable identifier for the serving layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Md2DocError::RenderFailed { .. } => "render_failed",
            Md2DocError::OutputWriteFailed { .. } => "output_write_failed",
            Md2DocError::InvalidConfig(_) => "invalid_config",
            Md2DocError::Internal(_) => "internal",
        }
    }
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "  (no backends configured)".to_string();
    }
    failures
        .iter()
        .map(|f| format!("  • {}: {}", f.backend, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One entry of the failure list carried by [`Md2DocError::RenderFailed`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendFailure {
    /// Backend name, e.g. `"html-pdf"`.
    pub backend: String,
    pub error: BackendError,
}

/// A single backend could not produce a document.
///
/// The renderer records it and moves to the next strategy.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BackendError {
    /// Capability probe says the backend cannot run; no attempt was made.
    #[error("backend '{backend}' is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// The backend's external tool exceeded its time budget and was killed.
    #[error("backend '{backend}' timed out after {secs}s")]
    Timeout { backend: String, secs: u64 },

    /// The backend ran and failed, or produced malformed output.
    #[error("backend '{backend}' failed: {detail}")]
    Failed { backend: String, detail: String },
}

impl BackendError {
    /// Map a tool failure onto the backend that issued it.
    pub fn from_tool(backend: &str, err: ToolError) -> Self {
        match err {
            ToolError::NotFound { program } => BackendError::Unavailable {
                backend: backend.to_string(),
                reason: format!("'{program}' is not installed"),
            },
            ToolError::Timeout { timeout_ms, .. } => BackendError::Timeout {
                backend: backend.to_string(),
                secs: timeout_ms.div_ceil(1000),
            },
            other => BackendError::Failed {
                backend: backend.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// Failure of one bounded external process run.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ToolError {
    /// The executable could not be found.
    #[error("'{program}' was not found on PATH")]
    NotFound { program: String },

    /// The process could not be started.
    #[error("failed to launch '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// The process ran past its time budget and was killed.
    #[error("'{program}' timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    /// The process exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    /// The process exited successfully but wrote nothing.
    #[error("'{program}' produced no output")]
    MissingOutput { program: String },

    /// Staging input files or collecting output failed.
    #[error("I/O error around '{program}': {detail}")]
    Io { program: String, detail: String },
}

/// A diagram could not be turned into an image.
///
/// The resolver turns this into a placeholder block.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DiagramError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The tool wrote bytes that do not decode as an image.
    #[error("diagram output is not a readable image: {0}")]
    InvalidImage(String),
}

/// A Markdown construct was not understood and was rendered as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ParseError {
    /// A pipe table had no valid separator row.
    #[error("line {line}: table has no valid separator row, rendered as text")]
    TableWithoutSeparator { line: usize },

    /// Some other construct degraded to plain text.
    #[error("line {line}: {construct} kept as plain text")]
    Unsupported { line: usize, construct: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failed_lists_every_backend() {
        let e = Md2DocError::RenderFailed {
            format: OutputFormat::Pdf,
            failures: vec![
                BackendFailure {
                    backend: "html-pdf".into(),
                    error: BackendError::Unavailable {
                        backend: "html-pdf".into(),
                        reason: "'weasyprint' is not installed".into(),
                    },
                },
                BackendFailure {
                    backend: "canvas-pdf".into(),
                    error: BackendError::Failed {
                        backend: "canvas-pdf".into(),
                        detail: "boom".into(),
                    },
                },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("PDF"), "got: {msg}");
        assert!(msg.contains("html-pdf"), "got: {msg}");
        assert!(msg.contains("boom"), "got: {msg}");
        assert_eq!(e.kind(), "render_failed");
    }

    #[test]
    fn timeout_maps_to_backend_timeout() {
        let e = BackendError::from_tool(
            "pandoc",
            ToolError::Timeout {
                program: "pandoc".into(),
                timeout_ms: 1500,
            },
        );
        assert!(matches!(e, BackendError::Timeout { secs: 2, .. }), "got: {e:?}");
    }

    #[test]
    fn missing_tool_maps_to_unavailable() {
        let e = BackendError::from_tool(
            "html-pdf",
            ToolError::NotFound {
                program: "weasyprint".into(),
            },
        );
        assert!(matches!(e, BackendError::Unavailable { .. }));
        assert!(e.to_string().contains("weasyprint"));
    }

    #[test]
    fn diagram_error_is_transparent_over_tool() {
        let e = DiagramError::from(ToolError::NonZeroExit {
            program: "mmdc".into(),
            status: "exit status: 1".into(),
            stderr: "Parse error on line 2".into(),
        });
        assert!(e.to_string().contains("Parse error on line 2"));
    }

    #[test]
    fn parse_error_display() {
        let e = ParseError::TableWithoutSeparator { line: 7 };
        assert!(e.to_string().starts_with("line 7"));
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Md2DocError::InvalidConfig("x".into()).kind(), "invalid_config");
        assert_eq!(Md2DocError::Internal("x".into()).kind(), "internal");
    }
}
