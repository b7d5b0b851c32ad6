//! Backend capability probing.
//!
//! A [`BackendCapability`] snapshot says which backends can run right now.
//! The default probe looks the configured executables up on `PATH` through
//! the engine's [`ToolRunner`]; [`CachedProbe`] computes the snapshot once
//! and reuses it for the lifetime of the engine.

use crate::config::{BackendKind, RenderConfig};
use crate::process::ToolRunner;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Which backends are usable.
///
/// "Primary" refers to the backends that shell out to an external converter
/// (`html-pdf`, `pandoc`); "fallback" to the in-process ones
/// (`canvas-pdf`, `package-docx`), regardless of their position in the
/// configured [`crate::config::BackendPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendCapability {
    pub diagram_tool: bool,
    pub pdf_primary: bool,
    pub docx_primary: bool,
    pub pdf_fallback: bool,
    pub docx_fallback: bool,
}

impl BackendCapability {
    /// Everything available.
    pub fn all() -> Self {
        Self {
            diagram_tool: true,
            pdf_primary: true,
            docx_primary: true,
            pdf_fallback: true,
            docx_fallback: true,
        }
    }

    /// No external tools; in-process backends only.
    pub fn in_process_only() -> Self {
        Self {
            pdf_fallback: true,
            docx_fallback: true,
            ..Self::default()
        }
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::HtmlPdf => self.pdf_primary,
            BackendKind::CanvasPdf => self.pdf_fallback,
            BackendKind::Pandoc => self.docx_primary,
            BackendKind::PackageDocx => self.docx_fallback,
        }
    }
}

/// Computes a [`BackendCapability`] snapshot.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> BackendCapability;
}

/// Probes the configured tool executables through a [`ToolRunner`].
pub struct ToolProbe {
    runner: Arc<dyn ToolRunner>,
    diagram: String,
    pdf: String,
    docx: String,
}

impl ToolProbe {
    pub fn new(runner: Arc<dyn ToolRunner>, config: &RenderConfig) -> Self {
        Self {
            runner,
            diagram: config.diagram_tool.program.clone(),
            pdf: config.pdf_tool.program.clone(),
            docx: config.docx_tool.program.clone(),
        }
    }
}

impl CapabilityProbe for ToolProbe {
    fn probe(&self) -> BackendCapability {
        let caps = BackendCapability {
            diagram_tool: self.runner.is_installed(&self.diagram),
            pdf_primary: self.runner.is_installed(&self.pdf),
            docx_primary: self.runner.is_installed(&self.docx),
            pdf_fallback: true,
            docx_fallback: true,
        };
        info!(
            "Capabilities: diagram={} ({}), pdf_primary={} ({}), docx_primary={} ({})",
            caps.diagram_tool,
            self.diagram,
            caps.pdf_primary,
            self.pdf,
            caps.docx_primary,
            self.docx
        );
        caps
    }
}

/// Runs the inner probe once and serves the snapshot afterwards.
pub struct CachedProbe<P> {
    inner: P,
    snapshot: OnceCell<BackendCapability>,
}

impl<P: CapabilityProbe> CachedProbe<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            snapshot: OnceCell::new(),
        }
    }
}

impl<P: CapabilityProbe> CapabilityProbe for CachedProbe<P> {
    fn probe(&self) -> BackendCapability {
        *self.snapshot.get_or_init(|| self.inner.probe())
    }
}

/// Always reports the same snapshot. Useful for tests and for forcing a
/// backend off.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub BackendCapability);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> BackendCapability {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::process::{ToolInvocation, ToolOutput};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OnlyMmdc;

    impl ToolRunner for OnlyMmdc {
        fn run(&self, inv: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            Box::pin(async move { Err(ToolError::NotFound { program: inv.program }) })
        }

        fn is_installed(&self, program: &str) -> bool {
            program == "mmdc"
        }
    }

    struct CountingProbe(AtomicUsize);

    impl CapabilityProbe for CountingProbe {
        fn probe(&self) -> BackendCapability {
            self.0.fetch_add(1, Ordering::SeqCst);
            BackendCapability::all()
        }
    }

    #[test]
    fn tool_probe_checks_configured_programs() {
        let probe = ToolProbe::new(Arc::new(OnlyMmdc), &RenderConfig::default());
        let caps = probe.probe();
        assert!(caps.diagram_tool);
        assert!(!caps.pdf_primary);
        assert!(!caps.docx_primary);
        assert!(caps.pdf_fallback && caps.docx_fallback);
    }

    #[test]
    fn cached_probe_runs_once() {
        let cached = CachedProbe::new(CountingProbe(AtomicUsize::new(0)));
        for _ in 0..5 {
            assert_eq!(cached.probe(), BackendCapability::all());
        }
        assert_eq!(cached.inner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn supports_maps_kinds() {
        let caps = BackendCapability::in_process_only();
        assert!(!caps.supports(BackendKind::HtmlPdf));
        assert!(caps.supports(BackendKind::CanvasPdf));
        assert!(!caps.supports(BackendKind::Pandoc));
        assert!(caps.supports(BackendKind::PackageDocx));
    }

    #[test]
    fn serializes_as_flat_booleans() {
        let json = serde_json::to_value(BackendCapability::in_process_only()).unwrap();
        assert_eq!(json["pdf_fallback"], true);
        assert_eq!(json["diagram_tool"], false);
    }
}
