//! Output backends and the per-format strategy chain.
//!
//! A [`RendererChain`] holds an ordered list of [`Backend`]s for one output
//! format. Backends the capability snapshot rules out are skipped without an
//! attempt; every other backend is tried exactly once, in order, until one
//! returns a well-formed document. When the list is exhausted the chain
//! reports every failure in [`Md2DocError::RenderFailed`].
//!
//! | Backend | Format | How |
//! |---------|--------|-----|
//! | [`pdf_tool::HtmlPdfBackend`] | PDF | print HTML → external HTML→PDF tool |
//! | [`pdf_canvas::CanvasPdfBackend`] | PDF | in-process drawing with `pdf-writer` |
//! | [`docx_tool::PandocBackend`] | DOCX | HTML → external converter |
//! | [`docx_package::PackageDocxBackend`] | DOCX | in-process OOXML package |

pub mod docx_package;
pub mod docx_tool;
pub mod highlight;
pub mod html;
pub mod pdf_canvas;
pub mod pdf_tool;

use crate::capability::BackendCapability;
use crate::config::{BackendKind, OutputFormat, RenderConfig};
use crate::error::{BackendError, BackendFailure, Md2DocError};
use crate::model::{DocumentMeta, Page};
use crate::process::ToolRunner;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a backend needs to produce one document.
///
/// Cheap to clone; backends move a clone into `spawn_blocking` or an async
/// block.
#[derive(Clone)]
pub struct RenderInput {
    pub pages: Arc<[Page]>,
    pub meta: Arc<DocumentMeta>,
    pub config: Arc<RenderConfig>,
    pub runner: Arc<dyn ToolRunner>,
}

/// One way of turning pages into document bytes.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn is_available(&self, capability: &BackendCapability) -> bool {
        capability.supports(self.kind())
    }

    fn render(&self, input: &RenderInput) -> BoxFuture<'static, Result<Vec<u8>, BackendError>>;
}

/// Construct the built-in backend for `kind`.
pub fn backend_for(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::HtmlPdf => Box::new(pdf_tool::HtmlPdfBackend),
        BackendKind::CanvasPdf => Box::new(pdf_canvas::CanvasPdfBackend),
        BackendKind::Pandoc => Box::new(docx_tool::PandocBackend),
        BackendKind::PackageDocx => Box::new(docx_package::PackageDocxBackend),
    }
}

/// A successful chain run.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub backend: &'static str,
    /// Backends skipped or failed before the one that succeeded.
    pub failures: Vec<BackendFailure>,
}

/// Ordered backend strategy for one output format.
pub struct RendererChain {
    format: OutputFormat,
    backends: Vec<Box<dyn Backend>>,
}

impl RendererChain {
    pub fn new(format: OutputFormat, backends: Vec<Box<dyn Backend>>) -> Self {
        Self { format, backends }
    }

    /// Chain for `format` following the configured policy.
    pub fn from_config(format: OutputFormat, config: &RenderConfig) -> Self {
        let backends = config
            .policy
            .for_format(format)
            .iter()
            .map(|&kind| backend_for(kind))
            .collect();
        Self::new(format, backends)
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn render(
        &self,
        input: &RenderInput,
        capability: &BackendCapability,
    ) -> Result<Rendered, Md2DocError> {
        let progress = input.config.progress_callback.as_ref();
        let mut failures: Vec<BackendFailure> = Vec::new();

        for backend in &self.backends {
            let name = backend.name();
            let error = if !backend.is_available(capability) {
                info!("{} backend '{}' unavailable, skipping", self.format, name);
                BackendError::Unavailable {
                    backend: name.to_string(),
                    reason: "disabled by capability probe".into(),
                }
            } else {
                debug!("Trying {} backend '{}'", self.format, name);
                if let Some(cb) = progress {
                    cb.on_backend_attempt(self.format, name);
                }
                match backend.render(input).await {
                    Ok(bytes) if bytes.starts_with(self.format.signature()) => {
                        info!(
                            "{} rendered by '{}' ({} bytes)",
                            self.format,
                            name,
                            bytes.len()
                        );
                        return Ok(Rendered {
                            bytes,
                            backend: name,
                            failures,
                        });
                    }
                    Ok(bytes) => BackendError::Failed {
                        backend: name.to_string(),
                        detail: format!(
                            "output is not a well-formed {} ({} bytes)",
                            self.format,
                            bytes.len()
                        ),
                    },
                    Err(e) => e,
                }
            };

            warn!("{} backend '{}' failed: {}", self.format, name, error);
            if let Some(cb) = progress {
                cb.on_backend_failed(self.format, name, &error.to_string());
            }
            failures.push(BackendFailure {
                backend: name.to_string(),
                error,
            });
        }

        Err(Md2DocError::RenderFailed {
            format: self.format,
            failures,
        })
    }
}

/// Run CPU-bound rendering off the async executor.
pub(crate) async fn blocking<F>(backend: &'static str, f: F) -> Result<Vec<u8>, BackendError>
where
    F: FnOnce() -> Result<Vec<u8>, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Failed {
            backend: backend.to_string(),
            detail: format!("render task panicked: {e}"),
        })?
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::ToolError;
    use crate::model::{Block, InlineRun, PageItem, Table};
    use crate::process::{ToolInvocation, ToolOutput};

    /// Runner for backends that must not spawn anything.
    pub struct NoTools;

    impl ToolRunner for NoTools {
        fn run(&self, inv: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            Box::pin(async move { Err(ToolError::NotFound { program: inv.program }) })
        }

        fn is_installed(&self, _program: &str) -> bool {
            false
        }
    }

    pub fn sample_pages() -> Vec<Page> {
        let table = Table {
            header: vec!["Name".into(), "Qty".into(), "Price".into()],
            rows: vec![
                vec!["Widget".into(), "2".into(), "€3.50".into()],
                vec!["Gadget <b>".into(), "10".into(), "1.00".into()],
            ],
            alignments: vec![
                Default::default(),
                crate::model::Alignment::Right,
                crate::model::Alignment::Center,
            ],
        };
        let first = vec![
            PageItem::Block(Block::Heading {
                level: 1,
                text: "Quarterly Report".into(),
            }),
            PageItem::Block(Block::Paragraph {
                runs: vec![
                    InlineRun::plain("Revenue grew "),
                    InlineRun {
                        text: "12%".into(),
                        bold: true,
                        ..Default::default()
                    },
                    InlineRun::plain(" & costs fell."),
                ],
            }),
            PageItem::TablePart {
                table: table.clone(),
                continued: false,
            },
        ];
        let second = vec![
            PageItem::Block(Block::CodeBlock {
                language: Some("rust".into()),
                text: "fn main() {\n    println!(\"hi\");\n}".into(),
            }),
            PageItem::Block(Block::DiagramPlaceholder {
                source: "graph TD\nA-->B".into(),
                reason: "Flowchart could not be rendered: 'mmdc' was not found on PATH".into(),
            }),
            PageItem::Block(Block::ListItem {
                marker: crate::model::ListMarker::Bullet,
                depth: 0,
                runs: vec![InlineRun::plain("point")],
            }),
            PageItem::Block(Block::Quote {
                runs: vec![InlineRun::plain("quoted")],
            }),
            PageItem::Block(Block::Rule),
            PageItem::TablePart {
                table: table.slice(1..2),
                continued: true,
            },
        ];
        vec![
            Page {
                number: 1,
                total: 2,
                header: "Quarterly Report".into(),
                footer: "Page 1 of 2".into(),
                items: first,
                used_height: 0.0,
            },
            Page {
                number: 2,
                total: 2,
                header: "Quarterly Report".into(),
                footer: "Page 2 of 2".into(),
                items: second,
                used_height: 0.0,
            },
        ]
    }

    pub fn sample_input(runner: Arc<dyn ToolRunner>) -> RenderInput {
        RenderInput {
            pages: Arc::from(sample_pages()),
            meta: Arc::new(DocumentMeta {
                title: "Quarterly Report".into(),
                filename: "report".into(),
                stylesheet: Some("h1 { color: navy; }".into()),
            }),
            config: Arc::new(RenderConfig::default()),
            runner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        kind: BackendKind,
        result: Result<Vec<u8>, BackendError>,
        calls: Arc<AtomicUsize>,
    }

    impl Backend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn render(&self, _input: &RenderInput) -> BoxFuture<'static, Result<Vec<u8>, BackendError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }

    fn scripted(
        kind: BackendKind,
        result: Result<Vec<u8>, BackendError>,
    ) -> (Box<dyn Backend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                kind,
                result,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn failed(name: &str) -> BackendError {
        BackendError::Failed {
            backend: name.into(),
            detail: "boom".into(),
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let (a, a_calls) = scripted(BackendKind::HtmlPdf, Ok(b"%PDF-1.7 a".to_vec()));
        let (b, b_calls) = scripted(BackendKind::CanvasPdf, Ok(b"%PDF-1.7 b".to_vec()));
        let chain = RendererChain::new(OutputFormat::Pdf, vec![a, b]);
        let out = chain
            .render(&sample_input(Arc::new(NoTools)), &BackendCapability::all())
            .await
            .unwrap();
        assert_eq!(out.backend, "html-pdf");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_falls_through_once() {
        let (a, a_calls) = scripted(BackendKind::HtmlPdf, Err(failed("html-pdf")));
        let (b, b_calls) = scripted(BackendKind::CanvasPdf, Ok(b"%PDF-1.7".to_vec()));
        let chain = RendererChain::new(OutputFormat::Pdf, vec![a, b]);
        let out = chain
            .render(&sample_input(Arc::new(NoTools)), &BackendCapability::all())
            .await
            .unwrap();
        assert_eq!(out.backend, "canvas-pdf");
        assert_eq!(out.failures.len(), 1);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_backend_not_attempted() {
        let (a, a_calls) = scripted(BackendKind::HtmlPdf, Ok(b"%PDF-".to_vec()));
        let (b, _) = scripted(BackendKind::CanvasPdf, Ok(b"%PDF-1.7".to_vec()));
        let chain = RendererChain::new(OutputFormat::Pdf, vec![a, b]);
        let out = chain
            .render(
                &sample_input(Arc::new(NoTools)),
                &BackendCapability::in_process_only(),
            )
            .await
            .unwrap();
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(out.backend, "canvas-pdf");
        assert!(matches!(out.failures[0].error, BackendError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn malformed_output_counts_as_failure() {
        let (a, _) = scripted(BackendKind::Pandoc, Ok(b"<html>".to_vec()));
        let chain = RendererChain::new(OutputFormat::Docx, vec![a]);
        let err = chain
            .render(&sample_input(Arc::new(NoTools)), &BackendCapability::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "render_failed");
        assert!(err.to_string().contains("well-formed DOCX"), "got: {err}");
    }

    #[tokio::test]
    async fn exhausted_chain_lists_every_failure() {
        let (a, _) = scripted(BackendKind::HtmlPdf, Err(failed("html-pdf")));
        let (b, _) = scripted(BackendKind::CanvasPdf, Err(failed("canvas-pdf")));
        let chain = RendererChain::new(OutputFormat::Pdf, vec![a, b]);
        let err = chain
            .render(&sample_input(Arc::new(NoTools)), &BackendCapability::all())
            .await
            .unwrap_err();
        match err {
            Md2DocError::RenderFailed { format, failures } => {
                assert_eq!(format, OutputFormat::Pdf);
                let names: Vec<_> = failures.iter().map(|f| f.backend.as_str()).collect();
                assert_eq!(names, vec!["html-pdf", "canvas-pdf"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn chain_follows_policy() {
        let chain = RendererChain::from_config(OutputFormat::Docx, &RenderConfig::default());
        assert_eq!(chain.backend_names(), vec!["pandoc", "package-docx"]);
    }
}
