//! `html-pdf` backend: print HTML through the external HTML→PDF tool.

use super::html::render_html;
use super::{Backend, RenderInput};
use crate::config::BackendKind;
use crate::error::BackendError;
use crate::process::{run_file_tool, FileJob};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPdfBackend;

impl Backend for HtmlPdfBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HtmlPdf
    }

    fn render(&self, input: &RenderInput) -> BoxFuture<'static, Result<Vec<u8>, BackendError>> {
        let input = input.clone();
        let name = self.name();
        Box::pin(async move {
            let config = &input.config;
            let html = render_html(
                &input.pages,
                &input.meta,
                &config.geometry,
                config.base_stylesheet,
                true,
            );
            debug!("Print HTML: {} bytes for {} pages", html.len(), input.pages.len());
            run_file_tool(
                input.runner.as_ref(),
                &config.pdf_tool,
                FileJob {
                    input_name: "document.html",
                    input: html.as_bytes(),
                    output_name: "document.pdf",
                    extra: Vec::new(),
                    timeout: Duration::from_secs(config.pdf_timeout_secs),
                },
            )
            .await
            .map_err(|e| BackendError::from_tool(name, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::process::{ToolInvocation, ToolOutput, ToolRunner};
    use crate::render::test_support::sample_input;
    use std::sync::{Arc, Mutex};

    /// Records the invocation and "converts" by writing a PDF header.
    #[derive(Default)]
    struct FakeWeasy {
        seen: Mutex<Vec<ToolInvocation>>,
        fail: bool,
    }

    impl ToolRunner for FakeWeasy {
        fn run(&self, inv: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            self.seen.lock().unwrap().push(inv.clone());
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(ToolError::Timeout {
                        program: inv.program,
                        timeout_ms: 120_000,
                    });
                }
                let html = std::fs::read_to_string(&inv.args[0]).unwrap();
                assert!(html.contains("<section class=\"page\""));
                std::fs::write(&inv.args[1], b"%PDF-1.7\n%fake\n").unwrap();
                Ok(ToolOutput::default())
            })
        }

        fn is_installed(&self, _program: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn converts_print_html() {
        let runner = Arc::new(FakeWeasy::default());
        let bytes = HtmlPdfBackend
            .render(&sample_input(runner.clone()))
            .await
            .unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "weasyprint");
        assert!(seen[0].args[0].ends_with("document.html"));
        assert_eq!(seen[0].timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn tool_timeout_becomes_backend_timeout() {
        let runner = Arc::new(FakeWeasy {
            fail: true,
            ..Default::default()
        });
        let err = HtmlPdfBackend
            .render(&sample_input(runner))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { secs: 120, .. }), "got: {err:?}");
    }
}
