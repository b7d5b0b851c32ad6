//! `pandoc` backend: convert flow HTML to DOCX with the external converter.
//!
//! The converter gets a generated reference document as `{reference}` so
//! the output carries the running header and a `Page {PAGE} of {NUMPAGES}`
//! footer, which plain HTML cannot express.

use super::docx_package::reference_document;
use super::html::render_html;
use super::{Backend, RenderInput};
use crate::config::BackendKind;
use crate::error::BackendError;
use crate::process::{run_file_tool, FileJob};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct PandocBackend;

impl Backend for PandocBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pandoc
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
                false,
            );
            let reference =
                reference_document(&input.meta, config).map_err(|detail| BackendError::Failed {
                    backend: name.to_string(),
                    detail: format!("reference document: {detail}"),
                })?;
            debug!(
                "Converter input: {} bytes HTML, {} bytes reference document",
                html.len(),
                reference.len()
            );
            run_file_tool(
                input.runner.as_ref(),
                &config.docx_tool,
                FileJob {
                    input_name: "document.html",
                    input: html.as_bytes(),
                    output_name: "document.docx",
                    extra: vec![("{reference}", "reference.docx", reference)],
                    timeout: Duration::from_secs(config.docx_timeout_secs),
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

    /// Checks the staged files and answers on stdout, like `pandoc -o -`.
    #[derive(Default)]
    struct FakePandoc {
        seen: Mutex<Vec<ToolInvocation>>,
        exit_code: Option<i32>,
    }

    impl ToolRunner for FakePandoc {
        fn run(&self, inv: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            self.seen.lock().unwrap().push(inv.clone());
            let exit_code = self.exit_code;
            Box::pin(async move {
                if let Some(status) = exit_code {
                    return Err(ToolError::NonZeroExit {
                        program: inv.program,
                        status: format!("exit status: {status}"),
                        stderr: "pandoc: unknown reader".into(),
                    });
                }
                let reference = inv
                    .args
                    .iter()
                    .find_map(|a| a.strip_prefix("--reference-doc="))
                    .unwrap()
                    .to_string();
                let docx = std::fs::read(reference).unwrap();
                assert!(docx.starts_with(b"PK\x03\x04"));
                let html = std::fs::read_to_string(inv.args.last().unwrap()).unwrap();
                assert!(!html.contains("<section class=\"page\""));
                Ok(ToolOutput {
                    stdout: b"PK\x03\x04converted".to_vec(),
                    ..Default::default()
                })
            })
        }

        fn is_installed(&self, _program: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn converts_flow_html_with_reference_document() {
        let runner = Arc::new(FakePandoc::default());
        let bytes = PandocBackend
            .render(&sample_input(runner.clone()))
            .await
            .unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "pandoc");
        assert_eq!(seen[0].timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn converter_failure_is_backend_failure() {
        let runner = Arc::new(FakePandoc {
            exit_code: Some(64),
            ..Default::default()
        });
        let err = PandocBackend
            .render(&sample_input(runner))
            .await
            .unwrap_err();
        match err {
            BackendError::Failed { backend, detail } => {
                assert_eq!(backend, "pandoc");
                assert!(detail.contains("unknown reader"), "detail: {detail}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
