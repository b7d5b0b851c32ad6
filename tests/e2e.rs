//! End-to-end tests against the real external tools.
//!
//! These tests spawn mmdc, weasyprint and pandoc when they are installed.
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_capabilities -- --nocapture

use md2doc::{
    BackendPolicy, Engine, OutputFormat, RenderConfig, RenderRequest, RenderResult,
};
use std::io::Read;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set and every named program is on PATH.
macro_rules! e2e_skip_unless_ready {
    ($($program:expr),*) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        $(
            if md2doc::process::find_executable($program).is_none() {
                println!("SKIP: '{}' is not installed", $program);
                return;
            }
        )*
    }};
}

const SAMPLE: &str = r#"# Quarterly Report

Revenue grew **12%** while costs stayed *flat*. See [the dashboard](https://example.com/q3?a=1&b=2).

## Pipeline

```mermaid
graph LR
  Markdown --> Parse --> Paginate --> Render
```

## Numbers

| Region | Q2 | Q3 |
|:-------|---:|---:|
| North  | 10 | 12 |
| South  |  8 |  9 |

> Quoted note with `inline code`.

- first
- second
  - nested

```rust
fn main() {
    println!("hello");
}
```
"#;

fn long_sample() -> String {
    let mut md = String::from(SAMPLE);
    for i in 0..80 {
        md.push_str(&format!(
            "\nParagraph {i}. Lorem ipsum dolor sit amet, consectetur adipiscing elit, \
             sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n"
        ));
    }
    md
}

async fn render(config: RenderConfig, markdown: &str, format: OutputFormat) -> RenderResult {
    let engine = Engine::new(config);
    let result = engine
        .render(RenderRequest::new(markdown, format).with_filename("e2e"))
        .await
        .expect("render should succeed");
    println!(
        "  {} via {}: {} bytes, {} pages, {}ms",
        result.filename,
        result.backend,
        result.bytes.len(),
        result.stats.page_count,
        result.stats.total_duration_ms
    );
    result
}

fn zip_entry(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("valid zip");
    let mut entry = archive.by_name(name).expect("entry present");
    let mut s = String::new();
    entry.read_to_string(&mut s).expect("utf-8 entry");
    s
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn test_capabilities() {
    e2e_skip_unless_ready!();
    let caps = md2doc::capabilities();
    println!("{}", serde_json::to_string_pretty(&caps).unwrap());
    assert!(caps.pdf_fallback);
    assert!(caps.docx_fallback);
}

#[tokio::test]
async fn test_weasyprint_pdf() {
    e2e_skip_unless_ready!("weasyprint");
    let result = render(RenderConfig::default(), &long_sample(), OutputFormat::Pdf).await;
    assert_eq!(result.backend, "html-pdf");
    assert!(result.bytes.starts_with(b"%PDF-"));
    assert!(result.stats.page_count > 1);
}

#[tokio::test]
async fn test_pandoc_docx() {
    e2e_skip_unless_ready!("pandoc");
    let result = render(RenderConfig::default(), SAMPLE, OutputFormat::Docx).await;
    assert_eq!(result.backend, "pandoc");
    let document = zip_entry(&result.bytes, "word/document.xml");
    assert!(document.contains("Quarterly Report"));
}

#[tokio::test]
async fn test_mermaid_diagram_is_embedded() {
    e2e_skip_unless_ready!("mmdc");
    let config = RenderConfig::builder()
        .policy(BackendPolicy::in_process_only())
        .build()
        .unwrap();
    let result = render(config, SAMPLE, OutputFormat::Docx).await;
    assert_eq!(result.stats.diagrams_rendered, 1);
    assert_eq!(result.stats.diagrams_failed, 0);
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&result.bytes[..])).unwrap();
    assert!(archive.by_name("word/media/image1.png").is_ok());
}

#[tokio::test]
async fn test_in_process_backends_need_no_tools() {
    e2e_skip_unless_ready!();
    let config = RenderConfig::builder()
        .policy(BackendPolicy::in_process_only())
        .build()
        .unwrap();

    let pdf = render(config.clone(), &long_sample(), OutputFormat::Pdf).await;
    assert_eq!(pdf.backend, "canvas-pdf");
    assert!(pdf.bytes.starts_with(b"%PDF-"));

    let docx = render(config, &long_sample(), OutputFormat::Docx).await;
    assert_eq!(docx.backend, "package-docx");
    let footer = zip_entry(&docx.bytes, "word/footer1.xml");
    assert!(footer.contains("NUMPAGES"));
}

#[tokio::test]
async fn test_render_to_file() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/report.pdf");
    let engine = Engine::new(RenderConfig::default());

    let result = engine
        .render_to_file(RenderRequest::new(SAMPLE, OutputFormat::Pdf), &path)
        .await
        .unwrap();

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written, result.bytes);
    assert!(!dir.path().join("nested/report.pdf.tmp").exists());
}
