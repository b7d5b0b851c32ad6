//! # md2doc
//!
//! Render Markdown into paginated PDF or DOCX documents, with Mermaid
//! diagrams, normalized tables, running headers and footers, and page
//! numbers.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Sanitize  strip control/invisible characters, safe filename
//!  ├─ 2. Parse     pulldown-cmark events → raw blocks
//!  ├─ 3. Tables    pipe-table source → Table (separator row → alignment)
//!  ├─ 4. Diagrams  mermaid source → PNG via the diagram CLI, cached by hash
//!  ├─ 5. Build     blocks + title/filename/stylesheet → Document
//!  ├─ 6. Paginate  two-pass layout, header/footer templates resolved
//!  └─ 7. Render    ordered backend chain, one attempt each
//! ```
//!
//! ## Backends
//!
//! | Format | Primary (external tool) | Fallback (in-process) |
//! |--------|-------------------------|------------------------|
//! | PDF    | `html-pdf` (weasyprint) | `canvas-pdf` (pdf-writer) |
//! | DOCX   | `pandoc`                | `package-docx` (zip + quick-xml) |
//!
//! A backend whose tool is missing is skipped without an attempt; a backend
//! that fails hands over to the next one. The in-process fallbacks need no
//! external tools, so a render only fails outright when the policy removes
//! them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2doc::{Engine, OutputFormat, RenderConfig, RenderRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(RenderConfig::default());
//!     println!("{:?}", engine.capabilities());
//!
//!     let request = RenderRequest::new("# Report\n\nHello", OutputFormat::Pdf);
//!     let result = engine.render(request).await?;
//!     eprintln!("{} pages via {}", result.stats.page_count, result.backend);
//!     std::fs::write(&result.filename, &result.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2doc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! md2doc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capability;
pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod render;
pub mod request;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capability::{BackendCapability, CachedProbe, CapabilityProbe, StaticProbe, ToolProbe};
pub use config::{
    BackendKind, BackendPolicy, OutputFormat, PageGeometry, RenderConfig, RenderConfigBuilder,
    ToolCommand,
};
pub use convert::{capabilities, default_engine, render, render_sync, render_to_file, Engine, EngineBuilder};
pub use error::{BackendError, BackendFailure, DiagramError, Md2DocError, ParseError, ToolError};
pub use model::{Block, Document, DocumentMeta, Page, PageItem, Table};
pub use output::{Layout, RenderResult, RenderStats};
pub use pipeline::diagram::DiagramCache;
pub use pipeline::paginate::{HeightEstimator, MetricEstimator};
pub use process::{ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use progress::{DiagramOutcome, NoopProgressCallback, ProgressCallback, RenderProgressCallback, Stage};
pub use request::RenderRequest;
