//! The render engine.
//!
//! [`Engine`] owns the state shared between requests (configuration, tool
//! runner, diagram cache, capability snapshot, height estimator) and runs one
//! request end to end:
//!
//! ```text
//! sanitize → parse → tables → diagrams → build → paginate → backend chain
//! ```
//!
//! Each request is otherwise independent. Dropping the future returned by
//! [`Engine::render`] kills any external tool still running for it and no
//! later stage runs.
//!
//! The free functions at the bottom use a lazily-created process-wide engine
//! with the default configuration, for callers that do not inject state.

use crate::capability::{BackendCapability, CachedProbe, CapabilityProbe, ToolProbe};
use crate::config::RenderConfig;
use crate::error::{Md2DocError, ParseError};
use crate::output::{output_filename, Layout, RenderResult, RenderStats};
use crate::pipeline::diagram::{DiagramCache, DiagramResolver};
use crate::pipeline::paginate::{HeightEstimator, MetricEstimator, Paginator};
use crate::pipeline::{build, parse, sanitize, table};
use crate::process::{ProcessRunner, ToolRunner};
use crate::progress::Stage;
use crate::render::{RenderInput, RendererChain};
use crate::request::RenderRequest;
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Renders Markdown requests into PDF or DOCX documents.
///
/// Cheap to clone; clones share the cache and capability snapshot.
///
/// ```rust,no_run
/// use md2doc::{Engine, OutputFormat, RenderConfig, RenderRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Engine::new(RenderConfig::default());
/// let request = RenderRequest::new("# Hello\n\nWorld", OutputFormat::Pdf);
/// let result = engine.render(request).await?;
/// std::fs::write(&result.filename, &result.bytes)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    config: Arc<RenderConfig>,
    runner: Arc<dyn ToolRunner>,
    cache: Arc<DiagramCache>,
    probe: Arc<dyn CapabilityProbe>,
    estimator: Arc<dyn HeightEstimator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cached_diagrams", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine with real child processes and a probe that runs once.
    pub fn new(config: RenderConfig) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: RenderConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DiagramCache> {
        &self.cache
    }

    /// Which backends are usable, without rendering anything.
    pub fn capabilities(&self) -> BackendCapability {
        self.probe.probe()
    }

    fn stage_start(&self, stage: Stage) -> Instant {
        debug!("Stage {} started", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
        Instant::now()
    }

    fn stage_complete(&self, stage: Stage, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!("Stage {} finished in {}ms", stage, elapsed_ms);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, elapsed_ms);
        }
    }

    /// Run every stage up to and including pagination.
    pub async fn layout(&self, request: &RenderRequest) -> Result<Layout, Md2DocError> {
        let config = &self.config;
        let capability = self.capabilities();

        // ── Sanitize ─────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Sanitize);
        let markdown = sanitize::clean_text(&request.markdown);
        let stylesheet = request.stylesheet.as_deref().map(sanitize::clean_text);
        let filename = sanitize::sanitize_filename(&request.filename);
        self.stage_complete(Stage::Sanitize, t);

        // ── Parse ────────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Parse);
        let parsed = parse::parse_markdown(&markdown, config);
        let mut warnings: Vec<ParseError> = parsed.warnings;
        for w in &warnings {
            warn!("{}", w);
        }
        self.stage_complete(Stage::Parse, t);

        // ── Tables ───────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Tables);
        let (pending, table_warnings) = table::normalize_tables(parsed.blocks);
        warnings.extend(table_warnings);
        self.stage_complete(Stage::Tables, t);

        // ── Diagrams ─────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Diagrams);
        let resolver = DiagramResolver {
            runner: self.runner.as_ref(),
            cache: self.cache.as_ref(),
            config: config.as_ref(),
            tool_available: capability.diagram_tool,
        };
        let resolved = resolver.resolve(pending).await;
        if let Some(ref cb) = config.progress_callback {
            for (i, outcome) in resolved.outcomes.iter().enumerate() {
                cb.on_diagram(i, outcome);
            }
        }
        self.stage_complete(Stage::Diagrams, t);

        // ── Build ────────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Build);
        let document = build::build_document(resolved.blocks, &filename, stylesheet);
        let meta = document.meta.clone();
        self.stage_complete(Stage::Build, t);

        // ── Paginate (CPU-bound) ─────────────────────────────────────────
        let t = self.stage_start(Stage::Paginate);
        let paginate_config = Arc::clone(config);
        let estimator = Arc::clone(&self.estimator);
        let pages = tokio::task::spawn_blocking(move || {
            Paginator {
                geometry: &paginate_config.geometry,
                header_template: &paginate_config.header_template,
                footer_template: &paginate_config.footer_template,
                estimator: estimator.as_ref(),
            }
            .paginate(document)
        })
        .await
        .map_err(|e| Md2DocError::Internal(format!("pagination task failed: {e}")))?;
        self.stage_complete(Stage::Paginate, t);

        info!(
            "Laid out '{}': {} pages, {} diagrams, {} warnings",
            meta.title,
            pages.len(),
            resolved.outcomes.len(),
            warnings.len()
        );
        Ok(Layout {
            pages,
            meta,
            warnings,
            diagrams: resolved.outcomes,
        })
    }

    /// Render one request to a complete document.
    ///
    /// # Errors
    /// [`Md2DocError::RenderFailed`] when every backend for the requested
    /// format was skipped or failed. Parse problems and diagram failures
    /// never fail the request; they are reported in
    /// [`RenderResult::stats`].
    pub async fn render(&self, request: RenderRequest) -> Result<RenderResult, Md2DocError> {
        let total_start = Instant::now();
        info!(
            "Rendering {} '{}' ({} bytes of Markdown)",
            request.format,
            request.filename,
            request.markdown.len()
        );

        let layout = self.layout(&request).await?;
        let layout_duration_ms = total_start.elapsed().as_millis() as u64;

        let mut stats = RenderStats {
            page_count: layout.pages.len(),
            parse_warnings: layout.warnings.iter().map(|w| w.to_string()).collect(),
            layout_duration_ms,
            ..Default::default()
        };
        stats.count_diagrams(&layout.diagrams);

        // ── Dispatch ─────────────────────────────────────────────────────
        let t = self.stage_start(Stage::Render);
        let chain = RendererChain::from_config(request.format, &self.config);
        let input = RenderInput {
            pages: Arc::from(layout.pages),
            meta: Arc::new(layout.meta),
            config: Arc::clone(&self.config),
            runner: Arc::clone(&self.runner),
        };
        let rendered = chain.render(&input, &self.capabilities()).await?;
        stats.render_duration_ms = t.elapsed().as_millis() as u64;
        self.stage_complete(Stage::Render, t);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_render_complete(rendered.bytes.len());
        }

        stats.fallback_used = !rendered.failures.is_empty();
        stats.backend_failures = rendered.failures;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Rendered {} pages with '{}' in {}ms ({} bytes)",
            stats.page_count,
            rendered.backend,
            stats.total_duration_ms,
            rendered.bytes.len()
        );

        Ok(RenderResult {
            bytes: rendered.bytes,
            content_type: request.format.content_type(),
            filename: output_filename(&request.filename, request.format),
            backend: rendered.backend,
            stats,
        })
    }

    /// Render and write the document to `path`.
    ///
    /// Uses atomic write (temp file + rename) so a failed render or write
    /// never leaves a partial file behind.
    pub async fn render_to_file(
        &self,
        request: RenderRequest,
        path: impl AsRef<Path>,
    ) -> Result<RenderResult, Md2DocError> {
        let result = self.render(request).await?;
        let path = path.as_ref();
        let write_err = |e: std::io::Error| Md2DocError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, &result.bytes)
            .await
            .map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }
        debug!("Wrote {} bytes to {}", result.bytes.len(), path.display());
        Ok(result)
    }

    /// Blocking wrapper around [`Engine::render`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from
    /// inside an async context.
    pub fn render_sync(&self, request: RenderRequest) -> Result<RenderResult, Md2DocError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| Md2DocError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.render(request))
    }
}

/// Builder for an [`Engine`] with injected collaborators.
pub struct EngineBuilder {
    config: RenderConfig,
    runner: Option<Arc<dyn ToolRunner>>,
    cache: Option<Arc<DiagramCache>>,
    probe: Option<Arc<dyn CapabilityProbe>>,
    estimator: Option<Arc<dyn HeightEstimator>>,
}

impl EngineBuilder {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            runner: None,
            cache: None,
            probe: None,
            estimator: None,
        }
    }

    /// Runs external tools. Default: [`ProcessRunner`].
    pub fn runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Share a diagram cache between engines. Default: a fresh cache.
    pub fn cache(mut self, cache: Arc<DiagramCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Default: [`ToolProbe`] over the runner, cached after the first call.
    pub fn probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Default: [`MetricEstimator`] for the configured page geometry.
    pub fn estimator(mut self, estimator: Arc<dyn HeightEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn build(self) -> Engine {
        let config = Arc::new(self.config);
        let runner: Arc<dyn ToolRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(ProcessRunner),
        };
        let probe: Arc<dyn CapabilityProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(CachedProbe::new(ToolProbe::new(Arc::clone(&runner), &config))),
        };
        let estimator: Arc<dyn HeightEstimator> = match self.estimator {
            Some(estimator) => estimator,
            None => Arc::new(MetricEstimator::new(&config.geometry)),
        };
        Engine {
            cache: self.cache.unwrap_or_default(),
            config,
            runner,
            probe,
            estimator,
        }
    }
}

// ── Process-wide default engine ──────────────────────────────────────────

static DEFAULT_ENGINE: Lazy<Engine> = Lazy::new(|| Engine::new(RenderConfig::default()));

/// The shared engine used by the free functions below.
pub fn default_engine() -> &'static Engine {
    &DEFAULT_ENGINE
}

/// Render with the default engine.
pub async fn render(request: RenderRequest) -> Result<RenderResult, Md2DocError> {
    DEFAULT_ENGINE.render(request).await
}

/// Render with the default engine and write atomically to `path`.
pub async fn render_to_file(
    request: RenderRequest,
    path: impl AsRef<Path>,
) -> Result<RenderResult, Md2DocError> {
    DEFAULT_ENGINE.render_to_file(request, path).await
}

/// Blocking render with the default engine.
pub fn render_sync(request: RenderRequest) -> Result<RenderResult, Md2DocError> {
    DEFAULT_ENGINE.render_sync(request)
}

/// Capability snapshot of the default engine.
pub fn capabilities() -> BackendCapability {
    DEFAULT_ENGINE.capabilities()
}
