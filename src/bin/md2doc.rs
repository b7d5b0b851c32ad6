//! CLI binary for md2doc.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RenderConfig`, renders one Markdown file and writes the document.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use md2doc::{
    BackendCapability, BackendPolicy, DiagramOutcome, Engine, OutputFormat, ProgressCallback,
    RenderConfig, RenderProgressCallback, RenderRequest, Stage, ToolCommand,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner naming the current stage, plus a log line
/// per diagram and per failed backend.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("md2doc");
        bar.set_message("starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_diagram(&self, index: usize, outcome: &DiagramOutcome) {
        let line = match outcome {
            DiagramOutcome::Rendered => format!("  {} diagram {}  {}", green("✓"), index + 1, dim("rendered")),
            DiagramOutcome::Cached => format!("  {} diagram {}  {}", green("✓"), index + 1, dim("cached")),
            DiagramOutcome::Placeholder(reason) => {
                format!("  {} diagram {}  {}", yellow("⚠"), index + 1, reason)
            }
        };
        self.bar.println(line);
    }

    fn on_backend_attempt(&self, format: OutputFormat, backend: &str) {
        self.bar.set_message(format!("{format} via {backend}"));
    }

    fn on_backend_failed(&self, _format: OutputFormat, backend: &str, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            let head: String = error.chars().take(99).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), backend, dim(&msg)));
    }

    fn on_render_complete(&self, _bytes: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown to PDF next to the input (report.pdf)
  md2doc report.md

  # DOCX with custom header and footer
  md2doc report.md -o report.docx --header "{title}" --footer "{filename}: {page}/{pages}"

  # Read stdin, write stdout
  cat notes.md | md2doc - --format pdf -o - > notes.pdf

  # Use only the in-process backends
  md2doc --no-primary report.md

  # What can this machine render?
  md2doc --capabilities --json

TEMPLATE PLACEHOLDERS (--header / --footer):
  {page}  {pages}  {title}  {filename}

TOOL PLACEHOLDERS (--diagram-tool / --pdf-tool / --docx-tool):
  {input}  {output}  {reference} (docx only)
  A bare program name keeps the default arguments.

EXTERNAL TOOLS (optional; in-process fallbacks are used when absent):
  mmdc        Mermaid diagrams     npm install -g @mermaid-js/mermaid-cli
  weasyprint  HTML → PDF           pip install weasyprint
  pandoc      HTML → DOCX          https://pandoc.org/installing.html
"#;

/// Render Markdown to PDF or DOCX.
#[derive(Parser, Debug)]
#[command(
    name = "md2doc",
    version,
    about = "Render Markdown to paginated PDF or DOCX",
    long_about = "Render Markdown to paginated PDF or DOCX documents with Mermaid diagrams, \
normalized tables, running headers and footers, and page numbers. External tools are used \
when installed; in-process renderers take over when they are not.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file, or `-` for stdin.
    #[arg(required_unless_present = "capabilities")]
    input: Option<PathBuf>,

    /// Output file, or `-` for stdout. Default: input name with the format's extension.
    #[arg(short, long, env = "MD2DOC_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format. Default: from the output extension, else pdf.
    #[arg(short, long, env = "MD2DOC_FORMAT", value_enum)]
    format: Option<FormatArg>,

    /// CSS file applied by the HTML-based backends.
    #[arg(long, env = "MD2DOC_CSS")]
    css: Option<PathBuf>,

    /// Running header template.
    #[arg(long, env = "MD2DOC_HEADER")]
    header: Option<String>,

    /// Running footer template.
    #[arg(long, env = "MD2DOC_FOOTER")]
    footer: Option<String>,

    /// Diagram tool command line, e.g. "mmdc" or "mmdc -i {input} -o {output}".
    #[arg(long, env = "MD2DOC_DIAGRAM_TOOL")]
    diagram_tool: Option<String>,

    /// HTML→PDF tool command line.
    #[arg(long, env = "MD2DOC_PDF_TOOL")]
    pdf_tool: Option<String>,

    /// HTML→DOCX tool command line.
    #[arg(long, env = "MD2DOC_DOCX_TOOL")]
    docx_tool: Option<String>,

    /// Per-diagram timeout in seconds.
    #[arg(long, env = "MD2DOC_DIAGRAM_TIMEOUT", default_value_t = 30)]
    diagram_timeout: u64,

    /// Timeout for the external PDF/DOCX converters, in seconds.
    #[arg(long, env = "MD2DOC_CONVERT_TIMEOUT", default_value_t = 120)]
    convert_timeout: u64,

    /// Number of diagrams rendered concurrently.
    #[arg(long, env = "MD2DOC_DIAGRAM_CONCURRENCY", default_value_t = 4)]
    diagram_concurrency: usize,

    /// Skip the external-tool backends and render in-process.
    #[arg(long, env = "MD2DOC_NO_PRIMARY")]
    no_primary: bool,

    /// Print which backends are usable and exit.
    #[arg(long)]
    capabilities: bool,

    /// Print a JSON summary (or capabilities) on stdout.
    #[arg(long, env = "MD2DOC_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MD2DOC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MD2DOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MD2DOC_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Pdf,
    Docx,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Pdf => OutputFormat::Pdf,
            FormatArg::Docx => OutputFormat::Docx,
        }
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let writes_stdout = cli.json || cli.output.as_deref().is_some_and(is_stdio);
    let show_progress = !cli.quiet && !cli.no_progress && !cli.capabilities && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RenderProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let engine = Engine::new(config);

    // ── Capabilities mode ────────────────────────────────────────────────
    if cli.capabilities {
        let caps = engine.capabilities();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&caps).context("Failed to serialize capabilities")?
            );
        } else {
            print_capabilities(&caps, engine.config());
        }
        return Ok(());
    }

    // ── Read input ───────────────────────────────────────────────────────
    let input = cli.input.clone().context("An input file is required")?;
    let markdown = if is_stdio(&input) {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read Markdown from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(&input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?
    };
    let stylesheet = match cli.css {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read stylesheet {}", path.display()))?,
        ),
        None => None,
    };

    let format = resolve_format(cli.format, cli.output.as_deref());
    let stem = input
        .file_stem()
        .filter(|_| !is_stdio(&input))
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let mut request = RenderRequest::new(markdown, format).with_filename(stem);
    if let Some(css) = stylesheet {
        request = request.with_stylesheet(css);
    }

    // ── Render ───────────────────────────────────────────────────────────
    let default_name = md2doc::output::output_filename(&request.filename, format);
    let output_path = match cli.output {
        Some(ref p) => p.clone(),
        None if is_stdio(&input) => PathBuf::from(default_name),
        None => input.with_file_name(default_name),
    };

    let result = if is_stdio(&output_path) {
        let result = engine.render(request).await.context("Rendering failed")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&result.bytes)
            .context("Failed to write to stdout")?;
        result
    } else {
        engine
            .render_to_file(request, &output_path)
            .await
            .context("Rendering failed")?
    };

    // ── Summary ──────────────────────────────────────────────────────────
    if cli.json && !is_stdio(&output_path) {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if !cli.quiet && !writes_stdout {
        let stats = &result.stats;
        eprintln!(
            "{}  {} pages  {}  {}ms  →  {}",
            if stats.diagrams_failed == 0 && stats.parse_warnings.is_empty() {
                green("✔")
            } else {
                yellow("⚠")
            },
            stats.page_count,
            dim(&format!("via {}", result.backend)),
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        if stats.diagrams_failed > 0 {
            eprintln!("   {} diagram(s) rendered as placeholders", stats.diagrams_failed);
        }
        for warning in &stats.parse_warnings {
            eprintln!("   {}", dim(warning));
        }
    }

    Ok(())
}

/// Format from `--format`, else from the output extension, else PDF.
fn resolve_format(arg: Option<FormatArg>, output: Option<&Path>) -> OutputFormat {
    if let Some(f) = arg {
        return f.into();
    }
    output
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse::<OutputFormat>().ok())
        .unwrap_or(OutputFormat::Pdf)
}

/// `"prog"` keeps the default arguments; `"prog a b"` replaces them.
fn parse_tool(spec: &str, default: &ToolCommand) -> Result<ToolCommand> {
    let mut parts = spec.split_whitespace();
    let program = parts
        .next()
        .with_context(|| format!("Empty tool command '{spec}'"))?;
    let args: Vec<&str> = parts.collect();
    Ok(if args.is_empty() {
        default.clone().with_program(program)
    } else {
        ToolCommand::new(program, args)
    })
}

/// Map CLI args to `RenderConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RenderConfig> {
    let defaults = RenderConfig::default();
    let mut builder = RenderConfig::builder()
        .diagram_timeout_secs(cli.diagram_timeout)
        .pdf_timeout_secs(cli.convert_timeout)
        .docx_timeout_secs(cli.convert_timeout)
        .diagram_concurrency(cli.diagram_concurrency);

    if let Some(ref spec) = cli.diagram_tool {
        builder = builder.diagram_tool(parse_tool(spec, &defaults.diagram_tool)?);
    }
    if let Some(ref spec) = cli.pdf_tool {
        builder = builder.pdf_tool(parse_tool(spec, &defaults.pdf_tool)?);
    }
    if let Some(ref spec) = cli.docx_tool {
        builder = builder.docx_tool(parse_tool(spec, &defaults.docx_tool)?);
    }
    if let Some(ref header) = cli.header {
        builder = builder.header_template(header.clone());
    }
    if let Some(ref footer) = cli.footer {
        builder = builder.footer_template(footer.clone());
    }
    if cli.no_primary {
        builder = builder.policy(BackendPolicy::in_process_only());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_capabilities(caps: &BackendCapability, config: &RenderConfig) {
    let mark = |ok: bool| if ok { green("✓") } else { red("✗") };
    println!("{}", bold("Backends"));
    println!(
        "  {} diagram tool   {}",
        mark(caps.diagram_tool),
        dim(&config.diagram_tool.program)
    );
    println!(
        "  {} pdf primary    {}",
        mark(caps.pdf_primary),
        dim(&config.pdf_tool.program)
    );
    println!("  {} pdf fallback   {}", mark(caps.pdf_fallback), dim("in-process"));
    println!(
        "  {} docx primary   {}",
        mark(caps.docx_primary),
        dim(&config.docx_tool.program)
    );
    println!("  {} docx fallback  {}", mark(caps.docx_fallback), dim("in-process"));
}
