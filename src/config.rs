//! Configuration types for Markdown-to-document rendering.
//!
//! All rendering behaviour is controlled through [`RenderConfig`], built via
//! its [`RenderConfigBuilder`]. External tools, time budgets, page geometry,
//! running header/footer templates and the per-format backend order all live
//! in one struct so an [`crate::Engine`] can be shared across requests.

use crate::error::Md2DocError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configuration for rendering Markdown into PDF or DOCX.
///
/// Built via [`RenderConfig::builder()`] or using [`RenderConfig::default()`].
///
/// # Example
/// ```rust
/// use md2doc::RenderConfig;
///
/// let config = RenderConfig::builder()
///     .diagram_timeout_secs(10)
///     .footer_template("{page} / {pages}")
///     .build()
///     .unwrap();
/// assert_eq!(config.diagram_timeout_secs, 10);
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Diagram CLI. Placeholders: `{input}`, `{output}`. Default: `mmdc`.
    pub diagram_tool: ToolCommand,

    /// HTML→PDF CLI for the `html-pdf` backend. Default: `weasyprint`.
    pub pdf_tool: ToolCommand,

    /// Document-conversion CLI for the `pandoc` backend. Additional
    /// placeholder: `{reference}` (generated reference document). Default: `pandoc`.
    pub docx_tool: ToolCommand,

    /// Per-diagram time budget in seconds. Default: 30.
    pub diagram_timeout_secs: u64,

    /// Time budget for one HTML→PDF conversion in seconds. Default: 120.
    pub pdf_timeout_secs: u64,

    /// Time budget for one DOCX conversion in seconds. Default: 120.
    pub docx_timeout_secs: u64,

    /// Fenced-code language tags treated as diagrams (case-insensitive).
    /// Default: `mermaid`, `mmd`.
    pub diagram_languages: Vec<String>,

    /// Maximum diagrams rendered at once within one request. Default: 4.
    pub diagram_concurrency: usize,

    /// Page size and margins. Default: A4, 72 pt sides, 100 pt top/bottom.
    pub geometry: PageGeometry,

    /// Running header. Placeholders: `{page}`, `{pages}`, `{title}`,
    /// `{filename}`. Default: `"{title}"`.
    pub header_template: String,

    /// Running footer, same placeholders. Default: `"Page {page} of {pages}"`.
    pub footer_template: String,

    /// Backend order per output format.
    pub policy: BackendPolicy,

    /// Include the built-in stylesheet before the user stylesheet. Default: true.
    pub base_stylesheet: bool,

    /// Optional per-stage progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            diagram_tool: ToolCommand::new(
                "mmdc",
                [
                    "-i",
                    "{input}",
                    "-o",
                    "{output}",
                    "--width",
                    "800",
                    "--height",
                    "600",
                    "--backgroundColor",
                    "white",
                ],
            ),
            pdf_tool: ToolCommand::new("weasyprint", ["{input}", "{output}"]),
            docx_tool: ToolCommand::new(
                "pandoc",
                [
                    "-f",
                    "html",
                    "-t",
                    "docx",
                    "--reference-doc={reference}",
                    "-o",
                    "{output}",
                    "{input}",
                ],
            ),
            diagram_timeout_secs: 30,
            pdf_timeout_secs: 120,
            docx_timeout_secs: 120,
            diagram_languages: vec!["mermaid".into(), "mmd".into()],
            diagram_concurrency: 4,
            geometry: PageGeometry::default(),
            header_template: "{title}".into(),
            footer_template: "Page {page} of {pages}".into(),
            policy: BackendPolicy::default(),
            base_stylesheet: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("diagram_tool", &self.diagram_tool)
            .field("pdf_tool", &self.pdf_tool)
            .field("docx_tool", &self.docx_tool)
            .field("diagram_timeout_secs", &self.diagram_timeout_secs)
            .field("pdf_timeout_secs", &self.pdf_timeout_secs)
            .field("docx_timeout_secs", &self.docx_timeout_secs)
            .field("diagram_languages", &self.diagram_languages)
            .field("diagram_concurrency", &self.diagram_concurrency)
            .field("geometry", &self.geometry)
            .field("header_template", &self.header_template)
            .field("footer_template", &self.footer_template)
            .field("policy", &self.policy)
            .field("base_stylesheet", &self.base_stylesheet)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether a fenced-code language tag marks a diagram.
    pub fn is_diagram_language(&self, tag: &str) -> bool {
        let tag = tag.trim();
        self.diagram_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(tag))
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn diagram_tool(mut self, tool: ToolCommand) -> Self {
        self.config.diagram_tool = tool;
        self
    }

    pub fn pdf_tool(mut self, tool: ToolCommand) -> Self {
        self.config.pdf_tool = tool;
        self
    }

    pub fn docx_tool(mut self, tool: ToolCommand) -> Self {
        self.config.docx_tool = tool;
        self
    }

    pub fn diagram_timeout_secs(mut self, secs: u64) -> Self {
        self.config.diagram_timeout_secs = secs;
        self
    }

    pub fn pdf_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pdf_timeout_secs = secs;
        self
    }

    pub fn docx_timeout_secs(mut self, secs: u64) -> Self {
        self.config.docx_timeout_secs = secs;
        self
    }

    pub fn diagram_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.diagram_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn diagram_concurrency(mut self, n: usize) -> Self {
        self.config.diagram_concurrency = n.max(1);
        self
    }

    pub fn geometry(mut self, geometry: PageGeometry) -> Self {
        self.config.geometry = geometry;
        self
    }

    pub fn header_template(mut self, template: impl Into<String>) -> Self {
        self.config.header_template = template.into();
        self
    }

    pub fn footer_template(mut self, template: impl Into<String>) -> Self {
        self.config.footer_template = template.into();
        self
    }

    pub fn policy(mut self, policy: BackendPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn base_stylesheet(mut self, v: bool) -> Self {
        self.config.base_stylesheet = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, Md2DocError> {
        let c = &self.config;
        for (name, secs) in [
            ("diagram", c.diagram_timeout_secs),
            ("pdf", c.pdf_timeout_secs),
            ("docx", c.docx_timeout_secs),
        ] {
            if secs == 0 {
                return Err(Md2DocError::InvalidConfig(format!(
                    "{name} timeout must be ≥ 1s"
                )));
            }
        }
        for (name, tool) in [
            ("diagram", &c.diagram_tool),
            ("pdf", &c.pdf_tool),
            ("docx", &c.docx_tool),
        ] {
            if tool.program.trim().is_empty() {
                return Err(Md2DocError::InvalidConfig(format!(
                    "{name} tool program must not be empty"
                )));
            }
        }
        if c.diagram_concurrency == 0 {
            return Err(Md2DocError::InvalidConfig(
                "Diagram concurrency must be ≥ 1".into(),
            ));
        }
        c.geometry.validate()?;
        c.policy.validate()?;
        Ok(self.config)
    }
}

// ── Output format ────────────────────────────────────────────────────────

/// Target document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }

    /// Leading bytes every well-formed output of this format starts with.
    pub fn signature(self) -> &'static [u8] {
        match self {
            OutputFormat::Pdf => b"%PDF-",
            OutputFormat::Docx => b"PK\x03\x04",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Pdf => f.write_str("PDF"),
            OutputFormat::Docx => f.write_str("DOCX"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Md2DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "docx" | "word" => Ok(OutputFormat::Docx),
            other => Err(Md2DocError::InvalidConfig(format!(
                "unknown output format '{other}' (expected pdf or docx)"
            ))),
        }
    }
}

// ── External tools ───────────────────────────────────────────────────────

/// An external executable plus its argument template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace the program, keeping the argument template.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

// ── Page geometry ────────────────────────────────────────────────────────

/// Page size and margins, in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4()
    }
}

impl PageGeometry {
    /// A4 portrait with room for the running header and footer.
    pub fn a4() -> Self {
        Self {
            width: 595.28,
            height: 841.89,
            margin_top: 100.0,
            margin_right: 72.0,
            margin_bottom: 100.0,
            margin_left: 72.0,
        }
    }

    /// US Letter portrait, same margins as [`PageGeometry::a4`].
    pub fn letter() -> Self {
        Self {
            width: 612.0,
            height: 792.0,
            ..Self::a4()
        }
    }

    pub fn content_width(&self) -> f32 {
        self.width - self.margin_left - self.margin_right
    }

    pub fn content_height(&self) -> f32 {
        self.height - self.margin_top - self.margin_bottom
    }

    fn validate(&self) -> Result<(), Md2DocError> {
        let margins = [
            self.margin_top,
            self.margin_right,
            self.margin_bottom,
            self.margin_left,
        ];
        if margins.iter().any(|m| !m.is_finite() || *m < 0.0) {
            return Err(Md2DocError::InvalidConfig(
                "page margins must be finite and non-negative".into(),
            ));
        }
        if self.content_width() < 72.0 || self.content_height() < 72.0 {
            return Err(Md2DocError::InvalidConfig(format!(
                "content area {:.0}×{:.0}pt is too small (minimum 72×72pt)",
                self.content_width(),
                self.content_height()
            )));
        }
        Ok(())
    }
}

// ── Backend policy ───────────────────────────────────────────────────────

/// Identifies one rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Print HTML converted by the external HTML→PDF tool.
    HtmlPdf,
    /// In-process PDF drawing.
    CanvasPdf,
    /// HTML converted by the external document-conversion tool.
    Pandoc,
    /// In-process DOCX package.
    PackageDocx,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::HtmlPdf => "html-pdf",
            BackendKind::CanvasPdf => "canvas-pdf",
            BackendKind::Pandoc => "pandoc",
            BackendKind::PackageDocx => "package-docx",
        }
    }

    pub fn format(self) -> OutputFormat {
        match self {
            BackendKind::HtmlPdf | BackendKind::CanvasPdf => OutputFormat::Pdf,
            BackendKind::Pandoc | BackendKind::PackageDocx => OutputFormat::Docx,
        }
    }

    /// Whether the backend shells out to an external tool.
    pub fn is_external(self) -> bool {
        matches!(self, BackendKind::HtmlPdf | BackendKind::Pandoc)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered backend strategy per format. Each entry is attempted at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPolicy {
    pub pdf: Vec<BackendKind>,
    pub docx: Vec<BackendKind>,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            pdf: vec![BackendKind::HtmlPdf, BackendKind::CanvasPdf],
            docx: vec![BackendKind::Pandoc, BackendKind::PackageDocx],
        }
    }
}

impl BackendPolicy {
    /// Only the in-process backends; never spawns a converter.
    pub fn in_process_only() -> Self {
        Self {
            pdf: vec![BackendKind::CanvasPdf],
            docx: vec![BackendKind::PackageDocx],
        }
    }

    pub fn for_format(&self, format: OutputFormat) -> &[BackendKind] {
        match format {
            OutputFormat::Pdf => &self.pdf,
            OutputFormat::Docx => &self.docx,
        }
    }

    fn validate(&self) -> Result<(), Md2DocError> {
        for format in [OutputFormat::Pdf, OutputFormat::Docx] {
            let order = self.for_format(format);
            if order.is_empty() {
                return Err(Md2DocError::InvalidConfig(format!(
                    "backend policy for {format} is empty"
                )));
            }
            if let Some(bad) = order.iter().find(|k| k.format() != format) {
                return Err(Md2DocError::InvalidConfig(format!(
                    "backend '{bad}' cannot produce {format}"
                )));
            }
            for (i, kind) in order.iter().enumerate() {
                if order[..i].contains(kind) {
                    return Err(Md2DocError::InvalidConfig(format!(
                        "backend '{kind}' listed twice for {format}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RenderConfig::builder().build().unwrap();
        assert_eq!(config.diagram_timeout_secs, 30);
        assert_eq!(config.diagram_tool.program, "mmdc");
        assert_eq!(config.footer_template, "Page {page} of {pages}");
        assert!(config.is_diagram_language("Mermaid"));
        assert!(config.is_diagram_language("mmd"));
        assert!(!config.is_diagram_language("rust"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = RenderConfig::builder()
            .pdf_timeout_secs(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn policy_rejects_wrong_format() {
        let err = RenderConfig::builder()
            .policy(BackendPolicy {
                pdf: vec![BackendKind::PackageDocx],
                docx: vec![BackendKind::Pandoc],
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("package-docx"), "got: {err}");
    }

    #[test]
    fn policy_rejects_duplicates() {
        let err = RenderConfig::builder()
            .policy(BackendPolicy {
                pdf: vec![BackendKind::CanvasPdf, BackendKind::CanvasPdf],
                docx: vec![BackendKind::PackageDocx],
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn geometry_rejects_oversized_margins() {
        let geometry = PageGeometry {
            margin_top: 500.0,
            margin_bottom: 500.0,
            ..PageGeometry::a4()
        };
        assert!(RenderConfig::builder().geometry(geometry).build().is_err());
    }

    #[test]
    fn a4_content_box() {
        let g = PageGeometry::a4();
        assert!((g.content_width() - 451.28).abs() < 0.01);
        assert!((g.content_height() - 641.89).abs() < 0.01);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("PDF".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!("docx".parse::<OutputFormat>().unwrap(), OutputFormat::Docx);
        assert!("odt".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Pdf.content_type(), "application/pdf");
    }

    #[test]
    fn backend_kind_serde_names() {
        let json = serde_json::to_string(&BackendKind::HtmlPdf).unwrap();
        assert_eq!(json, "\"html-pdf\"");
    }

    #[test]
    fn debug_hides_callback() {
        let s = format!("{:?}", RenderConfig::default());
        assert!(s.contains("progress_callback: None"));
    }
}
