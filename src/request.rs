//! The render call's input.

use crate::config::OutputFormat;
use serde::{Deserialize, Serialize};

fn default_filename() -> String {
    "document".to_string()
}

/// One render request, as decoded by the serving layer.
///
/// ```rust
/// use md2doc::{OutputFormat, RenderRequest};
///
/// let req: RenderRequest = serde_json::from_str(
///     r##"{"markdown": "# Hi", "format": "pdf", "css": "h1 { color: red; }"}"##,
/// ).unwrap();
/// assert_eq!(req.format, OutputFormat::Pdf);
/// assert_eq!(req.filename, "document");
/// assert!(req.stylesheet.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub markdown: String,
    pub format: OutputFormat,
    /// Requested output name; sanitized, and the extension for `format`
    /// is appended.
    #[serde(default = "default_filename")]
    pub filename: String,
    /// User CSS, applied by backends that understand stylesheets.
    #[serde(default, alias = "css")]
    pub stylesheet: Option<String>,
}

impl RenderRequest {
    pub fn new(markdown: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            markdown: markdown.into(),
            format,
            filename: default_filename(),
            stylesheet: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_stylesheet(mut self, css: impl Into<String>) -> Self {
        self.stylesheet = Some(css.into());
        self
    }
}
