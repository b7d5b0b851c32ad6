//! Document model shared by every pipeline stage.
//!
//! Blocks are plain values: each stage takes ownership of its input sequence
//! and returns a new one, so nothing downstream can observe a half-built
//! block.

use serde::Serialize;
use std::io::Cursor;
use std::ops::Range;
use std::sync::Arc;

/// Tables with more columns than this are rendered with a compact font.
pub const WIDE_TABLE_COLUMNS: usize = 6;

/// A span of inline text with uniform styling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InlineRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
    pub strike: bool,
    /// Link target when the run is inside a hyperlink.
    pub link: Option<String>,
}

impl InlineRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Concatenate the text of `runs`, dropping all styling.
    pub fn plain_text(runs: &[InlineRun]) -> String {
        runs.iter().map(|r| r.text.as_str()).collect()
    }

    fn same_style(&self, other: &InlineRun) -> bool {
        self.bold == other.bold
            && self.italic == other.italic
            && self.code == other.code
            && self.strike == other.strike
            && self.link == other.link
    }
}

/// Merge adjacent runs that share a style and drop empty ones.
pub fn coalesce_runs(runs: Vec<InlineRun>) -> Vec<InlineRun> {
    let mut out: Vec<InlineRun> = Vec::with_capacity(runs.len());
    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.same_style(&run) => last.text.push_str(&run.text),
            _ => out.push(run),
        }
    }
    out
}

/// Horizontal alignment of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Alignment {
    #[default]
    Default,
    Left,
    Center,
    Right,
}

/// A normalized table. Every row has exactly `header.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub alignments: Vec<Alignment>,
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    pub fn is_wide(&self) -> bool {
        self.column_count() > WIDE_TABLE_COLUMNS
    }

    pub fn alignment(&self, column: usize) -> Alignment {
        self.alignments.get(column).copied().unwrap_or_default()
    }

    /// The header plus the body rows in `rows`.
    pub fn slice(&self, rows: Range<usize>) -> Table {
        Table {
            header: self.header.clone(),
            rows: self.rows[rows].to_vec(),
            alignments: self.alignments.clone(),
        }
    }
}

/// Where an image's pixels come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImageSource {
    /// Bytes held in memory (rendered diagrams, `data:` URIs).
    Embedded {
        #[serde(skip)]
        data: Arc<[u8]>,
        mime: String,
        width: u32,
        height: u32,
    },
    /// An external reference left for the backend to resolve or describe.
    Reference(String),
}

impl ImageSource {
    /// Wrap encoded image bytes, reading format and pixel size from the header.
    pub fn embedded(data: Arc<[u8]>) -> Result<Self, String> {
        let reader = image::ImageReader::new(Cursor::new(&data[..]))
            .with_guessed_format()
            .map_err(|e| e.to_string())?;
        let format = reader
            .format()
            .ok_or_else(|| "unrecognised image format".to_string())?;
        let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
        Ok(ImageSource::Embedded {
            mime: format.to_mime_type().to_string(),
            data,
            width,
            height,
        })
    }
}

/// List item marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListMarker {
    Bullet,
    Ordered(u64),
}

/// One block-level element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { runs: Vec<InlineRun> },
    CodeBlock { language: Option<String>, text: String },
    Table(Table),
    Image { source: ImageSource, caption: Option<String> },
    DiagramPlaceholder { source: String, reason: String },
    /// `depth` is 0 for top-level items.
    ListItem { marker: ListMarker, depth: usize, runs: Vec<InlineRun> },
    Quote { runs: Vec<InlineRun> },
    Rule,
}

/// Metadata attached to a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    pub title: String,
    /// Sanitized filename without extension.
    pub filename: String,
    /// User stylesheet, applied by backends that support CSS.
    pub stylesheet: Option<String>,
}

/// The complete, normalized document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub meta: DocumentMeta,
    pub blocks: Vec<Block>,
}

/// One placed element on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PageItem {
    Block(Block),
    /// A row range of a table; the header row is always included.
    /// `continued` is set on every part after the first.
    TablePart { table: Table, continued: bool },
}

/// A laid-out page with resolved running header and footer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub total: usize,
    pub header: String,
    pub footer: String,
    pub items: Vec<PageItem>,
    /// Estimated height of the content, in points.
    pub used_height: f32,
}

/// Encode a solid-colour PNG for tests.
#[cfg(test)]
pub(crate) fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}
