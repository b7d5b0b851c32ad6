//! `package-docx` backend: assemble the OOXML package in-process.
//!
//! Pages are first lowered to a small document-object model (paragraphs,
//! runs, tables, inline images, page breaks), then serialised part by part
//! with `quick-xml` and zipped. Each laid-out page ends with an explicit
//! page break. Running header and footer live in their own parts, with
//! `{page}` and `{pages}` mapped to `PAGE` / `NUMPAGES` fields.
//!
//! [`reference_document`] emits the same styles, header and footer around
//! an empty body, for converters that take a reference DOCX.

use super::{blocking, Backend, RenderInput};
use crate::config::{BackendKind, PageGeometry, RenderConfig};
use crate::error::BackendError;
use crate::layout;
use crate::model::{Alignment, Block, DocumentMeta, ImageSource, InlineRun, ListMarker, Page, PageItem, Table};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageDocxBackend;

impl Backend for PackageDocxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PackageDocx
    }

    fn render(&self, input: &RenderInput) -> BoxFuture<'static, Result<Vec<u8>, BackendError>> {
        let input = input.clone();
        let name = self.name();
        Box::pin(blocking(name, move || {
            build_package(&input.pages, &input.meta, &input.config).map_err(|detail| {
                BackendError::Failed {
                    backend: name.to_string(),
                    detail,
                }
            })
        }))
    }
}

// ── Namespaces and content types ─────────────────────────────────────────

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const NS_PKG_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const CT_MAIN: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml";
const CT_HEADER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml";
const CT_FOOTER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml";
const CT_CORE: &str = "application/vnd.openxmlformats-package.core-properties+xml";
const CT_RELS: &str = "application/vnd.openxmlformats-package.relationships+xml";

const RID_STYLES: &str = "rId1";
const RID_HEADER: &str = "rId2";
const RID_FOOTER: &str = "rId3";

const MONO_FONT: &str = "Courier New";
const LINK_COLOR: &str = "0563C1";
const HEADER_FILL: &str = "D3D3D3";

/// Points → twentieths of a point.
fn twips(pt: f32) -> u32 {
    (pt * 20.0).round().max(0.0) as u32
}

/// Points → English Metric Units.
fn emu(pt: f32) -> u64 {
    (pt * 12_700.0).round().max(0.0) as u64
}

/// Points → half-points, the unit of `w:sz`.
fn half_points(pt: f32) -> u32 {
    (pt * 2.0).round() as u32
}

// ── Document-object model ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Paragraph(Paragraph),
    Table(TableNode),
    PageBreak,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Paragraph {
    style: Option<&'static str>,
    align: Option<&'static str>,
    /// Left indent, in twips.
    indent: Option<u32>,
    runs: Vec<Run>,
}

#[derive(Debug, Clone, PartialEq)]
enum Run {
    Text(TextRun),
    Link { rel: String, run: TextRun },
    Image { rel: String, id: usize, cx: u64, cy: u64 },
    Field(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct TextRun {
    text: String,
    bold: bool,
    italic: bool,
    mono: bool,
    strike: bool,
    link: bool,
    /// Half-points; `None` inherits from the paragraph style.
    size: Option<u32>,
}

impl TextRun {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    fn from_inline(run: &InlineRun) -> Self {
        Self {
            text: run.text.clone(),
            bold: run.bold,
            italic: run.italic,
            mono: run.code,
            strike: run.strike,
            link: run.link.is_some(),
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TableNode {
    /// Column widths, in twips.
    widths: Vec<u32>,
    header: Vec<Cell>,
    rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    run: TextRun,
    align: Option<&'static str>,
}

#[derive(Debug, Clone)]
struct Media {
    name: String,
    data: Arc<[u8]>,
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    kind: &'static str,
    target: String,
    external: bool,
}

/// Lowers pages into [`Node`]s, collecting media and relationships.
struct DomBuilder {
    nodes: Vec<Node>,
    media: Vec<Media>,
    rels: Vec<Relationship>,
    links: HashMap<String, String>,
    width: f32,
    max_image_height: f32,
}

impl DomBuilder {
    fn new(geometry: &PageGeometry) -> Self {
        Self {
            nodes: Vec::new(),
            media: Vec::new(),
            rels: Vec::new(),
            links: HashMap::new(),
            width: geometry.content_width(),
            max_image_height: geometry.content_height() * 0.9,
        }
    }

    fn next_rel_id(&self) -> String {
        // rId1..rId3 are the fixed styles/header/footer parts.
        format!("rId{}", self.rels.len() + 4)
    }

    fn link_rel(&mut self, target: &str) -> String {
        if let Some(id) = self.links.get(target) {
            return id.clone();
        }
        let id = self.next_rel_id();
        self.rels.push(Relationship {
            id: id.clone(),
            kind: "hyperlink",
            target: target.to_string(),
            external: true,
        });
        self.links.insert(target.to_string(), id.clone());
        id
    }

    fn pages(&mut self, pages: &[Page]) {
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                self.nodes.push(Node::PageBreak);
            }
            for item in &page.items {
                match item {
                    PageItem::Block(Block::Table(table)) | PageItem::TablePart { table, .. } => {
                        self.table(table)
                    }
                    PageItem::Block(block) => self.block(block),
                }
            }
        }
    }

    fn runs(&mut self, runs: &[InlineRun]) -> Vec<Run> {
        runs.iter()
            .map(|run| {
                let text = TextRun::from_inline(run);
                match &run.link {
                    Some(target) => Run::Link {
                        rel: self.link_rel(target),
                        run: text,
                    },
                    None => Run::Text(text),
                }
            })
            .collect()
    }

    fn paragraph(&mut self, paragraph: Paragraph) {
        self.nodes.push(Node::Paragraph(paragraph));
    }

    fn block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, text } => self.paragraph(Paragraph {
                style: Some(heading_style_id(*level)),
                runs: vec![Run::Text(TextRun::plain(text))],
                ..Default::default()
            }),
            Block::Paragraph { runs } => {
                let runs = self.runs(runs);
                self.paragraph(Paragraph {
                    runs,
                    ..Default::default()
                });
            }
            Block::ListItem { marker, depth, runs } => {
                let label = match marker {
                    ListMarker::Bullet => "•".to_string(),
                    ListMarker::Ordered(n) => format!("{n}."),
                };
                let mut out = vec![Run::Text(TextRun::plain(format!("{label} ")))];
                out.extend(self.runs(runs));
                self.paragraph(Paragraph {
                    style: Some("ListParagraph"),
                    indent: Some(twips(layout::LIST_INDENT * (*depth as f32 + 1.0))),
                    runs: out,
                    ..Default::default()
                });
            }
            Block::Quote { runs } => {
                let runs = self.runs(runs);
                self.paragraph(Paragraph {
                    style: Some("Quote"),
                    runs,
                    ..Default::default()
                });
            }
            Block::CodeBlock { text, .. } => self.paragraph(Paragraph {
                style: Some("Code"),
                runs: vec![Run::Text(TextRun::plain(text))],
                ..Default::default()
            }),
            Block::DiagramPlaceholder { source, reason } => {
                self.paragraph(Paragraph {
                    style: Some("Placeholder"),
                    runs: vec![Run::Text(TextRun::plain(reason))],
                    ..Default::default()
                });
                self.paragraph(Paragraph {
                    style: Some("Code"),
                    runs: vec![Run::Text(TextRun::plain(source))],
                    ..Default::default()
                });
            }
            Block::Image { source, caption } => {
                let run = match source {
                    ImageSource::Embedded {
                        data,
                        mime,
                        width,
                        height,
                    } => {
                        let id = self.media.len() + 1;
                        let ext = if mime == "image/jpeg" { "jpeg" } else { "png" };
                        let name = format!("image{id}.{ext}");
                        let rel = self.next_rel_id();
                        self.rels.push(Relationship {
                            id: rel.clone(),
                            kind: "image",
                            target: format!("media/{name}"),
                            external: false,
                        });
                        self.media.push(Media {
                            name,
                            data: data.clone(),
                        });
                        let (w, h) = layout::image_box(*width, *height, self.width, self.max_image_height);
                        Run::Image {
                            rel,
                            id,
                            cx: emu(w),
                            cy: emu(h),
                        }
                    }
                    ImageSource::Reference(url) => Run::Text(TextRun {
                        italic: true,
                        ..TextRun::plain(format!("[Image: {url}]"))
                    }),
                };
                self.paragraph(Paragraph {
                    align: Some("center"),
                    runs: vec![run],
                    ..Default::default()
                });
                if let Some(caption) = caption {
                    self.paragraph(Paragraph {
                        style: Some("Caption"),
                        runs: vec![Run::Text(TextRun::plain(caption))],
                        ..Default::default()
                    });
                }
            }
            Block::Rule => self.paragraph(Paragraph {
                style: Some("Rule"),
                ..Default::default()
            }),
            Block::Table(table) => self.table(table),
        }
    }

    fn table(&mut self, table: &Table) {
        let cols = table.column_count().max(1);
        let col = twips(self.width) / cols as u32;
        let (header_style, cell_style) = if table.is_wide() {
            (layout::WIDE_TABLE_HEADER, layout::WIDE_TABLE_CELL)
        } else {
            (layout::TABLE_HEADER, layout::TABLE_CELL)
        };
        let cells = |row: &[String], size: f32, bold: bool| -> Vec<Cell> {
            row.iter()
                .enumerate()
                .map(|(i, text)| Cell {
                    run: TextRun {
                        bold,
                        size: Some(half_points(size)),
                        ..TextRun::plain(text)
                    },
                    align: match table.alignment(i) {
                        Alignment::Center => Some("center"),
                        Alignment::Right => Some("right"),
                        Alignment::Left | Alignment::Default => None,
                    },
                })
                .collect()
        };
        self.nodes.push(Node::Table(TableNode {
            widths: vec![col; cols],
            header: cells(&table.header, header_style.size, true),
            rows: table
                .rows
                .iter()
                .map(|r| cells(r, cell_style.size, false))
                .collect(),
        }));
        // Word needs a paragraph between a table and whatever follows.
        self.paragraph(Paragraph::default());
    }
}

fn heading_style_id(level: u8) -> &'static str {
    match level {
        1 => "Heading1",
        2 => "Heading2",
        3 => "Heading3",
        4 => "Heading4",
        5 => "Heading5",
        _ => "Heading6",
    }
}

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(pages|page|title|filename)\}").unwrap());

/// Split a header/footer template into text runs and page-number fields.
fn template_runs(template: &str, meta: &DocumentMeta) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut text = String::new();
    let mut last = 0;
    let flush = |text: &mut String, runs: &mut Vec<Run>| {
        if !text.is_empty() {
            runs.push(Run::Text(TextRun::plain(std::mem::take(text))));
        }
    };
    for caps in RE_PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        text.push_str(&template[last..whole.start()]);
        match &caps[1] {
            "page" => {
                flush(&mut text, &mut runs);
                runs.push(Run::Field("PAGE"));
            }
            "pages" => {
                flush(&mut text, &mut runs);
                runs.push(Run::Field("NUMPAGES"));
            }
            "title" => text.push_str(&meta.title),
            _ => text.push_str(&meta.filename),
        }
        last = whole.end();
    }
    text.push_str(&template[last..]);
    flush(&mut text, &mut runs);
    runs
}

// ── XML serialisation ────────────────────────────────────────────────────

fn xml_err(e: impl std::fmt::Display) -> String {
    format!("xml: {e}")
}

struct Xml(Writer<Vec<u8>>);

impl Xml {
    fn new() -> Result<Self, String> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_err)?;
        Ok(Self(writer))
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), String> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.0.write_event(Event::Start(start)).map_err(xml_err)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), String> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.0.write_event(Event::Empty(start)).map_err(xml_err)
    }

    fn close(&mut self, name: &str) -> Result<(), String> {
        self.0.write_event(Event::End(BytesEnd::new(name))).map_err(xml_err)
    }

    fn text(&mut self, text: &str) -> Result<(), String> {
        self.0.write_event(Event::Text(BytesText::new(text))).map_err(xml_err)
    }

    /// `<name attrs>text</name>`
    fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), String> {
        self.open(name, attrs)?;
        self.text(text)?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        self.0.into_inner()
    }
}

fn write_text_run(x: &mut Xml, run: &TextRun) -> Result<(), String> {
    x.open("w:r", &[])?;
    let styled = run.mono || run.bold || run.italic || run.strike || run.link || run.size.is_some();
    if styled {
        x.open("w:rPr", &[])?;
        if run.mono {
            x.empty("w:rFonts", &[("w:ascii", MONO_FONT), ("w:hAnsi", MONO_FONT)])?;
        }
        if run.bold {
            x.empty("w:b", &[])?;
        }
        if run.italic {
            x.empty("w:i", &[])?;
        }
        if run.strike {
            x.empty("w:strike", &[])?;
        }
        if run.link {
            x.empty("w:color", &[("w:val", LINK_COLOR)])?;
        }
        if let Some(size) = run.size {
            x.empty("w:sz", &[("w:val", &size.to_string())])?;
        }
        if run.link {
            x.empty("w:u", &[("w:val", "single")])?;
        }
        x.close("w:rPr")?;
    }
    for (i, line) in run.text.split('\n').enumerate() {
        if i > 0 {
            x.empty("w:br", &[])?;
        }
        x.element("w:t", &[("xml:space", "preserve")], line)?;
    }
    x.close("w:r")
}

fn write_image_run(x: &mut Xml, rel: &str, id: usize, cx: u64, cy: u64) -> Result<(), String> {
    let (id, cx, cy) = (id.to_string(), cx.to_string(), cy.to_string());
    let name = format!("Picture {id}");
    x.open("w:r", &[])?;
    x.open("w:drawing", &[])?;
    x.open(
        "wp:inline",
        &[("distT", "0"), ("distB", "0"), ("distL", "0"), ("distR", "0")],
    )?;
    x.empty("wp:extent", &[("cx", &cx), ("cy", &cy)])?;
    x.empty("wp:docPr", &[("id", &id), ("name", &name)])?;
    x.open("a:graphic", &[])?;
    x.open("a:graphicData", &[("uri", NS_PIC)])?;
    x.open("pic:pic", &[])?;
    x.open("pic:nvPicPr", &[])?;
    x.empty("pic:cNvPr", &[("id", &id), ("name", &name)])?;
    x.empty("pic:cNvPicPr", &[])?;
    x.close("pic:nvPicPr")?;
    x.open("pic:blipFill", &[])?;
    x.empty("a:blip", &[("r:embed", rel)])?;
    x.open("a:stretch", &[])?;
    x.empty("a:fillRect", &[])?;
    x.close("a:stretch")?;
    x.close("pic:blipFill")?;
    x.open("pic:spPr", &[])?;
    x.open("a:xfrm", &[])?;
    x.empty("a:off", &[("x", "0"), ("y", "0")])?;
    x.empty("a:ext", &[("cx", &cx), ("cy", &cy)])?;
    x.close("a:xfrm")?;
    x.open("a:prstGeom", &[("prst", "rect")])?;
    x.empty("a:avLst", &[])?;
    x.close("a:prstGeom")?;
    x.close("pic:spPr")?;
    x.close("pic:pic")?;
    x.close("a:graphicData")?;
    x.close("a:graphic")?;
    x.close("wp:inline")?;
    x.close("w:drawing")?;
    x.close("w:r")
}

fn write_run(x: &mut Xml, run: &Run) -> Result<(), String> {
    match run {
        Run::Text(text) => write_text_run(x, text),
        Run::Link { rel, run } => {
            x.open("w:hyperlink", &[("r:id", rel)])?;
            write_text_run(x, run)?;
            x.close("w:hyperlink")
        }
        Run::Image { rel, id, cx, cy } => write_image_run(x, rel, *id, *cx, *cy),
        Run::Field(instr) => {
            let instr = format!(" {instr} ");
            x.open("w:fldSimple", &[("w:instr", &instr)])?;
            write_text_run(x, &TextRun::plain("1"))?;
            x.close("w:fldSimple")
        }
    }
}

fn write_paragraph(x: &mut Xml, p: &Paragraph) -> Result<(), String> {
    x.open("w:p", &[])?;
    if p.style.is_some() || p.align.is_some() || p.indent.is_some() {
        x.open("w:pPr", &[])?;
        if let Some(style) = p.style {
            x.empty("w:pStyle", &[("w:val", style)])?;
        }
        if let Some(indent) = p.indent {
            x.empty("w:ind", &[("w:left", &indent.to_string())])?;
        }
        if let Some(align) = p.align {
            x.empty("w:jc", &[("w:val", align)])?;
        }
        x.close("w:pPr")?;
    }
    for run in &p.runs {
        write_run(x, run)?;
    }
    x.close("w:p")
}

fn write_cell(x: &mut Xml, cell: &Cell, width: u32, header: bool) -> Result<(), String> {
    x.open("w:tc", &[])?;
    x.open("w:tcPr", &[])?;
    x.empty("w:tcW", &[("w:w", &width.to_string()), ("w:type", "dxa")])?;
    if header {
        x.empty(
            "w:shd",
            &[("w:val", "clear"), ("w:color", "auto"), ("w:fill", HEADER_FILL)],
        )?;
    }
    x.close("w:tcPr")?;
    write_paragraph(
        x,
        &Paragraph {
            style: Some("TableText"),
            align: cell.align,
            runs: vec![Run::Text(cell.run.clone())],
            ..Default::default()
        },
    )?;
    x.close("w:tc")
}

fn write_table(x: &mut Xml, table: &TableNode) -> Result<(), String> {
    x.open("w:tbl", &[])?;
    x.open("w:tblPr", &[])?;
    x.empty("w:tblW", &[("w:w", "5000"), ("w:type", "pct")])?;
    x.open("w:tblBorders", &[])?;
    for side in ["w:top", "w:left", "w:bottom", "w:right", "w:insideH", "w:insideV"] {
        x.empty(
            side,
            &[("w:val", "single"), ("w:sz", "4"), ("w:space", "0"), ("w:color", "999999")],
        )?;
    }
    x.close("w:tblBorders")?;
    x.empty("w:tblLayout", &[("w:type", "fixed")])?;
    x.close("w:tblPr")?;

    x.open("w:tblGrid", &[])?;
    for w in &table.widths {
        x.empty("w:gridCol", &[("w:w", &w.to_string())])?;
    }
    x.close("w:tblGrid")?;

    x.open("w:tr", &[])?;
    x.open("w:trPr", &[])?;
    x.empty("w:tblHeader", &[])?;
    x.close("w:trPr")?;
    for (cell, w) in table.header.iter().zip(&table.widths) {
        write_cell(x, cell, *w, true)?;
    }
    x.close("w:tr")?;

    for row in &table.rows {
        x.open("w:tr", &[])?;
        for (cell, w) in row.iter().zip(&table.widths) {
            write_cell(x, cell, *w, false)?;
        }
        x.close("w:tr")?;
    }
    x.close("w:tbl")
}

fn write_node(x: &mut Xml, node: &Node) -> Result<(), String> {
    match node {
        Node::Paragraph(p) => write_paragraph(x, p),
        Node::Table(t) => write_table(x, t),
        Node::PageBreak => {
            x.open("w:p", &[])?;
            x.open("w:r", &[])?;
            x.empty("w:br", &[("w:type", "page")])?;
            x.close("w:r")?;
            x.close("w:p")
        }
    }
}

fn write_section(x: &mut Xml, geometry: &PageGeometry) -> Result<(), String> {
    let t = |pt: f32| twips(pt).to_string();
    x.open("w:sectPr", &[])?;
    x.empty("w:headerReference", &[("w:type", "default"), ("r:id", RID_HEADER)])?;
    x.empty("w:footerReference", &[("w:type", "default"), ("r:id", RID_FOOTER)])?;
    x.empty("w:pgSz", &[("w:w", &t(geometry.width)), ("w:h", &t(geometry.height))])?;
    x.empty(
        "w:pgMar",
        &[
            ("w:top", &t(geometry.margin_top)),
            ("w:right", &t(geometry.margin_right)),
            ("w:bottom", &t(geometry.margin_bottom)),
            ("w:left", &t(geometry.margin_left)),
            ("w:header", &t(geometry.margin_top * 0.4)),
            ("w:footer", &t(geometry.margin_bottom * 0.4)),
            ("w:gutter", "0"),
        ],
    )?;
    x.close("w:sectPr")
}

fn document_xml(nodes: &[Node], geometry: &PageGeometry) -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open(
        "w:document",
        &[
            ("xmlns:w", NS_W),
            ("xmlns:r", NS_R),
            ("xmlns:wp", NS_WP),
            ("xmlns:a", NS_A),
            ("xmlns:pic", NS_PIC),
        ],
    )?;
    x.open("w:body", &[])?;
    for node in nodes {
        write_node(&mut x, node)?;
    }
    write_section(&mut x, geometry)?;
    x.close("w:body")?;
    x.close("w:document")?;
    Ok(x.finish())
}

/// `word/header1.xml` or `word/footer1.xml`.
fn running_xml(root: &str, style: &'static str, runs: Vec<Run>) -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open(root, &[("xmlns:w", NS_W), ("xmlns:r", NS_R)])?;
    write_paragraph(
        &mut x,
        &Paragraph {
            style: Some(style),
            align: Some("center"),
            runs,
            ..Default::default()
        },
    )?;
    x.close(root)?;
    Ok(x.finish())
}

struct StyleDef {
    id: &'static str,
    name: &'static str,
    size: Option<f32>,
    bold: bool,
    italic: bool,
    mono: bool,
    color: Option<&'static str>,
    shade: Option<&'static str>,
    indent: Option<f32>,
    center: bool,
    space_before: f32,
}

const fn style(id: &'static str, name: &'static str) -> StyleDef {
    StyleDef {
        id,
        name,
        size: None,
        bold: false,
        italic: false,
        mono: false,
        color: None,
        shade: None,
        indent: None,
        center: false,
        space_before: 0.0,
    }
}

fn style_defs() -> Vec<StyleDef> {
    let mut defs: Vec<StyleDef> = (1..=6u8)
        .map(|level| StyleDef {
            size: Some(layout::heading_style(level).size),
            bold: true,
            space_before: layout::HEADING_SPACE_BEFORE * 2.0,
            ..style(heading_style_id(level), heading_name(level))
        })
        .collect();
    defs.extend([
        StyleDef {
            size: Some(layout::CODE.size),
            mono: true,
            shade: Some("F6F8FA"),
            ..style("Code", "Code")
        },
        StyleDef {
            italic: true,
            color: Some("6A737D"),
            indent: Some(layout::QUOTE_INDENT),
            ..style("Quote", "Quote")
        },
        StyleDef {
            size: Some(layout::CAPTION.size),
            italic: true,
            color: Some("6A737D"),
            center: true,
            ..style("Caption", "Caption")
        },
        StyleDef {
            size: Some(layout::CAPTION.size),
            color: Some("B31D28"),
            ..style("Placeholder", "Diagram Placeholder")
        },
        StyleDef {
            size: Some(layout::RUNNING.size),
            color: Some("666666"),
            ..style("Header", "header")
        },
        StyleDef {
            size: Some(layout::RUNNING.size),
            color: Some("666666"),
            ..style("Footer", "footer")
        },
        style("ListParagraph", "List Paragraph"),
        style("TableText", "Table Text"),
        style("Rule", "Horizontal Rule"),
    ]);
    defs
}

fn heading_name(level: u8) -> &'static str {
    match level {
        1 => "heading 1",
        2 => "heading 2",
        3 => "heading 3",
        4 => "heading 4",
        5 => "heading 5",
        _ => "heading 6",
    }
}

fn styles_xml() -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open("w:styles", &[("xmlns:w", NS_W)])?;

    x.open("w:docDefaults", &[])?;
    x.open("w:rPrDefault", &[])?;
    x.open("w:rPr", &[])?;
    x.empty(
        "w:rFonts",
        &[("w:ascii", "Helvetica"), ("w:hAnsi", "Helvetica"), ("w:cs", "Arial")],
    )?;
    x.empty("w:sz", &[("w:val", &half_points(layout::BODY.size).to_string())])?;
    x.close("w:rPr")?;
    x.close("w:rPrDefault")?;
    x.open("w:pPrDefault", &[])?;
    x.open("w:pPr", &[])?;
    x.empty(
        "w:spacing",
        &[("w:after", &twips(layout::BLOCK_SPACING).to_string()), ("w:line", "280"), ("w:lineRule", "auto")],
    )?;
    x.close("w:pPr")?;
    x.close("w:pPrDefault")?;
    x.close("w:docDefaults")?;

    x.open("w:style", &[("w:type", "paragraph"), ("w:default", "1"), ("w:styleId", "Normal")])?;
    x.empty("w:name", &[("w:val", "Normal")])?;
    x.close("w:style")?;

    for def in style_defs() {
        x.open("w:style", &[("w:type", "paragraph"), ("w:styleId", def.id)])?;
        x.empty("w:name", &[("w:val", def.name)])?;
        x.empty("w:basedOn", &[("w:val", "Normal")])?;
        x.open("w:pPr", &[])?;
        if def.id.starts_with("Heading") {
            x.empty("w:keepNext", &[])?;
        }
        if def.id == "Rule" {
            x.open("w:pBdr", &[])?;
            x.empty(
                "w:bottom",
                &[("w:val", "single"), ("w:sz", "6"), ("w:space", "1"), ("w:color", "EAECEF")],
            )?;
            x.close("w:pBdr")?;
        }
        if let Some(fill) = def.shade {
            x.empty("w:shd", &[("w:val", "clear"), ("w:color", "auto"), ("w:fill", fill)])?;
        }
        if def.id == "TableText" {
            x.empty("w:spacing", &[("w:before", "0"), ("w:after", "0")])?;
        } else if def.space_before > 0.0 {
            x.empty("w:spacing", &[("w:before", &twips(def.space_before).to_string())])?;
        }
        if let Some(indent) = def.indent {
            x.empty("w:ind", &[("w:left", &twips(indent).to_string())])?;
        }
        if def.center {
            x.empty("w:jc", &[("w:val", "center")])?;
        }
        x.close("w:pPr")?;
        x.open("w:rPr", &[])?;
        if def.mono {
            x.empty("w:rFonts", &[("w:ascii", MONO_FONT), ("w:hAnsi", MONO_FONT)])?;
        }
        if def.bold {
            x.empty("w:b", &[])?;
        }
        if def.italic {
            x.empty("w:i", &[])?;
        }
        if let Some(color) = def.color {
            x.empty("w:color", &[("w:val", color)])?;
        }
        if let Some(size) = def.size {
            x.empty("w:sz", &[("w:val", &half_points(size).to_string())])?;
        }
        x.close("w:rPr")?;
        x.close("w:style")?;
    }

    x.close("w:styles")?;
    Ok(x.finish())
}

fn content_types_xml() -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open(
        "Types",
        &[("xmlns", "http://schemas.openxmlformats.org/package/2006/content-types")],
    )?;
    for (ext, ct) in [
        ("rels", CT_RELS),
        ("xml", "application/xml"),
        ("png", "image/png"),
        ("jpeg", "image/jpeg"),
    ] {
        x.empty("Default", &[("Extension", ext), ("ContentType", ct)])?;
    }
    for (part, ct) in [
        ("/word/document.xml", CT_MAIN),
        ("/word/styles.xml", CT_STYLES),
        ("/word/header1.xml", CT_HEADER),
        ("/word/footer1.xml", CT_FOOTER),
        ("/docProps/core.xml", CT_CORE),
    ] {
        x.empty("Override", &[("PartName", part), ("ContentType", ct)])?;
    }
    x.close("Types")?;
    Ok(x.finish())
}

fn package_rels_xml() -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open("Relationships", &[("xmlns", NS_PKG_RELS)])?;
    x.empty(
        "Relationship",
        &[
            ("Id", "rId1"),
            ("Type", &format!("{REL_BASE}/officeDocument")),
            ("Target", "word/document.xml"),
        ],
    )?;
    x.empty(
        "Relationship",
        &[
            ("Id", "rId2"),
            ("Type", "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties"),
            ("Target", "docProps/core.xml"),
        ],
    )?;
    x.close("Relationships")?;
    Ok(x.finish())
}

fn document_rels_xml(rels: &[Relationship]) -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open("Relationships", &[("xmlns", NS_PKG_RELS)])?;
    let fixed = [
        (RID_STYLES, "styles", "styles.xml"),
        (RID_HEADER, "header", "header1.xml"),
        (RID_FOOTER, "footer", "footer1.xml"),
    ];
    for (id, kind, target) in fixed {
        x.empty(
            "Relationship",
            &[("Id", id), ("Type", &format!("{REL_BASE}/{kind}")), ("Target", target)],
        )?;
    }
    for rel in rels {
        let kind = format!("{REL_BASE}/{}", rel.kind);
        let mut attrs = vec![("Id", rel.id.as_str()), ("Type", kind.as_str()), ("Target", rel.target.as_str())];
        if rel.external {
            attrs.push(("TargetMode", "External"));
        }
        x.empty("Relationship", &attrs)?;
    }
    x.close("Relationships")?;
    Ok(x.finish())
}

fn core_xml(meta: &DocumentMeta) -> Result<Vec<u8>, String> {
    let mut x = Xml::new()?;
    x.open(
        "cp:coreProperties",
        &[
            ("xmlns:cp", "http://schemas.openxmlformats.org/package/2006/metadata/core-properties"),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:dcterms", "http://purl.org/dc/terms/"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
        ],
    )?;
    x.element("dc:title", &[], &meta.title)?;
    x.element("dc:creator", &[], "md2doc")?;
    x.close("cp:coreProperties")?;
    Ok(x.finish())
}

// ── Packaging ────────────────────────────────────────────────────────────

fn zip_parts(parts: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, String> {
    let zip_err = |e: zip::result::ZipError| format!("zip: {e}");
    let io_err = |e: std::io::Error| format!("zip: {e}");

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    for (name, bytes) in parts {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(&bytes).map_err(io_err)?;
    }
    let cursor = zip.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

fn package(
    nodes: &[Node],
    media: Vec<Media>,
    rels: &[Relationship],
    meta: &DocumentMeta,
    config: &RenderConfig,
) -> Result<Vec<u8>, String> {
    let mut parts: Vec<(String, Vec<u8>)> = vec![
        ("[Content_Types].xml".into(), content_types_xml()?),
        ("_rels/.rels".into(), package_rels_xml()?),
        ("docProps/core.xml".into(), core_xml(meta)?),
        ("word/_rels/document.xml.rels".into(), document_rels_xml(rels)?),
        ("word/document.xml".into(), document_xml(nodes, &config.geometry)?),
        ("word/styles.xml".into(), styles_xml()?),
        (
            "word/header1.xml".into(),
            running_xml("w:hdr", "Header", template_runs(&config.header_template, meta))?,
        ),
        (
            "word/footer1.xml".into(),
            running_xml("w:ftr", "Footer", template_runs(&config.footer_template, meta))?,
        ),
    ];
    for m in media {
        parts.push((format!("word/media/{}", m.name), m.data.to_vec()));
    }
    zip_parts(parts)
}

/// Build the complete DOCX package for laid-out pages.
pub fn build_package(pages: &[Page], meta: &DocumentMeta, config: &RenderConfig) -> Result<Vec<u8>, String> {
    let mut dom = DomBuilder::new(&config.geometry);
    dom.pages(pages);
    let DomBuilder {
        nodes, media, rels, ..
    } = dom;
    debug!(
        "DOCX package: {} nodes, {} media, {} relationships",
        nodes.len(),
        media.len(),
        rels.len()
    );
    package(&nodes, media, &rels, meta, config)
}

/// Styles, header and footer around an empty body.
pub fn reference_document(meta: &DocumentMeta, config: &RenderConfig) -> Result<Vec<u8>, String> {
    package(&[Node::Paragraph(Paragraph::default())], Vec::new(), &[], meta, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tiny_png;
    use crate::render::test_support::{sample_input, sample_pages, NoTools};
    use std::io::Read;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            title: "Quarterly Report".into(),
            filename: "report".into(),
            stylesheet: None,
        }
    }

    fn part(package: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(package)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn template_runs_map_page_numbers_to_fields() {
        let runs = template_runs("{title}: Page {page} of {pages}", &meta());
        assert_eq!(
            runs,
            vec![
                Run::Text(TextRun::plain("Quarterly Report: Page ")),
                Run::Field("PAGE"),
                Run::Text(TextRun::plain(" of ")),
                Run::Field("NUMPAGES"),
            ]
        );
    }

    #[test]
    fn package_has_required_parts() {
        let bytes = build_package(&sample_pages(), &meta(), &RenderConfig::default()).unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        let archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for required in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/_rels/document.xml.rels",
            "word/document.xml",
            "word/styles.xml",
            "word/header1.xml",
            "word/footer1.xml",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }

    #[test]
    fn document_breaks_between_pages_and_repeats_table_headers() {
        let bytes = build_package(&sample_pages(), &meta(), &RenderConfig::default()).unwrap();
        let doc = part(&bytes, "word/document.xml");
        assert_eq!(doc.matches(r#"<w:br w:type="page"/>"#).count(), 1);
        assert_eq!(doc.matches("<w:tblHeader/>").count(), 2);
        assert!(doc.contains("Gadget &lt;b&gt;"));
        assert!(doc.contains(r#"<w:pStyle w:val="Heading1"/>"#));
        assert!(doc.contains(r#"<w:pStyle w:val="Placeholder"/>"#));
        // A4 in twips.
        assert!(doc.contains(r#"<w:pgSz w:w="11906" w:h="16838"/>"#));
    }

    #[test]
    fn footer_uses_page_fields() {
        let bytes = build_package(&sample_pages(), &meta(), &RenderConfig::default()).unwrap();
        let footer = part(&bytes, "word/footer1.xml");
        assert!(footer.contains(r#"w:instr=" PAGE ""#));
        assert!(footer.contains(r#"w:instr=" NUMPAGES ""#));
        let header = part(&bytes, "word/header1.xml");
        assert!(header.contains("Quarterly Report"));
    }

    #[test]
    fn images_and_links_get_relationships() {
        let source = ImageSource::embedded(Arc::from(tiny_png(8, 4))).unwrap();
        let page = Page {
            number: 1,
            total: 1,
            header: String::new(),
            footer: String::new(),
            items: vec![
                PageItem::Block(Block::Image {
                    source,
                    caption: Some("Figure".into()),
                }),
                PageItem::Block(Block::Paragraph {
                    runs: vec![InlineRun {
                        text: "docs".into(),
                        link: Some("https://example.com/?a=1&b=2".into()),
                        ..Default::default()
                    }],
                }),
            ],
            used_height: 0.0,
        };
        let bytes = build_package(&[page], &meta(), &RenderConfig::default()).unwrap();
        let rels = part(&bytes, "word/_rels/document.xml.rels");
        assert!(rels.contains(r#"Target="media/image1.png""#));
        assert!(rels.contains(r#"TargetMode="External""#));
        assert!(rels.contains("a=1&amp;b=2"));
        let doc = part(&bytes, "word/document.xml");
        assert!(doc.contains(r#"<a:blip r:embed="rId4"/>"#));
        assert!(doc.contains(r#"<w:hyperlink r:id="rId5">"#));

        let mut archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
        assert!(archive.by_name("word/media/image1.png").is_ok());
    }

    #[test]
    fn reference_document_carries_running_parts() {
        let bytes = reference_document(&meta(), &RenderConfig::default()).unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        assert!(part(&bytes, "word/footer1.xml").contains("NUMPAGES"));
        assert!(part(&bytes, "word/styles.xml").contains(r#"w:styleId="Heading1""#));
    }

    #[test]
    fn output_is_deterministic() {
        let a = build_package(&sample_pages(), &meta(), &RenderConfig::default()).unwrap();
        let b = build_package(&sample_pages(), &meta(), &RenderConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn backend_runs_off_thread() {
        let bytes = PackageDocxBackend
            .render(&sample_input(Arc::new(NoTools)))
            .await
            .unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
    }
}
