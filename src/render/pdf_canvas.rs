//! `canvas-pdf` backend: draw pages in-process with `pdf-writer`.
//!
//! Uses the standard Type1 faces (Helvetica family and Courier) with
//! WinAnsi encoding, so no font files are embedded. Text is wrapped with
//! the same [`crate::layout`] metrics the paginator measured with. User
//! stylesheets are ignored.

use super::{blocking, Backend, RenderInput};
use crate::config::{BackendKind, PageGeometry};
use crate::error::BackendError;
use crate::layout::{self, Line, TextStyle};
use crate::model::{Alignment, Block, DocumentMeta, ImageSource, InlineRun, ListMarker, Page, PageItem, Table};
use crate::pipeline::paginate::{HeightEstimator, MetricEstimator};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};
use std::io::Write;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasPdfBackend;

impl Backend for CanvasPdfBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CanvasPdf
    }

    fn render(&self, input: &RenderInput) -> BoxFuture<'static, Result<Vec<u8>, BackendError>> {
        let input = input.clone();
        let name = self.name();
        Box::pin(blocking(name, move || {
            draw_document(&input.pages, &input.meta, &input.config.geometry).map_err(|detail| {
                BackendError::Failed {
                    backend: name.to_string(),
                    detail,
                }
            })
        }))
    }
}

// ── Fonts ────────────────────────────────────────────────────────────────

const REGULAR: Name<'static> = Name(b"F1");
const BOLD: Name<'static> = Name(b"F2");
const ITALIC: Name<'static> = Name(b"F3");
const BOLD_ITALIC: Name<'static> = Name(b"F4");
const MONO: Name<'static> = Name(b"F5");

const FONTS: [(Name<'static>, &[u8]); 5] = [
    (REGULAR, b"Helvetica"),
    (BOLD, b"Helvetica-Bold"),
    (ITALIC, b"Helvetica-Oblique"),
    (BOLD_ITALIC, b"Helvetica-BoldOblique"),
    (MONO, b"Courier"),
];

fn font_for(bold: bool, italic: bool, mono: bool) -> Name<'static> {
    match (mono, bold, italic) {
        (true, _, _) => MONO,
        (false, true, true) => BOLD_ITALIC,
        (false, true, false) => BOLD,
        (false, false, true) => ITALIC,
        (false, false, false) => REGULAR,
    }
}

/// Map text onto WinAnsiEncoding; unrepresentable characters become `?`.
fn winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u8,
            '\t' => b' ',
            '€' => 0x80,
            '‚' => 0x82,
            'ƒ' => 0x83,
            '„' => 0x84,
            '…' => 0x85,
            '†' => 0x86,
            '‡' => 0x87,
            '‰' => 0x89,
            'Š' => 0x8A,
            '‹' => 0x8B,
            'Œ' => 0x8C,
            'Ž' => 0x8E,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            'š' => 0x9A,
            '›' => 0x9B,
            'œ' => 0x9C,
            'ž' => 0x9E,
            'Ÿ' => 0x9F,
            _ => b'?',
        })
        .collect()
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).map_err(|e| e.to_string())?;
    enc.finish().map_err(|e| e.to_string())
}

struct RefAlloc(i32);

impl RefAlloc {
    fn bump(&mut self) -> Ref {
        self.0 += 1;
        Ref::new(self.0)
    }
}

// ── Document ─────────────────────────────────────────────────────────────

/// Draw every page into a complete PDF file.
pub fn draw_document(
    pages: &[Page],
    meta: &DocumentMeta,
    geometry: &PageGeometry,
) -> Result<Vec<u8>, String> {
    let mut alloc = RefAlloc(0);
    let catalog_id = alloc.bump();
    let tree_id = alloc.bump();
    let font_ids: Vec<Ref> = FONTS.iter().map(|_| alloc.bump()).collect();

    let mut pdf = Pdf::new();
    let estimator = MetricEstimator::new(geometry);
    let mut page_ids = Vec::with_capacity(pages.len().max(1));

    // An empty page list still yields one blank page.
    let blank;
    let pages = if pages.is_empty() {
        blank = [Page {
            number: 1,
            total: 1,
            header: meta.title.clone(),
            footer: String::new(),
            items: Vec::new(),
            used_height: 0.0,
        }];
        &blank[..]
    } else {
        pages
    };

    for page in pages {
        let mut canvas = Canvas::new(&mut pdf, &mut alloc, geometry, &estimator);
        canvas.draw_page(page);
        let (content, xobjects) = canvas.finish();

        let content_id = alloc.bump();
        let page_id = alloc.bump();
        pdf.stream(content_id, &deflate(&content)?)
            .filter(Filter::FlateDecode);

        let mut page_writer = pdf.page(page_id);
        page_writer.media_box(Rect::new(0.0, 0.0, geometry.width, geometry.height));
        page_writer.parent(tree_id);
        page_writer.contents(content_id);
        {
            let mut resources = page_writer.resources();
            {
                let mut fonts = resources.fonts();
                for ((name, _), id) in FONTS.iter().zip(&font_ids) {
                    fonts.pair(*name, *id);
                }
            }
            if !xobjects.is_empty() {
                let mut objects = resources.x_objects();
                for (name, id) in &xobjects {
                    objects.pair(Name(name.as_bytes()), *id);
                }
            }
        }
        drop(page_writer);
        page_ids.push(page_id);
    }

    for ((_, base), id) in FONTS.iter().zip(&font_ids) {
        pdf.type1_font(*id)
            .base_font(Name(*base))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
    }
    pdf.pages(tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);
    pdf.catalog(catalog_id).pages(tree_id);

    let bytes = pdf.finish();
    debug!("Canvas PDF: {} pages, {} bytes", page_ids.len(), bytes.len());
    Ok(bytes)
}

// ── Page canvas ──────────────────────────────────────────────────────────

const BLACK: f32 = 0.0;
const CODE_BG: f32 = 0.965;
const HEADER_BG: f32 = 0.83;
const RULE_GREY: f32 = 0.75;
const MUTED: f32 = 0.4;

struct Canvas<'a> {
    pdf: &'a mut Pdf,
    alloc: &'a mut RefAlloc,
    geometry: &'a PageGeometry,
    estimator: &'a MetricEstimator,
    content: Content,
    xobjects: Vec<(String, Ref)>,
    /// Top of the next block, in PDF user space.
    y: f32,
    x0: f32,
    width: f32,
}

impl<'a> Canvas<'a> {
    fn new(
        pdf: &'a mut Pdf,
        alloc: &'a mut RefAlloc,
        geometry: &'a PageGeometry,
        estimator: &'a MetricEstimator,
    ) -> Self {
        Self {
            pdf,
            alloc,
            geometry,
            estimator,
            content: Content::new(),
            xobjects: Vec::new(),
            y: geometry.height - geometry.margin_top,
            x0: geometry.margin_left,
            width: geometry.content_width(),
        }
    }

    fn finish(self) -> (Vec<u8>, Vec<(String, Ref)>) {
        (self.content.finish().to_vec(), self.xobjects)
    }

    fn draw_page(&mut self, page: &Page) {
        self.draw_running(page);
        for item in &page.items {
            match item {
                PageItem::Block(block) => self.draw_block(block),
                PageItem::TablePart { table, .. } => self.draw_table(table),
            }
        }
    }

    // ── Primitives ───────────────────────────────────────────────────────

    fn text(&mut self, x: f32, baseline: f32, font: Name<'_>, size: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        let encoded = winansi(text);
        self.content.begin_text();
        self.content.set_font(font, size);
        self.content.next_line(x, baseline);
        self.content.show(Str(&encoded));
        self.content.end_text();
    }

    fn hline(&mut self, x1: f32, x2: f32, y: f32, gray: f32, width: f32) {
        self.content.save_state();
        self.content.set_stroke_gray(gray);
        self.content.set_line_width(width);
        self.content.move_to(x1, y);
        self.content.line_to(x2, y);
        self.content.stroke();
        self.content.restore_state();
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, gray: f32) {
        self.content.save_state();
        self.content.set_fill_gray(gray);
        self.content.rect(x, y, w, h);
        self.content.fill_nonzero();
        self.content.restore_state();
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, gray: f32) {
        self.content.save_state();
        self.content.set_stroke_gray(gray);
        self.content.set_line_width(0.5);
        self.content.rect(x, y, w, h);
        self.content.stroke();
        self.content.restore_state();
    }

    /// Draw one wrapped line of styled runs starting at `x`.
    fn runs_line(&mut self, x: f32, baseline: f32, size: f32, line: &Line, runs: &[InlineRun], italic: bool) {
        let mut cursor = x;
        for (idx, fragment) in line {
            let Some(run) = runs.get(*idx) else {
                continue;
            };
            let font = font_for(run.bold, run.italic || italic, run.code);
            let w = layout::text_width(fragment, size, run.code);
            if run.link.is_some() {
                self.content.set_fill_rgb(0.0, 0.2, 0.6);
            }
            self.text(cursor, baseline, font, size, fragment);
            if run.link.is_some() {
                self.content.set_fill_gray(BLACK);
                self.hline(cursor, cursor + w, baseline - 1.5, MUTED, 0.4);
            }
            if run.strike {
                self.hline(cursor, cursor + w, baseline + size * 0.3, BLACK, 0.5);
            }
            cursor += w;
        }
    }

    // ── Running header / footer ──────────────────────────────────────────

    fn draw_running(&mut self, page: &Page) {
        let g = self.geometry;
        let style = layout::RUNNING;
        let center = |text: &str| g.margin_left + (g.content_width() - layout::text_width(text, style.size, false)).max(0.0) / 2.0;

        let header_y = g.height - g.margin_top * 0.5;
        let x = center(&page.header);
        self.content.set_fill_gray(MUTED);
        self.text(x, header_y, REGULAR, style.size, &page.header);
        self.content.set_fill_gray(BLACK);
        self.hline(g.margin_left, g.width - g.margin_right, header_y - 6.0, RULE_GREY, 0.5);

        let footer_y = g.margin_bottom * 0.5;
        self.hline(g.margin_left, g.width - g.margin_right, footer_y + style.leading, RULE_GREY, 0.5);
        let x = center(&page.footer);
        self.content.set_fill_gray(MUTED);
        self.text(x, footer_y, REGULAR, style.size, &page.footer);
        self.content.set_fill_gray(BLACK);
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    fn draw_block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, text } => {
                let style = layout::heading_style(*level);
                self.y -= layout::HEADING_SPACE_BEFORE;
                for line in layout::wrap_text(text, self.width, style.size, false) {
                    self.text(self.x0, self.y - style.size, BOLD, style.size, &line);
                    self.y -= style.leading;
                }
                if *level <= 2 {
                    self.hline(self.x0, self.x0 + self.width, self.y + 1.0, RULE_GREY, 0.5);
                }
                self.y -= layout::HEADING_SPACE_AFTER;
            }
            Block::Paragraph { runs } => {
                self.paragraph(runs, self.x0, self.width, false);
                self.y -= layout::BLOCK_SPACING;
            }
            Block::ListItem { marker, depth, runs } => {
                let indent = layout::LIST_INDENT * (*depth as f32 + 1.0);
                let label = match marker {
                    ListMarker::Bullet => "•".to_string(),
                    ListMarker::Ordered(n) => format!("{n}."),
                };
                let size = layout::BODY.size;
                let label_x = self.x0 + indent - layout::text_width(&label, size, false) - 4.0;
                self.text(label_x, self.y - size, REGULAR, size, &label);
                self.paragraph(runs, self.x0 + indent, self.width - indent, false);
                self.y -= layout::LIST_SPACING;
            }
            Block::Quote { runs } => {
                let top = self.y;
                self.content.set_fill_gray(MUTED);
                self.paragraph(
                    runs,
                    self.x0 + layout::QUOTE_INDENT,
                    self.width - layout::QUOTE_INDENT,
                    true,
                );
                self.content.set_fill_gray(BLACK);
                self.fill_rect(self.x0 + 2.0, self.y, 2.5, top - self.y, RULE_GREY);
                self.y -= layout::BLOCK_SPACING;
            }
            Block::CodeBlock { text, .. } => {
                self.code_box(text, None);
            }
            Block::DiagramPlaceholder { source, reason } => {
                self.code_box(source, Some(reason));
            }
            Block::Table(table) => self.draw_table(table),
            Block::Image { source, caption } => self.draw_image(source, caption.as_deref()),
            Block::Rule => {
                let mid = self.y - layout::RULE_HEIGHT / 2.0;
                self.hline(self.x0, self.x0 + self.width, mid, RULE_GREY, 0.75);
                self.y -= layout::RULE_HEIGHT;
            }
        }
    }

    fn paragraph(&mut self, runs: &[InlineRun], x: f32, width: f32, italic: bool) {
        let style = layout::BODY;
        for line in layout::wrap_runs(runs, width, style.size) {
            self.runs_line(x, self.y - style.size, style.size, &line, runs, italic);
            self.y -= style.leading;
        }
    }

    /// Shaded monospace box; placeholders carry a reason line on top.
    fn code_box(&mut self, text: &str, reason: Option<&str>) {
        let pad = layout::CODE_PADDING;
        let inner = self.width - 2.0 * pad;
        let code = layout::CODE;
        let caption = layout::CAPTION;
        let reason_lines = reason
            .map(|r| layout::wrap_text(r, inner, caption.size, false))
            .unwrap_or_default();
        let code_lines = layout::wrap_code(text, inner, code.size);
        let height = reason_lines.len() as f32 * caption.leading
            + code_lines.len().max(1) as f32 * code.leading
            + 2.0 * pad;

        self.fill_rect(self.x0, self.y - height, self.width, height, CODE_BG);
        if reason.is_some() {
            self.stroke_rect(self.x0, self.y - height, self.width, height, RULE_GREY);
        }
        let mut y = self.y - pad;
        if !reason_lines.is_empty() {
            self.content.set_fill_rgb(0.7, 0.11, 0.16);
            for line in &reason_lines {
                self.text(self.x0 + pad, y - caption.size, ITALIC, caption.size, line);
                y -= caption.leading;
            }
            self.content.set_fill_gray(BLACK);
        }
        for line in &code_lines {
            self.text(self.x0 + pad, y - code.size, MONO, code.size, line);
            y -= code.leading;
        }
        self.y -= height + layout::BLOCK_SPACING;
    }

    fn draw_table(&mut self, table: &Table) {
        let cols = table.column_count().max(1);
        let col_w = self.width / cols as f32;
        let (header_style, cell_style) = if table.is_wide() {
            (layout::WIDE_TABLE_HEADER, layout::WIDE_TABLE_CELL)
        } else {
            (layout::TABLE_HEADER, layout::TABLE_CELL)
        };

        let header_h = self.estimator.table_header_height(table, self.width);
        self.fill_rect(self.x0, self.y - header_h, self.width, header_h, HEADER_BG);
        self.table_row(table, &table.header, header_h, col_w, header_style, true);
        for row in &table.rows {
            let h = self.estimator.table_row_height(table, row, self.width);
            self.table_row(table, row, h, col_w, cell_style, false);
        }
        self.y -= self.estimator.table_spacing();
    }

    fn table_row(&mut self, table: &Table, cells: &[String], height: f32, col_w: f32, style: TextStyle, header: bool) {
        let pad = layout::CELL_PADDING;
        let inner = (col_w - 2.0 * pad).max(style.size);
        let font = if header { BOLD } else { REGULAR };
        for (i, cell) in cells.iter().enumerate() {
            let cell_x = self.x0 + i as f32 * col_w;
            self.stroke_rect(cell_x, self.y - height, col_w, height, 0.6);
            let mut baseline = self.y - pad - style.size;
            for line in layout::wrap_text(cell, inner, style.size, false) {
                let w = layout::text_width(&line, style.size, false);
                let x = match table.alignment(i) {
                    Alignment::Right => cell_x + col_w - pad - w,
                    Alignment::Center => cell_x + (col_w - w) / 2.0,
                    Alignment::Left | Alignment::Default => cell_x + pad,
                };
                self.text(x, baseline, font, style.size, &line);
                baseline -= style.leading;
            }
        }
        self.y -= height;
    }

    fn draw_image(&mut self, source: &ImageSource, caption: Option<&str>) {
        match source {
            ImageSource::Embedded {
                data,
                width,
                height,
                ..
            } => match self.embed_image(data) {
                Ok(name) => {
                    let (w, h) = layout::image_box(
                        *width,
                        *height,
                        self.width,
                        self.estimator.max_image_height,
                    );
                    let x = self.x0 + (self.width - w) / 2.0;
                    self.content.save_state();
                    self.content.transform([w, 0.0, 0.0, h, x, self.y - h]);
                    self.content.x_object(Name(name.as_bytes()));
                    self.content.restore_state();
                    self.y -= h;
                }
                Err(e) => {
                    warn!("Image could not be embedded: {}", e);
                    self.reference_box("[image could not be embedded]");
                }
            },
            ImageSource::Reference(url) => {
                self.reference_box(&format!("[Image: {url}]"));
            }
        }
        if let Some(caption) = caption {
            let style = layout::CAPTION;
            for line in layout::wrap_text(caption, self.width, style.size, false) {
                let w = layout::text_width(&line, style.size, false);
                let x = self.x0 + (self.width - w).max(0.0) / 2.0;
                self.content.set_fill_gray(MUTED);
                self.text(x, self.y - style.size, ITALIC, style.size, &line);
                self.content.set_fill_gray(BLACK);
                self.y -= style.leading;
            }
        }
        self.y -= layout::BLOCK_SPACING;
    }

    fn reference_box(&mut self, label: &str) {
        let h = layout::REFERENCE_IMAGE_HEIGHT;
        self.stroke_rect(self.x0, self.y - h, self.width, h, RULE_GREY);
        let size = layout::CAPTION.size;
        let max_chars = (self.width / (0.5 * size)) as usize;
        let label: String = label.chars().take(max_chars.max(8)).collect();
        self.content.set_fill_gray(MUTED);
        self.text(self.x0 + 6.0, self.y - h / 2.0 - size / 3.0, ITALIC, size, &label);
        self.content.set_fill_gray(BLACK);
        self.y -= h;
    }

    /// Decode, flatten alpha onto white, and write an image XObject.
    fn embed_image(&mut self, data: &[u8]) -> Result<String, String> {
        let rgba = image::load_from_memory(data)
            .map_err(|e| e.to_string())?
            .to_rgba8();
        let (w, h) = rgba.dimensions();
        let mut rgb = Vec::with_capacity(w as usize * h as usize * 3);
        for px in rgba.pixels() {
            let a = px[3] as u32;
            for c in 0..3 {
                rgb.push(((px[c] as u32 * a + 255 * (255 - a)) / 255) as u8);
            }
        }
        let compressed = deflate(&rgb)?;

        let id = self.alloc.bump();
        let mut xobject = self.pdf.image_xobject(id, &compressed);
        xobject.filter(Filter::FlateDecode);
        xobject.width(w as i32);
        xobject.height(h as i32);
        xobject.color_space().device_rgb();
        xobject.bits_per_component(8);
        drop(xobject);

        let name = format!("Im{}", self.xobjects.len() + 1);
        self.xobjects.push((name.clone(), id));
        Ok(name)
    }
}
