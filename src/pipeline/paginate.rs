//! Pagination: [`Document`] → [`Page`]s.
//!
//! Two passes. The first walks the blocks, placing each on the current page
//! if its estimated height fits and opening a new page otherwise; tables are
//! split at row boundaries with the header repeated on every part. The
//! second pass, once the total page count is known, resolves the running
//! header and footer templates for every page.

use crate::config::PageGeometry;
use crate::layout::{self, TextStyle};
use crate::model::{Block, Document, DocumentMeta, ImageSource, Page, PageItem, Table};

/// Estimates the rendered height of blocks, in points.
pub trait HeightEstimator: Send + Sync {
    /// Height of a non-table block laid out in a column `width` points wide,
    /// including the spacing that follows it.
    fn block_height(&self, block: &Block, width: f32) -> f32;

    /// Height of a table's header row.
    fn table_header_height(&self, table: &Table, width: f32) -> f32;

    /// Height of one body row of `table`.
    fn table_row_height(&self, table: &Table, row: &[String], width: f32) -> f32;

    /// Gap after the last part of a table.
    fn table_spacing(&self) -> f32 {
        layout::BLOCK_SPACING
    }
}

/// Default estimator built on [`crate::layout`] metrics.
#[derive(Debug, Clone, Copy)]
pub struct MetricEstimator {
    /// Images are scaled to fit under this height.
    pub max_image_height: f32,
}

impl MetricEstimator {
    pub fn new(geometry: &PageGeometry) -> Self {
        Self {
            max_image_height: geometry.content_height() * 0.9,
        }
    }

    fn text_height(runs_lines: usize, style: TextStyle) -> f32 {
        runs_lines.max(1) as f32 * style.leading
    }

    /// Height of a table row whose cells use `style`.
    fn row_height(table: &Table, cells: &[String], width: f32, style: TextStyle) -> f32 {
        let col_w = width / table.column_count().max(1) as f32;
        let inner = (col_w - 2.0 * layout::CELL_PADDING).max(style.size);
        let lines = cells
            .iter()
            .map(|c| layout::wrap_text(c, inner, style.size, false).len())
            .max()
            .unwrap_or(1);
        Self::text_height(lines, style) + 2.0 * layout::CELL_PADDING
    }

    fn caption_height(caption: Option<&str>, width: f32) -> f32 {
        caption.map_or(0.0, |c| {
            let lines = layout::wrap_text(c, width, layout::CAPTION.size, false).len();
            Self::text_height(lines, layout::CAPTION)
        })
    }
}

impl Default for MetricEstimator {
    fn default() -> Self {
        Self::new(&PageGeometry::default())
    }
}

impl HeightEstimator for MetricEstimator {
    fn block_height(&self, block: &Block, width: f32) -> f32 {
        match block {
            Block::Heading { level, text } => {
                let style = layout::heading_style(*level);
                let lines = layout::wrap_text(text, width, style.size, false).len();
                layout::HEADING_SPACE_BEFORE
                    + Self::text_height(lines, style)
                    + layout::HEADING_SPACE_AFTER
            }
            Block::Paragraph { runs } => {
                let lines = layout::wrap_runs(runs, width, layout::BODY.size).len();
                Self::text_height(lines, layout::BODY) + layout::BLOCK_SPACING
            }
            Block::ListItem { depth, runs, .. } => {
                let indent = layout::LIST_INDENT * (*depth as f32 + 1.0);
                let lines = layout::wrap_runs(runs, width - indent, layout::BODY.size).len();
                Self::text_height(lines, layout::BODY) + layout::LIST_SPACING
            }
            Block::Quote { runs } => {
                let lines =
                    layout::wrap_runs(runs, width - layout::QUOTE_INDENT, layout::BODY.size).len();
                Self::text_height(lines, layout::BODY) + layout::BLOCK_SPACING
            }
            Block::CodeBlock { text, .. } => {
                let inner = width - 2.0 * layout::CODE_PADDING;
                let lines = layout::wrap_code(text, inner, layout::CODE.size).len();
                Self::text_height(lines, layout::CODE)
                    + 2.0 * layout::CODE_PADDING
                    + layout::BLOCK_SPACING
            }
            Block::Table(table) => {
                self.table_header_height(table, width)
                    + table
                        .rows
                        .iter()
                        .map(|r| self.table_row_height(table, r, width))
                        .sum::<f32>()
                    + self.table_spacing()
            }
            Block::Image { source, caption } => {
                let body = match source {
                    ImageSource::Embedded { width: w, height: h, .. } => {
                        layout::image_box(*w, *h, width, self.max_image_height).1
                    }
                    ImageSource::Reference(_) => layout::REFERENCE_IMAGE_HEIGHT,
                };
                body + Self::caption_height(caption.as_deref(), width) + layout::BLOCK_SPACING
            }
            Block::DiagramPlaceholder { source, reason } => {
                let inner = width - 2.0 * layout::CODE_PADDING;
                let reason_lines =
                    layout::wrap_text(reason, inner, layout::CAPTION.size, false).len();
                let code_lines = layout::wrap_code(source, inner, layout::CODE.size).len();
                Self::text_height(reason_lines, layout::CAPTION)
                    + Self::text_height(code_lines, layout::CODE)
                    + 2.0 * layout::CODE_PADDING
                    + layout::BLOCK_SPACING
            }
            Block::Rule => layout::RULE_HEIGHT,
        }
    }

    fn table_header_height(&self, table: &Table, width: f32) -> f32 {
        let style = if table.is_wide() {
            layout::WIDE_TABLE_HEADER
        } else {
            layout::TABLE_HEADER
        };
        Self::row_height(table, &table.header, width, style)
    }

    fn table_row_height(&self, table: &Table, row: &[String], width: f32) -> f32 {
        let style = if table.is_wide() {
            layout::WIDE_TABLE_CELL
        } else {
            layout::TABLE_CELL
        };
        Self::row_height(table, row, width, style)
    }
}

/// Substitute `{page}`, `{pages}`, `{title}` and `{filename}`.
pub fn resolve_template(template: &str, page: usize, pages: usize, meta: &DocumentMeta) -> String {
    template
        .replace("{pages}", &pages.to_string())
        .replace("{page}", &page.to_string())
        .replace("{title}", &meta.title)
        .replace("{filename}", &meta.filename)
}

#[derive(Debug, Default)]
struct Draft {
    items: Vec<PageItem>,
    used: f32,
}

/// Lays a [`Document`] out onto pages.
pub struct Paginator<'a> {
    pub geometry: &'a PageGeometry,
    pub header_template: &'a str,
    pub footer_template: &'a str,
    pub estimator: &'a dyn HeightEstimator,
}

impl Paginator<'_> {
    pub fn paginate(&self, doc: Document) -> Vec<Page> {
        let width = self.geometry.content_width();
        let capacity = self.geometry.content_height();
        let Document { meta, blocks } = doc;

        // ── Pass 1: fix page boundaries ──────────────────────────────────
        let mut drafts = vec![Draft::default()];
        for block in blocks {
            match block {
                Block::Table(table) => self.place_table(&mut drafts, table, width, capacity),
                other => {
                    let h = self.estimator.block_height(&other, width);
                    if needs_new_page(&drafts, h, capacity) {
                        drafts.push(Draft::default());
                    }
                    if let Some(page) = drafts.last_mut() {
                        page.items.push(PageItem::Block(other));
                        page.used += h;
                    }
                }
            }
        }

        // ── Pass 2: resolve running header/footer ────────────────────────
        let total = drafts.len();
        drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Page {
                number: i + 1,
                total,
                header: resolve_template(self.header_template, i + 1, total, &meta),
                footer: resolve_template(self.footer_template, i + 1, total, &meta),
                items: draft.items,
                used_height: draft.used,
            })
            .collect()
    }

    /// Place a table, splitting at row boundaries. Every part carries the
    /// header, and each page receives at least one body row.
    fn place_table(&self, drafts: &mut Vec<Draft>, table: Table, width: f32, capacity: f32) {
        let est = self.estimator;
        let header_h = est.table_header_height(&table, width);
        let spacing = est.table_spacing();
        let row_h: Vec<f32> = table
            .rows
            .iter()
            .map(|r| est.table_row_height(&table, r, width))
            .collect();
        let n = row_h.len();
        // Height a row adds, including the trailing gap after the last one.
        let extra = |i: usize| row_h[i] + if i + 1 == n { spacing } else { 0.0 };

        let mut next = 0;
        let mut continued = false;
        loop {
            let (used, empty) = drafts
                .last()
                .map_or((0.0, true), |d| (d.used, d.items.is_empty()));
            let remaining = capacity - used;

            let mut height = header_h;
            let mut end = next;
            if n == 0 {
                height += spacing;
            } else {
                while end < n && height + extra(end) <= remaining {
                    height += extra(end);
                    end += 1;
                }
            }

            let fits = if n == 0 {
                height <= remaining
            } else {
                end > next
            };
            if !fits {
                if !empty {
                    drafts.push(Draft::default());
                    continue;
                }
                // Fresh page and still nothing fits: overflow with one row.
                if n > 0 {
                    height += extra(next);
                    end = next + 1;
                }
            }

            if let Some(page) = drafts.last_mut() {
                page.items.push(PageItem::TablePart {
                    table: if n == 0 {
                        table.slice(0..0)
                    } else {
                        table.slice(next..end)
                    },
                    continued,
                });
                page.used += height;
            }

            if end >= n {
                break;
            }
            next = end;
            continued = true;
            drafts.push(Draft::default());
        }
    }
}

fn needs_new_page(drafts: &[Draft], height: f32, capacity: f32) -> bool {
    drafts
        .last()
        .is_some_and(|d| !d.items.is_empty() && d.used + height > capacity)
}
