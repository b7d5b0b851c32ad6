//! Page model → HTML.
//!
//! Used by both external-tool backends. In paged mode (HTML→PDF) every page
//! becomes a `<section class="page">` with its resolved running header and
//! footer exposed to CSS paged media via `position: running(...)`, and a
//! forced break between sections. In flow mode (DOCX conversion) pages are
//! concatenated and the running elements are left to the reference document.

use super::highlight;
use crate::config::PageGeometry;
use crate::model::{Alignment, Block, DocumentMeta, ImageSource, InlineRun, ListMarker, Page, PageItem, Table};
use base64::Engine as _;
use quick_xml::escape::escape;
use std::fmt::Write as _;

const BASE_CSS: &str = r#"
body { font-family: "Helvetica Neue", Helvetica, Arial, sans-serif; font-size: 10pt; line-height: 1.4; color: #24292e; }
h1 { font-size: 18pt; border-bottom: 1px solid #eaecef; padding-bottom: 0.2em; margin: 0 0 0.5em; }
h2 { font-size: 14pt; border-bottom: 1px solid #eaecef; padding-bottom: 0.2em; }
h3 { font-size: 12pt; }
h4 { font-size: 11pt; }
h5, h6 { font-size: 10pt; }
p { margin: 0 0 0.5em; }
code { font-family: Menlo, Consolas, "Courier New", monospace; font-size: 85%; background: #f6f8fa; padding: 0.1em 0.3em; border-radius: 3px; }
pre { background: #f6f8fa; padding: 6pt; border-radius: 3px; white-space: pre-wrap; word-wrap: break-word; }
pre code { background: none; padding: 0; font-size: 8pt; }
blockquote { margin: 0 0 0.5em; padding: 0 1em; color: #6a737d; border-left: 3px solid #dfe2e5; }
table { border-collapse: collapse; width: 100%; margin: 0 0 0.6em; font-size: 7pt; }
table thead { display: table-header-group; }
th { font-size: 8pt; font-weight: bold; background: #d3d3d3; }
th, td { border: 1px solid #999; padding: 3pt; vertical-align: top; }
table.wide { font-size: 6pt; }
table.wide th { font-size: 7pt; }
img { max-width: 100%; }
figure { margin: 0 0 0.6em; text-align: center; }
figcaption { font-size: 8pt; color: #6a737d; }
.diagram-placeholder { border: 1px dashed #999; background: #fafafa; padding: 6pt; margin: 0 0 0.6em; }
.diagram-placeholder .reason { font-size: 8pt; color: #b31d28; margin: 0 0 4pt; }
.image-reference { border: 1px solid #ccc; padding: 6pt; font-size: 8pt; color: #6a737d; }
hr { border: 0; border-top: 1px solid #eaecef; }
.running-header, .running-footer { font-size: 9pt; color: #666; }
"#;

/// Render the whole document.
///
/// `paged` selects the print layout used for HTML→PDF conversion.
pub fn render_html(
    pages: &[Page],
    meta: &DocumentMeta,
    geometry: &PageGeometry,
    base_stylesheet: bool,
    paged: bool,
) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>{}</title>", escape(&meta.title));
    out.push_str("<style>\n");
    if paged {
        out.push_str(&page_css(geometry));
    }
    if base_stylesheet {
        out.push_str(BASE_CSS);
        out.push_str(highlight::theme_css());
        out.push('\n');
    }
    if let Some(css) = &meta.stylesheet {
        // A stray "</style" would end the element early.
        out.push_str(&css.replace("</", "<\\/"));
        out.push('\n');
    }
    out.push_str("</style>\n</head>\n<body>\n");

    for page in pages {
        if paged {
            let _ = writeln!(out, "<section class=\"page\" id=\"page-{}\">", page.number);
            let _ = writeln!(
                out,
                "<div class=\"running-header\">{}</div>",
                escape(&page.header)
            );
            let _ = writeln!(
                out,
                "<div class=\"running-footer\">{}</div>",
                escape(&page.footer)
            );
        }
        let mut lists = ListStack::default();
        for item in &page.items {
            match item {
                PageItem::Block(Block::ListItem { marker, depth, runs }) => {
                    lists.item(&mut out, *marker, *depth, runs);
                }
                PageItem::Block(block) => {
                    lists.close_all(&mut out);
                    write_block(&mut out, block);
                }
                PageItem::TablePart { table, .. } => {
                    lists.close_all(&mut out);
                    write_table(&mut out, table);
                }
            }
        }
        lists.close_all(&mut out);
        if paged {
            out.push_str("</section>\n");
        }
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn page_css(g: &PageGeometry) -> String {
    format!(
        "@page {{ size: {w}pt {h}pt; margin: {t}pt {r}pt {b}pt {l}pt;\n  \
         @top-center {{ content: element(running-header); }}\n  \
         @bottom-center {{ content: element(running-footer); }} }}\n\
         .running-header {{ position: running(running-header); text-align: center; border-bottom: 0.5pt solid #ccc; }}\n\
         .running-footer {{ position: running(running-footer); text-align: center; }}\n\
         section.page {{ break-after: page; }}\n\
         section.page:last-of-type {{ break-after: auto; }}\n",
        w = g.width,
        h = g.height,
        t = g.margin_top,
        r = g.margin_right,
        b = g.margin_bottom,
        l = g.margin_left,
    )
}

fn write_block(out: &mut String, block: &Block) {
    match block {
        Block::Heading { level, text } => {
            let level = (*level).clamp(1, 6);
            let _ = writeln!(out, "<h{level}>{}</h{level}>", escape(text));
        }
        Block::Paragraph { runs } => {
            out.push_str("<p>");
            write_runs(out, runs);
            out.push_str("</p>\n");
        }
        Block::Quote { runs } => {
            out.push_str("<blockquote><p>");
            write_runs(out, runs);
            out.push_str("</p></blockquote>\n");
        }
        Block::CodeBlock { language, text } => {
            match language {
                Some(lang) => {
                    let _ = write!(out, "<pre><code class=\"language-{}\">", escape(lang));
                }
                None => out.push_str("<pre><code>"),
            }
            out.push_str(&highlight::highlight(text, language.as_deref()));
            out.push_str("</code></pre>\n");
        }
        Block::Table(table) => write_table(out, table),
        Block::Image { source, caption } => write_image(out, source, caption.as_deref()),
        Block::DiagramPlaceholder { source, reason } => {
            let _ = writeln!(
                out,
                "<div class=\"diagram-placeholder\"><p class=\"reason\">[{}]</p><pre><code>{}</code></pre></div>",
                escape(reason),
                escape(source)
            );
        }
        Block::ListItem { runs, .. } => {
            // Reached only outside a page walk; render as a one-item list.
            out.push_str("<ul><li>");
            write_runs(out, runs);
            out.push_str("</li></ul>\n");
        }
        Block::Rule => out.push_str("<hr>\n"),
    }
}

fn write_runs(out: &mut String, runs: &[InlineRun]) {
    for run in runs {
        let mut close: Vec<&str> = Vec::new();
        if let Some(href) = &run.link {
            let _ = write!(out, "<a href=\"{}\">", escape(href));
            close.push("</a>");
        }
        for (on, open, end) in [
            (run.bold, "<strong>", "</strong>"),
            (run.italic, "<em>", "</em>"),
            (run.strike, "<del>", "</del>"),
            (run.code, "<code>", "</code>"),
        ] {
            if on {
                out.push_str(open);
                close.push(end);
            }
        }
        let text = escape(&run.text);
        out.push_str(&text.replace('\n', "<br>\n"));
        for end in close.iter().rev() {
            out.push_str(end);
        }
    }
}

fn align_attr(alignment: Alignment) -> &'static str {
    match alignment {
        Alignment::Default => "",
        Alignment::Left => " style=\"text-align: left\"",
        Alignment::Center => " style=\"text-align: center\"",
        Alignment::Right => " style=\"text-align: right\"",
    }
}

fn write_table(out: &mut String, table: &Table) {
    if table.is_wide() {
        out.push_str("<table class=\"wide\">\n<thead><tr>");
    } else {
        out.push_str("<table>\n<thead><tr>");
    }
    for (i, cell) in table.header.iter().enumerate() {
        let _ = write!(out, "<th{}>{}</th>", align_attr(table.alignment(i)), escape(cell));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for (i, cell) in row.iter().enumerate() {
            let _ = write!(out, "<td{}>{}</td>", align_attr(table.alignment(i)), escape(cell));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
}

fn write_image(out: &mut String, source: &ImageSource, caption: Option<&str>) {
    out.push_str("<figure>");
    let alt = escape(caption.unwrap_or(""));
    match source {
        ImageSource::Embedded {
            data,
            mime,
            width,
            height,
        } => {
            let b64 = base64::engine::general_purpose::STANDARD.encode(data);
            let _ = write!(
                out,
                "<img src=\"data:{mime};base64,{b64}\" alt=\"{alt}\" width=\"{width}\" height=\"{height}\">"
            );
        }
        ImageSource::Reference(url) => {
            let _ = write!(out, "<img src=\"{}\" alt=\"{alt}\">", escape(url));
        }
    }
    if let Some(caption) = caption {
        let _ = write!(out, "<figcaption>{}</figcaption>", escape(caption));
    }
    out.push_str("</figure>\n");
}

/// Open `<ul>`/`<ol>` elements while walking flat list items.
#[derive(Default)]
struct ListStack {
    open: Vec<ListMarker>,
}

impl ListStack {
    fn item(&mut self, out: &mut String, marker: ListMarker, depth: usize, runs: &[InlineRun]) {
        while self.open.len() > depth + 1 {
            self.close_one(out);
        }
        if self.open.len() == depth + 1 {
            let same_kind = matches!(
                (self.open[depth], marker),
                (ListMarker::Bullet, ListMarker::Bullet) | (ListMarker::Ordered(_), ListMarker::Ordered(_))
            );
            if !same_kind {
                self.close_one(out);
            }
        }
        while self.open.len() < depth + 1 {
            match marker {
                ListMarker::Bullet => out.push_str("<ul>\n"),
                ListMarker::Ordered(start) => {
                    let _ = writeln!(out, "<ol start=\"{start}\">");
                }
            }
            self.open.push(marker);
        }
        out.push_str("<li>");
        write_runs(out, runs);
        out.push_str("</li>\n");
    }

    fn close_one(&mut self, out: &mut String) {
        match self.open.pop() {
            Some(ListMarker::Bullet) => out.push_str("</ul>\n"),
            Some(ListMarker::Ordered(_)) => out.push_str("</ol>\n"),
            None => {}
        }
    }

    fn close_all(&mut self, out: &mut String) {
        while !self.open.is_empty() {
            self.close_one(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::sample_pages;

    fn meta() -> DocumentMeta {
        DocumentMeta {
            title: "Quarterly Report".into(),
            filename: "report".into(),
            stylesheet: Some("h1 { color: navy; }".into()),
        }
    }

    #[test]
    fn paged_html_has_sections_and_running_elements() {
        let html = render_html(&sample_pages(), &meta(), &PageGeometry::a4(), true, true);
        assert_eq!(html.matches("<section class=\"page\"").count(), 2);
        assert!(html.contains("<div class=\"running-footer\">Page 2 of 2</div>"));
        assert!(html.contains("@page"));
        assert!(html.contains("h1 { color: navy; }"));
    }

    #[test]
    fn flow_html_has_no_sections() {
        let html = render_html(&sample_pages(), &meta(), &PageGeometry::a4(), true, false);
        assert!(!html.contains("<section"));
        assert!(!html.contains("@page"));
        assert!(html.contains("<h1>Quarterly Report</h1>"));
    }

    #[test]
    fn text_is_escaped() {
        let html = render_html(&sample_pages(), &meta(), &PageGeometry::a4(), false, false);
        assert!(html.contains("Gadget &lt;b&gt;"));
        assert!(html.contains("&amp; costs fell."));
        assert!(!html.contains("BASE") && !html.contains("Helvetica Neue"));
    }

    #[test]
    fn table_alignment_and_header() {
        let html = render_html(&sample_pages(), &meta(), &PageGeometry::a4(), true, false);
        assert!(html.contains("<th style=\"text-align: right\">Qty</th>"));
        assert_eq!(html.matches("<thead>").count(), 2);
    }

    #[test]
    fn placeholder_quotes_source() {
        let html = render_html(&sample_pages(), &meta(), &PageGeometry::a4(), true, false);
        assert!(html.contains("graph TD\nA--&gt;B"));
        assert!(html.contains("class=\"reason\""));
    }

    #[test]
    fn nested_lists_open_and_close() {
        let mut out = String::new();
        let mut lists = ListStack::default();
        let runs = vec![InlineRun::plain("x")];
        lists.item(&mut out, ListMarker::Bullet, 0, &runs);
        lists.item(&mut out, ListMarker::Ordered(1), 1, &runs);
        lists.item(&mut out, ListMarker::Bullet, 0, &runs);
        lists.close_all(&mut out);
        assert_eq!(out.matches("<ul>").count(), 1);
        assert_eq!(out.matches("</ul>").count(), 1);
        assert_eq!(out.matches("<ol start=\"1\">").count(), 1);
        assert_eq!(out.matches("</ol>").count(), 1);
    }

    #[test]
    fn fenced_rust_is_highlighted() {
        let page = Page {
            number: 1,
            total: 1,
            header: String::new(),
            footer: String::new(),
            items: vec![PageItem::Block(Block::CodeBlock {
                language: Some("rust".into()),
                text: "fn main() { println!(\"<hi>\"); }".into(),
            })],
            used_height: 0.0,
        };
        let html = render_html(&[page], &meta(), &PageGeometry::a4(), true, true);
        assert!(html.contains("<pre><code class=\"language-rust\"><span class=\"hl-"));
        assert!(html.contains("&lt;hi&gt;"));
        assert!(html.contains(highlight::theme_css()));
    }

    #[test]
    fn style_close_tag_neutralised() {
        let mut m = meta();
        m.stylesheet = Some("</style><script>".into());
        let html = render_html(&[], &m, &PageGeometry::a4(), false, false);
        assert_eq!(html.matches("</style>").count(), 1);
    }
}
