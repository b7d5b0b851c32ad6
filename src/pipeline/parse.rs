//! Markdown → ordered raw blocks.
//!
//! Event stream from `pulldown-cmark`, folded into blocks. Pipe tables are
//! not interpreted here: their raw source lines are handed to
//! [`super::table`] so separator handling lives in one place. Fenced blocks
//! tagged with a diagram language become [`ParsedBlock::Diagram`].
//!
//! Nothing in this module fails. Constructs without a block of their own
//! (raw HTML, undecodable inline images) degrade to text and are reported
//! as [`ParseError`] warnings.

use crate::config::RenderConfig;
use crate::error::ParseError;
use crate::model::{coalesce_runs, Block, ImageSource, InlineRun, ListMarker};
use base64::Engine as _;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::sync::Arc;
use tracing::debug;

/// A block as it leaves the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBlock {
    Ready(Block),
    RawTable(RawTable),
    Diagram(DiagramSource),
}

/// Source lines of one pipe table: header, separator, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub lines: Vec<String>,
    /// 1-based line of the header row in the Markdown source.
    pub line: usize,
}

/// Body of a fenced diagram block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramSource {
    /// Lower-cased language tag, e.g. `mermaid`.
    pub language: String,
    pub source: String,
}

#[derive(Debug, Default)]
pub struct ParseOutput {
    pub blocks: Vec<ParsedBlock>,
    pub warnings: Vec<ParseError>,
}

/// Parse Markdown into raw blocks.
pub fn parse_markdown(markdown: &str, config: &RenderConfig) -> ParseOutput {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let mut collector = Collector::new(markdown, config);
    for (event, range) in Parser::new_ext(markdown, options).into_offset_iter() {
        collector.handle(event, range);
    }
    collector.flush_runs();
    debug!(
        "Parsed {} blocks ({} warnings)",
        collector.out.blocks.len(),
        collector.out.warnings.len()
    );
    collector.out
}

#[derive(Debug, Default)]
struct Style {
    bold: usize,
    italic: usize,
    strike: usize,
    links: Vec<String>,
}

struct CodeState {
    language: Option<String>,
    text: String,
}

struct ImageState {
    url: String,
    alt: String,
    line: usize,
}

struct ItemState {
    marker: ListMarker,
    depth: usize,
}

struct Collector<'a> {
    source: &'a str,
    config: &'a RenderConfig,
    out: ParseOutput,
    runs: Vec<InlineRun>,
    style: Style,
    heading: Option<u8>,
    code: Option<CodeState>,
    image: Option<ImageState>,
    html: Option<(usize, String)>,
    /// Next ordinal per open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    items: Vec<ItemState>,
    quote_depth: usize,
    table_depth: usize,
    /// Images met inside a heading or list item, emitted after its text.
    deferred: Vec<ParsedBlock>,
}

impl<'a> Collector<'a> {
    fn new(source: &'a str, config: &'a RenderConfig) -> Self {
        Self {
            source,
            config,
            out: ParseOutput::default(),
            runs: Vec::new(),
            style: Style::default(),
            heading: None,
            code: None,
            image: None,
            html: None,
            lists: Vec::new(),
            items: Vec::new(),
            quote_depth: 0,
            table_depth: 0,
            deferred: Vec::new(),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        let end = offset.min(self.source.len());
        self.source.as_bytes()[..end]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
    }

    fn handle(&mut self, event: Event<'_>, range: std::ops::Range<usize>) {
        // Table internals are skipped; the raw lines were captured on entry.
        if self.table_depth > 0 {
            match event {
                Event::Start(Tag::Table(_)) => self.table_depth += 1,
                Event::End(TagEnd::Table) => self.table_depth -= 1,
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(tag) => self.start(tag, range),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some(code) = self.code.as_mut() {
                    code.text.push_str(&text);
                } else if let Some(image) = self.image.as_mut() {
                    image.alt.push_str(&text);
                } else {
                    self.push_text(&text);
                }
            }
            Event::Code(text) => {
                if let Some(image) = self.image.as_mut() {
                    image.alt.push_str(&text);
                } else {
                    let mut run = self.styled(&text);
                    run.code = true;
                    self.runs.push(run);
                }
            }
            Event::Html(html) => match self.html.as_mut() {
                Some((_, buf)) => buf.push_str(&html),
                None => self.push_text(&html),
            },
            Event::InlineHtml(html) => self.push_text(&html),
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.push_text("\n"),
            Event::Rule => {
                self.flush_runs();
                self.out.blocks.push(ParsedBlock::Ready(Block::Rule));
            }
            Event::TaskListMarker(checked) => {
                self.push_text(if checked { "[x] " } else { "[ ] " });
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>, range: std::ops::Range<usize>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_runs();
                self.heading = Some(level as u8);
            }
            Tag::CodeBlock(kind) => {
                self.flush_runs();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string)
                        .filter(|s| !s.is_empty()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some(CodeState {
                    language,
                    text: String::new(),
                });
            }
            Tag::HtmlBlock => {
                self.flush_runs();
                let line = self.line_of(range.start);
                self.html = Some((line, String::new()));
            }
            Tag::List(start) => {
                self.flush_runs();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush_runs();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let n = *next;
                        *next += 1;
                        ListMarker::Ordered(n)
                    }
                    _ => ListMarker::Bullet,
                };
                self.items.push(ItemState { marker, depth });
            }
            Tag::BlockQuote(_) => {
                self.flush_runs();
                self.quote_depth += 1;
            }
            Tag::Table(_) => {
                self.flush_runs();
                let depth = self.quote_depth;
                let lines = self.source[range.clone()]
                    .lines()
                    .map(|l| strip_quote_prefix(l, depth).to_string())
                    .filter(|l| !l.trim().is_empty())
                    .collect();
                let line = self.line_of(range.start);
                self.out
                    .blocks
                    .push(ParsedBlock::RawTable(RawTable { lines, line }));
                self.table_depth = 1;
            }
            Tag::Emphasis => self.style.italic += 1,
            Tag::Strong => self.style.bold += 1,
            Tag::Strikethrough => self.style.strike += 1,
            Tag::Link { dest_url, .. } => self.style.links.push(dest_url.to_string()),
            Tag::Image { dest_url, .. } => {
                if !self.inside_text_block() {
                    self.flush_runs();
                }
                let line = self.line_of(range.start);
                self.image = Some(ImageState {
                    url: dest_url.to_string(),
                    alt: String::new(),
                    line,
                });
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.items.is_empty() {
                    self.flush_runs();
                } else {
                    // Loose list items keep their paragraphs together.
                    self.push_text("\n");
                }
            }
            TagEnd::Heading(_) => {
                let level = self.heading.take().unwrap_or(1);
                let text = InlineRun::plain_text(&std::mem::take(&mut self.runs))
                    .trim()
                    .to_string();
                self.out
                    .blocks
                    .push(ParsedBlock::Ready(Block::Heading { level, text }));
                self.out.blocks.append(&mut self.deferred);
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    self.finish_code(code);
                }
            }
            TagEnd::HtmlBlock => {
                if let Some((line, html)) = self.html.take() {
                    let text = html.trim().to_string();
                    if !text.is_empty() {
                        self.out.warnings.push(ParseError::Unsupported {
                            line,
                            construct: "raw HTML block".into(),
                        });
                        self.out.blocks.push(ParsedBlock::Ready(Block::Paragraph {
                            runs: vec![InlineRun::plain(text)],
                        }));
                    }
                }
            }
            TagEnd::List(_) => {
                self.flush_runs();
                self.lists.pop();
            }
            TagEnd::Item => {
                self.flush_runs();
                self.items.pop();
            }
            TagEnd::BlockQuote(_) => {
                self.flush_runs();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::Emphasis => self.style.italic = self.style.italic.saturating_sub(1),
            TagEnd::Strong => self.style.bold = self.style.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.style.strike = self.style.strike.saturating_sub(1),
            TagEnd::Link => {
                self.style.links.pop();
            }
            TagEnd::Image => {
                if let Some(image) = self.image.take() {
                    self.finish_image(image);
                }
            }
            _ => {}
        }
    }

    fn finish_code(&mut self, code: CodeState) {
        let mut text = code.text;
        if text.ends_with('\n') {
            text.pop();
        }
        let block = match code.language {
            Some(lang) if self.config.is_diagram_language(&lang) => {
                ParsedBlock::Diagram(DiagramSource {
                    language: lang.to_ascii_lowercase(),
                    source: text,
                })
            }
            language => ParsedBlock::Ready(Block::CodeBlock { language, text }),
        };
        self.out.blocks.push(block);
    }

    fn finish_image(&mut self, image: ImageState) {
        let caption = Some(image.alt.trim().to_string()).filter(|s| !s.is_empty());
        let source = if image.url.starts_with("data:") {
            match decode_data_uri(&image.url) {
                Ok(source) => source,
                Err(reason) => {
                    self.out.warnings.push(ParseError::Unsupported {
                        line: image.line,
                        construct: format!("inline image ({reason})"),
                    });
                    let text = caption.unwrap_or_else(|| "image".to_string());
                    self.emit_image(ParsedBlock::Ready(Block::Paragraph {
                        runs: vec![InlineRun::plain(format!("[{text}]"))],
                    }));
                    return;
                }
            }
        } else {
            ImageSource::Reference(image.url)
        };
        self.emit_image(ParsedBlock::Ready(Block::Image { source, caption }));
    }

    /// Headings and list items keep their text in one block; an image
    /// inside them follows that block instead of splitting it.
    fn inside_text_block(&self) -> bool {
        self.heading.is_some() || !self.items.is_empty()
    }

    fn emit_image(&mut self, block: ParsedBlock) {
        if self.inside_text_block() {
            self.deferred.push(block);
        } else {
            self.out.blocks.push(block);
        }
    }

    fn styled(&self, text: &str) -> InlineRun {
        InlineRun {
            text: text.to_string(),
            bold: self.style.bold > 0,
            italic: self.style.italic > 0,
            code: false,
            strike: self.style.strike > 0,
            link: self.style.links.last().cloned(),
        }
    }

    fn push_text(&mut self, text: &str) {
        let run = self.styled(text);
        self.runs.push(run);
    }

    /// Emit pending inline text as a paragraph, list item or quote.
    fn flush_runs(&mut self) {
        if self.heading.is_some() {
            return;
        }
        let runs = trim_runs(coalesce_runs(std::mem::take(&mut self.runs)));
        if !runs.is_empty() {
            let block = self.text_block(runs);
            self.out.blocks.push(ParsedBlock::Ready(block));
        }
        self.out.blocks.append(&mut self.deferred);
    }

    fn text_block(&self, runs: Vec<InlineRun>) -> Block {
        if let Some(item) = self.items.last() {
            Block::ListItem {
                marker: item.marker,
                depth: item.depth,
                runs,
            }
        } else if self.quote_depth > 0 {
            Block::Quote { runs }
        } else {
            Block::Paragraph { runs }
        }
    }
}

/// Trim leading/trailing whitespace across the run sequence.
fn trim_runs(mut runs: Vec<InlineRun>) -> Vec<InlineRun> {
    while let Some(first) = runs.first_mut() {
        let trimmed = first.text.trim_start();
        if trimmed.is_empty() {
            runs.remove(0);
        } else {
            first.text = trimmed.to_string();
            break;
        }
    }
    while let Some(last) = runs.last_mut() {
        let trimmed = last.text.trim_end();
        if trimmed.is_empty() {
            runs.pop();
        } else {
            last.text = trimmed.to_string();
            break;
        }
    }
    runs
}

fn strip_quote_prefix(line: &str, depth: usize) -> &str {
    let mut rest = line;
    for _ in 0..depth {
        rest = rest.trim_start();
        match rest.strip_prefix('>') {
            Some(r) => rest = r,
            None => break,
        }
    }
    rest
}

/// Decode `data:<mime>;base64,<payload>`.
fn decode_data_uri(uri: &str) -> Result<ImageSource, String> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| "malformed data URI".to_string())?;
    if !header.ends_with(";base64") {
        return Err("data URI is not base64".into());
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| e.to_string())?;
    ImageSource::embedded(Arc::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tiny_png;
    use pretty_assertions::assert_eq;

    fn parse(md: &str) -> ParseOutput {
        parse_markdown(md, &RenderConfig::default())
    }

    fn ready(blocks: &[ParsedBlock]) -> Vec<&Block> {
        blocks
            .iter()
            .filter_map(|b| match b {
                ParsedBlock::Ready(block) => Some(block),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn heading_and_paragraph() {
        let out = parse("# Title\n\nHello *world*");
        let blocks = ready(&out.blocks);
        assert_eq!(
            *blocks[0],
            Block::Heading {
                level: 1,
                text: "Title".into()
            }
        );
        match blocks[1] {
            Block::Paragraph { runs } => {
                assert_eq!(runs.len(), 2);
                assert_eq!(runs[0].text, "Hello ");
                assert!(runs[1].italic);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn inline_styles_and_links() {
        let out = parse("**bold** `code` ~~gone~~ [site](https://example.com)");
        let first = ready(&out.blocks)[0];
        let Block::Paragraph { runs } = first else {
            panic!("expected paragraph");
        };
        assert!(runs.iter().any(|r| r.bold && r.text == "bold"));
        assert!(runs.iter().any(|r| r.code && r.text == "code"));
        assert!(runs.iter().any(|r| r.strike && r.text == "gone"));
        assert!(runs
            .iter()
            .any(|r| r.text == "site" && r.link.as_deref() == Some("https://example.com")));
    }

    #[test]
    fn mermaid_fence_becomes_diagram() {
        let out = parse("```Mermaid\ngraph TD\n  A-->B\n```\n");
        assert_eq!(
            out.blocks,
            vec![ParsedBlock::Diagram(DiagramSource {
                language: "mermaid".into(),
                source: "graph TD\n  A-->B".into(),
            })]
        );
    }

    #[test]
    fn other_fences_are_code() {
        let out = parse("```rust\nfn main() {}\n```\n\n    indented\n");
        let blocks = ready(&out.blocks);
        assert_eq!(
            *blocks[0],
            Block::CodeBlock {
                language: Some("rust".into()),
                text: "fn main() {}".into()
            }
        );
        assert_eq!(
            *blocks[1],
            Block::CodeBlock {
                language: None,
                text: "indented".into()
            }
        );
    }

    #[test]
    fn table_passed_as_raw_lines() {
        let md = "Intro\n\n| a | b |\n|---|:-:|\n| 1 | 2 |\n\nAfter";
        let out = parse(md);
        let table = out
            .blocks
            .iter()
            .find_map(|b| match b {
                ParsedBlock::RawTable(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert_eq!(table.lines, vec!["| a | b |", "|---|:-:|", "| 1 | 2 |"]);
        assert_eq!(table.line, 3);
        // Cell text must not leak into paragraphs.
        let paragraphs: Vec<_> = ready(&out.blocks)
            .into_iter()
            .filter_map(|b| match b {
                Block::Paragraph { runs } => Some(InlineRun::plain_text(runs)),
                _ => None,
            })
            .collect();
        assert_eq!(paragraphs, vec!["Intro", "After"]);
    }

    #[test]
    fn lists_carry_markers_and_depth() {
        let out = parse("- one\n- two\n  1. nested\n  2. again\n");
        let items: Vec<_> = ready(&out.blocks)
            .into_iter()
            .filter_map(|b| match b {
                Block::ListItem { marker, depth, runs } => {
                    Some((*marker, *depth, InlineRun::plain_text(runs)))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            items,
            vec![
                (ListMarker::Bullet, 0, "one".to_string()),
                (ListMarker::Bullet, 0, "two".to_string()),
                (ListMarker::Ordered(1), 1, "nested".to_string()),
                (ListMarker::Ordered(2), 1, "again".to_string()),
            ]
        );
    }

    #[test]
    fn task_list_marker_kept_as_text() {
        let out = parse("- [x] done\n- [ ] todo\n");
        let texts: Vec<_> = ready(&out.blocks)
            .into_iter()
            .filter_map(|b| match b {
                Block::ListItem { runs, .. } => Some(InlineRun::plain_text(runs)),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["[x] done", "[ ] todo"]);
    }

    #[test]
    fn quote_and_rule() {
        let out = parse("> quoted line\n\n---\n");
        let blocks = ready(&out.blocks);
        assert!(matches!(blocks[0], Block::Quote { .. }));
        assert_eq!(*blocks[1], Block::Rule);
    }

    #[test]
    fn html_block_degrades_with_warning() {
        let out = parse("<div>\nraw\n</div>\n");
        let blocks = ready(&out.blocks);
        assert!(matches!(blocks[0], Block::Paragraph { .. }));
        assert_eq!(out.warnings.len(), 1);
        assert!(matches!(out.warnings[0], ParseError::Unsupported { line: 1, .. }));
    }

    #[test]
    fn reference_image_with_caption() {
        let out = parse("![A chart](chart.png)");
        assert_eq!(
            *ready(&out.blocks)[0],
            Block::Image {
                source: ImageSource::Reference("chart.png".into()),
                caption: Some("A chart".into()),
            }
        );
    }

    #[test]
    fn data_uri_image_is_embedded() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(tiny_png(3, 2));
        let out = parse(&format!("![dot](data:image/png;base64,{b64})"));
        match ready(&out.blocks)[0] {
            Block::Image {
                source: ImageSource::Embedded { width, height, .. },
                ..
            } => assert_eq!((*width, *height), (3, 2)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn image_in_heading_follows_the_heading() {
        let out = parse("# Logo ![mark](logo.png) Inc\n\nBody");
        let blocks = ready(&out.blocks);
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], Block::Heading { level: 1, text } if text.starts_with("Logo")));
        assert!(matches!(blocks[1], Block::Image { .. }));
        assert!(matches!(blocks[2], Block::Paragraph { .. }));
    }

    #[test]
    fn image_in_list_item_keeps_one_item() {
        let out = parse("- see ![icon](i.png) here\n- next\n");
        let blocks = ready(&out.blocks);
        assert_eq!(blocks.len(), 3);
        match blocks[0] {
            Block::ListItem { marker, runs, .. } => {
                assert_eq!(*marker, ListMarker::Bullet);
                let text = InlineRun::plain_text(runs);
                assert!(text.starts_with("see") && text.ends_with("here"), "got: {text}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(blocks[1], Block::Image { caption: Some(c), .. } if c == "icon"));
        assert!(matches!(blocks[2], Block::ListItem { runs, .. } if InlineRun::plain_text(runs) == "next"));
    }

    #[test]
    fn broken_data_uri_degrades() {
        let out = parse("![dot](data:image/png;base64,@@@@)");
        assert!(matches!(ready(&out.blocks)[0], Block::Paragraph { .. }));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn empty_input_has_no_blocks() {
        assert!(parse("").blocks.is_empty());
    }
}
