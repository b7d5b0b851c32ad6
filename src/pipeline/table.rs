//! Pipe-table normalisation.
//!
//! Turns the raw source lines of a GFM table into a [`Table`]: the separator
//! row is consumed for column alignment and never reaches the body, rows are
//! padded or truncated to the header width, and escaped pipes stay literal.
//! A table without a valid separator row degrades to one paragraph per line.

use super::parse::{DiagramSource, ParsedBlock, RawTable};
use crate::error::ParseError;
use crate::model::{Alignment, Block, InlineRun, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// A block after table normalisation; only diagrams remain unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingBlock {
    Ready(Block),
    Diagram(DiagramSource),
}

/// Normalise every raw table in `blocks`, collecting warnings for tables
/// that had to degrade.
pub fn normalize_tables(blocks: Vec<ParsedBlock>) -> (Vec<PendingBlock>, Vec<ParseError>) {
    let mut out = Vec::with_capacity(blocks.len());
    let mut warnings = Vec::new();
    for block in blocks {
        match block {
            ParsedBlock::Ready(b) => out.push(PendingBlock::Ready(b)),
            ParsedBlock::Diagram(d) => out.push(PendingBlock::Diagram(d)),
            ParsedBlock::RawTable(raw) => match normalize(&raw) {
                Ok(table) => {
                    debug!(
                        "Table at line {}: {} columns, {} rows",
                        raw.line,
                        table.column_count(),
                        table.rows.len()
                    );
                    out.push(PendingBlock::Ready(Block::Table(table)));
                }
                Err(e) => {
                    warn!("{}", e);
                    warnings.push(e);
                    out.extend(raw.lines.into_iter().map(|line| {
                        PendingBlock::Ready(Block::Paragraph {
                            runs: vec![InlineRun::plain(line.trim())],
                        })
                    }));
                }
            },
        }
    }
    (out, warnings)
}

/// Build a [`Table`] from raw lines.
pub fn normalize(raw: &RawTable) -> Result<Table, ParseError> {
    let mut lines = raw.lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty());
    let no_separator = || ParseError::TableWithoutSeparator { line: raw.line };

    let header = split_row(lines.next().ok_or_else(no_separator)?);
    let separator = split_row(lines.next().ok_or_else(no_separator)?);
    if header.is_empty() || !is_separator_row(&separator) {
        return Err(no_separator());
    }

    let width = header.len();
    let mut alignments: Vec<Alignment> = separator
        .iter()
        .map(|cell| parse_alignment(cell).unwrap_or_default())
        .collect();
    alignments.resize(width, Alignment::Default);

    let rows = lines
        .map(split_row)
        .filter(|cells| !is_separator_row(cells))
        .map(|mut cells| {
            cells.resize(width, String::new());
            cells
        })
        .collect();

    Ok(Table {
        header,
        rows,
        alignments,
    })
}

/// Split one table line into trimmed cells, honouring `\|` escapes.
fn split_row(line: &str) -> Vec<String> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = match line.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => line,
    };

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(clean_cell(&std::mem::take(&mut cell))),
            _ => cell.push(c),
        }
    }
    cells.push(clean_cell(&cell));
    cells
}

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").unwrap());
static RE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());

/// Cells are plain text; drop the inline markers that would otherwise show.
fn clean_cell(cell: &str) -> String {
    let s = RE_BOLD.replace_all(cell.trim(), "$1$2");
    RE_CODE.replace_all(&s, "$1").into_owned()
}

fn parse_alignment(cell: &str) -> Option<Alignment> {
    let cell = cell.trim();
    if cell.is_empty()
        || !cell.contains('-')
        || !cell.chars().all(|c| c == '-' || c == ':' || c == ' ')
    {
        return None;
    }
    Some(match (cell.starts_with(':'), cell.ends_with(':')) {
        (true, true) => Alignment::Center,
        (false, true) => Alignment::Right,
        (true, false) => Alignment::Left,
        (false, false) => Alignment::Default,
    })
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| parse_alignment(c).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(lines: &[&str]) -> RawTable {
        RawTable {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            line: 1,
        }
    }

    #[test]
    fn three_columns_two_rows() {
        let t = normalize(&raw(&["|a|b|c|", "|-|-|-|", "|1|2|3|", "|4|5|6|"])).unwrap();
        assert_eq!(t.header, vec!["a", "b", "c"]);
        assert_eq!(t.rows, vec![vec!["1", "2", "3"], vec!["4", "5", "6"]]);
    }

    #[test]
    fn separator_alignment() {
        let t = normalize(&raw(&[
            "| l | c | r | d |",
            "|:---|:---:|---:|---|",
            "| 1 | 2 | 3 | 4 |",
        ]))
        .unwrap();
        assert_eq!(
            t.alignments,
            vec![
                Alignment::Left,
                Alignment::Center,
                Alignment::Right,
                Alignment::Default
            ]
        );
    }

    #[test]
    fn separator_never_a_data_row() {
        let t = normalize(&raw(&["a | b", "--- | ---", "1 | 2", "--- | :-:", "3 | 4"])).unwrap();
        assert_eq!(t.rows.len(), 2);
        for row in &t.rows {
            assert!(!is_separator_row(row), "separator leaked: {row:?}");
        }
    }

    #[test]
    fn rows_padded_and_truncated() {
        let t = normalize(&raw(&["|a|b|c|", "|---|---|---|", "|1|", "|1|2|3|4|"])).unwrap();
        assert_eq!(t.rows[0], vec!["1", "", ""]);
        assert_eq!(t.rows[1], vec!["1", "2", "3"]);
    }

    #[test]
    fn escaped_pipes_stay_literal() {
        let t = normalize(&raw(&["| expr | note |", "|---|---|", r"| a \| b | or |"])).unwrap();
        assert_eq!(t.rows[0], vec!["a | b", "or"]);
    }

    #[test]
    fn inline_markers_stripped() {
        let t = normalize(&raw(&["| **Name** | `id` |", "|---|---|", "| __x__ | y |"])).unwrap();
        assert_eq!(t.header, vec!["Name", "id"]);
        assert_eq!(t.rows[0][0], "x");
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = normalize(&raw(&["| a | b |", "| 1 | 2 |"])).unwrap_err();
        assert_eq!(err, ParseError::TableWithoutSeparator { line: 1 });
    }

    #[test]
    fn degraded_table_becomes_paragraphs() {
        let (blocks, warnings) = normalize_tables(vec![ParsedBlock::RawTable(raw(&[
            "| a | b |",
            "| 1 | 2 |",
        ]))]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(blocks.len(), 2);
        assert!(blocks
            .iter()
            .all(|b| matches!(b, PendingBlock::Ready(Block::Paragraph { .. }))));
    }

    #[test]
    fn header_only_table() {
        let t = normalize(&raw(&["| a |", "| --- |"])).unwrap();
        assert_eq!(t.header, vec!["a"]);
        assert!(t.rows.is_empty());
    }
}
