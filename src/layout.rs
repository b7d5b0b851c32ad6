//! Text metrics and line wrapping shared by pagination and the in-process
//! renderers.
//!
//! Widths are estimates for the standard Helvetica and Courier faces:
//! proportional text averages about half an em per glyph, monospace is a
//! fixed 0.6 em. The canvas PDF backend wraps with the same functions the
//! paginator measures with, so a page never holds more than was estimated.

use crate::model::InlineRun;

/// Font size and line advance, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub leading: f32,
}

pub const BODY: TextStyle = TextStyle {
    size: 10.0,
    leading: 14.0,
};
pub const CODE: TextStyle = TextStyle {
    size: 8.0,
    leading: 11.0,
};
pub const CAPTION: TextStyle = TextStyle {
    size: 8.0,
    leading: 11.0,
};
pub const RUNNING: TextStyle = TextStyle {
    size: 9.0,
    leading: 11.0,
};
pub const TABLE_HEADER: TextStyle = TextStyle {
    size: 8.0,
    leading: 10.0,
};
pub const TABLE_CELL: TextStyle = TextStyle {
    size: 7.0,
    leading: 9.0,
};
pub const WIDE_TABLE_HEADER: TextStyle = TextStyle {
    size: 7.0,
    leading: 9.0,
};
pub const WIDE_TABLE_CELL: TextStyle = TextStyle {
    size: 6.0,
    leading: 8.0,
};

/// Vertical gap after most blocks.
pub const BLOCK_SPACING: f32 = 6.0;
pub const LIST_SPACING: f32 = 2.0;
pub const HEADING_SPACE_BEFORE: f32 = 6.0;
pub const HEADING_SPACE_AFTER: f32 = 4.0;
pub const CODE_PADDING: f32 = 6.0;
pub const CELL_PADDING: f32 = 3.0;
pub const LIST_INDENT: f32 = 18.0;
pub const QUOTE_INDENT: f32 = 14.0;
pub const RULE_HEIGHT: f32 = 12.0;
/// Box drawn for an image that is only referenced by URL.
pub const REFERENCE_IMAGE_HEIGHT: f32 = 36.0;
/// CSS pixel → point.
pub const PX_TO_PT: f32 = 0.75;

pub fn heading_style(level: u8) -> TextStyle {
    match level {
        1 => TextStyle {
            size: 18.0,
            leading: 22.0,
        },
        2 => TextStyle {
            size: 14.0,
            leading: 18.0,
        },
        3 => TextStyle {
            size: 12.0,
            leading: 16.0,
        },
        4 => TextStyle {
            size: 11.0,
            leading: 14.0,
        },
        _ => TextStyle {
            size: 10.0,
            leading: 13.0,
        },
    }
}

/// Advance width of one glyph in points.
pub fn char_width(c: char, size: f32, mono: bool) -> f32 {
    if mono {
        return 0.6 * size;
    }
    let em = match c {
        ' ' => 0.278,
        'i' | 'j' | 'l' | '.' | ',' | ';' | ':' | '!' | '|' | '\'' | '`' => 0.25,
        'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '-' => 0.35,
        'm' | 'w' | 'M' | 'W' | '@' | '%' => 0.85,
        'A'..='Z' => 0.68,
        '0'..='9' => 0.556,
        c if c.is_ascii() => 0.5,
        // CJK and other wide scripts
        c if (c as u32) >= 0x2E80 => 1.0,
        _ => 0.55,
    };
    em * size
}

pub fn text_width(text: &str, size: f32, mono: bool) -> f32 {
    text.chars().map(|c| char_width(c, size, mono)).sum()
}

/// One wrapped line: `(run index, text)` fragments in order.
pub type Line = Vec<(usize, String)>;

/// Word-wrap styled runs into lines no wider than `width`.
///
/// `\n` inside a run forces a break. Words wider than a full line are
/// broken between characters. Code runs are measured as monospace. Always
/// returns at least one (possibly empty) line.
pub fn wrap_runs(runs: &[InlineRun], width: f32, size: f32) -> Vec<Line> {
    let mut lines: Vec<Line> = vec![Vec::new()];
    let mut line_w = 0.0_f32;

    for (idx, run) in runs.iter().enumerate() {
        let mono = run.code;
        for (i, segment) in run.text.split('\n').enumerate() {
            if i > 0 {
                lines.push(Vec::new());
                line_w = 0.0;
            }
            for token in tokens(segment) {
                let w = text_width(token, size, mono);
                let line_empty = lines.last().is_none_or(|l| l.is_empty());
                if token.starts_with(char::is_whitespace) {
                    if !line_empty {
                        push_fragment(&mut lines, idx, token);
                        line_w += w;
                    }
                    continue;
                }
                if line_w + w > width && !line_empty {
                    lines.push(Vec::new());
                    line_w = 0.0;
                }
                if w <= width {
                    push_fragment(&mut lines, idx, token);
                    line_w += w;
                    continue;
                }
                for c in token.chars() {
                    let cw = char_width(c, size, mono);
                    if line_w + cw > width && line_w > 0.0 {
                        lines.push(Vec::new());
                        line_w = 0.0;
                    }
                    let mut buf = [0u8; 4];
                    push_fragment(&mut lines, idx, c.encode_utf8(&mut buf));
                    line_w += cw;
                }
            }
        }
    }

    for line in &mut lines {
        while let Some((_, last)) = line.last_mut() {
            let trimmed_len = last.trim_end().len();
            if trimmed_len == 0 {
                line.pop();
            } else {
                last.truncate(trimmed_len);
                break;
            }
        }
    }
    lines
}

/// Wrap unstyled text.
pub fn wrap_text(text: &str, width: f32, size: f32, mono: bool) -> Vec<String> {
    let run = InlineRun {
        text: text.to_string(),
        code: mono,
        ..InlineRun::default()
    };
    wrap_runs(std::slice::from_ref(&run), width, size)
        .into_iter()
        .map(|line| line.into_iter().map(|(_, t)| t).collect())
        .collect()
}

/// Wrap a code listing: every source line wraps independently.
pub fn wrap_code(text: &str, width: f32, size: f32) -> Vec<String> {
    text.split('\n')
        .flat_map(|line| wrap_text(&line.replace('\t', "    "), width, size, true))
        .collect()
}

/// Display size in points of a `px_w`×`px_h` image, scaled down to fit.
pub fn image_box(px_w: u32, px_h: u32, max_w: f32, max_h: f32) -> (f32, f32) {
    let w = (px_w.max(1) as f32) * PX_TO_PT;
    let h = (px_h.max(1) as f32) * PX_TO_PT;
    let scale = (max_w / w).min(max_h / h).min(1.0);
    (w * scale, h * scale)
}

fn push_fragment(lines: &mut [Line], idx: usize, text: &str) {
    let Some(line) = lines.last_mut() else {
        return;
    };
    match line.last_mut() {
        Some((last_idx, buf)) if *last_idx == idx => buf.push_str(text),
        _ => line.push((idx, text.to_string())),
    }
}

/// Split into alternating word / whitespace tokens.
fn tokens(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let ws = first.is_whitespace();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace() != ws)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (token, tail) = rest.split_at(end);
        rest = tail;
        Some(token)
    })
}
