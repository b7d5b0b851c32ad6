//! Input sanitising: deterministic cleanup of request text before parsing.
//!
//! Markdown and stylesheets arrive from untrusted callers. A handful of cheap
//! rules remove bytes that would corrupt the output formats (PDF string
//! objects and DOCX XML both reject raw control characters) without touching
//! visible content.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the control-character pass never
//! sees a lone `\r`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all text rules to Markdown or a stylesheet.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF and bare CR → LF)
/// 2. Strip C0 control characters other than `\t` and `\n`, plus DEL
/// 3. Strip invisible Unicode (zero-width spaces, BOM, word joiner)
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_control_chars(&s);
    remove_invisible_chars(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip control characters ─────────────────────────────────────────

static RE_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());

fn strip_control_chars(input: &str) -> String {
    RE_CONTROL.replace_all(input, "").into_owned()
}

// ── Rule 3: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .collect()
}

// ── Filenames ────────────────────────────────────────────────────────────────

static RE_FILENAME_FORBIDDEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F]"#).unwrap());

/// Make a caller-supplied filename safe for `Content-Disposition` and the
/// local filesystem. Returns the stem; a trailing `.pdf`/`.docx`/`.md`
/// extension is dropped so the caller can append the right one.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = RE_FILENAME_FORBIDDEN.replace_all(name, "");
    let mut stem = cleaned.trim().to_string();
    for ext in [".pdf", ".docx", ".md", ".markdown"] {
        if stem.to_ascii_lowercase().ends_with(ext) {
            stem.truncate(stem.len() - ext.len());
            break;
        }
    }
    let stem = stem.trim().trim_matches('.').trim();
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem.to_string()
    }
}
