//! Syntax highlighting for fenced code in the HTML backends.
//!
//! Code is tokenised with syntect and emitted as `<span class="hl-...">`
//! runs; [`theme_css`] supplies matching colours, so a user stylesheet can
//! restyle tokens without touching the markup. Unknown languages fall back
//! to escaped plain text.

use once_cell::sync::Lazy;
use quick_xml::escape::escape;
use syntect::highlighting::ThemeSet;
use syntect::html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use tracing::debug;

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

/// Light theme close to the GitHub look of the base stylesheet.
const THEME: &str = "InspiredGitHub";

static SYNTAXES: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);

static THEME_CSS: Lazy<String> = Lazy::new(|| {
    let themes = ThemeSet::load_defaults();
    themes
        .themes
        .get(THEME)
        .and_then(|theme| css_for_theme_with_class_style(theme, CLASS_STYLE).ok())
        .unwrap_or_default()
});

/// Token colours for the classes [`highlight`] emits.
pub fn theme_css() -> &'static str {
    &THEME_CSS
}

/// Highlight `code` as `language` (fence tag or file extension).
///
/// Returns escaped HTML for the inside of a `<code>` element.
pub fn highlight(code: &str, language: Option<&str>) -> String {
    let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) else {
        return escape(code).into_owned();
    };
    let syntax = SYNTAXES
        .find_syntax_by_token(language)
        .or_else(|| SYNTAXES.find_syntax_by_extension(language));
    let Some(syntax) = syntax else {
        debug!("No syntax for '{}', code left plain", language);
        return escape(code).into_owned();
    };

    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAXES, CLASS_STYLE);
    for line in LinesWithEndings::from(code) {
        if let Err(e) = generator.parse_html_for_line_which_includes_newline(line) {
            debug!("Highlighting '{}' failed: {}", language, e);
            return escape(code).into_owned();
        }
    }
    generator.finalize()
}
