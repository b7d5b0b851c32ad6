//! Document model builder: resolved blocks + request metadata → [`Document`].

use crate::model::{Block, Document, DocumentMeta};

/// Assemble the document. The title is the first level-1 heading, else the
/// filename stem, else `"Document"`.
pub fn build_document(blocks: Vec<Block>, filename: &str, stylesheet: Option<String>) -> Document {
    let title = blocks
        .iter()
        .find_map(|b| match b {
            Block::Heading { level: 1, text } if !text.trim().is_empty() => {
                Some(text.trim().to_string())
            }
            _ => None,
        })
        .or_else(|| {
            let stem = filename.trim();
            (!stem.is_empty() && stem != "document").then(|| stem.to_string())
        })
        .unwrap_or_else(|| "Document".to_string());

    Document {
        meta: DocumentMeta {
            title,
            filename: filename.to_string(),
            stylesheet: stylesheet.filter(|s| !s.trim().is_empty()),
        },
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(level: u8, text: &str) -> Block {
        Block::Heading {
            level,
            text: text.into(),
        }
    }

    #[test]
    fn first_h1_wins() {
        let doc = build_document(
            vec![heading(2, "Intro"), heading(1, "Report"), heading(1, "Other")],
            "file",
            None,
        );
        assert_eq!(doc.meta.title, "Report");
        assert_eq!(doc.blocks.len(), 3);
    }

    #[test]
    fn filename_then_default() {
        assert_eq!(build_document(vec![], "q3-summary", None).meta.title, "q3-summary");
        assert_eq!(build_document(vec![], "document", None).meta.title, "Document");
    }

    #[test]
    fn blank_stylesheet_dropped() {
        let doc = build_document(vec![], "x", Some("  \n".into()));
        assert_eq!(doc.meta.stylesheet, None);
    }
}
