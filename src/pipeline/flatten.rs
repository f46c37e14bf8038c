//! Document text flattening: every span's text, in page then recognition
//! order, each followed by a single space.
//!
//! The trailing separator is kept so output is byte-identical across batch
//! and interactive runs, and across artifacts written by older versions.

use crate::output::PageResult;

/// Flatten an OCR result into one prompt-ready string. Empty input gives "".
pub fn flatten_text(pages: &[PageResult]) -> String {
    let cap = pages
        .iter()
        .flat_map(|p| &p.lines)
        .map(|l| l.text.len() + 1)
        .sum();
    let mut out = String::with_capacity(cap);
    for span in pages.iter().flat_map(|p| &p.lines) {
        out.push_str(&span.text);
        out.push(' ');
    }
    out
}

/// Number of spans across all pages.
pub fn span_count(pages: &[PageResult]) -> usize {
    pages.iter().map(|p| p.lines.len()).sum()
}
