//! Support for documents written in Markdown.
//!
//! The document is tokenized with `pulldown-cmark`. Fenced code blocks
//! become literal blocks, unless their info string names a directive
//! (`{doctest}`, `{eval-rst}`, ...). Colon fences of the form
//! `:::{name} argument` are recognized as directives as well.

pub(crate) mod reader;

use crate::directives::Directives;
use crate::doc::{Document, Format, NodeId};

/// Parse a Markdown document.
pub fn parse(text: &str, source: Option<&str>, directives: &Directives) -> Document {
    Format::Markdown.parse(text, source, directives)
}

pub(crate) fn parse_into(
    doc: &mut Document,
    parent: NodeId,
    text: &str,
    first_line: usize,
    directives: &Directives,
) {
    reader::Reader::new(doc, directives).parse(parent, text, first_line);
}
