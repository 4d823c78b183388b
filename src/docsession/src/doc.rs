//! The document tree shared by the reStructuredText and Markdown readers.
//!
//! A parsed [`Document`] is an arena of [`Node`]s addressed by [`NodeId`].
//! Readers only append to the arena; once parsing is done the tree is read
//! only and walked with [`Document::traverse`].

use std::fmt::{self, Display};

use tracing::warn;

use crate::directives::Directives;
use crate::options::OptionDelta;
use crate::{md, rst};

/// Index of a [`Node`] inside its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Section,
    Paragraph,
    LiteralBlock,
    DoctestBlock,
    Comment,
    Container,
}

/// Which test directive produced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestKind {
    Doctest,
    Setup,
    Cleanup,
}

impl TestKind {
    pub fn directive_name(self) -> &'static str {
        match self {
            Self::Doctest => "doctest",
            Self::Setup => "testsetup",
            Self::Cleanup => "testcleanup",
        }
    }
}

/// Typed attributes attached to a node by the directive layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub groups: Vec<String>,
    /// The text to execute when it differs from the displayed text.
    pub test: Option<String>,
    pub options: OptionDelta,
    pub skipif: Option<String>,
    pub trim_flags: Option<bool>,
    pub test_kind: Option<TestKind>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub text: String,
    /// 1-based line of the construct that produced the node.
    pub line: Option<usize>,
    /// 1-based line of the first line of `text`.
    pub content_line: Option<usize>,
    pub source: Option<String>,
    pub attrs: Attributes,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            line: None,
            content_line: None,
            source: None,
            attrs: Attributes::default(),
            children: Vec::new(),
        }
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = Some(line);
        self.content_line.get_or_insert(line);
        self
    }

    pub fn with_content_line(mut self, line: usize) -> Self {
        self.content_line = Some(line);
        self
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A warning produced while reading a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub source: Option<String>,
    nodes: Vec<Node>,
    diagnostics: Vec<Diagnostic>,
}

impl Document {
    pub fn new(source: Option<&str>) -> Self {
        Self {
            source: source.map(str::to_string),
            nodes: vec![Node::new(NodeKind::Root, "")],
            diagnostics: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append `node` as the last child of `parent`.
    pub fn add(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        if node.source.is_none() {
            node.source = self.source.clone();
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Iterate over all nodes in document order, parents before children.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            doc: self,
            stack: vec![self.root()],
        }
    }

    pub fn warn(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        let source = self.source.as_deref().unwrap_or("<string>");
        warn!(source, line, "{message}");
        self.diagnostics.push(Diagnostic { line, message });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// Pre-order iterator returned by [`Document::traverse`].
pub struct Traverse<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Traverse<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.node(id).children.iter().rev().copied());
        Some(id)
    }
}

// Formats
// =======

/// The markup languages understood by the readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Rst,
    Markdown,
}

impl Format {
    /// Pick the format from a file name: `.md` is Markdown, anything else
    /// is reStructuredText.
    pub fn from_name(name: &str) -> Self {
        let is_md = std::path::Path::new(name)
            .extension()
            .is_some_and(|ext| ext == "md");
        if is_md {
            Self::Markdown
        } else {
            Self::Rst
        }
    }

    /// Parse `text` into a new document.
    pub fn parse(self, text: &str, source: Option<&str>, directives: &Directives) -> Document {
        let mut doc = Document::new(source);
        let root = doc.root();
        self.parse_into(&mut doc, root, text, 1, directives);
        doc
    }

    /// Parse `text`, whose first line is `first_line` in the document, into
    /// children of `parent`.
    pub(crate) fn parse_into(
        self,
        doc: &mut Document,
        parent: NodeId,
        text: &str,
        first_line: usize,
        directives: &Directives,
    ) {
        match self {
            Self::Rst => rst::parse_into(doc, parent, text, first_line, directives),
            Self::Markdown => md::parse_into(doc, parent, text, first_line, directives),
        }
    }
}

// Positions
// =========

/// A 1-based line and column inside a text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Locate the byte `offset` in `input`.
    pub fn from(offset: usize, input: &str) -> Pos {
        let before = &input[..offset.min(input.len())];
        let line = before.matches('\n').count();
        let column = match before.rfind('\n') {
            Some(start) => offset - start - 1,
            None => offset,
        };
        Pos::new(line + 1, column + 1)
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { line, column } = self;
        write!(f, "line {line}, column {column}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traverse_is_pre_order() {
        let mut doc = Document::new(Some("t.rst"));
        let root = doc.root();
        let a = doc.add(root, Node::new(NodeKind::Container, "a"));
        doc.add(a, Node::new(NodeKind::Paragraph, "a1"));
        doc.add(a, Node::new(NodeKind::Paragraph, "a2"));
        doc.add(root, Node::new(NodeKind::Paragraph, "b"));

        let texts = doc
            .traverse()
            .map(|id| doc.node(id).text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["", "a", "a1", "a2", "b"]);
        assert_eq!(doc.node(a).source.as_deref(), Some("t.rst"));
    }

    #[test]
    fn format_from_name() {
        assert_eq!(Format::from_name("README.md"), Format::Markdown);
        assert_eq!(Format::from_name("docs/index.rst"), Format::Rst);
        assert_eq!(Format::from_name("notes.txt"), Format::Rst);
        assert_eq!(Format::from_name("md"), Format::Rst);
    }

    #[test]
    fn pos_from_offset() {
        let input = "ab\ncde\n\nf";
        assert_eq!(Pos::from(0, input), Pos::new(1, 1));
        assert_eq!(Pos::from(4, input), Pos::new(2, 2));
        assert_eq!(Pos::from(8, input), Pos::new(4, 1));
        assert_eq!(Pos::from(4, input).to_string(), "line 2, column 2");
    }
}
