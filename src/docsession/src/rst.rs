//! A block level reStructuredText reader.
//!
//! Only the constructs that matter for locating examples are recognized:
//! section titles, paragraphs, `::` literal blocks, doctest blocks, explicit
//! markup (directives and comments), block quotes and list items. Inline
//! markup is kept verbatim in the node text.

mod reader;

use crate::directives::Directives;
use crate::doc::{Document, Format, NodeId};

pub(crate) use reader::expand_tabs;

/// Parse a reStructuredText document.
pub fn parse(text: &str, source: Option<&str>, directives: &Directives) -> Document {
    Format::Rst.parse(text, source, directives)
}

pub(crate) fn parse_into(
    doc: &mut Document,
    parent: NodeId,
    text: &str,
    first_line: usize,
    directives: &Directives,
) {
    let lines = reader::lines(text, first_line);
    reader::Reader::new(doc, directives).parse(parent, &lines);
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::doc::{NodeKind, TestKind};

    fn read(text: &str) -> Document {
        let mut directives = Directives::new();
        directives.setup();
        parse(text, Some("test.rst"), &directives)
    }

    /// `(kind, line, text)` of every node except the root, in document order.
    fn outline(doc: &Document) -> Vec<(NodeKind, usize, String)> {
        doc.traverse()
            .skip(1)
            .map(|id| {
                let node = doc.node(id);
                (node.kind, node.line.unwrap_or(0), node.text.clone())
            })
            .collect()
    }

    #[test]
    fn paragraphs_and_literal_blocks() {
        let doc = read(indoc! {"
            Title
            =====

            Some text::

                >>> 1 + 1
                2

            Paragraph ::

              plain literal

            ::

              >>> 'bare'
        "});
        use NodeKind::*;
        assert_eq!(
            outline(&doc),
            vec![
                (Section, 1, "Title".into()),
                (Paragraph, 4, "Some text:".into()),
                (LiteralBlock, 6, ">>> 1 + 1\n2".into()),
                (Paragraph, 9, "Paragraph".into()),
                (LiteralBlock, 11, "plain literal".into()),
                (LiteralBlock, 15, ">>> 'bare'".into()),
            ]
        );
        assert!(doc.diagnostics().is_empty());
    }

    #[test]
    fn doctest_blocks_and_quotes() {
        let doc = read(indoc! {"
            >>> x = 1
            >>> x
            1

            * item text

              >>> 2
              2

              nested
            - other
        "});
        use NodeKind::*;
        assert_eq!(
            outline(&doc),
            vec![
                (DoctestBlock, 1, ">>> x = 1\n>>> x\n1".into()),
                (Container, 5, "".into()),
                (Paragraph, 5, "item text".into()),
                (DoctestBlock, 7, ">>> 2\n2".into()),
                (Paragraph, 10, "nested".into()),
                (Container, 11, "".into()),
                (Paragraph, 11, "other".into()),
            ]
        );
    }

    #[test]
    fn directives() {
        let doc = read(indoc! {"
            .. testsetup:: *

               import asyncio

            .. doctest:: grp
               :options: +ELLIPSIS
               :hide:

               >>> print('abc')
               a...

            .. code-block:: python

               print(1)

            .. a comment
               spanning lines
        "});
        let nodes = doc.traverse().skip(1).map(|id| doc.node(id)).collect::<Vec<_>>();
        assert_eq!(nodes.len(), 4);

        assert_eq!(nodes[0].kind, NodeKind::Comment);
        assert_eq!(nodes[0].attrs.test_kind, Some(TestKind::Setup));
        assert_eq!(nodes[0].attrs.groups, vec!["*"]);
        assert_eq!(nodes[0].text, "import asyncio");
        assert_eq!((nodes[0].line, nodes[0].content_line), (Some(1), Some(3)));

        assert_eq!(nodes[1].kind, NodeKind::Comment);
        assert_eq!(nodes[1].attrs.groups, vec!["grp"]);
        assert_eq!(nodes[1].text, ">>> print('abc')\na...");
        assert_eq!((nodes[1].line, nodes[1].content_line), (Some(5), Some(9)));

        assert_eq!(nodes[2].kind, NodeKind::LiteralBlock);
        assert_eq!(nodes[2].attrs.language.as_deref(), Some("python"));

        assert_eq!(nodes[3].kind, NodeKind::Comment);
        assert_eq!(nodes[3].attrs.test_kind, None);
        assert_eq!(nodes[3].text, "a comment\nspanning lines");
    }

    #[test]
    fn tabs_nest_and_unknown_directives_warn() {
        let doc = read(indoc! {"
            .. tab:: Example

               .. doctest::

                  >>> 3
                  3

            .. nonsense:: x

               >>> 4
        "});
        use NodeKind::*;
        let kinds = doc
            .traverse()
            .skip(1)
            .map(|id| doc.node(id).kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![Container, LiteralBlock]);
        let literal = doc.traverse().last().map(|id| doc.node(id)).unwrap();
        assert_eq!(literal.line, Some(3));
        assert_eq!(literal.content_line, Some(5));

        assert_eq!(doc.diagnostics().len(), 1);
        assert_eq!(doc.diagnostics()[0].line, 8);
        assert_eq!(
            doc.diagnostics()[0].message,
            "Unknown directive type \"nonsense\"."
        );
    }

    #[test]
    fn missing_literal_block_warns() {
        let doc = read("Text::\n\nno indent\n");
        assert_eq!(doc.diagnostics().len(), 1);
        assert_eq!(doc.diagnostics()[0].message, "Literal block expected; none found.");
    }
}
