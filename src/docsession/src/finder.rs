//! Locating example regions in a document and turning them into test cases.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info};

use crate::core::{parser, TestCase};
use crate::directives::Directives;
use crate::doc::{Document, Format, Node, NodeId, NodeKind};
use crate::lang::{Namespace, Value};

/// Finds the test cases of reStructuredText and Markdown documents.
///
/// Examples are taken from `doctest`, `testsetup` and `testcleanup`
/// directives, from reStructuredText doctest blocks and from literal blocks
/// whose first line is a `>>>` prompt.
#[derive(Debug, Clone)]
pub struct Finder {
    directives: Directives,
    verbose: bool,
}

impl Default for Finder {
    fn default() -> Self {
        Self::new()
    }
}

impl Finder {
    pub fn new() -> Self {
        let mut directives = Directives::new();
        directives.setup();
        Self {
            directives,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn directives(&self) -> &Directives {
        &self.directives
    }

    /// Find the test cases defined by `text`.
    ///
    /// `name` is the file name of the text; it selects the markup format and
    /// prefixes the names of test cases without an explicit group. Every
    /// test case gets its own copy of `globs` updated with `extraglobs`.
    pub fn find(
        &mut self,
        text: &str,
        name: Option<&str>,
        globs: Option<&Namespace>,
        extraglobs: Option<&Namespace>,
    ) -> Result<Vec<TestCase>, Error> {
        let name = name.ok_or(Error::NameRequired)?;
        if self.verbose {
            info!("Finding tests in {name}");
        }

        let globs = globs.map(Namespace::copy).unwrap_or_default();
        if let Some(extraglobs) = extraglobs {
            globs.update(extraglobs);
        }
        if !globs.contains("__name__") {
            globs.set("__name__", Value::str("__main__"));
        }

        self.directives.setup();
        let format = Format::from_name(name);
        debug!(name, ?format, "parse");
        let doc = format.parse(text, Some(name), &self.directives);
        self.find_in(&doc, name, &globs)
    }

    /// Find the test cases of an already parsed document.
    pub fn find_in(&self, doc: &Document, name: &str, globs: &Namespace) -> Result<Vec<TestCase>, Error> {
        let mut tests = Vec::new();
        let mut seen = HashSet::new();
        let regions = doc.traverse().filter(|&id| is_region(doc.node(id)));
        for (index, id) in regions.enumerate() {
            if !seen.insert(id) {
                continue;
            }
            tests.push(self.test_case(doc.node(id), id, index, name, globs)?);
        }
        tests.sort_by(|a, b| (&a.name, a.line).cmp(&(&b.name, b.line)));
        Ok(tests)
    }

    fn test_case(
        &self,
        node: &Node,
        id: NodeId,
        index: usize,
        name: &str,
        globs: &Namespace,
    ) -> Result<TestCase, Error> {
        let test_name = match node.attrs.groups.first() {
            Some(group) if group != "default" => group.clone(),
            _ => format!("{name}[{index}]"),
        };
        let line = node.line.unwrap_or(1);
        let content_line = node.content_line.unwrap_or(line);
        debug!(?id, test_name, line, "region");

        let text = node.attrs.test.as_deref().unwrap_or(&node.text);
        let mut test = TestCase::parse(text, globs.copy(), &test_name, name, line).map_err(|source| {
            Error::Parse {
                line: content_line + source.line() - 1,
                name: test_name.clone(),
                source,
            }
        })?;
        // Directive options apply to every example; inline options win.
        if !node.attrs.options.is_empty() {
            for example in &mut test.examples {
                let mut options = node.attrs.options;
                options.merge(&example.options);
                example.options = options;
            }
        }
        test.content_line = content_line;
        test.groups = node.attrs.groups.clone();
        test.kind = node.attrs.test_kind;
        test.skipif = node.attrs.skipif.clone();
        Ok(test)
    }
}

fn is_region(node: &Node) -> bool {
    match node.kind {
        NodeKind::LiteralBlock => node.attrs.test_kind.is_some() || starts_with_prompt(&node.text),
        NodeKind::Comment => node.attrs.test_kind.is_some(),
        NodeKind::DoctestBlock => true,
        _ => false,
    }
}

fn starts_with_prompt(text: &str) -> bool {
    text.trim_start_matches(' ').starts_with(">>>")
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("a name must be given to find tests in a text")]
    NameRequired,
    #[error("cannot parse test {name} at line {line}: {source}")]
    Parse {
        name: String,
        line: usize,
        #[source]
        source: parser::Error,
    },
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::examples::*;
    use crate::doc::TestKind;
    use crate::options::OptionFlags;

    fn find(text: &str, name: &str) -> Vec<TestCase> {
        Finder::new().find(text, Some(name), None, None).unwrap()
    }

    fn names(tests: &[TestCase]) -> Vec<(&str, usize)> {
        tests.iter().map(|t| (t.name.as_str(), t.line)).collect()
    }

    #[test]
    fn name_is_required() {
        let err = Finder::new().find(">>> 1\n1\n", None, None, None).unwrap_err();
        assert!(matches!(err, Error::NameRequired));
    }

    #[test]
    fn groups_and_synthesized_names() {
        let tests = find(RST_GROUPS, "groups.rst");
        assert_eq!(
            names(&tests),
            vec![("*", 4), ("alpha", 13), ("beta", 8), ("groups.rst[3]", 20)]
        );
        assert_eq!(tests[0].kind, Some(TestKind::Setup));
        assert_eq!(tests[1].examples[0].source, "base + 1\n");
        assert_eq!(tests[1].content_line, 15);
        assert_eq!(tests[3].kind, None);
        assert_eq!(tests[3].content_line, 20);
    }

    #[test]
    fn blocks_under_one_tab_stay_separate() {
        let tests = find(
            indoc! {"
                :::{tab} Label
                ```{doctest}
                >>> 1 + 1
                2
                ```

                ```{doctest}
                >>> 2 * 3
                6
                ```
                :::
            "},
            "t.md",
        );
        assert_eq!(names(&tests), vec![("t.md[0]", 2), ("t.md[1]", 7)]);
        assert_eq!(tests[0].examples.len(), 1);
        assert_eq!(tests[1].examples[0].source, "2 * 3\n");
    }

    #[test]
    fn prompted_blocks_in_backtick_tabs() {
        let tests = find(
            indoc! {"
                # Tabs

                ````{tab} First
                ```python
                >>> 1 + 1
                2
                ```
                ````

                ````{tab} Second
                ```python
                >>> 'a' * 2
                'aa'
                ```
                ````
            "},
            "t.md",
        );
        assert_eq!(names(&tests), vec![("t.md[0]", 4), ("t.md[1]", 11)]);
        assert_eq!(tests[1].examples[0].want, "'aa'\n");
    }

    #[test]
    fn markdown_regions() {
        let tests = find(MD_SESSION, "session.md");
        assert_eq!(names(&tests), vec![("session.md[0]", 3), ("session.md[1]", 11)]);
        assert_eq!(tests[0].examples.len(), 3);
        assert_eq!(
            tests[1].examples[0].exc_msg.as_deref(),
            Some("NameError: name 'total' is not defined\n")
        );
    }

    #[test]
    fn only_prompted_literal_blocks_are_regions() {
        let tests = find(
            indoc! {"
                Code::

                   print(1)

                Session::

                     >>> 1
                     1

                .. code-block:: python

                   >>> 2
                   2

                .. a comment with >>> 3
            "},
            "t.rst",
        );
        assert_eq!(names(&tests), vec![("t.rst[0]", 7), ("t.rst[1]", 10)]);
    }

    #[test]
    fn equal_names_sort_by_line() {
        let tests = find(
            indoc! {"
                .. doctest:: same

                   >>> 2
                   2

                .. doctest:: same

                   >>> 1
                   1
            "},
            "t.rst",
        );
        assert_eq!(names(&tests), vec![("same", 1), ("same", 6)]);
    }

    #[test]
    fn empty_regions_are_kept() {
        let tests = find(".. testcleanup::\n\n   del x\n", "t.rst");
        assert_eq!(tests.len(), 1);
        assert!(tests[0].is_empty());
    }

    #[test]
    fn globals_are_copied() {
        let globs = Namespace::new();
        globs.set("a", Value::Int(1));
        let extra = Namespace::new();
        extra.set("a", Value::Int(2));
        extra.set("__name__", Value::str("docs"));

        let tests = Finder::new()
            .find(RST_GROUPS, Some("g.rst"), Some(&globs), Some(&extra))
            .unwrap();
        tests[0].globs.set("leak", Value::None);
        for test in &tests {
            assert_eq!(test.globs.get("a").map(|v| v.repr()), Some("2".into()));
            assert_eq!(test.globs.get("__name__").map(|v| v.to_str()), Some("docs".into()));
        }
        assert!(!tests[1].globs.contains("leak"));
        assert!(!globs.contains("__name__"));

        let tests = find(RST_GROUPS, "g.rst");
        assert_eq!(
            tests[0].globs.get("__name__").map(|v| v.to_str()),
            Some("__main__".into())
        );
    }

    #[test]
    fn parse_errors_name_the_region() {
        let text = indoc! {"
            Intro.

            .. doctest:: broken

               >>> 1
               1
               >>>oops
        "};
        let err = Finder::new().find(text, Some("t.rst"), None, None).unwrap_err();
        let Error::Parse { name, line, .. } = &err else {
            panic!("unexpected error {err}");
        };
        assert_eq!((name.as_str(), *line), ("broken", 7));
    }

    #[test]
    fn directive_options_apply_to_examples() {
        let tests = find(
            indoc! {"
                .. doctest::
                   :options: +ELLIPSIS, +NORMALIZE_WHITESPACE

                   >>> print('a b')
                   a...
                   >>> print('a b')  # doctest: -ELLIPSIS
                   a b

                .. doctest::
                   :version: < 0.0.1

                   >>> never()
            "},
            "t.rst",
        );
        let first = &tests[0].examples;
        assert_eq!(first[0].options.get(OptionFlags::ELLIPSIS), Some(true));
        assert_eq!(first[1].options.get(OptionFlags::ELLIPSIS), Some(false));
        assert_eq!(first[1].options.get(OptionFlags::NORMALIZE_WHITESPACE), Some(true));
        assert_eq!(tests[1].examples[0].options.get(OptionFlags::SKIP), Some(true));
    }

    #[test]
    fn hidden_and_trimmed_regions_execute_the_raw_text() {
        let tests = find(
            indoc! {"
                .. doctest::
                   :hide:

                   >>> print('a\\n\\nb')  # doctest: +NORMALIZE_WHITESPACE
                   a
                   <BLANKLINE>
                   b
            "},
            "t.rst",
        );
        assert_eq!(tests.len(), 1);
        let example = &tests[0].examples[0];
        assert_eq!(example.want, "a\n<BLANKLINE>\nb\n");
        assert!(!example.options.is_empty());
    }
}
