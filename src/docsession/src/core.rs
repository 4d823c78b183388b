//! Test cases and the examples they are made of.

pub mod parser;

use crate::doc::TestKind;
use crate::lang::Namespace;
use crate::options::OptionDelta;

/// One prompt/expected-output pair of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    /// The statement, always ending with a newline.
    pub source: String,
    /// Expected output. Empty, or ending with a newline.
    pub want: String,
    /// The expected exception message when the example is documented to
    /// raise.
    pub exc_msg: Option<String>,
    /// 0-based line of the prompt inside the session text.
    pub lineno: usize,
    pub indent: usize,
    pub options: OptionDelta,
}

impl Example {
    pub fn new(
        source: impl Into<String>,
        want: impl Into<String>,
        exc_msg: Option<String>,
        lineno: usize,
        indent: usize,
        options: OptionDelta,
    ) -> Self {
        let mut source = source.into();
        if !source.ends_with('\n') {
            source.push('\n');
        }
        let mut want = want.into();
        if !want.is_empty() && !want.ends_with('\n') {
            want.push('\n');
        }
        let exc_msg = exc_msg.map(|mut msg| {
            if !msg.ends_with('\n') {
                msg.push('\n');
            }
            msg
        });
        Self {
            source,
            want,
            exc_msg,
            lineno,
            indent,
            options,
        }
    }
}

/// An independently runnable session found in a document.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub filename: String,
    /// 1-based line where the region starts.
    pub line: usize,
    /// 1-based line of the first line of the session text.
    pub content_line: usize,
    pub examples: Vec<Example>,
    pub globs: Namespace,
    pub groups: Vec<String>,
    /// The directive that produced the region; `None` when it was detected
    /// from a `>>>` prompt.
    pub kind: Option<TestKind>,
    pub skipif: Option<String>,
    /// The session text the examples were parsed from.
    pub docstring: String,
}

impl TestCase {
    /// Parse `text` into a new test case.
    pub fn parse(
        text: &str,
        globs: Namespace,
        name: &str,
        filename: &str,
        line: usize,
    ) -> Result<Self, parser::Error> {
        let examples = parser::parse(text, name)?;
        Ok(Self {
            name: name.to_string(),
            filename: filename.to_string(),
            line,
            content_line: line,
            examples,
            globs,
            groups: Vec::new(),
            kind: None,
            skipif: None,
            docstring: text.to_string(),
        })
    }

    /// 1-based document line of `example`.
    pub fn example_line(&self, example: &Example) -> usize {
        self.content_line + example.lineno
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

#[cfg(test)]
pub mod examples {
    //! Session texts shared by the unit tests of several modules.

    use indoc::indoc;

    pub const RST_GROUPS: &str = indoc! {"
        Groups
        ======

        .. testsetup:: *

           base = 10

        .. doctest:: beta

           >>> base + 2
           12

        .. doctest:: alpha

           >>> base + 1
           11

        Auto detected::

           >>> base
           10
    "};

    pub const MD_SESSION: &str = indoc! {"
        # Session

        ```{doctest}
        >>> total = 0
        >>> for i in range(4):
        ...     total += i
        >>> total
        6
        ```

        ```python
        >>> total
        Traceback (most recent call last):
        NameError: name 'total' is not defined
        ```
    "};

    /// Dedent `text` the way fixtures embedded in tests are written.
    pub fn make_doc(text: &str) -> String {
        textwrap::dedent(text).trim_start().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_newlines() {
        let example = Example::new("x", "1", Some(String::from("E: m")), 0, 0, OptionDelta::new());
        assert_eq!(example.source, "x\n");
        assert_eq!(example.want, "1\n");
        assert_eq!(example.exc_msg.as_deref(), Some("E: m\n"));

        let example = Example::new("x\n", "", None, 0, 0, OptionDelta::new());
        assert_eq!(example.want, "");
    }

    #[test]
    fn example_lines() {
        let mut test = TestCase::parse("\n>>> 1\n1\n", Namespace::new(), "t", "t.rst", 4).unwrap();
        test.content_line = 6;
        assert_eq!(test.examples.len(), 1);
        assert_eq!(test.example_line(&test.examples[0]), 7);
        assert!(!test.is_empty());
    }
}
