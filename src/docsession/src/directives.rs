//! Directives recognized by both document readers.
//!
//! A reader that finds a directive invocation hands it to
//! [`Directives::expand`], which either produces a single node for the tree
//! or asks the reader to parse the directive body as nested content.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};
use tracing::debug;

use crate::doc::{Document, Format, Node, NodeKind, TestKind};
use crate::lang;
use crate::options::{OptionDelta, OptionFlags};

static BLANKLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*<BLANKLINE>").unwrap());
static DOCTEST_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)[ \t]*#\s*doctest:.+$").unwrap());
static OPTION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:([^:\s][^:]*):(?:[ \t]+(.*))?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Test(TestKind),
    /// A tab of a tab set; its body is parsed in the format of the document.
    Tab,
    /// A block of reStructuredText embedded in another format.
    EvalRst,
    CodeBlock,
}

/// The registry of known directive names.
#[derive(Debug, Clone, Default)]
pub struct Directives {
    registry: BTreeMap<&'static str, DirectiveKind>,
}

impl Directives {
    /// An empty registry. Call [`Directives::setup`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in directives. Calling this more than once has no
    /// further effect.
    pub fn setup(&mut self) {
        if self.is_ready() {
            return;
        }
        debug!("registering directives");
        let builtin = [
            ("doctest", DirectiveKind::Test(TestKind::Doctest)),
            ("testsetup", DirectiveKind::Test(TestKind::Setup)),
            ("testcleanup", DirectiveKind::Test(TestKind::Cleanup)),
            ("tab", DirectiveKind::Tab),
            ("eval-rst", DirectiveKind::EvalRst),
            ("code-block", DirectiveKind::CodeBlock),
            ("code", DirectiveKind::CodeBlock),
            ("sourcecode", DirectiveKind::CodeBlock),
        ];
        for (name, kind) in builtin {
            self.registry.entry(name).or_insert(kind);
        }
    }

    pub fn is_ready(&self) -> bool {
        ["doctest", "testsetup", "testcleanup", "tab"]
            .iter()
            .all(|name| self.registry.contains_key(name))
    }

    pub fn get(&self, name: &str) -> Option<DirectiveKind> {
        self.registry.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Run a directive. Returns `None` when nothing should be inserted into
    /// the tree; the problem has then been reported on `doc`.
    pub fn expand(&self, inv: &Invocation, doc: &mut Document) -> Option<Expansion> {
        let Some(kind) = self.get(&inv.name) else {
            doc.warn(inv.line, format!("Unknown directive type \"{}\".", inv.name));
            return None;
        };
        debug!(name = %inv.name, line = inv.line, "directive run");
        match kind {
            DirectiveKind::Test(test_kind) => Some(Expansion::Node(test_node(test_kind, inv, doc))),
            DirectiveKind::CodeBlock => {
                let mut node = Node::new(NodeKind::LiteralBlock, inv.content.as_str())
                    .at(inv.line)
                    .with_content_line(inv.content_line);
                node.attrs.language = inv.argument.clone();
                Some(Expansion::Node(node))
            }
            DirectiveKind::Tab | DirectiveKind::EvalRst => {
                if inv.content.trim().is_empty() {
                    doc.warn(
                        inv.line,
                        format!(
                            "Content block expected for the \"{}\" directive; none found.",
                            inv.name
                        ),
                    );
                    return None;
                }
                let format = (kind == DirectiveKind::EvalRst).then_some(Format::Rst);
                Some(Expansion::Nested {
                    format,
                    content: inv.content.clone(),
                    content_line: inv.content_line,
                    line: inv.line,
                })
            }
        }
    }
}

/// A directive as written in the document, before interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub argument: Option<String>,
    /// `:key: value` options in the order they were written.
    pub options: Vec<(String, String)>,
    /// The directive body with its indentation removed.
    pub content: String,
    pub line: usize,
    pub content_line: usize,
}

impl Invocation {
    fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn has_option(&self, key: &str) -> bool {
        self.option(key).is_some()
    }
}

/// Parse a `:key: value` directive option line. Flag options have an empty
/// value.
pub(crate) fn option_line(text: &str) -> Option<(String, String)> {
    let caps = OPTION_LINE_RE.captures(text.trim())?;
    let value = caps.get(2).map_or("", |m| m.as_str().trim());
    Some((caps[1].to_string(), value.to_string()))
}

/// The result of running a directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    /// Insert this node.
    Node(Node),
    /// Insert a container whose children are parsed from `content`, in
    /// `format` or, when `None`, in the format of the enclosing document.
    Nested {
        format: Option<Format>,
        content: String,
        content_line: usize,
        line: usize,
    },
}

// Test directives
// ===============

const DOCTEST_OPTIONS: &[&str] = &[
    "hide",
    "options",
    "version",
    "pyversion",
    "skipif",
    "trim-doctest-flags",
    "no-trim-doctest-flags",
];
const FIXTURE_OPTIONS: &[&str] = &["skipif"];

fn test_node(kind: TestKind, inv: &Invocation, doc: &mut Document) -> Node {
    let accepted = match kind {
        TestKind::Doctest => DOCTEST_OPTIONS,
        TestKind::Setup | TestKind::Cleanup => FIXTURE_OPTIONS,
    };
    for (key, _) in &inv.options {
        if !accepted.contains(&key.as_str()) {
            doc.warn(
                inv.line,
                format!("unknown option \"{key}\" for the \"{}\" directive", inv.name),
            );
        }
    }

    let mut code = inv.content.clone();
    let mut test = None;
    if kind == TestKind::Doctest {
        if code.contains("<BLANKLINE>") {
            test = Some(code.clone());
            code = BLANKLINE_RE.replace_all(&code, "").into_owned();
        }
        if DOCTEST_OPTION_RE.is_match(&code) && !inv.has_option("no-trim-doctest-flags") {
            test.get_or_insert_with(|| code.clone());
            code = DOCTEST_OPTION_RE.replace_all(&code, "").into_owned();
        }
    }

    let hidden = kind != TestKind::Doctest || inv.has_option("hide");
    let node_kind = if hidden {
        NodeKind::Comment
    } else {
        NodeKind::LiteralBlock
    };
    let mut node = Node::new(node_kind, code)
        .at(inv.line)
        .with_content_line(inv.content_line);

    let attrs = &mut node.attrs;
    attrs.test_kind = Some(kind);
    attrs.test = test;
    attrs.groups = match &inv.argument {
        Some(arg) => arg.split(',').map(|g| g.trim().to_string()).collect(),
        None => vec![String::from("default")],
    };
    if kind == TestKind::Doctest {
        attrs.language = Some(String::from("pycon3"));
        if let Some(options) = inv.option("options") {
            let (delta, errors) = OptionDelta::parse_lenient(options);
            for error in errors {
                doc.warn(inv.line, format!("{error}."));
            }
            attrs.options = delta;
        }
        let requirement = inv.option("version").or_else(|| inv.option("pyversion"));
        if let Some(requirement) = requirement {
            match version_allowed(requirement) {
                Ok(true) => {}
                Ok(false) => attrs.options.enable(OptionFlags::SKIP),
                Err(_) => {
                    doc.warn(
                        inv.line,
                        format!("'{requirement}' is not a valid version option"),
                    );
                    attrs.options.enable(OptionFlags::SKIP);
                }
            }
        }
    }
    attrs.skipif = inv.option("skipif").map(str::to_string);
    if inv.has_option("trim-doctest-flags") {
        attrs.trim_flags = Some(true);
    } else if inv.has_option("no-trim-doctest-flags") {
        attrs.trim_flags = Some(false);
    }
    node
}

/// Check the session language version against a requirement such as
/// `>=0.1, <2`.
pub fn version_allowed(requirement: &str) -> Result<bool, semver::Error> {
    let requirement = VersionReq::parse(requirement)?;
    let version = Version::parse(lang::VERSION)?;
    Ok(requirement.matches(&version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives() -> Directives {
        let mut directives = Directives::new();
        directives.setup();
        directives
    }

    fn invocation(name: &str, options: &[(&str, &str)], content: &str) -> Invocation {
        Invocation {
            name: name.into(),
            argument: None,
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            content: content.into(),
            line: 3,
            content_line: 5,
        }
    }

    fn expand_node(inv: &Invocation) -> (Node, Document) {
        let mut doc = Document::new(None);
        match directives().expand(inv, &mut doc) {
            Some(Expansion::Node(node)) => (node, doc),
            other => panic!("expected a node, got {other:?}"),
        }
    }

    #[test]
    fn option_lines() {
        assert_eq!(option_line(":hide:"), Some(("hide".into(), "".into())));
        assert_eq!(
            option_line("  :options: +ELLIPSIS -SKIP "),
            Some(("options".into(), "+ELLIPSIS -SKIP".into()))
        );
        assert_eq!(option_line(">>> x = {':a:': 1}"), None);
        assert_eq!(option_line("::"), None);
    }

    #[test]
    fn setup_is_idempotent() {
        let mut directives = Directives::new();
        assert!(!directives.is_ready());
        directives.setup();
        let len = directives.len();
        directives.setup();
        assert_eq!(directives.len(), len);
        assert!(directives.is_ready());
        assert_eq!(
            directives.get("testsetup"),
            Some(DirectiveKind::Test(TestKind::Setup))
        );
    }

    #[test]
    fn doctest_defaults() {
        let (node, doc) = expand_node(&invocation("doctest", &[], ">>> 1\n1"));
        assert_eq!(node.kind, NodeKind::LiteralBlock);
        assert_eq!(node.line, Some(3));
        assert_eq!(node.content_line, Some(5));
        assert_eq!(node.attrs.groups, vec!["default"]);
        assert_eq!(node.attrs.test_kind, Some(TestKind::Doctest));
        assert_eq!(node.attrs.language.as_deref(), Some("pycon3"));
        assert_eq!(node.attrs.test, None);
        assert!(doc.diagnostics().is_empty());
    }

    #[test]
    fn groups_and_hide() {
        let mut inv = invocation("doctest", &[("hide", "")], ">>> 1\n1");
        inv.argument = Some(String::from("first, second"));
        let (node, _) = expand_node(&inv);
        assert_eq!(node.kind, NodeKind::Comment);
        assert_eq!(node.attrs.groups, vec!["first", "second"]);

        let (node, _) = expand_node(&invocation("testsetup", &[], "x = 1"));
        assert_eq!(node.kind, NodeKind::Comment);
        assert_eq!(node.attrs.test_kind, Some(TestKind::Setup));
    }

    #[test]
    fn presentation_text_is_trimmed() {
        let content = ">>> print('a\\n')  # doctest: +NORMALIZE_WHITESPACE\na\n<BLANKLINE>";
        let (node, _) = expand_node(&invocation("doctest", &[], content));
        assert_eq!(node.text, ">>> print('a\\n')\na\n");
        assert_eq!(node.attrs.test.as_deref(), Some(content));

        let inv = invocation("doctest", &[("no-trim-doctest-flags", "")], content);
        let (node, _) = expand_node(&inv);
        assert_eq!(
            node.text,
            ">>> print('a\\n')  # doctest: +NORMALIZE_WHITESPACE\na\n"
        );
        assert_eq!(node.attrs.trim_flags, Some(false));
    }

    #[test]
    fn flag_comments_trimmed_after_any_whitespace() {
        for content in [
            ">>> 1\t# doctest: +SKIP\n1",
            ">>> 1# doctest: +SKIP\n1",
            ">>> 1 \t  \t# doctest: +SKIP\n1",
            ">>> 1 #doctest:+SKIP\n1",
        ] {
            let (node, _) = expand_node(&invocation("doctest", &[], content));
            assert_eq!(node.text, ">>> 1\n1", "{content:?}");
        }
    }

    #[test]
    fn options_with_warnings() {
        let inv = invocation("doctest", &[("options", "+ELLIPSIS, NUMBER -BOGUS")], "");
        let (node, doc) = expand_node(&inv);
        assert_eq!(node.attrs.options.get(OptionFlags::ELLIPSIS), Some(true));
        let messages = doc
            .diagnostics()
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec![
                "missing '+' or '-' in 'NUMBER' option.",
                "'BOGUS' is not a valid option."
            ]
        );
        assert!(doc.diagnostics().iter().all(|d| d.line == 3));
    }

    #[test]
    fn version_gate() {
        let inv = invocation("doctest", &[("version", ">=1000")], ">>> 1\n1");
        let (node, _) = expand_node(&inv);
        assert_eq!(node.attrs.options.get(OptionFlags::SKIP), Some(true));

        let inv = invocation("doctest", &[("pyversion", ">=0.0.1")], ">>> 1\n1");
        let (node, _) = expand_node(&inv);
        assert_eq!(node.attrs.options.get(OptionFlags::SKIP), None);

        let inv = invocation("doctest", &[("version", "not a version")], ">>> 1\n1");
        let (node, doc) = expand_node(&inv);
        assert_eq!(node.attrs.options.get(OptionFlags::SKIP), Some(true));
        assert_eq!(doc.diagnostics().len(), 1);
    }

    #[test]
    fn fixture_options() {
        let inv = invocation("testcleanup", &[("skipif", "True"), ("hide", "")], "x");
        let (node, doc) = expand_node(&inv);
        assert_eq!(node.attrs.skipif.as_deref(), Some("True"));
        assert_eq!(doc.diagnostics().len(), 1);
    }

    #[test]
    fn containers_and_unknown() {
        let mut doc = Document::new(None);
        let expansion = directives().expand(&invocation("tab", &[], "text"), &mut doc);
        assert!(matches!(expansion, Some(Expansion::Nested { format: None, .. })));

        let expansion = directives().expand(&invocation("eval-rst", &[], "text"), &mut doc);
        assert!(matches!(
            expansion,
            Some(Expansion::Nested { format: Some(Format::Rst), .. })
        ));

        assert_eq!(directives().expand(&invocation("tab", &[], ""), &mut doc), None);
        assert_eq!(directives().expand(&invocation("nope", &[], "x"), &mut doc), None);
        assert_eq!(doc.diagnostics().len(), 2);
    }
}
