use std::ops::Range;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use tracing::debug;

use crate::directives::{self, Directives, Expansion, Invocation};
use crate::doc::{Document, Format, Node, NodeId, NodeKind, Pos};

static COLON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(:{3,})[ \t]*\{([^}\s]+)\}[ \t]*(.*)$").unwrap());
static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})").unwrap());

/// A run of lines that is either plain Markdown or a colon fenced directive.
#[derive(Debug, PartialEq)]
enum Chunk<'a> {
    Markdown {
        lines: Vec<&'a str>,
        first_line: usize,
    },
    Directive {
        name: &'a str,
        argument: &'a str,
        body: Vec<&'a str>,
        line: usize,
    },
}

/// Split off `:::{name}` fenced directives, which the CommonMark parser does
/// not know about. Colons inside backtick or tilde fences are left alone.
fn split_colon_fences(text: &str, first_line: usize) -> Vec<Chunk<'_>> {
    let lines = text.lines().collect::<Vec<_>>();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut code_fence: Option<&str> = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(fence) = code_fence {
            let trimmed = line.trim();
            if trimmed.starts_with(fence) && trimmed.chars().all(|c| fence.starts_with(c)) {
                code_fence = None;
            }
            i += 1;
            continue;
        }
        if let Some(caps) = CODE_FENCE_RE.captures(line) {
            code_fence = caps.get(1).map(|m| m.as_str());
            i += 1;
            continue;
        }
        let Some(caps) = COLON_FENCE_RE.captures(line) else {
            i += 1;
            continue;
        };
        let (Some(colons), Some(name), Some(argument)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            i += 1;
            continue;
        };
        let colons = colons.as_str().len();
        let close = closing_colon_fence(&lines, i + 1, colons);
        if start < i {
            chunks.push(Chunk::Markdown {
                lines: lines[start..i].to_vec(),
                first_line: first_line + start,
            });
        }
        chunks.push(Chunk::Directive {
            name: name.as_str(),
            argument: argument.as_str().trim(),
            body: lines[i + 1..close].to_vec(),
            line: first_line + i,
        });
        i = (close + 1).min(lines.len());
        start = i;
    }
    if start < lines.len() {
        chunks.push(Chunk::Markdown {
            lines: lines[start..].to_vec(),
            first_line: first_line + start,
        });
    }
    chunks
}

/// Index of the line closing a colon fence of width `colons`. Unclosed
/// fences extend to the end of the text.
fn closing_colon_fence(lines: &[&str], from: usize, colons: usize) -> usize {
    let mut open = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(from) {
        let trimmed = line.trim();
        if let Some(width) = COLON_FENCE_RE.captures(line).and_then(|caps| caps.get(1)) {
            open.push(width.as_str().len());
        } else if trimmed.len() >= 3 && trimmed.chars().all(|c| c == ':') {
            match open.last() {
                Some(&width) if trimmed.len() >= width => {
                    open.pop();
                }
                None if trimmed.len() >= colons => return i,
                _ => {}
            }
        }
    }
    lines.len()
}

/// Split a code fence info string of the form `{name} argument`.
fn directive_info(info: &str) -> Option<(&str, &str)> {
    let rest = info.trim().strip_prefix('{')?;
    let (name, argument) = rest.split_once('}')?;
    (!name.is_empty() && !name.contains(char::is_whitespace)).then_some((name, argument.trim()))
}

pub(crate) struct Reader<'d> {
    doc: &'d mut Document,
    directives: &'d Directives,
}

impl<'d> Reader<'d> {
    pub fn new(doc: &'d mut Document, directives: &'d Directives) -> Self {
        Self { doc, directives }
    }

    pub fn parse(&mut self, parent: NodeId, text: &str, first_line: usize) {
        for chunk in split_colon_fences(text, first_line) {
            match chunk {
                Chunk::Markdown { lines, first_line } => {
                    self.markdown(parent, &lines.join("\n"), first_line)
                }
                Chunk::Directive {
                    name,
                    argument,
                    body,
                    line,
                } => self.directive(parent, name, argument, &body, line, line + 1),
            }
        }
    }

    fn markdown(&mut self, parent: NodeId, text: &str, first_line: usize) {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        let line_of = |offset: usize| first_line + Pos::from(offset, text).line - 1;

        let mut events = Parser::new_ext(text, options).into_offset_iter();
        while let Some((event, range)) = events.next() {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let mut code = String::new();
                    for (event, _) in events.by_ref() {
                        match event {
                            Event::Text(text) => code.push_str(&text),
                            Event::End(TagEnd::CodeBlock) => break,
                            _ => {}
                        }
                    }
                    self.code_block(parent, kind, code, line_of(range.start));
                }
                Event::Start(Tag::Heading { level, .. }) => {
                    let title = inline_text(&mut events, TagEnd::Heading(level));
                    let node = Node::new(NodeKind::Section, title).at(line_of(range.start));
                    self.doc.add(parent, node);
                }
                Event::Start(Tag::Paragraph) => {
                    let text = inline_text(&mut events, TagEnd::Paragraph);
                    let node = Node::new(NodeKind::Paragraph, text).at(line_of(range.start));
                    self.doc.add(parent, node);
                }
                Event::Html(html) if html.trim_start().starts_with("<!--") => {
                    let comment = html.trim().trim_start_matches("<!--").trim_end_matches("-->");
                    let node = Node::new(NodeKind::Comment, comment.trim()).at(line_of(range.start));
                    self.doc.add(parent, node);
                }
                _ => {}
            }
        }
    }

    fn code_block(&mut self, parent: NodeId, kind: CodeBlockKind<'_>, mut code: String, line: usize) {
        if code.ends_with('\n') {
            code.pop();
        }
        let node = match kind {
            CodeBlockKind::Fenced(info) => {
                if let Some((name, argument)) = directive_info(&info) {
                    let body = code.lines().collect::<Vec<_>>();
                    self.directive(parent, name, argument, &body, line, line + 1);
                    return;
                }
                let mut node = Node::new(NodeKind::LiteralBlock, code)
                    .at(line)
                    .with_content_line(line + 1);
                node.attrs.language = info.split_whitespace().next().map(str::to_string);
                node
            }
            CodeBlockKind::Indented => Node::new(NodeKind::LiteralBlock, code).at(line),
        };
        self.doc.add(parent, node);
    }

    fn directive(
        &mut self,
        parent: NodeId,
        name: &str,
        argument: &str,
        body: &[&str],
        line: usize,
        content_line: usize,
    ) {
        debug!(name, line, "fenced directive");
        let mut inv = Invocation {
            name: name.to_string(),
            argument: (!argument.is_empty()).then(|| argument.to_string()),
            line,
            ..Invocation::default()
        };

        let mut consumed = 0;
        if body.first().is_some_and(|l| l.trim() == "---") {
            // A front matter block of `key: value` pairs.
            if let Some(end) = body.iter().skip(1).position(|l| l.trim() == "---") {
                for entry in &body[1..end + 1] {
                    if let Some((key, value)) = entry.split_once(':') {
                        inv.options.push((key.trim().to_string(), value.trim().to_string()));
                    }
                }
                consumed = end + 2;
            }
        } else {
            while let Some(option) = body.get(consumed).and_then(|l| directives::option_line(l)) {
                inv.options.push(option);
                consumed += 1;
            }
        }

        let rest = &body[consumed..];
        let leading = rest.iter().take_while(|l| l.trim().is_empty()).count();
        let trailing = rest[leading..]
            .iter()
            .rev()
            .take_while(|l| l.trim().is_empty())
            .count();
        inv.content = rest[leading..rest.len() - trailing].join("\n");
        inv.content_line = content_line + consumed + leading;

        match self.directives.expand(&inv, self.doc) {
            Some(Expansion::Node(node)) => {
                self.doc.add(parent, node);
            }
            Some(Expansion::Nested {
                format,
                content,
                content_line,
                line,
            }) => {
                let id = self.doc.add(parent, Node::new(NodeKind::Container, "").at(line));
                let format = format.unwrap_or(Format::Markdown);
                format.parse_into(self.doc, id, &content, content_line, self.directives);
            }
            None => {}
        }
    }
}

/// Collect the plain text of inline events up to `end`.
fn inline_text<'a>(events: &mut impl Iterator<Item = (Event<'a>, Range<usize>)>, end: TagEnd) -> String {
    let mut text = String::new();
    for (event, _) in events {
        match event {
            Event::End(tag) if tag == end => break,
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            _ => {}
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_fences_are_split_off() {
        let text = "a\n:::{tab} One\n:options: +SKIP\nbody\n:::\n```\n:::{x}\n```\nz";
        let chunks = split_colon_fences(text, 10);
        assert_eq!(
            chunks,
            vec![
                Chunk::Markdown {
                    lines: vec!["a"],
                    first_line: 10
                },
                Chunk::Directive {
                    name: "tab",
                    argument: "One",
                    body: vec![":options: +SKIP", "body"],
                    line: 11
                },
                Chunk::Markdown {
                    lines: vec!["```", ":::{x}", "```", "z"],
                    first_line: 15
                },
            ]
        );
    }

    #[test]
    fn nested_colon_fences() {
        let lines = [":::{a}", "::::{b}", "x", "::::", ":::", "after"];
        assert_eq!(closing_colon_fence(&lines, 1, 3), 4);
        let lines = [":::{a}", ":::{b}", ":::", "y", ":::"];
        assert_eq!(closing_colon_fence(&lines, 1, 3), 4);
        assert_eq!(closing_colon_fence(&lines[..3], 1, 3), 3);
    }

    #[test]
    fn info_strings() {
        assert_eq!(directive_info("{doctest} grp"), Some(("doctest", "grp")));
        assert_eq!(directive_info(" {eval-rst}"), Some(("eval-rst", "")));
        assert_eq!(directive_info("python"), None);
        assert_eq!(directive_info("{}"), None);
    }
}
