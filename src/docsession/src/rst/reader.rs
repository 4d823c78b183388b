use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::directives::{self, Directives, Expansion, Invocation};
use crate::doc::{Document, Format, Node, NodeId, NodeKind};

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+(?:[-_.+:][A-Za-z0-9]+)*) ?::(?:[ \t]+(.*))?$").unwrap()
});
static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+\x{2022}]|\d+[.)]|#\.)(?: +|$)").unwrap());

const ADORNMENT_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// A physical line of the document with its tabs expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub number: usize,
    pub text: String,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn indent(&self) -> usize {
        self.text.len() - self.text.trim_start_matches(' ').len()
    }
}

/// Split `text` into numbered lines, the first one being `first_line`.
pub(crate) fn lines(text: &str, first_line: usize) -> Vec<Line> {
    text.lines()
        .enumerate()
        .map(|(i, line)| Line {
            number: first_line + i,
            text: expand_tabs(line.trim_end()),
        })
        .collect()
}

pub(crate) fn expand_tabs(line: &str) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let width = 8 - column % 8;
            out.extend(std::iter::repeat(' ').take(width));
            column += width;
        } else {
            out.push(c);
            column += 1;
        }
    }
    out
}

/// Block level parser for a run of lines sharing one indentation level.
pub(crate) struct Reader<'d> {
    doc: &'d mut Document,
    directives: &'d Directives,
}

impl<'d> Reader<'d> {
    pub fn new(doc: &'d mut Document, directives: &'d Directives) -> Self {
        Self { doc, directives }
    }

    pub fn parse(&mut self, parent: NodeId, lines: &[Line]) {
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            if line.is_blank() {
                i += 1;
                continue;
            }
            i = if line.indent() > 0 {
                self.block_quote(parent, lines, i)
            } else if is_explicit_markup(&line.text) {
                self.explicit_markup(parent, lines, i)
            } else if let Some(end) = self.section(parent, lines, i) {
                end
            } else if let Some(m) = ITEM_RE.find(&line.text) {
                self.list_item(parent, lines, i, m.end())
            } else if is_prompt(&line.text) {
                self.doctest_block(parent, lines, i)
            } else {
                self.paragraph(parent, lines, i)
            };
        }
    }

    fn block_quote(&mut self, parent: NodeId, lines: &[Line], start: usize) -> usize {
        let end = indented_end(lines, start, 1);
        let body = dedent(trim_blank(&lines[start..end]));
        let node = Node::new(NodeKind::Container, "").at(lines[start].number);
        let id = self.doc.add(parent, node);
        self.parse(id, &body);
        end
    }

    fn list_item(&mut self, parent: NodeId, lines: &[Line], start: usize, width: usize) -> usize {
        let first = &lines[start];
        let end = indented_end(lines, start + 1, width);
        let mut body = vec![Line {
            number: first.number,
            text: first.text[width..].to_string(),
        }];
        body.extend(lines[start + 1..end].iter().map(|line| Line {
            number: line.number,
            text: line.text.get(width..).unwrap_or_default().to_string(),
        }));
        let node = Node::new(NodeKind::Container, "").at(first.number);
        let id = self.doc.add(parent, node);
        self.parse(id, trim_blank(&body));
        end
    }

    fn doctest_block(&mut self, parent: NodeId, lines: &[Line], start: usize) -> usize {
        let end = text_block_end(lines, start);
        let node = Node::new(NodeKind::DoctestBlock, join(&lines[start..end])).at(lines[start].number);
        self.doc.add(parent, node);
        end
    }

    fn section(&mut self, parent: NodeId, lines: &[Line], start: usize) -> Option<usize> {
        let line = &lines[start];
        let next = lines.get(start + 1);
        // Overlined title.
        if let (Some(c), Some(title), Some(under)) = (
            adornment(&line.text),
            next,
            lines.get(start + 2).and_then(|l| adornment(&l.text)),
        ) {
            if c == under && !title.is_blank() {
                self.add_section(parent, title.text.trim(), line.number);
                return Some(start + 3);
            }
        }
        if adornment(&line.text).is_some() {
            // A transition.
            if next.map_or(true, Line::is_blank) && line.text.len() >= 4 {
                return Some(start + 1);
            }
            return None;
        }
        let under = next.filter(|l| l.indent() == 0)?;
        adornment(&under.text)?;
        let title = line.text.trim();
        if under.text.chars().count() < title.chars().count() {
            if under.text.len() < 4 {
                return None;
            }
            self.doc.warn(under.number, "Title underline too short.");
        }
        self.add_section(parent, title, line.number);
        Some(start + 2)
    }

    fn add_section(&mut self, parent: NodeId, title: &str, line: usize) {
        debug!(title, line, "section");
        self.doc.add(parent, Node::new(NodeKind::Section, title).at(line));
    }

    fn paragraph(&mut self, parent: NodeId, lines: &[Line], start: usize) -> usize {
        let mut end = start + 1;
        while end < lines.len() && !lines[end].is_blank() && lines[end].indent() == 0 {
            end += 1;
        }
        let mut text = join(&lines[start..end]);
        let expects_literal = text.ends_with("::");
        if expects_literal {
            let stripped = text[..text.len() - 2].trim_end();
            if stripped.len() < text.len() - 2 || stripped.is_empty() {
                text = stripped.to_string();
            } else {
                text.pop();
            }
        }
        if !text.is_empty() {
            let node = Node::new(NodeKind::Paragraph, text).at(lines[start].number);
            self.doc.add(parent, node);
        }
        if !expects_literal {
            return end;
        }
        self.literal_block(parent, lines, end)
    }

    fn literal_block(&mut self, parent: NodeId, lines: &[Line], after: usize) -> usize {
        let start = (after..lines.len())
            .find(|&i| !lines[i].is_blank())
            .unwrap_or(lines.len());
        let Some(first) = lines.get(start) else {
            let line = lines.last().map_or(1, |l| l.number);
            self.doc.warn(line, "Literal block expected; none found.");
            return start;
        };
        let (end, body) = if first.indent() > 0 {
            let end = indented_end(lines, start, 1);
            (end, dedent(trim_blank(&lines[start..end])))
        } else {
            // Quoted literal block: every line starts with the same
            // punctuation character.
            let quote = first.text.chars().next().filter(|c| ADORNMENT_CHARS.contains(*c));
            let Some(quote) = quote else {
                self.doc.warn(first.number, "Literal block expected; none found.");
                return start;
            };
            let end = text_block_end(lines, start);
            if lines[start..end].iter().any(|l| !l.text.starts_with(quote)) {
                self.doc.warn(first.number, "Inconsistent literal block quoting.");
            }
            (end, lines[start..end].to_vec())
        };
        let node = Node::new(NodeKind::LiteralBlock, join(&body)).at(first.number);
        self.doc.add(parent, node);
        end
    }

    fn explicit_markup(&mut self, parent: NodeId, lines: &[Line], start: usize) -> usize {
        let first = &lines[start];
        let end = indented_end(lines, start + 1, 1);
        let rest = first.text[2..].trim();
        let body = dedent(trim_blank(&lines[start + 1..end]));

        let Some(caps) = DIRECTIVE_RE.captures(rest) else {
            // Comments, targets, footnotes and substitution definitions.
            let mut text = String::from(rest);
            if !body.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&join(&body));
            }
            self.doc.add(parent, Node::new(NodeKind::Comment, text).at(first.number));
            return end;
        };

        let mut inv = Invocation {
            name: caps[1].to_string(),
            argument: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|arg| !arg.is_empty()),
            line: first.number,
            content_line: first.number + 1,
            ..Invocation::default()
        };
        let mut i = 0;
        while let Some(option) = body.get(i).and_then(|l| directives::option_line(&l.text)) {
            inv.options.push(option);
            i += 1;
        }
        let content = dedent(trim_blank(&body[i..]));
        if let Some(line) = content.first() {
            inv.content_line = line.number;
        }
        inv.content = join(&content);

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
                let format = format.unwrap_or(Format::Rst);
                format.parse_into(self.doc, id, &content, content_line, self.directives);
            }
            None => {}
        }
        end
    }
}

fn is_explicit_markup(text: &str) -> bool {
    text == ".." || text.starts_with(".. ")
}

fn is_prompt(text: &str) -> bool {
    text == ">>>" || text.starts_with(">>> ")
}

/// The repeated character of a section adornment line.
fn adornment(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next().filter(|c| ADORNMENT_CHARS.contains(*c))?;
    (text.len() >= 2 && chars.all(|other| other == c)).then_some(c)
}

/// End of the block made of blank lines and lines indented by at least
/// `indent`, starting at `start`. Trailing blank lines are not included.
fn indented_end(lines: &[Line], start: usize, indent: usize) -> usize {
    let mut end = start;
    let mut last = start;
    while end < lines.len() && (lines[end].is_blank() || lines[end].indent() >= indent) {
        end += 1;
        if !lines[end - 1].is_blank() {
            last = end;
        }
    }
    last
}

/// End of the run of non-blank lines starting at `start`.
fn text_block_end(lines: &[Line], start: usize) -> usize {
    (start..lines.len())
        .find(|&i| lines[i].is_blank())
        .unwrap_or(lines.len())
}

fn trim_blank(lines: &[Line]) -> &[Line] {
    let start = lines.iter().position(|l| !l.is_blank()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_blank()).map_or(start, |i| i + 1);
    &lines[start..end]
}

fn dedent(lines: &[Line]) -> Vec<Line> {
    let indent = lines
        .iter()
        .filter(|l| !l.is_blank())
        .map(Line::indent)
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| Line {
            number: l.number,
            text: l.text.get(indent..).unwrap_or_default().to_string(),
        })
        .collect()
}

fn join(lines: &[Line]) -> String {
    lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_are_expanded() {
        assert_eq!(expand_tabs("\tx"), "        x");
        assert_eq!(expand_tabs("ab\tx"), "ab      x");
        assert_eq!(expand_tabs("plain"), "plain");
    }

    #[test]
    fn adornments() {
        assert_eq!(adornment("====="), Some('='));
        assert_eq!(adornment("-~-~"), None);
        assert_eq!(adornment("="), None);
        assert_eq!(adornment("abc"), None);
    }

    #[test]
    fn block_boundaries() {
        let lines = lines("a\n  b\n\n  c\n\nd", 1);
        assert_eq!(indented_end(&lines, 1, 1), 4);
        assert_eq!(text_block_end(&lines, 0), 2);
        let body = dedent(trim_blank(&lines[1..4]));
        assert_eq!(join(&body), "b\n\nc");
        assert_eq!(body[2].number, 4);
    }
}
