//! The interactive session grammar.
//!
//! A session text is a sequence of examples. Each example starts with a
//! `>>> ` prompt line, continues with `... ` lines and is followed by the
//! expected output, which runs up to the next blank line or prompt:
//!
//! ```text
//! >>> for i in range(2):
//! ...     print(i)
//! 0
//! 1
//! ```

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::Example;
use crate::options::OptionDelta;
use crate::rst::expand_tabs;

static PS1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^( *)>>>").unwrap());
static PS2_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ *\.\.\.").unwrap());
static OPTION_DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)#\s*doctest:\s*([^\n'"]*)$"#).unwrap());
static EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^Traceback \((?:most recent call last|innermost last)\):[ \t]*\n.*?(?m:^)(\w+.*)$",
    )
    .unwrap()
});

/// Parse `text` into examples. `name` identifies the session in errors.
pub fn parse(text: &str, name: &str) -> Result<Vec<Example>, Error> {
    let lines = dedent(text);
    let mut examples = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(caps) = PS1_RE.captures(&lines[i]) else {
            i += 1;
            continue;
        };
        let indent = caps[1].len();
        let start = i;
        i += 1;
        while i < lines.len() && PS2_RE.is_match(&lines[i]) {
            i += 1;
        }
        let source_end = i;
        while i < lines.len() && !lines[i].trim().is_empty() && !PS1_RE.is_match(&lines[i]) {
            i += 1;
        }
        if let Some(example) = parse_example(&lines[start..source_end], &lines[source_end..i], start, indent, name)? {
            examples.push(example);
        }
    }
    Ok(examples)
}

fn parse_example(
    source_lines: &[String],
    want_lines: &[String],
    lineno: usize,
    indent: usize,
    name: &str,
) -> Result<Option<Example>, Error> {
    check_prompt_blank(source_lines, indent, lineno, name)?;
    let prefix = format!("{}.", " ".repeat(indent));
    check_prefix(&source_lines[1..], &prefix, lineno + 1, name)?;
    let source = source_lines
        .iter()
        .map(|line| line.get(indent + 4..).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");

    let prefix = " ".repeat(indent);
    check_prefix(want_lines, &prefix, lineno + source_lines.len(), name)?;
    let mut want = want_lines
        .iter()
        .map(|line| &line[indent..])
        .collect::<Vec<_>>()
        .join("\n");
    if !want.is_empty() {
        want.push('\n');
    }
    let exc_msg = EXCEPTION_RE
        .captures(&want)
        .and_then(|caps| caps.get(1))
        .map(|m| want[m.start()..].to_string());

    let options = find_options(&source, lineno, name)?;
    if is_blank_or_comment(&source) {
        return Ok(None);
    }
    Ok(Some(Example::new(source, want, exc_msg, lineno, indent, options)))
}

fn find_options(source: &str, lineno: usize, name: &str) -> Result<OptionDelta, Error> {
    let mut options = OptionDelta::new();
    for caps in OPTION_DIRECTIVE_RE.captures_iter(source) {
        let Some(m) = caps.get(1) else { continue };
        let option_line = lineno + source[..m.start()].matches('\n').count() + 1;
        let delta = OptionDelta::parse(m.as_str()).map_err(|_| Error::InvalidOption {
            line: option_line,
            name: name.to_string(),
            option: m.as_str().trim().to_string(),
        })?;
        options.merge(&delta);
    }
    if !options.is_empty() && is_blank_or_comment(source) {
        return Err(Error::OptionWithoutExample {
            line: lineno + 1,
            name: name.to_string(),
            text: source.to_string(),
        });
    }
    Ok(options)
}

fn check_prompt_blank(lines: &[String], indent: usize, lineno: usize, name: &str) -> Result<(), Error> {
    for (i, line) in lines.iter().enumerate() {
        let after = line.as_bytes().get(indent + 3);
        if after.is_some_and(|&c| c != b' ') {
            return Err(Error::MissingBlank {
                line: lineno + i + 1,
                name: name.to_string(),
                prompt: line[indent..indent + 3].to_string(),
                text: line.clone(),
            });
        }
    }
    Ok(())
}

fn check_prefix(lines: &[String], prefix: &str, lineno: usize, name: &str) -> Result<(), Error> {
    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() && !line.starts_with(prefix) {
            return Err(Error::InconsistentIndent {
                line: lineno + i + 1,
                name: name.to_string(),
                text: line.clone(),
            });
        }
    }
    Ok(())
}

fn is_blank_or_comment(source: &str) -> bool {
    let source = source.strip_suffix('\n').unwrap_or(source);
    !source.contains('\n') && {
        let rest = source.trim_start_matches(' ');
        rest.is_empty() || rest.starts_with('#')
    }
}

/// Expand tabs and remove the indentation shared by all non-blank lines.
fn dedent(text: &str) -> Vec<String> {
    let lines = text.split('\n').map(expand_tabs).collect::<Vec<_>>();
    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);
    lines
        .into_iter()
        .map(|line| line.get(indent..).unwrap_or_default().to_string())
        .collect()
}

/// A malformed session text. Lines are 1-based and relative to the start of
/// the text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("line {line} of the docstring for {name} lacks blank after {prompt}: {text:?}")]
    MissingBlank {
        line: usize,
        name: String,
        prompt: String,
        text: String,
    },
    #[error("line {line} of the docstring for {name} has inconsistent leading whitespace: {text:?}")]
    InconsistentIndent {
        line: usize,
        name: String,
        text: String,
    },
    #[error("line {line} of the doctest for {name} has an invalid option: {option:?}")]
    InvalidOption {
        line: usize,
        name: String,
        option: String,
    },
    #[error(
        "line {line} of the doctest for {name} has an option directive on a line with no example: {text:?}"
    )]
    OptionWithoutExample {
        line: usize,
        name: String,
        text: String,
    },
}

impl Error {
    pub fn line(&self) -> usize {
        match self {
            Self::MissingBlank { line, .. }
            | Self::InconsistentIndent { line, .. }
            | Self::InvalidOption { line, .. }
            | Self::OptionWithoutExample { line, .. } => *line,
        }
    }
}
