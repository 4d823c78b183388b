//! Comparing expected and actual example output.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use similar::{ChangeTag, DiffTag, TextDiff};

use crate::options::OptionFlags;

pub const BLANKLINE_MARKER: &str = "<BLANKLINE>";
pub const ELLIPSIS_MARKER: &str = "...";

static BLANKLINE_WANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^<BLANKLINE>[ \t\r\f\v]*$").unwrap());
static WHITESPACE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[^\S\n]+$").unwrap());
static UNICODE_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\W|^)[uU]([rR]?['"])"#).unwrap());
static BYTES_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\W|^)[bB]([rR]?['"])"#).unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?:
          (?:
            [+-]?\d*\.(?P<fraction>\d+)
            |
            [+-]?\d+\.
          )
          (?:[Ee](?P<exponent1>[+-]?\d+))?
          |
          [+-]?\d+
          [Ee](?P<exponent2>[+-]?\d+)
        )",
    )
    .unwrap()
});

/// Decides whether the output of an example matches its expectation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputChecker;

impl OutputChecker {
    pub fn new() -> Self {
        Self
    }

    /// Compare `want` with `got` under the comparison `flags`.
    pub fn check_output(&self, want: &str, got: &str, flags: OptionFlags) -> bool {
        if check_plain(want, got, flags) {
            return true;
        }
        let literals = OptionFlags::ALLOW_UNICODE | OptionFlags::ALLOW_BYTES | OptionFlags::NUMBER;
        if !flags.intersects(literals) {
            return false;
        }
        let mut want = want.to_string();
        let mut got = got.to_string();
        for (flag, re) in [
            (OptionFlags::ALLOW_UNICODE, &UNICODE_LITERAL_RE),
            (OptionFlags::ALLOW_BYTES, &BYTES_LITERAL_RE),
        ] {
            if flags.contains(flag) {
                want = re.replace_all(&want, "${1}${2}").into_owned();
                got = re.replace_all(&got, "${1}${2}").into_owned();
            }
        }
        if flags.contains(OptionFlags::NUMBER) {
            got = remove_unwanted_precision(&want, &got);
        }
        check_plain(&want, &got, flags)
    }

    /// Describe how `got` differs from `want`, for failure reports.
    pub fn output_difference(&self, want: &str, got: &str, flags: OptionFlags) -> String {
        let got = if flags.contains(OptionFlags::DONT_ACCEPT_BLANKLINE) {
            got.to_string()
        } else {
            mark_blank_lines(got)
        };
        if let Some((kind, diff)) = fancy_diff(want, &got, flags) {
            let diff = diff
                .lines()
                .map(|line| format!("{}\n", line.trim_end()))
                .collect::<String>();
            return format!("Differences ({kind}):\n{}", indent(&diff));
        }
        match (want.is_empty(), got.is_empty()) {
            (false, false) => format!("Expected:\n{}Got:\n{}", indent(want), indent(&got)),
            (false, true) => format!("Expected:\n{}Got nothing\n", indent(want)),
            (true, false) => format!("Expected nothing\nGot:\n{}", indent(&got)),
            (true, true) => String::from("Expected nothing\nGot nothing\n"),
        }
    }
}

fn check_plain(want: &str, got: &str, flags: OptionFlags) -> bool {
    if got == want {
        return true;
    }
    if !flags.contains(OptionFlags::DONT_ACCEPT_TRUE_FOR_1)
        && matches!((got, want), ("True\n", "1\n") | ("False\n", "0\n"))
    {
        return true;
    }
    let mut want = want.to_string();
    let mut got = got.to_string();
    if !flags.contains(OptionFlags::DONT_ACCEPT_BLANKLINE) {
        want = BLANKLINE_WANT_RE.replace_all(&want, "").into_owned();
        got = WHITESPACE_LINE_RE.replace_all(&got, "").into_owned();
        if got == want {
            return true;
        }
    }
    if flags.contains(OptionFlags::NORMALIZE_WHITESPACE) {
        got = got.split_whitespace().collect::<Vec<_>>().join(" ");
        want = want.split_whitespace().collect::<Vec<_>>().join(" ");
        if got == want {
            return true;
        }
    }
    flags.contains(OptionFlags::ELLIPSIS) && ellipsis_match(&want, &got)
}

/// Match `got` against `want`, where `...` in `want` stands for any text.
pub fn ellipsis_match(want: &str, got: &str) -> bool {
    if !want.contains(ELLIPSIS_MARKER) {
        return want == got;
    }
    let pieces = want.split(ELLIPSIS_MARKER).collect::<Vec<_>>();
    let (first, rest) = pieces.split_first().unwrap_or((&"", &[]));
    let (last, middle) = rest.split_last().unwrap_or((&"", &[]));
    if !got.starts_with(first) || !got.ends_with(last) {
        return false;
    }
    let mut start = first.len();
    let end = got.len() - last.len();
    if start > end {
        return false;
    }
    for piece in middle {
        match got[start..end].find(piece) {
            Some(found) => start += found + piece.len(),
            None => return false,
        }
    }
    true
}

/// Keep only the exception name of an exception message: for
/// `pkg.mod.Error: detail` this is `Error`.
pub fn strip_exception_details(msg: &str) -> &str {
    let mut end = msg.find('\n').unwrap_or(msg.len());
    if let Some(colon) = msg[..end].find(':') {
        end = colon;
    }
    let start = msg[..end].rfind('.').map_or(0, |dot| dot + 1);
    &msg[start..end]
}

/// Replace the numbers of `got` by their spelling in `want` when they agree
/// to the precision written in `want`.
fn remove_unwanted_precision(want: &str, got: &str) -> String {
    let wants = NUMBER_RE.captures_iter(want).collect::<Vec<_>>();
    let gots = NUMBER_RE.captures_iter(got).collect::<Vec<_>>();
    if wants.len() != gots.len() {
        return got.to_string();
    }
    let mut out = String::with_capacity(got.len());
    let mut last = 0;
    for (w, g) in wants.iter().zip(&gots) {
        let (Some(wm), Some(gm)) = (w.get(0), g.get(0)) else {
            continue;
        };
        out.push_str(&got[last..gm.start()]);
        if numbers_agree(w, wm.as_str(), gm.as_str()) {
            out.push_str(wm.as_str());
        } else {
            out.push_str(gm.as_str());
        }
        last = gm.end();
    }
    out.push_str(&got[last..]);
    out
}

fn numbers_agree(w: &Captures<'_>, want: &str, got: &str) -> bool {
    let fraction = w.name("fraction").map_or(0, |m| m.as_str().len() as i32);
    let exponent = w
        .name("exponent1")
        .or_else(|| w.name("exponent2"))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or(0);
    let precision = fraction - exponent;
    let (Ok(want), Ok(got)) = (want.parse::<f64>(), got.parse::<f64>()) else {
        return false;
    };
    let tolerance = (1e-6 * got.abs()).max(10f64.powi(-precision));
    want == got || (want - got).abs() <= tolerance
}

fn fancy_diff(want: &str, got: &str, flags: OptionFlags) -> Option<(&'static str, String)> {
    let diffs = OptionFlags::REPORT_UDIFF | OptionFlags::REPORT_CDIFF | OptionFlags::REPORT_NDIFF;
    if !flags.intersects(diffs) {
        return None;
    }
    if !flags.contains(OptionFlags::REPORT_NDIFF) && (want.matches('\n').count() <= 2 || got.matches('\n').count() <= 2) {
        return None;
    }
    let diff = TextDiff::from_lines(want, got);
    if flags.contains(OptionFlags::REPORT_UDIFF) {
        let hunks = diff
            .unified_diff()
            .context_radius(2)
            .iter_hunks()
            .map(|hunk| hunk.to_string())
            .collect::<String>();
        Some(("unified diff with -expected +actual", hunks))
    } else if flags.contains(OptionFlags::REPORT_CDIFF) {
        Some(("context diff with expected followed by actual", context_diff(&diff)))
    } else {
        let lines = diff
            .iter_all_changes()
            .map(|change| {
                let sign = match change.tag() {
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                    ChangeTag::Equal => ' ',
                };
                format!("{sign} {}", change.value())
            })
            .collect::<String>();
        Some(("ndiff with -expected +actual", lines))
    }
}

fn context_diff(diff: &TextDiff<'_, '_, '_, str>) -> String {
    let old = diff.old_slices();
    let new = diff.new_slices();
    let mut out = String::new();
    for group in diff.grouped_ops(2) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let ops = group.iter().map(|op| op.as_tag_tuple()).collect::<Vec<_>>();
        out.push_str("***************\n");

        let old_range = first.old_range().start..last.old_range().end;
        out.push_str(&format!("*** {} ****\n", context_range(old_range)));
        if ops.iter().any(|(tag, ..)| matches!(tag, DiffTag::Replace | DiffTag::Delete)) {
            for (tag, range, _) in &ops {
                let prefix = match tag {
                    DiffTag::Insert => continue,
                    DiffTag::Equal => "  ",
                    DiffTag::Replace => "! ",
                    DiffTag::Delete => "- ",
                };
                for line in &old[range.clone()] {
                    out.push_str(prefix);
                    out.push_str(line);
                }
            }
        }

        let new_range = first.new_range().start..last.new_range().end;
        out.push_str(&format!("--- {} ----\n", context_range(new_range)));
        if ops.iter().any(|(tag, ..)| matches!(tag, DiffTag::Replace | DiffTag::Insert)) {
            for (tag, _, range) in &ops {
                let prefix = match tag {
                    DiffTag::Delete => continue,
                    DiffTag::Equal => "  ",
                    DiffTag::Replace => "! ",
                    DiffTag::Insert => "+ ",
                };
                for line in &new[range.clone()] {
                    out.push_str(prefix);
                    out.push_str(line);
                }
            }
        }
    }
    out
}

fn context_range(range: std::ops::Range<usize>) -> String {
    let length = range.len();
    let beginning = if length == 0 { range.start } else { range.start + 1 };
    if length <= 1 {
        beginning.to_string()
    } else {
        format!("{},{}", beginning, beginning + length - 1)
    }
}

/// Mark whitespace-only lines of `got` with `<BLANKLINE>`.
fn mark_blank_lines(got: &str) -> String {
    got.split_inclusive('\n')
        .map(|line| match line.strip_suffix('\n') {
            Some(body) if body.chars().all(|c| c == ' ') => format!("{BLANKLINE_MARKER}\n"),
            _ => line.to_string(),
        })
        .collect()
}

/// Indent every non-empty line by four spaces.
pub(crate) fn indent(text: &str) -> String {
    text.split_inclusive('\n')
        .map(|line| {
            if line == "\n" {
                line.to_string()
            } else {
                format!("    {line}")
            }
        })
        .collect()
}
