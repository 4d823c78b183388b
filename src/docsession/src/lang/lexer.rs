//! The lexer implementation using logos.
//!
//! Logos produces the raw tokens of each line; [`Lexer::tokenize`] adds the
//! layout tokens (`Newline`, `Indent`, `Dedent`) based on the indentation of
//! logical lines.

use std::ops::Range;

use logos::Logos;

/// Raw token type for logos.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
enum RawToken {
    #[token("False")]
    False,
    #[token("None")]
    None,
    #[token("True")]
    True,
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("assert")]
    Assert,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("raise")]
    Raise,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("while")]
    While,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtE,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtE,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("//=")]
    DoubleSlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token("->")]
    Arrow,

    #[regex(r"\r?\n")]
    Newline,

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+")]
    Float,
    #[regex(r"0[xX][0-9a-fA-F_]+")]
    #[regex(r"0[oO][0-7_]+")]
    #[regex(r"0[bB][01_]+")]
    #[regex(r"[0-9][0-9_]*")]
    Int,
    #[regex(r#"([uU]|[rR]|[bB]|[bB][rR]|[rR][bB])?'([^'\\\n]|\\.)*'"#)]
    #[regex(r#"([uU]|[rR]|[bB]|[bB][rR]|[rR][bB])?"([^"\\\n]|\\.)*""#)]
    Str,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Name,
}

/// A token produced by the [`Lexer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    Global,
    If,
    Import,
    In,
    Is,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    // Operators and delimiters
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,
    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

/// A lexer error with its byte position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub pos: usize,
    pub message: String,
    /// Raised as `IndentationError` rather than `SyntaxError`.
    pub indentation: bool,
}

/// The lexer for session statements.
pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// Tokenize the entire source, stopping at the first error.
    pub fn tokenize(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut indents = vec![0usize];
        let mut depth = 0usize;
        let mut at_line_start = true;
        let mut line_start = 0usize;

        let mut lexer = RawToken::lexer(self.source);
        while let Some(result) = lexer.next() {
            let span = lexer.span();
            let slice = lexer.slice();

            let Ok(raw) = result else {
                let ch = self.source[span.start..].chars().next().unwrap_or('?');
                let message = if ch == '\'' || ch == '"' {
                    String::from("unterminated string literal")
                } else {
                    String::from("invalid syntax")
                };
                return Err(LexError {
                    pos: span.start,
                    message,
                    indentation: false,
                });
            };

            if raw == RawToken::Newline {
                if depth == 0 && !at_line_start {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        span: span.clone(),
                    });
                    at_line_start = true;
                }
                line_start = span.end;
                continue;
            }

            if at_line_start && depth == 0 {
                let column = self.source[line_start..span.start]
                    .chars()
                    .map(|c| if c == '\t' { 8 } else { 1 })
                    .sum::<usize>();
                let current = *indents.last().unwrap_or(&0);
                if column > current {
                    indents.push(column);
                    tokens.push(Token {
                        kind: TokenKind::Indent,
                        span: span.start..span.start,
                    });
                } else if column < current {
                    while indents.last().is_some_and(|&i| i > column) {
                        indents.pop();
                        tokens.push(Token {
                            kind: TokenKind::Dedent,
                            span: span.start..span.start,
                        });
                    }
                    if indents.last() != Some(&column) {
                        return Err(LexError {
                            pos: span.start,
                            message: String::from(
                                "unindent does not match any outer indentation level",
                            ),
                            indentation: true,
                        });
                    }
                }
                at_line_start = false;
            }

            match raw {
                RawToken::LParen | RawToken::LBracket | RawToken::LBrace => depth += 1,
                RawToken::RParen | RawToken::RBracket | RawToken::RBrace => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }

            let kind = self.convert(raw, slice, span.start)?;
            tokens.push(Token { kind, span });
        }

        let end = self.source.len();
        if !at_line_start {
            tokens.push(Token {
                kind: TokenKind::Newline,
                span: end..end,
            });
        }
        for _ in 1..indents.len() {
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: end..end,
            });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: end..end,
        });

        Ok(tokens)
    }

    fn convert(&self, raw: RawToken, slice: &str, pos: usize) -> Result<TokenKind, LexError> {
        use TokenKind as T;

        Ok(match raw {
            RawToken::False => T::False,
            RawToken::None => T::None,
            RawToken::True => T::True,
            RawToken::And => T::And,
            RawToken::As => T::As,
            RawToken::Assert => T::Assert,
            RawToken::Async => T::Async,
            RawToken::Await => T::Await,
            RawToken::Break => T::Break,
            RawToken::Continue => T::Continue,
            RawToken::Def => T::Def,
            RawToken::Del => T::Del,
            RawToken::Elif => T::Elif,
            RawToken::Else => T::Else,
            RawToken::Except => T::Except,
            RawToken::Finally => T::Finally,
            RawToken::For => T::For,
            RawToken::Global => T::Global,
            RawToken::If => T::If,
            RawToken::Import => T::Import,
            RawToken::In => T::In,
            RawToken::Is => T::Is,
            RawToken::Not => T::Not,
            RawToken::Or => T::Or,
            RawToken::Pass => T::Pass,
            RawToken::Raise => T::Raise,
            RawToken::Return => T::Return,
            RawToken::Try => T::Try,
            RawToken::While => T::While,
            RawToken::Plus => T::Plus,
            RawToken::Minus => T::Minus,
            RawToken::Star => T::Star,
            RawToken::DoubleStar => T::DoubleStar,
            RawToken::Slash => T::Slash,
            RawToken::DoubleSlash => T::DoubleSlash,
            RawToken::Percent => T::Percent,
            RawToken::EqEq => T::EqEq,
            RawToken::NotEq => T::NotEq,
            RawToken::Lt => T::Lt,
            RawToken::LtE => T::LtE,
            RawToken::Gt => T::Gt,
            RawToken::GtE => T::GtE,
            RawToken::Assign => T::Assign,
            RawToken::PlusAssign => T::PlusAssign,
            RawToken::MinusAssign => T::MinusAssign,
            RawToken::StarAssign => T::StarAssign,
            RawToken::SlashAssign => T::SlashAssign,
            RawToken::DoubleSlashAssign => T::DoubleSlashAssign,
            RawToken::PercentAssign => T::PercentAssign,
            RawToken::LParen => T::LParen,
            RawToken::RParen => T::RParen,
            RawToken::LBracket => T::LBracket,
            RawToken::RBracket => T::RBracket,
            RawToken::LBrace => T::LBrace,
            RawToken::RBrace => T::RBrace,
            RawToken::Comma => T::Comma,
            RawToken::Colon => T::Colon,
            RawToken::Dot => T::Dot,
            RawToken::Semicolon => T::Semicolon,
            RawToken::Arrow => T::Arrow,
            RawToken::Newline => T::Newline,
            RawToken::Name => T::Name(slice.to_string()),
            RawToken::Int => T::Int(parse_int(slice).ok_or_else(|| LexError {
                pos,
                message: String::from("invalid decimal literal"),
                indentation: false,
            })?),
            RawToken::Float => T::Float(slice.replace('_', "").parse().map_err(|_| LexError {
                pos,
                message: String::from("invalid decimal literal"),
                indentation: false,
            })?),
            RawToken::Str => parse_string(slice).map_err(|message| LexError {
                pos,
                message,
                indentation: false,
            })?,
        })
    }
}

fn parse_int(slice: &str) -> Option<i64> {
    let digits = slice.replace('_', "");
    let lower = digits.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        digits.parse().ok()
    }
}

/// Decode a quoted literal including its optional prefix.
fn parse_string(slice: &str) -> Result<TokenKind, String> {
    let quote_at = slice.find(['\'', '"']).unwrap_or(0);
    let prefix = slice[..quote_at].to_ascii_lowercase();
    let body = &slice[quote_at + 1..slice.len() - 1];
    let raw = prefix.contains('r');
    let bytes = prefix.contains('b');

    let decoded = if raw { body.to_string() } else { unescape(body)? };

    if bytes {
        if !decoded.is_ascii() {
            return Err(String::from("bytes can only contain ASCII literal characters"));
        }
        Ok(TokenKind::Bytes(decoded.into_bytes()))
    } else {
        Ok(TokenKind::Str(decoded))
    }
}

fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| String::from("truncated \\xXX escape"))?;
                out.push(char::from_u32(code).ok_or_else(|| String::from("invalid \\x escape"))?);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("tokens")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_expression() {
        use TokenKind::*;
        assert_eq!(
            kinds("4 + 4\n"),
            vec![Int(4), Plus, Int(4), Newline, Eof]
        );
    }

    #[test]
    fn keywords_and_names() {
        use TokenKind::*;
        assert_eq!(
            kinds("x = await asyncio.sleep(0)"),
            vec![
                Name("x".into()),
                Assign,
                Await,
                Name("asyncio".into()),
                Dot,
                Name("sleep".into()),
                LParen,
                Int(0),
                RParen,
                Newline,
                Eof,
            ]
        );
    }

    #[test]
    fn layout_tokens() {
        use TokenKind::*;
        let tokens = kinds("if x:\n    y\n\n    # comment\nz");
        assert_eq!(
            tokens,
            vec![
                If,
                Name("x".into()),
                Colon,
                Newline,
                Indent,
                Name("y".into()),
                Newline,
                Dedent,
                Name("z".into()),
                Newline,
                Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        use TokenKind::*;
        assert_eq!(
            kinds("[1,\n 2]"),
            vec![LBracket, Int(1), Comma, Int(2), RBracket, Newline, Eof]
        );
    }

    #[test]
    fn strings() {
        use TokenKind::*;
        assert_eq!(kinds(r"'a\nb'")[0], Str("a\nb".into()));
        assert_eq!(kinds(r"r'a\nb'")[0], Str("a\\nb".into()));
        assert_eq!(kinds("b'ab'")[0], Bytes(b"ab".to_vec()));
        assert_eq!(kinds("u\"x\"")[0], Str("x".into()));
    }

    #[test]
    fn bad_dedent() {
        let err = Lexer::new("if x:\n    y\n  z").tokenize().expect_err("error");
        assert!(err.indentation);
    }
}
