//! Recursive descent parser for session statements.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{Token, TokenKind};

/// A parse error at a byte position of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: usize,
    pub message: String,
    pub indentation: bool,
}

impl ParseError {
    fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
            indentation: false,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

pub struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    /// Parse a whole module: statements up to the end of input.
    pub fn parse_module(mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Indent) {
                let mut err = ParseError::new(self.peek().span.start, "unexpected indent");
                err.indentation = true;
                return Err(err);
            }
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    // Token helpers
    // =============

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = self.peek();
        match token.kind {
            TokenKind::Eof | TokenKind::Newline if self.source[..token.span.start].trim_end().ends_with(':') => {
                let mut err = ParseError::new(token.span.start, "expected an indented block");
                err.indentation = true;
                err
            }
            TokenKind::Eof => ParseError::new(token.span.start, "unexpected EOF while parsing"),
            TokenKind::Indent => {
                let mut err = ParseError::new(token.span.start, "unexpected indent");
                err.indentation = true;
                err
            }
            _ => ParseError::new(token.span.start, "invalid syntax"),
        }
    }

    fn line_of(&self, pos: usize) -> usize {
        self.source[..pos.min(self.source.len())].matches('\n').count() + 1
    }

    fn name(&mut self) -> PResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    // Statements
    // ==========

    /// A compound statement or a line of simple statements.
    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line_of(self.peek().span.start);
        let kind = match self.peek().kind {
            TokenKind::If => self.if_stmt()?,
            TokenKind::While => {
                self.advance();
                let test = self.expression()?;
                let body = self.suite()?;
                StmtKind::While { test, body }
            }
            TokenKind::For => {
                self.advance();
                let target = self.target_list()?;
                self.expect(&TokenKind::In)?;
                let iter = self.testlist()?;
                let body = self.suite()?;
                StmtKind::For { target, iter, body }
            }
            TokenKind::Try => self.try_stmt()?,
            TokenKind::Def => self.function_def(false)?,
            TokenKind::Async => {
                self.advance();
                if !self.at(&TokenKind::Def) {
                    return Err(self.unexpected());
                }
                self.function_def(true)?
            }
            _ => return self.simple_statements(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line_of(self.peek().span.start);
            let kind = self.simple_statement()?;
            stmts.push(Stmt { kind, line });
            if !self.eat(&TokenKind::Semicolon) || self.at(&TokenKind::Newline) {
                break;
            }
        }
        if !self.eat(&TokenKind::Newline) && !self.at(&TokenKind::Eof) {
            return Err(self.unexpected());
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> PResult<StmtKind> {
        Ok(match self.peek().kind {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                StmtKind::Return(self.optional_testlist()?)
            }
            TokenKind::Raise => {
                self.advance();
                StmtKind::Raise(self.optional_testlist()?)
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.name()?);
                }
                StmtKind::Global(names)
            }
            TokenKind::Import => {
                self.advance();
                let mut module = self.name()?;
                while self.eat(&TokenKind::Dot) {
                    module.push('.');
                    module.push_str(&self.name()?);
                }
                let alias = if self.eat(&TokenKind::As) {
                    Some(self.name()?)
                } else {
                    None
                };
                StmtKind::Import { module, alias }
            }
            TokenKind::Del => {
                self.advance();
                let start = self.peek().span.start;
                let expr = self.testlist()?;
                match self.to_target(expr, start)? {
                    Target::Tuple(targets) => StmtKind::Del(targets),
                    target => StmtKind::Del(vec![target]),
                }
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.expression()?;
                let msg = if self.eat(&TokenKind::Comma) {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            _ => self.expression_statement()?,
        })
    }

    fn expression_statement(&mut self) -> PResult<StmtKind> {
        let start = self.peek().span.start;
        let first = self.testlist()?;

        let aug = match self.peek().kind {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::DoubleSlashAssign => Some(BinOp::FloorDiv),
            TokenKind::PercentAssign => Some(BinOp::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let target = self.to_target(first, start)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(ParseError::new(
                    start,
                    "'tuple' is an illegal expression for augmented assignment",
                ));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if !self.at(&TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![(first, start)];
        while self.eat(&TokenKind::Assign) {
            let start = self.peek().span.start;
            exprs.push((self.testlist()?, start));
        }
        let Some((value, _)) = exprs.pop() else {
            return Err(self.unexpected());
        };
        let targets = exprs
            .into_iter()
            .map(|(expr, start)| self.to_target(expr, start))
            .collect::<PResult<Vec<_>>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr, pos: usize) -> PResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { value, index } => Ok(Target::Subscript {
                value: *value,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item, pos))
                    .collect::<PResult<Vec<_>>>()?,
            )),
            Expr::Call { .. } => Err(ParseError::new(
                pos,
                "cannot assign to function call here. Maybe you meant '==' instead of '='?",
            )),
            Expr::Constant(_) => Err(ParseError::new(
                pos,
                "cannot assign to literal here. Maybe you meant '==' instead of '='?",
            )),
            _ => Err(ParseError::new(pos, "cannot assign to expression")),
        }
    }

    fn target_list(&mut self) -> PResult<Target> {
        let start = self.peek().span.start;
        let mut items = vec![self.or_test_no_in()?];
        let mut tuple = false;
        while self.eat(&TokenKind::Comma) {
            tuple = true;
            if self.at(&TokenKind::In) {
                break;
            }
            items.push(self.or_test_no_in()?);
        }
        let expr = match items.pop() {
            Some(item) if !tuple => item,
            Some(item) => {
                items.push(item);
                Expr::Tuple(items)
            }
            None => return Err(self.unexpected()),
        };
        self.to_target(expr, start)
    }

    /// Targets of a `for` loop stop before the `in` keyword.
    fn or_test_no_in(&mut self) -> PResult<Expr> {
        self.primary()
    }

    fn if_stmt(&mut self) -> PResult<StmtKind> {
        self.advance(); // `if` or `elif`
        let test = self.expression()?;
        let body = self.suite()?;
        let orelse = if self.at(&TokenKind::Elif) {
            let line = self.line_of(self.peek().span.start);
            let kind = self.if_stmt()?;
            vec![Stmt { kind, line }]
        } else if self.eat(&TokenKind::Else) {
            self.suite()?
        } else {
            vec![]
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn try_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let body = self.suite()?;
        let mut handlers = Vec::new();
        while self.eat(&TokenKind::Except) {
            let (kind, name) = if self.at(&TokenKind::Colon) {
                (None, None)
            } else {
                let kind = self.expression()?;
                let name = if self.eat(&TokenKind::As) {
                    Some(self.name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.suite()?;
            handlers.push(Handler { kind, name, body });
        }
        let finalbody = if self.eat(&TokenKind::Finally) {
            self.suite()?
        } else {
            vec![]
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(ParseError::new(
                self.peek().span.start,
                "expected 'except' or 'finally' block",
            ));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finalbody,
        })
    }

    fn function_def(&mut self, is_async: bool) -> PResult<StmtKind> {
        self.expect(&TokenKind::Def)?;
        let name = self.name()?;
        self.expect(&TokenKind::LParen)?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pos = self.peek().span.start;
            let name = self.name()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(ParseError::new(
                    pos,
                    "non-default argument follows default argument",
                ));
            }
            params.push(Param { name, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        if self.eat(&TokenKind::Arrow) {
            self.expression()?;
        }
        let body = self.suite()?;
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body,
            is_async,
        })))
    }

    /// `':' simple_statements | ':' NEWLINE INDENT statement+ DEDENT`
    fn suite(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::Colon)?;
        if !self.eat(&TokenKind::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&TokenKind::Indent) {
            let mut err = ParseError::new(self.peek().span.start, "expected an indented block");
            err.indentation = true;
            return Err(err);
        }
        let mut body = Vec::new();
        while !self.eat(&TokenKind::Dedent) {
            if self.at(&TokenKind::Eof) {
                break;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    // Expressions
    // ===========

    fn optional_testlist(&mut self) -> PResult<Option<Expr>> {
        if matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        ) {
            Ok(None)
        } else {
            self.testlist().map(Some)
        }
    }

    /// Comma separated expressions, yielding a tuple when a comma is present.
    fn testlist(&mut self) -> PResult<Expr> {
        let first = self.expression()?;
        if !self.at(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expression(&self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Semicolon
                | TokenKind::Assign
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Colon
                | TokenKind::In
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::DoubleSlashAssign
                | TokenKind::PercentAssign
        )
    }

    /// `or_test ['if' or_test 'else' expression]`
    pub(crate) fn expression(&mut self) -> PResult<Expr> {
        let body = self.or_test()?;
        if !self.eat(&TokenKind::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect(&TokenKind::Else)?;
        let orelse = self.expression()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat(&TokenKind::And) {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.not_test()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match (self.peek().kind.clone(), self.peek_at(1).clone()) {
                (TokenKind::EqEq, _) => CmpOp::Eq,
                (TokenKind::NotEq, _) => CmpOp::NotEq,
                (TokenKind::Lt, _) => CmpOp::Lt,
                (TokenKind::LtE, _) => CmpOp::LtE,
                (TokenKind::Gt, _) => CmpOp::Gt,
                (TokenKind::GtE, _) => CmpOp::GtE,
                (TokenKind::In, _) => CmpOp::In,
                (TokenKind::Not, TokenKind::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                (TokenKind::Is, TokenKind::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                (TokenKind::Is, _) => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.factor()?;
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = if self.eat(&TokenKind::Await) {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat(&TokenKind::DoubleStar) {
            let exponent = self.factor()?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.name()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_arguments(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pos = self.peek().span.start;
            if let (TokenKind::Name(name), TokenKind::Assign) =
                (self.peek().kind.clone(), self.peek_at(1).clone())
            {
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ParseError::new(pos, format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::new(
                        pos,
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.expression()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let lower = if self.at(&TokenKind::Colon) {
            None
        } else {
            Some(self.testlist()?)
        };
        if !self.eat(&TokenKind::Colon) {
            return lower.ok_or_else(|| self.unexpected());
        }
        let upper = if self.at(&TokenKind::RBracket) {
            None
        } else {
            Some(self.expression()?)
        };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
        })
    }

    fn atom(&mut self) -> PResult<Expr> {
        if !matches!(
            self.peek().kind,
            TokenKind::Name(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Bytes(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
        ) {
            return Err(self.unexpected());
        }
        let token = self.advance();
        Ok(match token.kind {
            TokenKind::Name(name) => Expr::Name(name),
            TokenKind::Int(i) => Expr::Constant(Constant::Int(i)),
            TokenKind::Float(f) => Expr::Constant(Constant::Float(f)),
            TokenKind::Str(mut s) => {
                // Adjacent literals are concatenated.
                while let TokenKind::Str(next) = self.peek().kind.clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Expr::Constant(Constant::Str(s))
            }
            TokenKind::Bytes(mut b) => {
                while let TokenKind::Bytes(next) = self.peek().kind.clone() {
                    self.advance();
                    b.extend(next);
                }
                Expr::Constant(Constant::Bytes(b))
            }
            TokenKind::True => Expr::Constant(Constant::Bool(true)),
            TokenKind::False => Expr::Constant(Constant::Bool(false)),
            TokenKind::None => Expr::Constant(Constant::None),
            TokenKind::LParen => {
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(vec![]));
                }
                let first = self.expression()?;
                if self.eat(&TokenKind::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.at(&TokenKind::RParen) {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(&TokenKind::RParen)?;
                Expr::Tuple(items)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Expr::List(items)
            }
            TokenKind::LBrace => {
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBrace) {
                    let key = self.expression()?;
                    self.expect(&TokenKind::Colon)?;
                    let value = self.expression()?;
                    items.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Expr::Dict(items)
            }
            _ => unreachable!("checked above"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::lexer::Lexer;

    fn parse(source: &str) -> PResult<Vec<Stmt>> {
        let tokens = Lexer::new(source).tokenize().expect("tokens");
        Parser::new(source, tokens).parse_module()
    }

    #[test]
    fn precedence() {
        let stmts = parse("1 + 2 * 3").expect("parse");
        let [Stmt {
            kind: StmtKind::Expr(Expr::BinOp { op: BinOp::Add, right, .. }),
            ..
        }] = stmts.as_slice()
        else {
            panic!("unexpected tree: {stmts:?}");
        };
        assert!(matches!(**right, Expr::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn assignment_chain() {
        let stmts = parse("a = b = 1").expect("parse");
        let StmtKind::Assign { targets, .. } = &stmts[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn compound_statements() {
        let source = "async def f(x, y=2):\n    await g()\n    return x + y\n";
        let stmts = parse(source).expect("parse");
        let StmtKind::FunctionDef(def) = &stmts[0].kind else {
            panic!("expected function definition");
        };
        assert!(def.is_async);
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.body.len(), 2);
        assert!(!stmts[0].awaits());
    }

    #[test]
    fn top_level_await() {
        let stmts = parse("x = await asyncio.sleep(0) or 10").expect("parse");
        assert!(stmts[0].awaits());
    }

    #[test]
    fn comparisons() {
        let stmts = parse("a is not None and b not in c").expect("parse");
        assert!(matches!(stmts[0].kind, StmtKind::Expr(Expr::BoolOp { .. })));
    }

    #[test]
    fn errors() {
        assert_eq!(parse("1 +").expect_err("error").message, "invalid syntax");
        assert!(parse("if x:\n").expect_err("error").indentation);
        assert!(parse("f() = 1")
            .expect_err("error")
            .message
            .starts_with("cannot assign to function call"));
    }
}
