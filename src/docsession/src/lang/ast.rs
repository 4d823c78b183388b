//! Syntax tree of session statements.

use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    /// 1-based line inside the compiled source.
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    Import {
        module: String,
        alias: Option<String>,
    },
    Raise(Option<Expr>),
    Pass,
    Del(Vec<Target>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Global(Vec<String>),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        finalbody: Vec<Stmt>,
    },
    Break,
    Continue,
    FunctionDef(Rc<FunctionDef>),
}

#[derive(Debug, Clone)]
pub struct Handler {
    /// `None` for a bare `except:`.
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Subscript { value: Expr, index: Expr },
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Constant),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Await(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl Expr {
    /// Returns `true` iff the expression awaits outside of any nested
    /// function body.
    pub fn awaits(&self) -> bool {
        match self {
            Expr::Await(_) => true,
            Expr::Constant(_) | Expr::Name(_) => false,
            Expr::List(items) | Expr::Tuple(items) => items.iter().any(Expr::awaits),
            Expr::Dict(items) => items.iter().any(|(k, v)| k.awaits() || v.awaits()),
            Expr::BinOp { left, right, .. } | Expr::BoolOp { left, right, .. } => {
                left.awaits() || right.awaits()
            }
            Expr::UnaryOp { operand, .. } => operand.awaits(),
            Expr::Compare { left, ops } => left.awaits() || ops.iter().any(|(_, e)| e.awaits()),
            Expr::Call { func, args, kwargs } => {
                func.awaits() || args.iter().any(Expr::awaits) || kwargs.iter().any(|(_, e)| e.awaits())
            }
            Expr::Attribute { value, .. } => value.awaits(),
            Expr::Subscript { value, index } => value.awaits() || index.awaits(),
            Expr::Slice { lower, upper } => {
                lower.as_ref().is_some_and(|e| e.awaits()) || upper.as_ref().is_some_and(|e| e.awaits())
            }
            Expr::IfExp { test, body, orelse } => test.awaits() || body.awaits() || orelse.awaits(),
        }
    }
}

impl Target {
    fn awaits(&self) -> bool {
        match self {
            Target::Name(_) => false,
            Target::Subscript { value, index } => value.awaits() || index.awaits(),
            Target::Tuple(items) => items.iter().any(Target::awaits),
        }
    }
}

impl Stmt {
    /// Returns `true` iff the statement awaits outside of nested function
    /// bodies.
    pub fn awaits(&self) -> bool {
        match &self.kind {
            StmtKind::Expr(e) => e.awaits(),
            StmtKind::Assign { targets, value } => {
                value.awaits() || targets.iter().any(Target::awaits)
            }
            StmtKind::AugAssign { target, value, .. } => target.awaits() || value.awaits(),
            StmtKind::Raise(e) | StmtKind::Return(e) => e.as_ref().is_some_and(Expr::awaits),
            StmtKind::Del(targets) => targets.iter().any(Target::awaits),
            StmtKind::Assert { test, msg } => test.awaits() || msg.as_ref().is_some_and(Expr::awaits),
            StmtKind::If { test, body, orelse } => {
                test.awaits() || block_awaits(body) || block_awaits(orelse)
            }
            StmtKind::While { test, body } => test.awaits() || block_awaits(body),
            StmtKind::For { target, iter, body } => {
                target.awaits() || iter.awaits() || block_awaits(body)
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => {
                block_awaits(body)
                    || handlers.iter().any(|h| {
                        h.kind.as_ref().is_some_and(Expr::awaits) || block_awaits(&h.body)
                    })
                    || block_awaits(finalbody)
            }
            StmtKind::Import { .. }
            | StmtKind::Pass
            | StmtKind::Global(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::FunctionDef(_) => false,
        }
    }
}

pub fn block_awaits(stmts: &[Stmt]) -> bool {
    stmts.iter().any(Stmt::awaits)
}
