//! Compilation and evaluation of session statements.
//!
//! Evaluation is written as boxed futures so that a statement which awaits
//! can suspend on the event loop. Statements that never await complete on the
//! first poll and are executed without any runtime.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use bitflags::bitflags;
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use tracing::trace;

use super::ast::{block_awaits, Expr, Handler, Stmt, StmtKind, Target};
use super::builtins::{self, Builtin};
use super::exception::{Exception, ExceptionKind, SyntaxLocation};
use super::lexer::Lexer;
use super::ops;
use super::parser::Parser;
use super::value::{Coroutine, CoroutineBody, Function, Namespace, Task, Value};

/// Version of the session language, used for version gating of examples.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

bitflags! {
    /// Flags accepted by [`compile`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileFlags: u32 {
        /// Accept `await` outside of a function; the code is then compiled
        /// as a coroutine.
        const ALLOW_TOP_LEVEL_AWAIT = 0x2000;
    }
}

/// The kind of source being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One interactive statement; expression results are echoed.
    Single,
    /// Any number of statements.
    Exec,
    /// A single expression whose value is returned.
    Eval,
}

/// Compiled statements.
#[derive(Debug)]
pub struct Code {
    pub filename: String,
    pub mode: Mode,
    /// Set when the code awaits at the top level. Evaluating such code yields
    /// a coroutine instead of running it.
    pub is_coroutine: bool,
    body: Vec<Stmt>,
}

// Compilation
// ===========

pub fn compile(
    source: &str,
    filename: &str,
    mode: Mode,
    flags: CompileFlags,
) -> Result<Rc<Code>, Exception> {
    let error_at = |pos: usize, message: &str, indentation: bool| {
        let kind = if indentation {
            ExceptionKind::IndentationError
        } else {
            ExceptionKind::SyntaxError
        };
        Exception::syntax(kind, message, location_at(source, filename, pos))
    };
    let error_on_line = |line: usize, message: &str| {
        Exception::syntax(
            ExceptionKind::SyntaxError,
            message,
            location_on_line(source, filename, line, message),
        )
    };

    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| error_at(e.pos, &e.message, e.indentation))?;
    let body = Parser::new(source, tokens)
        .parse_module()
        .map_err(|e| error_at(e.pos, &e.message, e.indentation))?;

    match mode {
        Mode::Single => {
            if let Some(extra) = body.iter().find(|s| s.line != body[0].line) {
                return Err(error_on_line(
                    extra.line,
                    "multiple statements found while compiling a single statement",
                ));
            }
        }
        Mode::Eval => {
            if !matches!(body.as_slice(), [Stmt { kind: StmtKind::Expr(_), .. }]) {
                return Err(error_at(0, "invalid syntax", false));
            }
        }
        Mode::Exec => {}
    }

    validate(&body, Scope::default()).map_err(|(line, message)| error_on_line(line, message))?;

    let is_coroutine = block_awaits(&body);
    if is_coroutine && (mode == Mode::Eval || !flags.contains(CompileFlags::ALLOW_TOP_LEVEL_AWAIT)) {
        let line = body.iter().find(|s| s.awaits()).map_or(1, |s| s.line);
        return Err(error_on_line(line, "'await' outside function"));
    }

    trace!(filename, is_coroutine, statements = body.len(), "compiled");
    Ok(Rc::new(Code {
        filename: filename.to_string(),
        mode,
        is_coroutine,
        body,
    }))
}

#[derive(Debug, Clone, Copy, Default)]
struct Scope {
    /// `Some(is_async)` inside a function body.
    function: Option<bool>,
    in_loop: bool,
}

fn validate(body: &[Stmt], scope: Scope) -> Result<(), (usize, &'static str)> {
    for stmt in body {
        if scope.function == Some(false) && stmt.awaits() {
            return Err((stmt.line, "'await' outside async function"));
        }
        match &stmt.kind {
            StmtKind::Return(_) if scope.function.is_none() => {
                return Err((stmt.line, "'return' outside function"))
            }
            StmtKind::Break if !scope.in_loop => return Err((stmt.line, "'break' outside loop")),
            StmtKind::Continue if !scope.in_loop => {
                return Err((stmt.line, "'continue' not properly in loop"))
            }
            StmtKind::If { body, orelse, .. } => {
                validate(body, scope)?;
                validate(orelse, scope)?;
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                validate(body, Scope { in_loop: true, ..scope })?;
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => {
                validate(body, scope)?;
                for handler in handlers {
                    validate(&handler.body, scope)?;
                }
                validate(finalbody, scope)?;
            }
            StmtKind::FunctionDef(def) => validate(
                &def.body,
                Scope {
                    function: Some(def.is_async),
                    in_loop: false,
                },
            )?,
            _ => {}
        }
    }
    Ok(())
}

fn location_at(source: &str, filename: &str, pos: usize) -> SyntaxLocation {
    let mut pos = pos.min(source.len());
    while !source.is_char_boundary(pos) {
        pos -= 1;
    }
    let line_start = source[..pos].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[pos..].find('\n').map_or(source.len(), |i| pos + i);
    SyntaxLocation {
        filename: filename.to_string(),
        lineno: source[..pos].matches('\n').count() + 1,
        offset: source[line_start..pos].chars().count() + 1,
        text: source[line_start..line_end].to_string(),
    }
}

fn location_on_line(source: &str, filename: &str, line: usize, message: &str) -> SyntaxLocation {
    let text = source.lines().nth(line.saturating_sub(1)).unwrap_or_default();
    let keyword = message
        .split('\'')
        .nth(1)
        .and_then(|keyword| text.find(keyword))
        .unwrap_or_else(|| text.len() - text.trim_start().len());
    SyntaxLocation {
        filename: filename.to_string(),
        lineno: line,
        offset: text[..keyword].chars().count() + 1,
        text: text.to_string(),
    }
}

// Interpreter
// ===========

pub(crate) type TaskList = Rc<RefCell<Vec<Rc<Task>>>>;

/// Tracks the task list of the event loop currently running, if any.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    running: RefCell<Option<TaskList>>,
    spawned: Cell<usize>,
}

impl TaskRegistry {
    pub(crate) fn is_running(&self) -> bool {
        self.running.borrow().is_some()
    }

    /// Make `tasks` the running task list, returning the previous one.
    pub(crate) fn enter(&self, tasks: TaskList) -> Option<TaskList> {
        self.running.replace(Some(tasks))
    }

    pub(crate) fn leave(&self, previous: Option<TaskList>) {
        self.running.replace(previous);
    }
}

#[derive(Default)]
struct State {
    output: RefCell<String>,
    tasks: TaskRegistry,
}

/// Executes compiled code.
///
/// Cloning yields a handle to the same interpreter: all handles share one
/// output buffer and one task registry.
#[derive(Clone, Default)]
pub struct Interpreter {
    state: Rc<State>,
}

/// Non-local control flow out of a statement.
enum Signal {
    Raise(Exception),
    Return(Value),
    Break,
    Continue,
}

impl From<Exception> for Signal {
    fn from(exc: Exception) -> Self {
        Signal::Raise(exc)
    }
}

struct Frame {
    globals: Namespace,
    /// `None` at module level.
    locals: Option<BTreeMap<String, Value>>,
    declared_global: Vec<String>,
    echo: bool,
    /// The exception being handled by the innermost `except` clause.
    handling: Option<Exception>,
}

impl Frame {
    fn module(globals: Namespace, echo: bool) -> Self {
        Self {
            globals,
            locals: None,
            declared_global: vec![],
            echo,
            handling: None,
        }
    }

    fn function(globals: Namespace, locals: BTreeMap<String, Value>) -> Self {
        Self {
            globals,
            locals: Some(locals),
            declared_global: vec![],
            echo: false,
            handling: None,
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.is_some() && !self.declared_global.iter().any(|g| g == name)
    }

    fn lookup(&self, name: &str) -> Result<Value, Exception> {
        if self.is_local(name) {
            if let Some(value) = self.locals.as_ref().and_then(|l| l.get(name)) {
                return Ok(value.clone());
            }
        }
        self.globals
            .get(name)
            .or_else(|| Builtin::lookup(name))
            .ok_or_else(|| Exception::name_error(name))
    }

    fn assign(&mut self, name: &str, value: Value) {
        if self.is_local(name) {
            if let Some(locals) = &mut self.locals {
                locals.insert(name.to_string(), value);
                return;
            }
        }
        self.globals.set(name, value);
    }

    fn delete(&mut self, name: &str) -> Result<(), Exception> {
        let removed = if self.is_local(name) {
            self.locals.as_mut().and_then(|l| l.remove(name))
        } else {
            self.globals.remove(name)
        };
        removed.map(drop).ok_or_else(|| Exception::name_error(name))
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_output(&self, text: &str) {
        self.state.output.borrow_mut().push_str(text);
    }

    /// Drain everything written since the previous call.
    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.state.output.borrow_mut())
    }

    pub(crate) fn tasks(&self) -> &TaskRegistry {
        &self.state.tasks
    }

    /// Evaluate compiled code against `globals`.
    ///
    /// Coroutine code is not run: the returned value is the pending
    /// coroutine, to be driven by [`Interpreter::await_value`] on an event
    /// loop. Otherwise the code runs to completion and the result is the
    /// value of an `Eval` expression or `None`.
    pub fn eval(&self, code: &Rc<Code>, globals: &Namespace) -> Result<Value, Exception> {
        if code.is_coroutine {
            return Ok(Value::Coroutine(Coroutine::new(
                "<module>",
                CoroutineBody::Statement {
                    code: code.clone(),
                    globals: globals.clone(),
                },
            )));
        }
        self.run_module(code.clone(), globals.clone())
            .now_or_never()
            .unwrap_or_else(|| {
                Err(Exception::runtime_error(
                    "statement suspended outside of an event loop",
                ))
            })
    }

    /// Compile and evaluate a single expression.
    pub fn eval_source(
        &self,
        source: &str,
        filename: &str,
        globals: &Namespace,
    ) -> Result<Value, Exception> {
        let code = compile(source.trim(), filename, Mode::Eval, CompileFlags::empty())?;
        self.eval(&code, globals)
    }

    /// Await a coroutine or task value.
    pub fn await_value(&self, value: Value) -> LocalBoxFuture<'static, Result<Value, Exception>> {
        let interp = self.clone();
        Box::pin(async move {
            match value {
                Value::Coroutine(coro) => interp.run_coroutine(coro).await,
                Value::Task(task) => join_task(task).await,
                other => Err(Exception::type_error(format!(
                    "object {} can't be used in 'await' expression",
                    other.type_name()
                ))),
            }
        })
    }

    /// `asyncio.run`: drive a coroutine on a fresh event loop.
    pub(crate) fn run_to_completion(&self, coro: Rc<Coroutine>) -> Result<Value, Exception> {
        if self.tasks().is_running() || tokio::runtime::Handle::try_current().is_ok() {
            return Err(Exception::runtime_error(
                "asyncio.run() cannot be called from a running event loop",
            ));
        }
        let event_loop = super::EventLoop::new(self.clone())
            .map_err(|e| Exception::runtime_error(e.to_string()))?;
        let result = event_loop.run_until_complete(self.run_coroutine(coro));
        event_loop.close();
        result
    }

    /// `asyncio.create_task`: schedule a coroutine on the running loop.
    pub(crate) fn create_task(
        &self,
        coro: Rc<Coroutine>,
        name: Option<String>,
    ) -> Result<Value, Exception> {
        let Some(tasks) = self.tasks().running.borrow().clone() else {
            return Err(Exception::runtime_error("no running event loop"));
        };
        let registry = self.tasks();
        registry.spawned.set(registry.spawned.get() + 1);
        let name = name.unwrap_or_else(|| format!("Task-{}", registry.spawned.get()));
        let handle = tokio::task::spawn_local(self.run_coroutine(coro));
        let task = Rc::new(Task {
            name,
            handle: RefCell::new(Some(handle)),
            result: RefCell::new(None),
        });
        tasks.borrow_mut().push(task.clone());
        Ok(Value::Task(task))
    }

    fn run_module(
        &self,
        code: Rc<Code>,
        globals: Namespace,
    ) -> LocalBoxFuture<'static, Result<Value, Exception>> {
        let interp = self.clone();
        Box::pin(async move {
            let mut frame = Frame::module(globals, code.mode == Mode::Single);
            if let (Mode::Eval, [Stmt { kind: StmtKind::Expr(expr), .. }]) =
                (code.mode, code.body.as_slice())
            {
                return interp.eval_expr(expr, &frame).await;
            }
            match interp.exec_block(&code.body, &mut frame).await {
                Err(Signal::Raise(exc)) => Err(exc),
                _ => Ok(Value::None),
            }
        })
    }

    fn run_function(
        &self,
        func: Rc<Function>,
        locals: BTreeMap<String, Value>,
    ) -> LocalBoxFuture<'static, Result<Value, Exception>> {
        let interp = self.clone();
        Box::pin(async move {
            let mut frame = Frame::function(func.globals.clone(), locals);
            match interp.exec_block(&func.def.body, &mut frame).await {
                Err(Signal::Raise(exc)) => Err(exc),
                Err(Signal::Return(value)) => Ok(value),
                _ => Ok(Value::None),
            }
        })
    }

    fn run_coroutine(&self, coro: Rc<Coroutine>) -> LocalBoxFuture<'static, Result<Value, Exception>> {
        let interp = self.clone();
        Box::pin(async move {
            let body = coro.body.borrow_mut().take().ok_or_else(|| {
                Exception::runtime_error("cannot reuse already awaited coroutine")
            })?;
            match body {
                CoroutineBody::Call { func, locals } => interp.run_function(func, locals).await,
                CoroutineBody::Sleep { delay, result } => {
                    if tokio::runtime::Handle::try_current().is_err() {
                        return Err(Exception::runtime_error("no running event loop"));
                    }
                    if delay.is_nan() {
                        return Err(Exception::value_error("Invalid value NaN (not a number)"));
                    }
                    if delay > 0.0 {
                        let delay = Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX);
                        tokio::time::sleep(delay).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                    Ok(result)
                }
                CoroutineBody::Gather(items) => {
                    let pending = items.into_iter().map(|item| interp.await_value(item));
                    join_all(pending)
                        .await
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::list)
                }
                CoroutineBody::Statement { code, globals } => {
                    interp.run_module(code, globals).await
                }
            }
        })
    }

    // Statements
    // ==========

    fn exec_block<'a>(
        &'a self,
        body: &'a [Stmt],
        frame: &'a mut Frame,
    ) -> LocalBoxFuture<'a, Result<(), Signal>> {
        Box::pin(async move {
            for stmt in body {
                self.exec_stmt(stmt, frame).await?;
            }
            Ok(())
        })
    }

    fn exec_stmt<'a>(
        &'a self,
        stmt: &'a Stmt,
        frame: &'a mut Frame,
    ) -> LocalBoxFuture<'a, Result<(), Signal>> {
        Box::pin(async move {
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    let value = self.eval_expr(expr, frame).await?;
                    if frame.echo && !value.is_none() {
                        self.write_output(&format!("{}\n", value.repr()));
                    }
                }
                StmtKind::Assign { targets, value } => {
                    let value = self.eval_expr(value, frame).await?;
                    for target in targets {
                        self.assign(target, value.clone(), frame).await?;
                    }
                }
                StmtKind::AugAssign { target, op, value } => {
                    self.aug_assign(target, *op, value, frame).await?;
                }
                StmtKind::Import { module, alias } => {
                    let value = builtins::import(module)?;
                    frame.assign(alias.as_deref().unwrap_or(module), value);
                }
                StmtKind::Raise(None) => {
                    return Err(Signal::Raise(frame.handling.clone().unwrap_or_else(|| {
                        Exception::runtime_error("No active exception to reraise")
                    })));
                }
                StmtKind::Raise(Some(expr)) => {
                    let value = self.eval_expr(expr, frame).await?;
                    return Err(Signal::Raise(to_exception(value)?));
                }
                StmtKind::Pass => {}
                StmtKind::Del(targets) => {
                    for target in targets {
                        self.delete(target, frame).await?;
                    }
                }
                StmtKind::Assert { test, msg } => {
                    if !self.eval_expr(test, frame).await?.truthy() {
                        let args = match msg {
                            Some(msg) => vec![self.eval_expr(msg, frame).await?],
                            None => vec![],
                        };
                        return Err(Exception::with_args(ExceptionKind::AssertionError, args).into());
                    }
                }
                StmtKind::Global(names) => frame.declared_global.extend(names.iter().cloned()),
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval_expr(expr, frame).await?,
                        None => Value::None,
                    };
                    return Err(Signal::Return(value));
                }
                StmtKind::If { test, body, orelse } => {
                    if self.eval_expr(test, frame).await?.truthy() {
                        self.exec_block(body, frame).await?;
                    } else {
                        self.exec_block(orelse, frame).await?;
                    }
                }
                StmtKind::While { test, body } => {
                    while self.eval_expr(test, frame).await?.truthy() {
                        match self.exec_block(body, frame).await {
                            Ok(()) | Err(Signal::Continue) => {}
                            Err(Signal::Break) => break,
                            Err(other) => return Err(other),
                        }
                    }
                }
                StmtKind::For { target, iter, body } => {
                    let items = ops::iterate(&self.eval_expr(iter, frame).await?)?;
                    for item in items {
                        self.assign(target, item, frame).await?;
                        match self.exec_block(body, frame).await {
                            Ok(()) | Err(Signal::Continue) => {}
                            Err(Signal::Break) => break,
                            Err(other) => return Err(other),
                        }
                    }
                }
                StmtKind::Try {
                    body,
                    handlers,
                    finalbody,
                } => {
                    let outcome = match self.exec_block(body, frame).await {
                        Err(Signal::Raise(exc)) => self.handle(exc, handlers, frame).await,
                        other => other,
                    };
                    self.exec_block(finalbody, frame).await?;
                    return outcome;
                }
                StmtKind::Break => return Err(Signal::Break),
                StmtKind::Continue => return Err(Signal::Continue),
                StmtKind::FunctionDef(def) => {
                    let mut defaults = Vec::with_capacity(def.params.len());
                    for param in &def.params {
                        defaults.push(match &param.default {
                            Some(expr) => Some(self.eval_expr(expr, frame).await?),
                            None => None,
                        });
                    }
                    let func = Function {
                        def: def.clone(),
                        globals: frame.globals.clone(),
                        defaults,
                    };
                    frame.assign(&def.name, Value::Function(Rc::new(func)));
                }
            }
            Ok(())
        })
    }

    async fn handle(
        &self,
        exc: Exception,
        handlers: &[Handler],
        frame: &mut Frame,
    ) -> Result<(), Signal> {
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let class = self.eval_expr(kind, frame).await?;
                    exception_matches(&exc, &class)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                frame.assign(name, Value::Exception(Rc::new(exc.clone())));
            }
            let previous = frame.handling.replace(exc);
            let outcome = self.exec_block(&handler.body, frame).await;
            frame.handling = previous;
            if let Some(name) = &handler.name {
                let _ = frame.delete(name);
            }
            return outcome;
        }
        Err(Signal::Raise(exc))
    }

    fn assign<'a>(
        &'a self,
        target: &'a Target,
        value: Value,
        frame: &'a mut Frame,
    ) -> LocalBoxFuture<'a, Result<(), Exception>> {
        Box::pin(async move {
            match target {
                Target::Name(name) => frame.assign(name, value),
                Target::Subscript { value: container, index } => {
                    let container = self.eval_expr(container, frame).await?;
                    let index = self.eval_expr(index, frame).await?;
                    ops::set_item(&container, &index, value)?;
                }
                Target::Tuple(targets) => {
                    let items = match &value {
                        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range { .. }
                        | Value::Dict(_) => ops::iterate(&value)?,
                        other => {
                            return Err(Exception::type_error(format!(
                                "cannot unpack non-iterable {} object",
                                other.type_name()
                            )))
                        }
                    };
                    if items.len() < targets.len() {
                        return Err(Exception::value_error(format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )));
                    }
                    if items.len() > targets.len() {
                        return Err(Exception::value_error(format!(
                            "too many values to unpack (expected {})",
                            targets.len()
                        )));
                    }
                    for (target, item) in targets.iter().zip(items) {
                        self.assign(target, item, frame).await?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn aug_assign(
        &self,
        target: &Target,
        op: super::ast::BinOp,
        value: &Expr,
        frame: &mut Frame,
    ) -> Result<(), Exception> {
        match target {
            Target::Name(name) => {
                let current = frame.lookup(name)?;
                let operand = self.eval_expr(value, frame).await?;
                let updated = in_place(op, &current, &operand)?;
                frame.assign(name, updated);
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval_expr(container, frame).await?;
                let index = self.eval_expr(index, frame).await?;
                let current = ops::subscript(&container, &index, None)?;
                let operand = self.eval_expr(value, frame).await?;
                let updated = in_place(op, &current, &operand)?;
                ops::set_item(&container, &index, updated)?;
            }
            Target::Tuple(_) => {
                return Err(Exception::new(
                    ExceptionKind::SyntaxError,
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    fn delete<'a>(
        &'a self,
        target: &'a Target,
        frame: &'a mut Frame,
    ) -> LocalBoxFuture<'a, Result<(), Exception>> {
        Box::pin(async move {
            match target {
                Target::Name(name) => frame.delete(name),
                Target::Subscript { value, index } => {
                    let container = self.eval_expr(value, frame).await?;
                    let index = self.eval_expr(index, frame).await?;
                    ops::del_item(&container, &index)
                }
                Target::Tuple(targets) => {
                    for target in targets {
                        self.delete(target, frame).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    // Expressions
    // ===========

    fn eval_expr<'a>(
        &'a self,
        expr: &'a Expr,
        frame: &'a Frame,
    ) -> LocalBoxFuture<'a, Result<Value, Exception>> {
        Box::pin(async move {
            Ok(match expr {
                Expr::Constant(constant) => constant_value(constant),
                Expr::Name(name) => frame.lookup(name)?,
                Expr::List(items) => Value::list(self.eval_all(items, frame).await?),
                Expr::Tuple(items) => Value::tuple(self.eval_all(items, frame).await?),
                Expr::Dict(items) => {
                    let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(items.len());
                    for (key, value) in items {
                        let key = self.eval_expr(key, frame).await?;
                        let value = self.eval_expr(value, frame).await?;
                        match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                            Some((_, existing)) => *existing = value,
                            None => pairs.push((key, value)),
                        }
                    }
                    Value::dict(pairs)
                }
                Expr::BinOp { left, op, right } => {
                    let left = self.eval_expr(left, frame).await?;
                    let right = self.eval_expr(right, frame).await?;
                    ops::binary(*op, &left, &right)?
                }
                Expr::UnaryOp { op, operand } => {
                    ops::unary(*op, &self.eval_expr(operand, frame).await?)?
                }
                Expr::BoolOp { op, left, right } => {
                    let left = self.eval_expr(left, frame).await?;
                    let short_circuit = match op {
                        super::ast::BoolOp::And => !left.truthy(),
                        super::ast::BoolOp::Or => left.truthy(),
                    };
                    if short_circuit {
                        left
                    } else {
                        self.eval_expr(right, frame).await?
                    }
                }
                Expr::Compare { left, ops: comparisons } => {
                    let mut left = self.eval_expr(left, frame).await?;
                    for (op, right) in comparisons {
                        let right = self.eval_expr(right, frame).await?;
                        if !ops::compare_op(*op, &left, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        left = right;
                    }
                    Value::Bool(true)
                }
                Expr::Call { func, args, kwargs } => {
                    let func = self.eval_expr(func, frame).await?;
                    let args = self.eval_all(args, frame).await?;
                    let mut kw = Vec::with_capacity(kwargs.len());
                    for (name, value) in kwargs {
                        kw.push((name.clone(), self.eval_expr(value, frame).await?));
                    }
                    self.call(func, args, kw).await?
                }
                Expr::Attribute { value, attr } => {
                    builtins::attribute(&self.eval_expr(value, frame).await?, attr)?
                }
                Expr::Subscript { value, index } => {
                    let container = self.eval_expr(value, frame).await?;
                    match &**index {
                        Expr::Slice { lower, upper } => {
                            let lower = match lower {
                                Some(expr) => self.eval_expr(expr, frame).await?,
                                None => Value::None,
                            };
                            let upper = match upper {
                                Some(expr) => self.eval_expr(expr, frame).await?,
                                None => Value::None,
                            };
                            ops::subscript(&container, &Value::None, Some((&lower, &upper)))?
                        }
                        index => {
                            let index = self.eval_expr(index, frame).await?;
                            ops::subscript(&container, &index, None)?
                        }
                    }
                }
                Expr::Slice { .. } => {
                    return Err(Exception::type_error("slice is only valid in a subscript"))
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval_expr(test, frame).await?.truthy() {
                        self.eval_expr(body, frame).await?
                    } else {
                        self.eval_expr(orelse, frame).await?
                    }
                }
                Expr::Await(value) => {
                    let value = self.eval_expr(value, frame).await?;
                    self.await_value(value).await?
                }
            })
        })
    }

    async fn eval_all(&self, exprs: &[Expr], frame: &Frame) -> Result<Vec<Value>, Exception> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval_expr(expr, frame).await?);
        }
        Ok(values)
    }

    async fn call(
        &self,
        func: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Exception> {
        match func {
            Value::Builtin(builtin) => builtins::call(self, builtin, args, kwargs),
            Value::Method(method) => builtins::call_method(self, &method, args, kwargs),
            Value::ExceptionType(kind) => {
                if let Some((name, _)) = kwargs.first() {
                    return Err(Exception::type_error(format!(
                        "{}() takes no keyword arguments: '{name}'",
                        kind.name()
                    )));
                }
                Ok(Value::Exception(Rc::new(Exception::with_args(kind, args))))
            }
            Value::Function(func) => {
                let locals = bind_arguments(&func, args, kwargs)?;
                if func.def.is_async {
                    let name = func.def.name.clone();
                    Ok(Value::Coroutine(Coroutine::new(
                        name,
                        CoroutineBody::Call { func, locals },
                    )))
                } else {
                    self.run_function(func, locals).await
                }
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

async fn join_task(task: Rc<Task>) -> Result<Value, Exception> {
    let cached = task.result.borrow().clone();
    if let Some(result) = cached {
        return result;
    }
    let handle = task.handle.borrow_mut().take();
    let Some(handle) = handle else {
        return Err(Exception::runtime_error("await wasn't used with future"));
    };
    let result = match handle.await {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(Exception::new(ExceptionKind::CancelledError, "")),
        Err(err) => Err(Exception::runtime_error(err.to_string())),
    };
    task.result.replace(Some(result.clone()));
    result
}

fn constant_value(constant: &super::ast::Constant) -> Value {
    use super::ast::Constant;
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s),
        Constant::Bytes(b) => Value::Bytes(Rc::from(b.as_slice())),
    }
}

fn in_place(op: super::ast::BinOp, current: &Value, operand: &Value) -> Result<Value, Exception> {
    if let (super::ast::BinOp::Add, Value::List(items)) = (op, current) {
        let extra = ops::iterate(operand)?;
        items.borrow_mut().extend(extra);
        return Ok(current.clone());
    }
    ops::binary(op, current, operand)
}

fn to_exception(value: Value) -> Result<Exception, Exception> {
    match value {
        Value::ExceptionType(kind) => Ok(Exception::new(kind, "")),
        Value::Exception(exc) => Ok((*exc).clone()),
        _ => Err(Exception::type_error(
            "exceptions must derive from BaseException",
        )),
    }
}

fn exception_matches(exc: &Exception, class: &Value) -> Result<bool, Exception> {
    match class {
        Value::ExceptionType(kind) => Ok(exc.kind.is_subclass(*kind)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(Exception::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn bind_arguments(
    func: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<BTreeMap<String, Value>, Exception> {
    let def = &func.def;
    let params = &def.params;
    if args.len() > params.len() {
        return Err(Exception::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            def.name,
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" },
        )));
    }

    let mut locals = BTreeMap::new();
    for (param, arg) in params.iter().zip(args) {
        locals.insert(param.name.clone(), arg);
    }
    for (name, value) in kwargs {
        if !params.iter().any(|p| p.name == name) {
            return Err(Exception::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                def.name
            )));
        }
        if locals.contains_key(&name) {
            return Err(Exception::type_error(format!(
                "{}() got multiple values for argument '{name}'",
                def.name
            )));
        }
        locals.insert(name, value);
    }

    let mut missing = Vec::new();
    for (param, default) in params.iter().zip(&func.defaults) {
        if locals.contains_key(&param.name) {
            continue;
        }
        match default {
            Some(value) => {
                locals.insert(param.name.clone(), value.clone());
            }
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        return Err(Exception::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            def.name,
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(" and ")
        )));
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::EventLoop;

    fn run(interp: &Interpreter, globals: &Namespace, source: &str) -> Result<String, Exception> {
        let code = compile(source, "<test>", Mode::Single, CompileFlags::empty())?;
        interp.eval(&code, globals)?;
        Ok(interp.take_output())
    }

    #[test]
    fn echo_and_state() {
        let interp = Interpreter::new();
        let globals = Namespace::new();
        assert_eq!(run(&interp, &globals, "4 + 4\n").expect("run"), "8\n");
        assert_eq!(run(&interp, &globals, "x = 'a' * 3\n").expect("run"), "");
        assert_eq!(run(&interp, &globals, "x\n").expect("run"), "'aaa'\n");
        assert_eq!(run(&interp, &globals, "print(x, 1)\n").expect("run"), "aaa 1\n");
        assert_eq!(run(&interp, &globals, "None\n").expect("run"), "");
    }

    #[test]
    fn functions_and_control_flow() {
        let interp = Interpreter::new();
        let globals = Namespace::new();
        let source = "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n";
        run(&interp, &globals, source).expect("define");
        assert_eq!(run(&interp, &globals, "fib(10)\n").expect("call"), "55\n");
        assert_eq!(
            run(&interp, &globals, "for i in range(3): i\n").expect("loop"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn exceptions() {
        let interp = Interpreter::new();
        let globals = Namespace::new();
        let err = run(&interp, &globals, "raise ValueError('boom')\n").expect_err("raise");
        assert_eq!(err.to_string(), "ValueError: boom");

        let source = "try:\n    1 / 0\nexcept ArithmeticError as e:\n    print('caught', e)\n";
        assert_eq!(
            run(&interp, &globals, source).expect("handled"),
            "caught division by zero\n"
        );
        assert!(!globals.contains("e"));

        let err = run(&interp, &globals, "undefined\n").expect_err("name");
        assert_eq!(err.to_string(), "NameError: name 'undefined' is not defined");
    }

    #[test]
    fn syntax_errors() {
        let err = compile("1 +\n", "<t>", Mode::Single, CompileFlags::empty()).expect_err("error");
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
        assert_eq!(err.location.as_ref().map(|l| l.lineno), Some(1));

        let err = compile("x = 1\ny = 2\n", "<t>", Mode::Single, CompileFlags::empty())
            .expect_err("error");
        assert_eq!(
            err.message(),
            "multiple statements found while compiling a single statement"
        );

        let err = compile("return 1\n", "<t>", Mode::Exec, CompileFlags::empty()).expect_err("error");
        assert_eq!(err.message(), "'return' outside function");
    }

    #[test]
    fn top_level_await_needs_the_flag() {
        let source = "await asyncio.sleep(0)\n";
        let err = compile(source, "<t>", Mode::Single, CompileFlags::empty()).expect_err("error");
        assert_eq!(err.message(), "'await' outside function");

        let code = compile(source, "<t>", Mode::Single, CompileFlags::ALLOW_TOP_LEVEL_AWAIT)
            .expect("code");
        assert!(code.is_coroutine);

        let err = compile(
            "def f():\n    await g()\n",
            "<t>",
            Mode::Single,
            CompileFlags::ALLOW_TOP_LEVEL_AWAIT,
        )
        .expect_err("error");
        assert_eq!(err.message(), "'await' outside async function");
    }

    #[test]
    fn coroutine_code_runs_on_an_event_loop() {
        let interp = Interpreter::new();
        let globals = Namespace::new();
        run(&interp, &globals, "import asyncio\n").expect("import");
        run(
            &interp,
            &globals,
            "async def double(x):\n    await asyncio.sleep(0)\n    return x * 2\n",
        )
        .expect("define");

        let code = compile(
            "await double(21)\n",
            "<t>",
            Mode::Single,
            CompileFlags::ALLOW_TOP_LEVEL_AWAIT,
        )
        .expect("code");
        let pending = interp.eval(&code, &globals).expect("coroutine");
        assert!(matches!(pending, Value::Coroutine(_)));

        let event_loop = EventLoop::new(interp.clone()).expect("event loop");
        event_loop
            .run_until_complete(interp.await_value(pending))
            .expect("awaited");
        event_loop.close();
        assert_eq!(interp.take_output(), "42\n");
    }

    #[test]
    fn asyncio_run_from_synchronous_code() {
        let interp = Interpreter::new();
        let globals = Namespace::new();
        run(&interp, &globals, "import asyncio\n").expect("import");
        let output = run(&interp, &globals, "asyncio.run(asyncio.sleep(0, 'done'))\n");
        assert_eq!(output.expect("run"), "'done'\n");

        let err = run(&interp, &globals, "asyncio.create_task(asyncio.sleep(0))\n")
            .expect_err("no loop");
        assert_eq!(err.to_string(), "RuntimeError: no running event loop");
    }

    #[test]
    fn eval_expression() {
        let interp = Interpreter::new();
        let globals: Namespace = [("flag", Value::Bool(true))].into_iter().collect();
        let value = interp
            .eval_source("flag and 1 < 2", "<skipif>", &globals)
            .expect("value");
        assert!(value.truthy());
    }
}
