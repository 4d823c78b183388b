//! Runtime values.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tokio::task::JoinHandle;

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::exception::{Exception, ExceptionKind};
use super::interp::Code;

/// A runtime value of the session language.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    Coroutine(Rc<Coroutine>),
    Task(Rc<Task>),
    ExceptionType(ExceptionKind),
    Exception(Rc<Exception>),
}

/// A user defined function together with the globals it was defined in.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub globals: Namespace,
    pub defaults: Vec<Option<Value>>,
}

/// A method looked up on a receiver, e.g. `"abc".upper`.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// A built-in module such as `asyncio`.
pub struct Module {
    pub name: &'static str,
    pub attrs: BTreeMap<&'static str, Value>,
}

/// A pending computation. Awaiting it consumes the body.
pub struct Coroutine {
    pub name: String,
    pub body: RefCell<Option<CoroutineBody>>,
}

pub enum CoroutineBody {
    /// A call of an `async def` function with its arguments already bound.
    Call {
        func: Rc<Function>,
        locals: BTreeMap<String, Value>,
    },
    /// `asyncio.sleep(delay, result)`.
    Sleep { delay: f64, result: Value },
    /// `asyncio.gather(*awaitables)`.
    Gather(Vec<Value>),
    /// A top-level statement that awaits.
    Statement { code: Rc<Code>, globals: Namespace },
}

/// A coroutine scheduled on the concurrency driver.
pub struct Task {
    pub name: String,
    pub handle: RefCell<Option<JoinHandle<Result<Value, Exception>>>>,
    pub result: RefCell<Option<Result<Value, Exception>>>,
}

impl Coroutine {
    pub fn new(name: impl Into<String>, body: CoroutineBody) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            body: RefCell::new(Some(body)),
        })
    }
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.result.borrow().is_some()
            || self
                .handle
                .borrow()
                .as_ref()
                .map_or(true, |handle| handle.is_finished())
    }
}

// Namespace
// =========

/// A mapping of identifiers to values shared by the statements of a test
/// case.
///
/// Cloning a `Namespace` yields another handle to the same mapping; use
/// [`Namespace::copy`] to obtain an independent mapping.
#[derive(Clone, Default)]
pub struct Namespace(Rc<RefCell<BTreeMap<String, Value>>>);

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// A shallow copy: a fresh mapping holding the same values.
    pub fn copy(&self) -> Self {
        Self(Rc::new(RefCell::new(self.0.borrow().clone())))
    }

    /// Insert all bindings of `other`, overriding existing ones.
    pub fn update(&self, other: &Namespace) {
        if Rc::ptr_eq(&self.0, &other.0) {
            return;
        }
        let other = other.0.borrow();
        let mut this = self.0.borrow_mut();
        for (name, value) in other.iter() {
            this.insert(name.clone(), value.clone());
        }
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.0.borrow();
        f.debug_map()
            .entries(map.iter().map(|(k, v)| (k, v.repr())))
            .finish()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Namespace {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let namespace = Namespace::new();
        for (name, value) in iter {
            namespace.set(name, value);
        }
        namespace
    }
}

// Constructors and conversions
// ============================

impl Value {
    pub fn str(value: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(value.as_ref()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(values)))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(values))
    }

    pub fn dict(items: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
            Value::Coroutine(_) => "coroutine",
            Value::Task(_) => "Task",
            Value::ExceptionType(_) => "type",
            Value::Exception(exc) => exc.kind.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Numeric view used by arithmetic: bools behave as ints.
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    /// Structural equality (`==`).
    pub fn py_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (List(a), List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Tuple(a), Tuple(b)) => seq_eq(a, b),
            (Dict(a), Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.py_eq(k2) && v.py_eq(v2))
                    })
            }
            (
                Range { start, stop, step },
                Range {
                    start: s2,
                    stop: e2,
                    step: t2,
                },
            ) => (start, stop, step) == (s2, e2, t2),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Builtin(a), Builtin(b)) => a == b,
            (Module(a), Module(b)) => Rc::ptr_eq(a, b),
            (Coroutine(a), Coroutine(b)) => Rc::ptr_eq(a, b),
            (Task(a), Task(b)) => Rc::ptr_eq(a, b),
            (ExceptionType(a), ExceptionType(b)) => a == b,
            (Exception(a), Exception(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => match (a.as_float(), b.as_float()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            },
        }
    }

    /// Identity comparison (`is`).
    pub fn py_is(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (List(a), List(b)) => Rc::ptr_eq(a, b),
            (Dict(a), Dict(b)) => Rc::ptr_eq(a, b),
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b),
            (Str(a), Str(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Int(a), Int(b)) => a == b && (-5..=256).contains(a),
            (Bool(_), _) | (_, Bool(_)) | (None, _) | (_, None) => false,
            (a, b) => {
                !matches!(a, Int(_) | Float(_) | Str(_) | Bytes(_) | List(_) | Dict(_))
                    && a.py_eq(b)
            }
        }
    }

    /// The `repr()` of the value.
    pub fn repr(&self) -> String {
        match self {
            Value::None => String::from("None"),
            Value::Bool(true) => String::from("True"),
            Value::Bool(false) => String::from("False"),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::Bytes(b) => bytes_repr(b),
            Value::List(items) => {
                let items = items.borrow();
                format!("[{}]", join_repr(items.iter()))
            }
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items.iter())),
            Value::Dict(items) => {
                let items = items.borrow();
                let items = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>();
                format!("{{{}}}", items.join(", "))
            }
            Value::Range { start, stop, step } if *step == 1 => format!("range({start}, {stop})"),
            Value::Range { start, stop, step } => format!("range({start}, {stop}, {step})"),
            Value::Function(func) => format!("<function {}>", func.def.name),
            Value::Builtin(builtin) => format!("<built-in function {}>", builtin.name()),
            Value::Method(method) => format!(
                "<built-in method {} of {} object>",
                method.name,
                method.receiver.type_name()
            ),
            Value::Module(module) => format!("<module '{}'>", module.name),
            Value::Coroutine(coro) => format!("<coroutine object {}>", coro.name),
            Value::Task(task) => {
                let state = if task.is_done() { "finished" } else { "pending" };
                format!("<Task {state} name='{}'>", task.name)
            }
            Value::ExceptionType(kind) => format!("<class '{}'>", kind.name()),
            Value::Exception(exc) => exc.repr(),
        }
    }

    /// The `str()` of the value.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message(),
            other => other.repr(),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

// Formatting helpers
// ==================

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    }
}

/// Format a float the way the shortest round-trip `repr` does.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return String::from("nan");
    }
    if f.is_infinite() {
        return String::from(if f > 0.0 { "inf" } else { "-inf" });
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // `{:e}` yields e.g. `1e20` or `1.5e-7`; exponents get a sign and at
        // least two digits.
        let formatted = format!("{f:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let formatted = format!("{f}");
    if formatted.contains('.') {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::from("b");
    out.push(quote as char);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            byte if byte == quote => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7e => out.push(byte as char),
            byte => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(quote as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting() {
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-3.5), "-3.5");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn string_quoting() {
        assert_eq!(Value::str("hello").repr(), "'hello'");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::str("hello").to_str(), "hello");
    }

    #[test]
    fn containers() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.repr(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let dict = Value::dict(vec![(Value::str("k"), Value::Bool(true))]);
        assert_eq!(dict.repr(), "{'k': True}");
    }

    #[test]
    fn equality_across_numbers() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn namespace_copy_is_independent() {
        let base: Namespace = [("x", Value::Int(1))].into_iter().collect();
        let copy = base.copy();
        copy.set("y", Value::Int(2));
        assert!(!base.contains("y"));
        assert!(copy.contains("x"));
    }
}
