//! Built-in functions, methods and modules.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::exception::{Exception, ExceptionKind};
use super::interp::Interpreter;
use super::ops;
use super::value::{BoundMethod, Coroutine, CoroutineBody, Module, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Bool,
    Float,
    Int,
    Interrupt,
    Isinstance,
    Len,
    List,
    Max,
    Min,
    Print,
    Range,
    Repr,
    Sorted,
    Str,
    Sum,
    Tuple,
    // asyncio
    CreateTask,
    Gather,
    Run,
    Sleep,
}

const GLOBAL_FUNCTIONS: [Builtin; 17] = [
    Builtin::Abs,
    Builtin::Bool,
    Builtin::Float,
    Builtin::Int,
    Builtin::Interrupt,
    Builtin::Isinstance,
    Builtin::Len,
    Builtin::List,
    Builtin::Max,
    Builtin::Min,
    Builtin::Print,
    Builtin::Range,
    Builtin::Repr,
    Builtin::Sorted,
    Builtin::Str,
    Builtin::Sum,
    Builtin::Tuple,
];

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Bool => "bool",
            Builtin::Float => "float",
            Builtin::Int => "int",
            Builtin::Interrupt => "interrupt",
            Builtin::Isinstance => "isinstance",
            Builtin::Len => "len",
            Builtin::List => "list",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Repr => "repr",
            Builtin::Sorted => "sorted",
            Builtin::Str => "str",
            Builtin::Sum => "sum",
            Builtin::Tuple => "tuple",
            Builtin::CreateTask => "create_task",
            Builtin::Gather => "gather",
            Builtin::Run => "run",
            Builtin::Sleep => "sleep",
        }
    }

    /// Resolve a name in the builtins scope.
    pub fn lookup(name: &str) -> Option<Value> {
        if let Some(builtin) = GLOBAL_FUNCTIONS.into_iter().find(|b| b.name() == name) {
            return Some(Value::Builtin(builtin));
        }
        ExceptionKind::from_name(name)
            .filter(|kind| *kind != ExceptionKind::CancelledError)
            .map(Value::ExceptionType)
    }
}

/// Import a built-in module.
pub fn import(name: &str) -> Result<Value, Exception> {
    match name {
        "asyncio" => {
            let mut attrs = BTreeMap::new();
            for builtin in [Builtin::CreateTask, Builtin::Gather, Builtin::Run, Builtin::Sleep] {
                attrs.insert(builtin.name(), Value::Builtin(builtin));
            }
            attrs.insert(
                "CancelledError",
                Value::ExceptionType(ExceptionKind::CancelledError),
            );
            Ok(Value::Module(Rc::new(Module {
                name: "asyncio",
                attrs,
            })))
        }
        other => Err(Exception::new(
            ExceptionKind::ModuleNotFoundError,
            format!("No module named '{other}'"),
        )),
    }
}

// Arguments
// =========

struct Args<'a> {
    name: &'static str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    interp: &'a Interpreter,
}

impl Args<'_> {
    fn exactly(&self, n: usize) -> Result<(), Exception> {
        self.between(n, n)
    }

    fn between(&self, min: usize, max: usize) -> Result<(), Exception> {
        let given = self.args.len();
        if given < min {
            return Err(Exception::type_error(format!(
                "{}() takes at least {min} argument{} ({given} given)",
                self.name,
                if min == 1 { "" } else { "s" }
            )));
        }
        if given > max {
            return Err(Exception::type_error(format!(
                "{}() takes at most {max} argument{} ({given} given)",
                self.name,
                if max == 1 { "" } else { "s" }
            )));
        }
        Ok(())
    }

    fn no_kwargs(&self) -> Result<(), Exception> {
        self.only_kwargs(&[])
    }

    fn only_kwargs(&self, allowed: &[&str]) -> Result<(), Exception> {
        match self.kwargs.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
            Some((k, _)) => Err(Exception::type_error(format!(
                "{}() got an unexpected keyword argument '{k}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn int(&self, i: usize) -> Result<i64, Exception> {
        let value = &self.args[i];
        value.as_int().ok_or_else(|| {
            Exception::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        })
    }

    fn coroutine(&self, i: usize) -> Result<Rc<Coroutine>, Exception> {
        match &self.args[i] {
            Value::Coroutine(coro) => Ok(coro.clone()),
            other => Err(Exception::value_error(format!(
                "a coroutine was expected, got {}",
                other.repr()
            ))),
        }
    }
}

// Functions
// =========

pub fn call(
    interp: &Interpreter,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, Exception> {
    let a = Args {
        name: builtin.name(),
        args,
        kwargs,
        interp,
    };
    match builtin {
        Builtin::Print => print(a),
        Builtin::Len => {
            a.exactly(1)?;
            a.no_kwargs()?;
            len(&a.args[0])
        }
        Builtin::Str => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            Ok(a.args.first().map_or_else(|| Value::str(""), |v| Value::str(v.to_str())))
        }
        Builtin::Repr => {
            a.exactly(1)?;
            a.no_kwargs()?;
            Ok(Value::str(a.args[0].repr()))
        }
        Builtin::Bool => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            Ok(Value::Bool(a.args.first().is_some_and(Value::truthy)))
        }
        Builtin::Int => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            int(a.args.first().unwrap_or(&Value::Int(0)))
        }
        Builtin::Float => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            float(a.args.first().unwrap_or(&Value::Float(0.0)))
        }
        Builtin::Abs => {
            a.exactly(1)?;
            a.no_kwargs()?;
            match &a.args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => match other.as_int() {
                    Some(i) => Ok(Value::Int(i.abs())),
                    None => Err(Exception::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::Min => extreme(a, Ordering::Less),
        Builtin::Max => extreme(a, Ordering::Greater),
        Builtin::Sum => {
            a.between(1, 2)?;
            a.only_kwargs(&["start"])?;
            let mut total = a
                .args
                .get(1)
                .or_else(|| a.kwarg("start"))
                .cloned()
                .unwrap_or(Value::Int(0));
            for item in ops::iterate(&a.args[0])? {
                total = ops::binary(super::ast::BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Range => {
            a.between(1, 3)?;
            a.no_kwargs()?;
            let (start, stop, step) = match a.args.len() {
                1 => (0, a.int(0)?, 1),
                2 => (a.int(0)?, a.int(1)?, 1),
                _ => (a.int(0)?, a.int(1)?, a.int(2)?),
            };
            if step == 0 {
                return Err(Exception::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::List => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            match a.args.first() {
                Some(value) => Ok(Value::list(ops::iterate(value)?)),
                None => Ok(Value::list(vec![])),
            }
        }
        Builtin::Tuple => {
            a.between(0, 1)?;
            a.no_kwargs()?;
            match a.args.first() {
                Some(value) => Ok(Value::tuple(ops::iterate(value)?)),
                None => Ok(Value::tuple(vec![])),
            }
        }
        Builtin::Sorted => {
            a.exactly(1)?;
            a.only_kwargs(&["reverse"])?;
            let mut items = ops::iterate(&a.args[0])?;
            sort(&mut items)?;
            if a.kwarg("reverse").is_some_and(Value::truthy) {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        Builtin::Isinstance => {
            a.exactly(2)?;
            a.no_kwargs()?;
            isinstance(&a.args[0], &a.args[1])
        }
        Builtin::Interrupt => {
            a.exactly(0)?;
            a.no_kwargs()?;
            Err(Exception::new(ExceptionKind::KeyboardInterrupt, ""))
        }
        Builtin::Sleep => {
            a.between(1, 2)?;
            a.only_kwargs(&["result"])?;
            let delay = a.args[0].as_float().ok_or_else(|| {
                Exception::type_error(format!(
                    "'{}' object cannot be interpreted as a number",
                    a.args[0].type_name()
                ))
            })?;
            let result = a
                .args
                .get(1)
                .or_else(|| a.kwarg("result"))
                .cloned()
                .unwrap_or(Value::None);
            Ok(Value::Coroutine(Coroutine::new(
                "sleep",
                CoroutineBody::Sleep { delay, result },
            )))
        }
        Builtin::Gather => {
            a.no_kwargs()?;
            Ok(Value::Coroutine(Coroutine::new(
                "gather",
                CoroutineBody::Gather(a.args),
            )))
        }
        Builtin::Run => {
            a.exactly(1)?;
            a.only_kwargs(&["debug"])?;
            let coro = a.coroutine(0)?;
            a.interp.run_to_completion(coro)
        }
        Builtin::CreateTask => {
            a.exactly(1)?;
            a.only_kwargs(&["name"])?;
            let coro = a.coroutine(0)?;
            let name = a.kwarg("name").map(Value::to_str);
            a.interp.create_task(coro, name)
        }
    }
}

fn print(a: Args<'_>) -> Result<Value, Exception> {
    a.only_kwargs(&["sep", "end"])?;
    let text_kwarg = |key: &str, default: &str| match a.kwarg(key) {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Exception::type_error(format!(
            "{key} must be None or a string, not {}",
            other.type_name()
        ))),
    };
    let sep = text_kwarg("sep", " ")?;
    let end = text_kwarg("end", "\n")?;
    let mut line = a.args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
    line.push_str(&end);
    a.interp.write_output(&line);
    Ok(Value::None)
}

fn len(value: &Value) -> Result<Value, Exception> {
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(items) => items.borrow().len(),
        Value::Range { start, stop, step } => super::value::range_len(*start, *stop, *step) as usize,
        other => {
            return Err(Exception::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn int(value: &Value) -> Result<Value, Exception> {
    match value {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(Exception::new(
            ExceptionKind::OverflowError,
            format!("cannot convert float {} to integer", super::value::float_repr(*f)),
        )),
        Value::Str(s) => s.trim().replace('_', "").parse().map(Value::Int).map_err(|_| {
            Exception::value_error(format!(
                "invalid literal for int() with base 10: {}",
                value.repr()
            ))
        }),
        other => other.as_int().map(Value::Int).ok_or_else(|| {
            Exception::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn float(value: &Value) -> Result<Value, Exception> {
    match value {
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                _ => text.parse().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                Exception::value_error(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            })
        }
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            Exception::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn extreme(a: Args<'_>, keep: Ordering) -> Result<Value, Exception> {
    a.no_kwargs()?;
    let items = match a.args.len() {
        0 => {
            return Err(Exception::type_error(format!(
                "{} expected at least 1 argument, got 0",
                a.name
            )))
        }
        1 => ops::iterate(&a.args[0])?,
        _ => a.args.clone(),
    };
    let mut items = items.into_iter();
    let mut best = items.next().ok_or_else(|| {
        Exception::value_error(format!("{}() arg is an empty sequence", a.name))
    })?;
    for item in items {
        if ops::compare(&item, &best, if keep == Ordering::Less { "<" } else { ">" })? == keep {
            best = item;
        }
    }
    Ok(best)
}

fn sort(items: &mut [Value]) -> Result<(), Exception> {
    let mut error = None;
    items.sort_by(|a, b| match ops::compare(a, b, "<") {
        Ok(ordering) => ordering,
        Err(e) => {
            error.get_or_insert(e);
            Ordering::Equal
        }
    });
    error.map_or(Ok(()), Err)
}

fn isinstance(value: &Value, class: &Value) -> Result<Value, Exception> {
    let kinds = match class {
        Value::ExceptionType(kind) => vec![*kind],
        Value::Tuple(items) => items
            .iter()
            .map(|item| match item {
                Value::ExceptionType(kind) => Ok(*kind),
                other => Err(class_expected(other)),
            })
            .collect::<Result<_, _>>()?,
        other => return Err(class_expected(other)),
    };
    Ok(Value::Bool(match value {
        Value::Exception(exc) => kinds.iter().any(|k| exc.kind.is_subclass(*k)),
        _ => false,
    }))
}

fn class_expected(value: &Value) -> Exception {
    Exception::type_error(format!(
        "isinstance() arg 2 must be an exception type or tuple of exception types, not {}",
        value.type_name()
    ))
}

// Methods
// =======

const STR_METHODS: &[&str] = &[
    "endswith",
    "join",
    "lower",
    "replace",
    "split",
    "startswith",
    "strip",
    "upper",
];
const LIST_METHODS: &[&str] = &["append", "extend", "pop"];
const DICT_METHODS: &[&str] = &["get", "items", "keys", "values"];
const TASK_METHODS: &[&str] = &["cancel", "done", "result"];

/// Look up `value.name`.
pub fn attribute(value: &Value, name: &str) -> Result<Value, Exception> {
    let methods = match value {
        Value::Module(module) => {
            return module.attrs.get(name).cloned().ok_or_else(|| {
                Exception::new(
                    ExceptionKind::AttributeError,
                    format!("module '{}' has no attribute '{name}'", module.name),
                )
            })
        }
        Value::Exception(exc) if name == "args" => return Ok(Value::tuple(exc.args.clone())),
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Task(_) => TASK_METHODS,
        _ => &[],
    };
    match methods.iter().find(|m| **m == name) {
        Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: value.clone(),
            name: *method,
        }))),
        None => Err(Exception::new(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", value.type_name()),
        )),
    }
}

pub fn call_method(
    interp: &Interpreter,
    method: &BoundMethod,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, Exception> {
    let a = Args {
        name: method.name,
        args,
        kwargs,
        interp,
    };
    a.no_kwargs()?;
    let str_arg = |i: usize| match &a.args[i] {
        Value::Str(s) => Ok(s.clone()),
        other => Err(Exception::type_error(format!(
            "must be str, not {}",
            other.type_name()
        ))),
    };

    match (&method.receiver, method.name) {
        (Value::Str(s), "upper") => {
            a.exactly(0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        (Value::Str(s), "lower") => {
            a.exactly(0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        (Value::Str(s), "strip") => {
            a.between(0, 1)?;
            match a.args.first() {
                Some(Value::Str(chars)) => Ok(Value::str(s.trim_matches(|c| chars.contains(c)))),
                _ => Ok(Value::str(s.trim())),
            }
        }
        (Value::Str(s), "split") => {
            a.between(0, 1)?;
            let parts: Vec<Value> = match a.args.first() {
                Some(Value::Str(sep)) if sep.is_empty() => {
                    return Err(Exception::value_error("empty separator"))
                }
                Some(Value::Str(sep)) => s.split(&**sep).map(Value::str).collect(),
                _ => s.split_whitespace().map(Value::str).collect(),
            };
            Ok(Value::list(parts))
        }
        (Value::Str(s), "join") => {
            a.exactly(1)?;
            let parts = ops::iterate(&a.args[0])?
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Str(part) => Ok(part.to_string()),
                    other => Err(Exception::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::str(parts.join(&**s)))
        }
        (Value::Str(s), "startswith") => {
            a.exactly(1)?;
            Ok(Value::Bool(s.starts_with(&*str_arg(0)?)))
        }
        (Value::Str(s), "endswith") => {
            a.exactly(1)?;
            Ok(Value::Bool(s.ends_with(&*str_arg(0)?)))
        }
        (Value::Str(s), "replace") => {
            a.exactly(2)?;
            Ok(Value::str(s.replace(&*str_arg(0)?, &str_arg(1)?)))
        }
        (Value::List(items), "append") => {
            a.exactly(1)?;
            items.borrow_mut().push(a.args[0].clone());
            Ok(Value::None)
        }
        (Value::List(items), "extend") => {
            a.exactly(1)?;
            let extra = ops::iterate(&a.args[0])?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        (Value::List(items), "pop") => {
            a.between(0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(Exception::new(ExceptionKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = if a.args.is_empty() { -1 } else { a.int(0)? };
            let index = if index < 0 { index + len } else { index };
            if !(0..len).contains(&index) {
                return Err(Exception::new(ExceptionKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(index as usize))
        }
        (Value::Dict(items), "get") => {
            a.between(1, 2)?;
            let default = a.args.get(1).cloned().unwrap_or(Value::None);
            Ok(items
                .borrow()
                .iter()
                .find(|(k, _)| k.py_eq(&a.args[0]))
                .map_or(default, |(_, v)| v.clone()))
        }
        (Value::Dict(items), "keys") => {
            a.exactly(0)?;
            Ok(Value::list(items.borrow().iter().map(|(k, _)| k.clone()).collect()))
        }
        (Value::Dict(items), "values") => {
            a.exactly(0)?;
            Ok(Value::list(items.borrow().iter().map(|(_, v)| v.clone()).collect()))
        }
        (Value::Dict(items), "items") => {
            a.exactly(0)?;
            Ok(Value::list(
                items
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        (Value::Task(task), "done") => {
            a.exactly(0)?;
            Ok(Value::Bool(task.is_done()))
        }
        (Value::Task(task), "cancel") => {
            a.exactly(0)?;
            let handle = task.handle.borrow();
            match handle.as_ref() {
                Some(handle) if !handle.is_finished() => {
                    handle.abort();
                    Ok(Value::Bool(true))
                }
                _ => Ok(Value::Bool(false)),
            }
        }
        (Value::Task(task), "result") => {
            a.exactly(0)?;
            match task.result.borrow().as_ref() {
                Some(result) => result.clone(),
                None => Err(Exception::new(
                    ExceptionKind::RuntimeError,
                    "Result is not set.",
                )),
            }
        }
        (receiver, name) => Err(Exception::new(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", receiver.type_name()),
        )),
    }
}
