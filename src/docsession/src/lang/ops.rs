//! Operators on runtime values.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::exception::{Exception, ExceptionKind};
use super::value::{range_len, Value};

/// Longest sequence `*` may build.
const MAX_REPEAT_LEN: usize = 1 << 28;

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, Exception> {
    use Value::{Bytes, List, Str, Tuple};

    if let (Some(a), Some(b)) = (int_operand(left), int_operand(right)) {
        return int_binary(op, a, b);
    }
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return float_binary(op, a, b);
    }

    let result = match (op, left, right) {
        (BinOp::Add, Str(a), Str(b)) => Some(Value::str(format!("{a}{b}"))),
        (BinOp::Add, Bytes(a), Bytes(b)) => Some(Bytes(Rc::from([&a[..], &b[..]].concat()))),
        (BinOp::Add, List(a), List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Value::list(items))
        }
        (BinOp::Add, Tuple(a), Tuple(b)) => Some(Value::tuple([&a[..], &b[..]].concat())),
        (BinOp::Mul, Str(s), n) | (BinOp::Mul, n, Str(s)) if n.as_int().is_some() => {
            let n = repeat_count(n, s.len(), "string")?;
            Some(Value::str(s.repeat(n)))
        }
        (BinOp::Mul, List(items), n) | (BinOp::Mul, n, List(items)) if n.as_int().is_some() => {
            let items = items.borrow();
            let n = repeat_count(n, items.len(), "list")?;
            Some(Value::list(
                std::iter::repeat(items.iter().cloned()).take(n).flatten().collect(),
            ))
        }
        _ => None,
    };

    result.ok_or_else(|| {
        Exception::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    })
}

fn repeat_count(count: &Value, len: usize, what: &str) -> Result<usize, Exception> {
    let count = usize::try_from(count.as_int().unwrap_or(0).max(0)).map_err(|_| overflow())?;
    match len.checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err(Exception::new(
            ExceptionKind::OverflowError,
            format!("repeated {what} is too long"),
        )),
    }
}

fn int_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Float(_) => None,
        other => other.as_int(),
    }
}

fn overflow() -> Exception {
    Exception::new(ExceptionKind::OverflowError, "integer overflow")
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, Exception> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(Exception::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(Exception::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Exception::zero_division("integer modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(value))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value, Exception> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Exception::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Exception::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Exception::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(value))
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, Exception> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand {
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                None => Err(bad_unary("-", other)),
            },
        },
        UnaryOp::Pos => match operand {
            Value::Float(f) => Ok(Value::Float(*f)),
            other => other.as_int().map(Value::Int).ok_or_else(|| bad_unary("+", other)),
        },
    }
}

fn bad_unary(symbol: &str, operand: &Value) -> Exception {
    Exception::type_error(format!(
        "bad operand type for unary {symbol}: '{}'",
        operand.type_name()
    ))
}

/// Ordering used by `<`, `sorted`, `min` and `max`.
pub fn compare(left: &Value, right: &Value, symbol: &str) -> Result<Ordering, Exception> {
    use Value::{Bytes, List, Str, Tuple};

    let ordering = match (left, right) {
        (Str(a), Str(b)) => Some(a.cmp(b)),
        (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
        (List(a), List(b)) => return compare_seq(&a.borrow(), &b.borrow(), symbol),
        (Tuple(a), Tuple(b)) => return compare_seq(a, b, symbol),
        (a, b) => match (int_operand(a), int_operand(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        },
    };

    ordering.ok_or_else(|| {
        Exception::type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
    })
}

fn compare_seq(a: &[Value], b: &[Value], symbol: &str) -> Result<Ordering, Exception> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return compare(x, y, symbol);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn compare_op(op: CmpOp, left: &Value, right: &Value) -> Result<bool, Exception> {
    Ok(match op {
        CmpOp::Eq => left.py_eq(right),
        CmpOp::NotEq => !left.py_eq(right),
        CmpOp::Lt => compare(left, right, "<")? == Ordering::Less,
        CmpOp::LtE => compare(left, right, "<=")? != Ordering::Greater,
        CmpOp::Gt => compare(left, right, ">")? == Ordering::Greater,
        CmpOp::GtE => compare(left, right, ">=")? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => left.py_is(right),
        CmpOp::IsNot => !left.py_is(right),
    })
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, Exception> {
    match (container, item) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(&**needle)),
        (Value::Str(_), other) => Err(Exception::type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (Value::Dict(items), key) => Ok(items.borrow().iter().any(|(k, _)| k.py_eq(key))),
        (Value::Range { start, stop, step }, value) => Ok(match value.as_int() {
            Some(i) => {
                let len = range_len(*start, *stop, *step);
                let offset = i - start;
                offset % step == 0 && (0..len).contains(&(offset / step))
            }
            None => false,
        }),
        (container, item) => Ok(iterate(container)?.iter().any(|v| v.py_eq(item))),
    }
}

/// Materialize the items of an iterable value.
pub fn iterate(value: &Value) -> Result<Vec<Value>, Exception> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|&byte| Value::Int(byte as i64)).collect()),
        Value::Dict(items) => Ok(items.borrow().iter().map(|(k, _)| k.clone()).collect()),
        Value::Range { start, stop, step } => Ok((0..range_len(*start, *stop, *step))
            .map(|i| Value::Int(start + i * step))
            .collect()),
        other => Err(Exception::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn slice_bounds(lower: &Value, upper: &Value, len: usize) -> Result<(usize, usize), Exception> {
    let clamp = |value: &Value, default: usize| -> Result<usize, Exception> {
        match value {
            Value::None => Ok(default),
            other => {
                let i = other.as_int().ok_or_else(|| {
                    Exception::type_error("slice indices must be integers or None")
                })?;
                let len = len as i64;
                let i = if i < 0 { (i + len).max(0) } else { i.min(len) };
                Ok(i as usize)
            }
        }
    };
    let start = clamp(lower, 0)?;
    let stop = clamp(upper, len)?;
    Ok((start, stop.max(start)))
}

/// `value[index]`; slices arrive as a `(lower, upper)` pair.
pub fn subscript(value: &Value, index: &Value, slice: Option<(&Value, &Value)>) -> Result<Value, Exception> {
    if let Some((lower, upper)) = slice {
        return match value {
            Value::List(items) => {
                let items = items.borrow();
                let (start, stop) = slice_bounds(lower, upper, items.len())?;
                Ok(Value::list(items[start..stop].to_vec()))
            }
            Value::Tuple(items) => {
                let (start, stop) = slice_bounds(lower, upper, items.len())?;
                Ok(Value::tuple(items[start..stop].to_vec()))
            }
            Value::Str(s) => {
                let chars = s.chars().collect::<Vec<_>>();
                let (start, stop) = slice_bounds(lower, upper, chars.len())?;
                Ok(Value::str(chars[start..stop].iter().collect::<String>()))
            }
            other => Err(not_subscriptable(other)),
        };
    }

    let position = |len: usize, kind: &str| -> Result<usize, Exception> {
        let i = index.as_int().ok_or_else(|| {
            Exception::type_error(format!(
                "{kind} indices must be integers or slices, not {}",
                index.type_name()
            ))
        })?;
        normalize_index(i, len).ok_or_else(|| {
            Exception::new(ExceptionKind::IndexError, format!("{kind} index out of range"))
        })
    };

    match value {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[position(items.len(), "list")?].clone())
        }
        Value::Tuple(items) => Ok(items[position(items.len(), "tuple")?].clone()),
        Value::Str(s) => {
            let chars = s.chars().collect::<Vec<_>>();
            Ok(Value::str(chars[position(chars.len(), "string")?].to_string()))
        }
        Value::Bytes(b) => Ok(Value::Int(b[position(b.len(), "index")?] as i64)),
        Value::Range { start, stop, step } => {
            let len = range_len(*start, *stop, *step) as usize;
            Ok(Value::Int(start + position(len, "range object")? as i64 * step))
        }
        Value::Dict(items) => items
            .borrow()
            .iter()
            .find(|(k, _)| k.py_eq(index))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Exception::with_args(ExceptionKind::KeyError, vec![index.clone()])),
        other => Err(not_subscriptable(other)),
    }
}

fn not_subscriptable(value: &Value) -> Exception {
    Exception::type_error(format!(
        "'{}' object is not subscriptable",
        value.type_name()
    ))
}

pub fn set_item(container: &Value, index: &Value, item: Value) -> Result<(), Exception> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = index
                .as_int()
                .and_then(|i| normalize_index(i, items.len()))
                .ok_or_else(|| {
                    Exception::new(ExceptionKind::IndexError, "list assignment index out of range")
                })?;
            items[i] = item;
            Ok(())
        }
        Value::Dict(items) => {
            let mut items = items.borrow_mut();
            match items.iter_mut().find(|(k, _)| k.py_eq(index)) {
                Some((_, v)) => *v = item,
                None => items.push((index.clone(), item)),
            }
            Ok(())
        }
        other => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn del_item(container: &Value, index: &Value) -> Result<(), Exception> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = index
                .as_int()
                .and_then(|i| normalize_index(i, items.len()))
                .ok_or_else(|| {
                    Exception::new(ExceptionKind::IndexError, "list assignment index out of range")
                })?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(items) => {
            let mut items = items.borrow_mut();
            let before = items.len();
            items.retain(|(k, _)| !k.py_eq(index));
            if items.len() == before {
                return Err(Exception::with_args(ExceptionKind::KeyError, vec![index.clone()]));
            }
            Ok(())
        }
        other => Err(Exception::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic() {
        let eval = |op, a, b| binary(op, &Value::Int(a), &Value::Int(b)).expect("value").repr();
        assert_eq!(eval(BinOp::Add, 4, 4), "8");
        assert_eq!(eval(BinOp::Div, 7, 2), "3.5");
        assert_eq!(eval(BinOp::FloorDiv, -7, 2), "-4");
        assert_eq!(eval(BinOp::Mod, -7, 2), "1");
        assert_eq!(eval(BinOp::Pow, 2, 10), "1024");
        assert_eq!(eval(BinOp::Pow, 2, -1), "0.5");
    }

    #[test]
    fn division_by_zero() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).expect_err("error");
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn mixed_types() {
        let value = binary(BinOp::Add, &Value::Int(1), &Value::Float(0.5)).expect("value");
        assert_eq!(value.repr(), "1.5");
        let err = binary(BinOp::Add, &Value::Int(1), &Value::str("a")).expect_err("error");
        assert_eq!(
            err.message(),
            "unsupported operand type(s) for +: 'int' and 'str'"
        );
        let value = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(2)).expect("value");
        assert_eq!(value.repr(), "'abab'");
    }

    #[test]
    fn oversized_repetition() {
        let err = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(10_i64.pow(15))).expect_err("error");
        assert_eq!(err.to_string(), "OverflowError: repeated string is too long");
        let list = Value::list(vec![Value::Int(0)]);
        let err = binary(BinOp::Mul, &list, &Value::Int(10_i64.pow(15))).expect_err("error");
        assert_eq!(err.to_string(), "OverflowError: repeated list is too long");

        let value = binary(BinOp::Mul, &Value::Int(-2), &Value::str("ab")).expect("value");
        assert_eq!(value.repr(), "''");
        let value = binary(BinOp::Mul, &Value::Int(0), &Value::str("")).expect("value");
        assert_eq!(value.repr(), "''");
    }

    #[test]
    fn ordering_across_types() {
        assert_eq!(compare(&Value::Int(1), &Value::Float(1.5), "<").expect("ordering"), Ordering::Less);
        assert_eq!(compare(&Value::str("b"), &Value::str("a"), "<").expect("ordering"), Ordering::Greater);
        let err = compare(&Value::Int(1), &Value::str("a"), "<").expect_err("error");
        assert_eq!(
            err.to_string(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
    }

    #[test]
    fn subscripts() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(subscript(&list, &Value::Int(-1), None).expect("item").repr(), "3");
        let sliced = subscript(&list, &Value::None, Some((&Value::Int(1), &Value::None)));
        assert_eq!(sliced.expect("slice").repr(), "[2, 3]");
        let err = subscript(&list, &Value::Int(3), None).expect_err("error");
        assert_eq!(err.to_string(), "IndexError: list index out of range");

        let dict = Value::dict(vec![]);
        let err = subscript(&dict, &Value::str("k"), None).expect_err("error");
        assert_eq!(err.to_string(), "KeyError: 'k'");
    }

    #[test]
    fn membership() {
        let range = Value::Range { start: 0, stop: 10, step: 2 };
        assert!(contains(&range, &Value::Int(4)).expect("bool"));
        assert!(!contains(&range, &Value::Int(5)).expect("bool"));
        assert!(contains(&Value::str("hello"), &Value::str("ell")).expect("bool"));
    }
}
