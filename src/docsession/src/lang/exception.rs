//! Exceptions raised by session statements.
//!
//! Exceptions are ordinary values of the session language. They never leave
//! the interpreter as Rust errors: the runner inspects them and decides how
//! to classify the example that raised them.

use std::fmt::{self, Display};
use std::rc::Rc;

use super::value::Value;

/// The built-in exception hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    BaseException,
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    CancelledError,
    ImportError,
    IndentationError,
    IndexError,
    KeyError,
    KeyboardInterrupt,
    LookupError,
    ModuleNotFoundError,
    NameError,
    NotImplementedError,
    OverflowError,
    RuntimeError,
    StopIteration,
    SyntaxError,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 23] = [
        Self::BaseException,
        Self::Exception,
        Self::ArithmeticError,
        Self::AssertionError,
        Self::AttributeError,
        Self::CancelledError,
        Self::ImportError,
        Self::IndentationError,
        Self::IndexError,
        Self::KeyError,
        Self::KeyboardInterrupt,
        Self::LookupError,
        Self::ModuleNotFoundError,
        Self::NameError,
        Self::NotImplementedError,
        Self::OverflowError,
        Self::RuntimeError,
        Self::StopIteration,
        Self::SyntaxError,
        Self::TypeError,
        Self::UnboundLocalError,
        Self::ValueError,
        Self::ZeroDivisionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::BaseException => "BaseException",
            Self::Exception => "Exception",
            Self::ArithmeticError => "ArithmeticError",
            Self::AssertionError => "AssertionError",
            Self::AttributeError => "AttributeError",
            Self::CancelledError => "CancelledError",
            Self::ImportError => "ImportError",
            Self::IndentationError => "IndentationError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::KeyboardInterrupt => "KeyboardInterrupt",
            Self::LookupError => "LookupError",
            Self::ModuleNotFoundError => "ModuleNotFoundError",
            Self::NameError => "NameError",
            Self::NotImplementedError => "NotImplementedError",
            Self::OverflowError => "OverflowError",
            Self::RuntimeError => "RuntimeError",
            Self::StopIteration => "StopIteration",
            Self::SyntaxError => "SyntaxError",
            Self::TypeError => "TypeError",
            Self::UnboundLocalError => "UnboundLocalError",
            Self::ValueError => "ValueError",
            Self::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    /// The qualified name used when formatting, e.g. `asyncio.CancelledError`.
    pub fn qualname(self) -> &'static str {
        match self {
            Self::CancelledError => "asyncio.CancelledError",
            other => other.name(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::KeyboardInterrupt | Self::CancelledError => {
                Some(Self::BaseException)
            }
            Self::ZeroDivisionError | Self::OverflowError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::ModuleNotFoundError => Some(Self::ImportError),
            Self::IndentationError => Some(Self::SyntaxError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::NotImplementedError => Some(Self::RuntimeError),
            _ => Some(Self::Exception),
        }
    }

    /// Returns `true` iff `self` is `other` or derives from it.
    pub fn is_subclass(self, other: Self) -> bool {
        let mut kind = Some(self);
        while let Some(k) = kind {
            if k == other {
                return true;
            }
            kind = k.parent();
        }
        false
    }
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Location details carried by syntax errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxLocation {
    pub filename: String,
    pub lineno: usize,
    /// 1-based column of the offending token.
    pub offset: usize,
    pub text: String,
}

/// A raised exception instance.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub args: Vec<Value>,
    pub location: Option<SyntaxLocation>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            vec![]
        } else {
            vec![Value::str(message)]
        };
        Self {
            kind,
            args,
            location: None,
        }
    }

    pub fn with_args(kind: ExceptionKind, args: Vec<Value>) -> Self {
        Self {
            kind,
            args,
            location: None,
        }
    }

    pub fn syntax(kind: ExceptionKind, message: impl Into<String>, location: SyntaxLocation) -> Self {
        Self {
            location: Some(location),
            ..Self::new(kind, message)
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(
            ExceptionKind::NameError,
            format!("name '{name}' is not defined"),
        )
    }

    pub fn zero_division(message: &str) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn is_interrupt(&self) -> bool {
        self.kind == ExceptionKind::KeyboardInterrupt
    }

    /// The `str()` of the exception.
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            // KeyError quotes its single argument.
            [arg] if self.kind == ExceptionKind::KeyError => arg.repr(),
            [arg] => arg.to_str(),
            args => Value::Tuple(Rc::from(args.to_vec())).repr(),
        }
    }

    /// Format the exception without a stack, one line per element.
    ///
    /// Syntax errors are preceded by `File`, source and caret lines.
    pub fn format_exception_only(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(loc) = &self.location {
            lines.push(format!("  File \"{}\", line {}\n", loc.filename, loc.lineno));
            let text = loc.text.trim_end();
            let stripped = text.trim_start();
            if !stripped.is_empty() {
                lines.push(format!("    {stripped}\n"));
                let lead = text.chars().count() - stripped.chars().count();
                let caret = loc.offset.saturating_sub(1).saturating_sub(lead);
                lines.push(format!("    {}^\n", " ".repeat(caret)));
            }
        }
        let message = self.message();
        if message.is_empty() {
            lines.push(format!("{}\n", self.kind.qualname()));
        } else {
            lines.push(format!("{}: {}\n", self.kind.qualname(), message));
        }
        lines
    }

    /// Format a full traceback as printed for unexpected exceptions.
    pub fn format_traceback(&self, filename: &str) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        if self.location.is_none() {
            out.push_str(&format!("  File \"{filename}\", line 1, in <module>\n"));
        }
        out.extend(self.format_exception_only());
        out
    }

    pub fn repr(&self) -> String {
        let args = self.args.iter().map(Value::repr).collect::<Vec<_>>();
        format!("{}({})", self.kind.name(), args.join(", "))
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy() {
        use ExceptionKind::*;
        assert!(ZeroDivisionError.is_subclass(ArithmeticError));
        assert!(ZeroDivisionError.is_subclass(Exception));
        assert!(KeyError.is_subclass(LookupError));
        assert!(!KeyboardInterrupt.is_subclass(Exception));
        assert!(KeyboardInterrupt.is_subclass(BaseException));
        assert!(!ValueError.is_subclass(TypeError));
    }

    #[test]
    fn format_plain() {
        let exc = Exception::value_error("boom");
        assert_eq!(exc.format_exception_only(), vec!["ValueError: boom\n"]);

        let exc = Exception::new(ExceptionKind::StopIteration, "");
        assert_eq!(exc.format_exception_only(), vec!["StopIteration\n"]);

        let exc = Exception::with_args(ExceptionKind::KeyError, vec![Value::str("k")]);
        assert_eq!(exc.format_exception_only(), vec!["KeyError: 'k'\n"]);
    }

    #[test]
    fn format_syntax_error() {
        let loc = SyntaxLocation {
            filename: String::from("<doctest t[0]>"),
            lineno: 1,
            offset: 5,
            text: String::from("1 + \n"),
        };
        let exc = Exception::syntax(ExceptionKind::SyntaxError, "invalid syntax", loc);
        assert_eq!(
            exc.format_exception_only(),
            vec![
                "  File \"<doctest t[0]>\", line 1\n",
                "    1 +\n",
                "        ^\n",
                "SyntaxError: invalid syntax\n",
            ]
        );
    }
}
