//! The session language: a small Python-flavoured language in which the
//! examples of a document are written.
//!
//! Statements are compiled with [`compile`] and run by an [`Interpreter`]
//! against a [`Namespace`]. Code that awaits at the top level compiles to a
//! coroutine that has to be driven by an [`EventLoop`].

mod ast;
mod builtins;
mod event_loop;
mod exception;
mod interp;
mod lexer;
mod ops;
mod parser;
mod value;

pub use event_loop::EventLoop;
pub use exception::{Exception, ExceptionKind, SyntaxLocation};
pub use interp::{compile, Code, CompileFlags, Interpreter, Mode, VERSION};
pub use value::{Namespace, Value};
