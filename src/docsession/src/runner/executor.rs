//! Strategies for executing the compiled statement of an example.

use std::io;
use std::rc::Rc;

use tracing::trace;

use crate::lang::{Code, CompileFlags, EventLoop, Exception, Interpreter, Namespace};

/// How the runner executes statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Statements run to completion when evaluated. Top-level `await` is a
    /// syntax error.
    Immediate,
    /// Statements that await at the top level are driven on an event loop
    /// owned by the running test case.
    #[default]
    Suspending,
}

impl ExecutionMode {
    pub fn executor(self) -> Box<dyn StatementExecutor> {
        match self {
            ExecutionMode::Immediate => Box::new(ImmediateExecutor),
            ExecutionMode::Suspending => Box::new(SuspendingExecutor::default()),
        }
    }
}

/// Executes the statements of one test case at a time.
///
/// The runner calls [`begin`](Self::begin) before the first example of a
/// test case and [`end`](Self::end) after the last one, also when the run is
/// aborted.
pub trait StatementExecutor {
    /// Flags used to compile example statements.
    fn compile_flags(&self) -> CompileFlags;

    #[allow(unused)]
    fn begin(&mut self, interp: &Interpreter) -> io::Result<()> {
        Ok(())
    }

    fn execute(&mut self, interp: &Interpreter, code: &Rc<Code>, globs: &Namespace) -> Result<(), Exception>;

    fn end(&mut self) {}
}

/// Runs every statement to completion without a scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateExecutor;

impl StatementExecutor for ImmediateExecutor {
    fn compile_flags(&self) -> CompileFlags {
        CompileFlags::empty()
    }

    fn execute(&mut self, interp: &Interpreter, code: &Rc<Code>, globs: &Namespace) -> Result<(), Exception> {
        interp.eval(code, globs).map(drop)
    }
}

/// Drives statements that await on an event loop that lives as long as the
/// running test case.
///
/// Tasks created by one example keep running while later examples of the
/// same test case await. When the test case ends the pending tasks are
/// cancelled and the loop is closed.
#[derive(Default)]
pub struct SuspendingExecutor {
    driver: Option<EventLoop>,
}

impl SuspendingExecutor {
    /// Whether an event loop is currently open.
    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }
}

impl StatementExecutor for SuspendingExecutor {
    fn compile_flags(&self) -> CompileFlags {
        CompileFlags::ALLOW_TOP_LEVEL_AWAIT
    }

    fn begin(&mut self, interp: &Interpreter) -> io::Result<()> {
        self.end();
        self.driver = Some(EventLoop::new(interp.clone())?);
        Ok(())
    }

    fn execute(&mut self, interp: &Interpreter, code: &Rc<Code>, globs: &Namespace) -> Result<(), Exception> {
        let value = interp.eval(code, globs)?;
        if !code.is_coroutine {
            return Ok(());
        }
        if self.driver.is_none() {
            let driver = EventLoop::new(interp.clone()).map_err(|e| Exception::runtime_error(e.to_string()))?;
            self.driver = Some(driver);
        }
        let Some(driver) = &self.driver else {
            return Ok(());
        };
        trace!(filename = code.filename, "driving coroutine");
        driver.run_until_complete(interp.await_value(value)).map(drop)
    }

    fn end(&mut self) {
        if let Some(driver) = self.driver.take() {
            trace!(pending = driver.pending(), "closing driver");
            driver.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{compile, Mode, Value};

    fn run(executor: &mut dyn StatementExecutor, interp: &Interpreter, globs: &Namespace, source: &str) -> Result<(), Exception> {
        let code = compile(source, "<test>", Mode::Single, executor.compile_flags())?;
        executor.execute(interp, &code, globs)
    }

    #[test]
    fn immediate_rejects_top_level_await() {
        let interp = Interpreter::new();
        let globs = Namespace::new();
        let mut executor = ImmediateExecutor;
        run(&mut executor, &interp, &globs, "x = 1 + 1\n").unwrap();
        assert_eq!(globs.get("x").map(|v| v.repr()), Some("2".into()));

        let err = run(&mut executor, &interp, &globs, "import asyncio\n")
            .and_then(|()| run(&mut executor, &interp, &globs, "await asyncio.sleep(0)\n"))
            .unwrap_err();
        assert_eq!(err.kind.name(), "SyntaxError");
    }

    #[test]
    fn suspending_drives_coroutines() {
        let interp = Interpreter::new();
        let globs = Namespace::new();
        let mut executor = SuspendingExecutor::default();
        executor.begin(&interp).unwrap();
        assert!(executor.is_active());

        run(&mut executor, &interp, &globs, "import asyncio\n").unwrap();
        run(&mut executor, &interp, &globs, "async def f():\n    await asyncio.sleep(0)\n    return 42\n").unwrap();
        run(&mut executor, &interp, &globs, "x = await f()\n").unwrap();
        assert!(matches!(globs.get("x"), Some(Value::Int(42))));

        run(&mut executor, &interp, &globs, "await f()\n").unwrap();
        assert_eq!(interp.take_output(), "42\n");

        executor.end();
        assert!(!executor.is_active());
    }

    #[test]
    fn tasks_survive_between_statements() {
        let interp = Interpreter::new();
        let globs = Namespace::new();
        let mut executor = ExecutionMode::Suspending.executor();
        executor.begin(&interp).unwrap();

        run(&mut *executor, &interp, &globs, "import asyncio\n").unwrap();
        run(&mut *executor, &interp, &globs, "done = []\n").unwrap();
        run(
            &mut *executor,
            &interp,
            &globs,
            "async def work():\n    await asyncio.sleep(0)\n    done.append(1)\n",
        )
        .unwrap();
        run(
            &mut *executor,
            &interp,
            &globs,
            "async def start():\n    return asyncio.create_task(work())\n",
        )
        .unwrap();
        run(&mut *executor, &interp, &globs, "task = await start()\n").unwrap();
        assert!(run(&mut *executor, &interp, &globs, "asyncio.create_task(work())\n").is_err());
        run(&mut *executor, &interp, &globs, "await asyncio.sleep(0.01)\n").unwrap();
        run(&mut *executor, &interp, &globs, "print(done)\n").unwrap();
        assert_eq!(interp.take_output(), "[1]\n");
        executor.end();
    }
}
