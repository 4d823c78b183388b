//! Execution of test cases.
//!
//! A [`Runner`] executes the examples of a [`TestCase`] in order against the
//! namespace of the test case, compares their output with the expected
//! output and reports the outcome of each example.

pub mod executor;

use std::fmt::{self, Display};
use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, trace};

pub use executor::{ExecutionMode, ImmediateExecutor, StatementExecutor, SuspendingExecutor};

use crate::checker::{indent, strip_exception_details, OutputChecker};
use crate::core::{Example, TestCase};
use crate::lang::{compile, Exception, ExceptionKind, Interpreter, Mode};
use crate::options::OptionFlags;
use crate::report::{Aggregator, TestResults, DIVIDER};

// Configuration
// =============

/// What the runner does with failing examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Failures are written to the output and counted.
    #[default]
    Normal,
    /// The first failure aborts the run and is returned as an error.
    Debug,
    /// Failures are kept in a list for the caller. Without
    /// `continue_on_failure` the first one aborts the run.
    Collect { continue_on_failure: bool },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerConfig {
    /// Options applied to every example before its own option deltas.
    pub optionflags: OptionFlags,
    /// Report every example, not only the failing ones.
    pub verbose: bool,
    pub mode: RunMode,
    pub execution: ExecutionMode,
}

impl RunnerConfig {
    pub fn new(optionflags: OptionFlags) -> Self {
        Self {
            optionflags,
            ..Self::default()
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }
}

// Failures
// ========

/// Where a failing example lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub test: String,
    pub filename: String,
    pub line: usize,
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File \"{}\", line {}, in {}", self.filename, self.line, self.test)
    }
}

#[derive(Error, Debug)]
pub enum Failure {
    #[error("interrupted while running {test}")]
    Interrupted { test: String },
    #[error("{location}: example failed: {}", example.source.trim_end())]
    DocTest {
        location: Location,
        example: Example,
        got: String,
        flags: OptionFlags,
    },
    #[error("{location}: unexpected exception: {exception}")]
    UnexpectedException {
        location: Location,
        example: Example,
        exception: Exception,
        traceback: String,
    },
    #[error("cannot evaluate the skip condition {expression:?} of {test}: {exception}")]
    Condition {
        test: String,
        expression: String,
        exception: Exception,
    },
    #[error("i/o error while running tests: {0}")]
    Io(#[from] io::Error),
}

impl Failure {
    /// The report of a failing example, as written in normal runs.
    pub fn report(&self) -> Option<String> {
        match self {
            Failure::DocTest {
                location,
                example,
                got,
                flags,
            } => {
                let diff = OutputChecker::new().output_difference(&example.want, got, *flags);
                Some(format!("{}{diff}", failure_header(location, example)))
            }
            Failure::UnexpectedException {
                location,
                example,
                traceback,
                ..
            } => Some(format!(
                "{}Exception raised:\n{}",
                failure_header(location, example),
                indent(traceback)
            )),
            _ => None,
        }
    }

    /// Whether the failure aborts the run regardless of the run mode.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Failure::Interrupted { .. })
    }
}

fn failure_header(location: &Location, example: &Example) -> String {
    format!("{DIVIDER}\n{location}\nFailed example:\n{}", indent(&example.source))
}

// Runner
// ======

enum Outcome {
    Success,
    Failure,
    Boom(Exception),
}

/// Runs test cases and keeps their results per test case name.
pub struct Runner {
    config: RunnerConfig,
    checker: OutputChecker,
    executor: Box<dyn StatementExecutor>,
    interp: Interpreter,
    stats: Aggregator,
    failures: Vec<Failure>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_executor(config, config.execution.executor())
    }

    pub fn with_executor(config: RunnerConfig, executor: Box<dyn StatementExecutor>) -> Self {
        Self {
            config,
            checker: OutputChecker::new(),
            executor,
            interp: Interpreter::new(),
            stats: Aggregator::new(),
            failures: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Results of all test cases run so far.
    pub fn stats(&self) -> &Aggregator {
        &self.stats
    }

    /// Failures collected in [`RunMode::Collect`].
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<Failure> {
        std::mem::take(&mut self.failures)
    }

    pub fn summarize(&self, out: &mut dyn Write, verbose: bool) -> io::Result<TestResults> {
        self.stats.summarize(out, verbose)
    }

    /// Run the examples of `test`, writing reports to `out`.
    ///
    /// The namespace of `test` is shared by all of its examples and cleared
    /// afterwards when `clear_globs` is set. It is kept when the run ends
    /// with an example failure, so that the caller can inspect it.
    pub fn run(&mut self, test: &mut TestCase, out: &mut dyn Write, clear_globs: bool) -> Result<TestResults, Failure> {
        debug!(test = test.name, examples = test.examples.len(), "run");
        let result = match self.executor.begin(&self.interp) {
            Ok(()) => self.run_examples(test, out),
            Err(err) => Err(err.into()),
        };
        self.executor.end();
        self.interp.take_output();

        let keep = matches!(
            result,
            Err(Failure::DocTest { .. } | Failure::UnexpectedException { .. })
        );
        if clear_globs && !keep {
            test.globs.clear();
        }
        let results = result?;
        self.stats.record(&test.name, results);
        Ok(results)
    }

    fn run_examples(&mut self, test: &TestCase, out: &mut dyn Write) -> Result<TestResults, Failure> {
        let mut results = TestResults::default();
        for (n, example) in test.examples.iter().enumerate() {
            let flags = example.options.apply(self.config.optionflags);
            let quiet = flags.contains(OptionFlags::REPORT_ONLY_FIRST_FAILURE) && results.failed > 0;

            if flags.contains(OptionFlags::SKIP) {
                results.skipped += 1;
                if !quiet {
                    self.report_start(out, example)?;
                    self.report_skip(out)?;
                }
                continue;
            }

            results.attempted += 1;
            if !quiet {
                self.report_start(out, example)?;
            }

            let filename = format!("<doctest {}[{n}]>", test.name);
            let executed = compile(&example.source, &filename, Mode::Single, self.executor.compile_flags())
                .and_then(|code| self.executor.execute(&self.interp, &code, &test.globs));
            let mut got = self.interp.take_output();

            let outcome = match executed {
                Ok(()) if self.checker.check_output(&example.want, &got, flags) => Outcome::Success,
                Ok(()) => Outcome::Failure,
                Err(exc) if exc.is_interrupt() => {
                    debug!(test = test.name, example = n, "interrupted");
                    return Err(Failure::Interrupted {
                        test: test.name.clone(),
                    });
                }
                Err(exc) => {
                    if !quiet {
                        got.push_str(&exc.format_traceback(&filename));
                    }
                    self.classify_exception(example, exc, flags)
                }
            };
            trace!(test = test.name, example = n, failed = !matches!(outcome, Outcome::Success), "example");

            let location = Location {
                test: test.name.clone(),
                filename: test.filename.clone(),
                line: test.example_line(example),
            };
            match outcome {
                Outcome::Success => {
                    if !quiet {
                        self.report_success(out)?;
                    }
                }
                Outcome::Failure => {
                    if !quiet {
                        self.report_failure(
                            out,
                            Failure::DocTest {
                                location,
                                example: example.clone(),
                                got,
                                flags,
                            },
                        )?;
                    }
                    results.failed += 1;
                }
                Outcome::Boom(exception) => {
                    if !quiet {
                        let traceback = exception.format_traceback(&filename);
                        self.report_failure(
                            out,
                            Failure::UnexpectedException {
                                location,
                                example: example.clone(),
                                exception,
                                traceback,
                            },
                        )?;
                    }
                    results.failed += 1;
                }
            }

            if results.failed > 0 && flags.contains(OptionFlags::FAIL_FAST) {
                break;
            }
        }
        Ok(results)
    }

    fn classify_exception(&self, example: &Example, exc: Exception, flags: OptionFlags) -> Outcome {
        let Some(want) = &example.exc_msg else {
            return Outcome::Boom(exc);
        };
        let mut lines = exc.format_exception_only();
        if exc.kind.is_subclass(ExceptionKind::SyntaxError) {
            let prefix = format!("{}:", exc.kind.qualname());
            if let Some(start) = lines.iter().position(|line| line.starts_with(&prefix)) {
                lines.drain(..start);
            }
        }
        let exc_msg = lines.concat();

        if self.checker.check_output(want, &exc_msg, flags) {
            return Outcome::Success;
        }
        if flags.contains(OptionFlags::IGNORE_EXCEPTION_DETAIL)
            && self.checker.check_output(
                strip_exception_details(want),
                strip_exception_details(&exc_msg),
                flags,
            )
        {
            return Outcome::Success;
        }
        Outcome::Failure
    }

    // Notifications
    // =============

    fn report_start(&self, out: &mut dyn Write, example: &Example) -> io::Result<()> {
        if !self.config.verbose {
            return Ok(());
        }
        write!(out, "Trying:\n{}", indent(&example.source))?;
        if example.want.is_empty() {
            writeln!(out, "Expecting nothing")
        } else {
            write!(out, "Expecting:\n{}", indent(&example.want))
        }
    }

    fn report_skip(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.config.verbose {
            writeln!(out, "skipped")?;
        }
        Ok(())
    }

    fn report_success(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.config.verbose {
            writeln!(out, "ok")?;
        }
        Ok(())
    }

    fn report_failure(&mut self, out: &mut dyn Write, failure: Failure) -> Result<(), Failure> {
        match self.config.mode {
            RunMode::Normal => {
                if let Some(report) = failure.report() {
                    out.write_all(report.as_bytes())?;
                }
                Ok(())
            }
            RunMode::Debug | RunMode::Collect { continue_on_failure: false } => Err(failure),
            RunMode::Collect { continue_on_failure: true } => {
                self.failures.push(failure);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lang::{Namespace, Value};

    fn test_case(text: &str) -> TestCase {
        TestCase::parse(text, Namespace::new(), "t", "t.rst", 1).unwrap()
    }

    fn run_with(config: RunnerConfig, text: &str) -> (Result<TestResults, Failure>, String, TestCase) {
        let mut test = test_case(text);
        let mut out = Vec::new();
        let result = Runner::new(config).run(&mut test, &mut out, false);
        (result, String::from_utf8(out).unwrap(), test)
    }

    fn run(text: &str) -> (TestResults, String) {
        let (result, out, _) = run_with(RunnerConfig::default(), text);
        (result.unwrap(), out)
    }

    #[test]
    fn success_and_failure() {
        assert_eq!(run(">>> 4 + 4\n8\n"), (TestResults::new(0, 1, 0), String::new()));

        let (results, out) = run("\n>>> 4 + 4\n9\n");
        assert_eq!(results, TestResults::new(1, 1, 0));
        assert_eq!(
            out,
            format!(
                "{DIVIDER}\n{}",
                indoc! {r#"
                    File "t.rst", line 2, in t
                    Failed example:
                        4 + 4
                    Expected:
                        9
                    Got:
                        8
                "#}
            )
        );
    }

    #[test]
    fn state_is_shared_within_a_test_case_only() {
        let (results, _) = run(">>> x = 1\n>>> x += 1\n>>> x\n2\n");
        assert_eq!(results, TestResults::new(0, 3, 0));

        let mut runner = Runner::new(RunnerConfig::default());
        let mut out = Vec::new();
        let mut first = test_case(">>> y = 5\n");
        let mut second = test_case(">>> y\nTraceback (most recent call last):\nNameError: name 'y' is not defined\n");
        runner.run(&mut first, &mut out, false).unwrap();
        let results = runner.run(&mut second, &mut out, false).unwrap();
        assert_eq!(results, TestResults::new(0, 1, 0));
        assert!(first.globs.contains("y"));
        assert_eq!(runner.stats().get("t"), Some(TestResults::new(0, 2, 0)));
    }

    #[test]
    fn suspension_is_transparent() {
        let text = indoc! {"
            >>> import asyncio
            >>> async def double(x):
            ...     await asyncio.sleep(0)
            ...     return 2 * x
            >>> await double(4)
            8
            >>> value = await double(5)
            >>> value
            10
        "};
        assert_eq!(run(text).0, TestResults::new(0, 5, 0));
        assert_eq!(run(">>> 8\n8\n>>> value = 10\n>>> value\n10\n").0, TestResults::new(0, 3, 0));

        let (result, out, _) = run_with(RunnerConfig::default().execution(ExecutionMode::Immediate), text);
        // Both awaits fail to compile, which leaves `value` undefined.
        assert_eq!(result.unwrap(), TestResults::new(3, 5, 0));
        assert!(out.contains("SyntaxError: 'await' outside function"));
    }

    #[test]
    fn skipped_examples_do_not_run() {
        let text = indoc! {"
            >>> x = 1  # doctest: +SKIP
            >>> x
            Traceback (most recent call last):
            NameError: name 'x' is not defined
        "};
        assert_eq!(run(text).0, TestResults::new(0, 1, 1));

        let config = RunnerConfig::new(OptionFlags::SKIP);
        let (result, _, test) = run_with(config, ">>> x = 1\n>>> x = 2  # doctest: -SKIP\n");
        assert_eq!(result.unwrap(), TestResults::new(0, 1, 1));
        assert!(matches!(test.globs.get("x"), Some(Value::Int(2))));
    }

    #[test]
    fn expected_exceptions() {
        let raises = |exc: &str| {
            format!(">>> raise {exc}\nTraceback (most recent call last):\n  ...\nValueError: boom\n")
        };
        assert_eq!(run(&raises("ValueError('boom')")).0, TestResults::new(0, 1, 0));
        assert_eq!(run(&raises("TypeError('boom')")).0, TestResults::new(1, 1, 0));
        assert_eq!(run(&raises("ValueError('bang')")).0, TestResults::new(1, 1, 0));

        let (results, out) = run(">>> 1\nTraceback (most recent call last):\nValueError: boom\n");
        assert_eq!(results, TestResults::new(1, 1, 0));
        assert!(out.contains("Got:\n    1\n"));

        let loose = ">>> raise ValueError('bang')  # doctest: +IGNORE_EXCEPTION_DETAIL\nTraceback (most recent call last):\nmodule.ValueError: boom\n";
        assert_eq!(run(loose).0, TestResults::new(0, 1, 0));
    }

    #[test]
    fn syntax_errors_keep_only_the_message() {
        let text = indoc! {"
            >>> 1 +  # doctest: +ELLIPSIS
            Traceback (most recent call last):
            SyntaxError: ...
        "};
        assert_eq!(run(text).0, TestResults::new(0, 1, 0));
    }

    #[test]
    fn unexpected_exceptions() {
        let (results, out) = run(">>> raise ValueError('boom')\n>>> 1\n1\n");
        assert_eq!(results, TestResults::new(1, 2, 0));
        assert!(out.contains("Failed example:\n    raise ValueError('boom')\nException raised:\n"));
        assert!(out.contains("    Traceback (most recent call last):\n"));
        assert!(out.contains("    ValueError: boom\n"));
    }

    #[test]
    fn fail_fast_and_first_failure_only() {
        let text = ">>> 1\n2\n>>> 3\n4\n>>> 5\n5\n";
        let (result, out, _) = run_with(RunnerConfig::new(OptionFlags::FAIL_FAST), text);
        assert_eq!(result.unwrap(), TestResults::new(1, 1, 0));
        assert_eq!(out.matches("Failed example:").count(), 1);

        let (result, out, _) = run_with(RunnerConfig::new(OptionFlags::REPORT_ONLY_FIRST_FAILURE), text);
        assert_eq!(result.unwrap(), TestResults::new(2, 3, 0));
        assert_eq!(out.matches("Failed example:").count(), 1);
    }

    #[test]
    fn verbose_notifications() {
        let config = RunnerConfig::default().verbose(true);
        let (_, out, _) = run_with(config, ">>> x = 1\n>>> x + 1\n2\n>>> x  # doctest: +SKIP\n");
        assert_eq!(
            out,
            indoc! {"
                Trying:
                    x = 1
                Expecting nothing
                ok
                Trying:
                    x + 1
                Expecting:
                    2
                ok
                Trying:
                    x  # doctest: +SKIP
                Expecting nothing
                skipped
            "}
        );
    }

    #[test]
    fn debug_mode_raises() {
        let config = RunnerConfig::default().mode(RunMode::Debug);
        let (result, out, test) = run_with(config, ">>> x = 2\n>>> x\n3\n>>> y = 1\n");
        let Err(Failure::DocTest { location, got, .. }) = result else {
            panic!("expected an example failure");
        };
        assert_eq!((location.line, got.as_str()), (2, "2\n"));
        assert!(out.is_empty());
        assert!(test.globs.contains("x"));
        assert!(!test.globs.contains("y"));

        let (result, _, _) = run_with(config, ">>> raise KeyError('k')\n");
        let Err(failure @ Failure::UnexpectedException { .. }) = result else {
            panic!("expected an unexpected exception");
        };
        assert!(failure.report().unwrap().contains("KeyError: 'k'"));
    }

    #[test]
    fn collect_mode_keeps_failures() {
        let text = ">>> 1\n2\n>>> raise ValueError\n>>> 3\n3\n";
        let mut runner = Runner::new(RunnerConfig::default().mode(RunMode::Collect {
            continue_on_failure: true,
        }));
        let mut test = test_case(text);
        let results = runner.run(&mut test, &mut io::sink(), false).unwrap();
        assert_eq!(results, TestResults::new(2, 3, 0));
        let failures = runner.take_failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], Failure::DocTest { .. }));
        assert!(matches!(failures[1], Failure::UnexpectedException { .. }));
        assert!(runner.failures().is_empty());

        let mut runner = Runner::new(RunnerConfig::default().mode(RunMode::Collect {
            continue_on_failure: false,
        }));
        let mut test = test_case(text);
        assert!(runner.run(&mut test, &mut io::sink(), false).is_err());
    }

    #[test]
    fn interrupts_abort_the_run() {
        let (result, _, test) = run_with(RunnerConfig::default(), ">>> interrupt()\n>>> x = 1\n");
        let failure = result.unwrap_err();
        assert!(failure.is_interrupt());
        assert!(!test.globs.contains("x"));

        let text = indoc! {"
            >>> import asyncio
            >>> async def stop():
            ...     await asyncio.sleep(0)
            ...     interrupt()
            >>> await stop()
        "};
        let (result, _, _) = run_with(RunnerConfig::default(), text);
        assert!(result.unwrap_err().is_interrupt());
    }

    #[test]
    fn globs_are_cleared_on_request() {
        let mut test = test_case(">>> x = 1\n");
        Runner::new(RunnerConfig::default())
            .run(&mut test, &mut io::sink(), true)
            .unwrap();
        assert!(test.globs.is_empty());
    }
}
