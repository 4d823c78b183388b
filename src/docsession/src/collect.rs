//! Collection of document tests for test harnesses.
//!
//! A harness discovers documents with [`collect_dir`], turns each into test
//! items with [`DocFile::collect`] and runs the items one by one. All items
//! of a file share one runner configured from a [`HarnessConfig`].

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::core::TestCase;
use crate::finder::Finder;
use crate::lang::Interpreter;
use crate::options::{OptionError, OptionFlags};
use crate::report::TestResults;
use crate::runner::{Failure, RunMode, Runner, RunnerConfig};
use crate::{read_to_string, Error};

/// Environment variable holding the option flags of harness runs, as flag
/// names separated by spaces or commas.
pub const OPTIONFLAGS_ENV: &str = "DOCSESSION_OPTIONFLAGS";

/// File patterns collected by default.
pub const DEFAULT_PATTERNS: [&str; 2] = ["**/*.rst", "**/*.md"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarnessConfig {
    pub optionflags: OptionFlags,
    /// Keep running the examples of a test case after a failure and report
    /// all failures together.
    pub continue_on_failure: bool,
}

impl HarnessConfig {
    pub fn new(optionflags: OptionFlags, continue_on_failure: bool) -> Self {
        Self {
            optionflags,
            continue_on_failure,
        }
    }

    /// Read the option flags from [`OPTIONFLAGS_ENV`]. `ELLIPSIS` is used
    /// when the variable is not set.
    pub fn from_env() -> Result<Self, OptionError> {
        let flags = std::env::var(OPTIONFLAGS_ENV).ok();
        Ok(Self::new(parse_flags(flags.as_deref())?, false))
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(self.optionflags).mode(RunMode::Collect {
            continue_on_failure: self.continue_on_failure,
        })
    }
}

fn parse_flags(value: Option<&str>) -> Result<OptionFlags, OptionError> {
    match value {
        Some(names) => OptionFlags::parse_names(names),
        None => Ok(OptionFlags::ELLIPSIS),
    }
}

/// Find the documents under `root` matching any of `patterns`.
pub fn collect_dir<P: AsRef<Path>>(root: P, patterns: &[&str]) -> Result<Vec<DocFile>, Error> {
    let mut paths = BTreeSet::new();
    for pattern in patterns {
        let pattern = root.as_ref().join(pattern);
        for entry in glob::glob(&pattern.to_string_lossy())? {
            match entry {
                Ok(path) if path.is_file() => {
                    paths.insert(path);
                }
                Ok(_) => {}
                Err(err) => warn!("skipping {}: {}", err.path().display(), err.error()),
            }
        }
    }
    debug!(root = %root.as_ref().display(), files = paths.len(), "collected");
    Ok(paths.into_iter().map(DocFile::new).collect())
}

/// A document whose test cases are collected as harness items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocFile {
    path: PathBuf,
}

impl DocFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One item per test case of the document that has examples.
    pub fn collect(&self, config: &HarnessConfig) -> Result<Vec<DocItem>, Error> {
        let text = read_to_string(&self.path).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned());

        let tests = Finder::new().find(&text, Some(&name), None, None)?;
        let runner = Rc::new(RefCell::new(Runner::new(config.runner_config())));
        Ok(tests
            .into_iter()
            .filter(|test| !test.is_empty())
            .map(|test| DocItem {
                test,
                runner: runner.clone(),
            })
            .collect())
    }
}

/// What happened when a [`DocItem`] ran.
#[derive(Debug)]
pub enum ItemOutcome {
    Passed(TestResults),
    Skipped(String),
    Failed(Vec<Failure>),
}

/// A single test case exposed to a harness.
pub struct DocItem {
    test: TestCase,
    runner: Rc<RefCell<Runner>>,
}

impl DocItem {
    pub fn name(&self) -> &str {
        &self.test.name
    }

    pub fn test(&self) -> &TestCase {
        &self.test
    }

    /// Line of the region the test case comes from.
    pub fn line(&self) -> usize {
        self.test.line
    }

    /// Run the test case unless its skip condition holds or all of its
    /// examples are skipped.
    pub fn run(&mut self) -> Result<ItemOutcome, Failure> {
        if let Some(expression) = &self.test.skipif {
            let skip = Interpreter::new()
                .eval_source(expression, "<skipif>", &self.test.globs)
                .map_err(|exception| Failure::Condition {
                    test: self.test.name.clone(),
                    expression: expression.clone(),
                    exception,
                })?;
            if skip.truthy() {
                return Ok(ItemOutcome::Skipped(format!("skipif: {expression}")));
            }
        }
        let all_skipped = self
            .test
            .examples
            .iter()
            .all(|example| example.options.get(OptionFlags::SKIP) == Some(true));
        if all_skipped {
            return Ok(ItemOutcome::Skipped(String::from("all tests skipped by +SKIP option")));
        }

        let mut runner = self.runner.borrow_mut();
        match runner.run(&mut self.test, &mut io::sink(), false) {
            Ok(results) => {
                let failures = runner.take_failures();
                if failures.is_empty() {
                    Ok(ItemOutcome::Passed(results))
                } else {
                    Ok(ItemOutcome::Failed(failures))
                }
            }
            Err(failure @ (Failure::DocTest { .. } | Failure::UnexpectedException { .. })) => {
                Ok(ItemOutcome::Failed(vec![failure]))
            }
            Err(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    const DOC: &str = indoc! {"
        .. doctest:: pass

           >>> print('ab' * 3)
           abab...

        .. doctest:: fail

           >>> 1
           2
           >>> raise ValueError('x')

        .. doctest:: skipped
           :skipif: 1 + 1 == 2

           >>> 1
           2

        .. doctest:: broken
           :skipif: undefined_name

           >>> 1
           1

        .. doctest:: all-skip

           >>> 1  # doctest: +SKIP
           2

        .. testcleanup::

           # nothing
    "};

    fn items(config: &HarnessConfig) -> Vec<DocItem> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.rst");
        fs::write(&path, DOC).unwrap();
        DocFile::new(&path).collect(config).unwrap()
    }

    #[test]
    fn option_flags_configuration() {
        assert_eq!(parse_flags(None).unwrap(), OptionFlags::ELLIPSIS);
        assert_eq!(
            parse_flags(Some("NUMBER, NORMALIZE_WHITESPACE")).unwrap(),
            OptionFlags::NUMBER | OptionFlags::NORMALIZE_WHITESPACE
        );
        assert!(parse_flags(Some("NOPE")).is_err());
    }

    #[test]
    fn collects_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["b.rst", "a.md", "sub/c.rst", "notes.txt"] {
            fs::write(dir.path().join(name), ">>> 1\n1\n").unwrap();
        }
        let files = collect_dir(dir.path(), &DEFAULT_PATTERNS).unwrap();
        let names = files
            .iter()
            .map(|file| file.path().strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![PathBuf::from("a.md"), PathBuf::from("b.rst"), PathBuf::from("sub/c.rst")]
        );
    }

    #[test]
    fn items_and_outcomes() {
        let config = HarnessConfig::new(OptionFlags::ELLIPSIS, true);
        let mut items = items(&config);
        let names = items.iter().map(DocItem::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["all-skip", "broken", "fail", "pass", "skipped"]);

        let outcomes = items.iter_mut().map(DocItem::run).collect::<Vec<_>>();
        assert!(matches!(&outcomes[0], Ok(ItemOutcome::Skipped(reason)) if reason.contains("+SKIP")));
        assert!(matches!(&outcomes[1], Err(Failure::Condition { .. })));
        let Ok(ItemOutcome::Failed(failures)) = &outcomes[2] else {
            panic!("expected failures");
        };
        assert_eq!(failures.len(), 2);
        assert!(matches!(&outcomes[3], Ok(ItemOutcome::Passed(results)) if results.attempted == 1));
        assert!(matches!(&outcomes[4], Ok(ItemOutcome::Skipped(_))));
    }

    #[test]
    fn first_failure_stops_without_continue() {
        let config = HarnessConfig::new(OptionFlags::ELLIPSIS, false);
        let mut items = items(&config);
        let Ok(ItemOutcome::Failed(failures)) = items[2].run() else {
            panic!("expected a failure");
        };
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], Failure::DocTest { .. }));
    }
}
