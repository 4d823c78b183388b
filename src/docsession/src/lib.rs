//! Run the interactive examples embedded in reStructuredText and Markdown
//! documents.
//!
//! Documentation often shows sessions of the form
//!
//! ```text
//! >>> total = 1 + 2
//! >>> total
//! 3
//! ```
//!
//! This crate finds such sessions, runs every `>>>` statement with the
//! embedded session language ([`lang`]) and checks that the printed output
//! matches the text that follows the statement.
//!
//! Sessions are taken from `doctest`, `testsetup` and `testcleanup`
//! directives, from reStructuredText doctest blocks and from literal and
//! fenced code blocks that start with a `>>>` prompt:
//!
//! ````markdown
//! ```{doctest} arithmetic
//! :options: +NORMALIZE_WHITESPACE
//!
//! >>> print(1, 2,  3)
//! 1 2 3
//! ```
//! ````
//!
//! Statements that `await` at the top level are driven on an event loop that
//! lives as long as the test case, so tasks started by one example can be
//! awaited by the next.
//!
//! # Example
//!
//! ```no_run
//! let results = docsession::run_file("README.md", &docsession::FileOptions::default()).unwrap();
//! assert_eq!(results.failed, 0);
//! ```
//!
//! The [`collect`] module exposes the same tests one by one to test harnesses.
//! With the `macros` feature, [`doc_test`] derives one `#[test]` function per
//! document matched by a glob pattern.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

pub mod checker;
pub mod collect;
pub mod core;
pub mod directives;
pub mod doc;
pub mod finder;
pub mod lang;
pub mod md;
pub mod options;
pub mod report;
pub mod rst;
pub mod runner;

pub use crate::core::{Example, TestCase};
pub use checker::OutputChecker;
pub use collect::{collect_dir, DocFile, DocItem, HarnessConfig};
pub use directives::Directives;
pub use doc::{Document, Format};
pub use finder::Finder;
pub use options::{OptionDelta, OptionFlags};
pub use report::{Aggregator, TestResults};
pub use runner::{ExecutionMode, Failure, RunMode, Runner, RunnerConfig};
#[cfg(feature = "macros")]
pub use docsession_macros::doc_test;

use crate::lang::Namespace;

// Errors
// ======

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Find(#[from] finder::Error),
    #[error(transparent)]
    Session(#[from] core::parser::Error),
    #[error("package may only be specified for module-relative paths")]
    PackageRelative,
    #[error("module-relative files may not have absolute paths: `{}`", .0.display())]
    AbsolutePath(PathBuf),
    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unsupported encoding `{0}`: documents are read as UTF-8")]
    Encoding(String),
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error(transparent)]
    Failure(#[from] Failure),
}

/// Read file contents into a String using a shared lock.
pub fn read_to_string<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file_buff = String::new();

    let mut file = OpenOptions::new().read(true).open(&path)?;
    FileExt::lock_shared(&file)?;
    file.read_to_string(&mut file_buff)?;

    Ok(file_buff)
}

// File entry points
// =================

/// Options of [`run_file`].
#[derive(Debug, Clone)]
pub struct FileOptions {
    /// Resolve the path relative to `package` (or the working directory).
    /// The path must then be relative.
    pub module_relative: bool,
    /// Base directory of module-relative paths.
    pub package: Option<PathBuf>,
    /// Name of the document; defaults to the file name. Its extension
    /// selects the markup format.
    pub name: Option<String>,
    pub globs: Option<Namespace>,
    pub extraglobs: Option<Namespace>,
    pub verbose: bool,
    /// Print a summary after running the file.
    pub report: bool,
    pub optionflags: OptionFlags,
    /// Stop at the first failing example and return it as an error.
    pub raise_on_error: bool,
    pub encoding: Option<String>,
    /// Clear the namespace of each test case after it ran. Otherwise the
    /// namespace of a test case carries over into the next one.
    pub clear_globs: bool,
    pub execution: ExecutionMode,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            module_relative: false,
            package: None,
            name: None,
            globs: None,
            extraglobs: None,
            verbose: false,
            report: true,
            optionflags: OptionFlags::empty(),
            raise_on_error: false,
            encoding: None,
            clear_globs: true,
            execution: ExecutionMode::default(),
        }
    }
}

impl FileOptions {
    fn runner_config(&self) -> RunnerConfig {
        let mode = if self.raise_on_error {
            RunMode::Debug
        } else {
            RunMode::Normal
        };
        RunnerConfig::new(self.optionflags)
            .verbose(self.verbose)
            .mode(mode)
            .execution(self.execution)
    }
}

/// Run the examples of the document at `path`, printing reports to stdout
/// and merging the results into [`Aggregator::global`].
pub fn run_file<P: AsRef<Path>>(path: P, options: &FileOptions) -> Result<TestResults, Error> {
    let mut results = Aggregator::new();
    let totals = run_file_with(path, options, &mut io::stdout().lock(), &mut results);
    Aggregator::global().merge(&results);
    totals
}

/// Like [`run_file`], with explicit report output and aggregator.
pub fn run_file_with<P: AsRef<Path>>(
    path: P,
    options: &FileOptions,
    out: &mut dyn Write,
    aggregator: &mut Aggregator,
) -> Result<TestResults, Error> {
    let (name, text) = read_document(path.as_ref(), options)?;
    let mut finder = Finder::new().verbose(options.verbose);
    let tests = finder.find(
        &text,
        Some(&name),
        options.globs.as_ref(),
        options.extraglobs.as_ref(),
    )?;
    run_tests(tests, options, out, aggregator)
}

/// Run a file that is one session text as a whole, such as a plain text
/// file of `>>>` examples.
pub fn run_session_file_with<P: AsRef<Path>>(
    path: P,
    options: &FileOptions,
    out: &mut dyn Write,
    aggregator: &mut Aggregator,
) -> Result<TestResults, Error> {
    let (name, text) = read_document(path.as_ref(), options)?;
    let globs = options.globs.as_ref().map(Namespace::copy).unwrap_or_default();
    if let Some(extraglobs) = &options.extraglobs {
        globs.update(extraglobs);
    }
    if !globs.contains("__name__") {
        globs.set("__name__", lang::Value::str("__main__"));
    }
    let test = TestCase::parse(&text, globs, &name, &name, 1)?;
    run_tests(vec![test], options, out, aggregator)
}

fn run_tests(
    tests: Vec<TestCase>,
    options: &FileOptions,
    out: &mut dyn Write,
    aggregator: &mut Aggregator,
) -> Result<TestResults, Error> {
    let mut runner = Runner::new(options.runner_config());
    let mut carried: Option<Namespace> = None;
    for mut test in tests {
        if let Some(globs) = &carried {
            test.globs.update(globs);
        }
        runner.run(&mut test, out, options.clear_globs)?;
        if !options.clear_globs {
            carried = Some(test.globs.clone());
        }
    }
    if options.report {
        runner.summarize(out, options.verbose).map_err(Failure::from)?;
    }
    aggregator.merge(runner.stats());
    Ok(runner.stats().totals())
}

fn read_document(path: &Path, options: &FileOptions) -> Result<(String, String), Error> {
    if options.package.is_some() && !options.module_relative {
        return Err(Error::PackageRelative);
    }
    let path = if options.module_relative {
        if path.is_absolute() {
            return Err(Error::AbsolutePath(path.to_path_buf()));
        }
        match &options.package {
            Some(package) => package.join(path),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };
    if let Some(encoding) = &options.encoding {
        let normalized = encoding.to_ascii_lowercase().replace(['-', '_'], "");
        if normalized != "utf8" {
            return Err(Error::Encoding(encoding.clone()));
        }
    }

    let name = match &options.name {
        Some(name) => name.clone(),
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    };
    debug!(path = %path.display(), name, "reading document");
    let text = read_to_string(&path).map_err(|source| Error::Io { path, source })?;
    Ok((name, text))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lang::Value;

    fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run(path: &Path, options: &FileOptions) -> (Result<TestResults, Error>, String, Aggregator) {
        let mut out = Vec::new();
        let mut aggregator = Aggregator::new();
        let result = run_file_with(path, options, &mut out, &mut aggregator);
        (result, String::from_utf8(out).unwrap(), aggregator)
    }

    #[test]
    fn reads_under_shared_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "locked.rst", ">>> 1\n1\n");
        let reader = fs::File::open(&path).unwrap();
        FileExt::lock_shared(&reader).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), ">>> 1\n1\n");
        FileExt::unlock(&reader).unwrap();
        assert!(read_to_string(dir.path().join("missing.rst")).is_err());
    }

    #[test]
    fn sole_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "one.rst", ">>> 1 + 1\n2\n");
        let (result, out, aggregator) = run(&path, &FileOptions::default());
        assert_eq!(result.unwrap(), TestResults::new(0, 1, 0));
        assert_eq!(out, "");
        assert_eq!(aggregator.get("one.rst[0]"), Some(TestResults::new(0, 1, 0)));
    }

    #[test]
    fn failures_are_reported_with_document_lines() {
        let dir = tempfile::tempdir().unwrap();
        let text = indoc! {"
            # Title

            ```python
            >>> x = 3
            >>> x * 2
            7
            ```
        "};
        let path = write(&dir, "doc.md", text);
        let (result, out, _) = run(&path, &FileOptions::default());
        assert_eq!(result.unwrap(), TestResults::new(1, 2, 0));
        assert!(out.contains("File \"doc.md\", line 5, in doc.md[0]\n"));
        assert!(out.ends_with("***Test Failed*** 1 failure.\n"));
    }

    #[test]
    fn namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let text = indoc! {"
            .. doctest:: a

               >>> x = base + 1

            .. doctest:: b

               >>> x
               Traceback (most recent call last):
               NameError: name 'x' is not defined
        "};
        let path = write(&dir, "ns.rst", text);
        let extraglobs = Namespace::new();
        extraglobs.set("base", Value::Int(1));
        let options = FileOptions {
            extraglobs: Some(extraglobs),
            ..FileOptions::default()
        };
        let (result, _, _) = run(&path, &options);
        assert_eq!(result.unwrap(), TestResults::new(0, 2, 0));

        let options = FileOptions {
            clear_globs: false,
            ..options
        };
        let (result, _, _) = run(&path, &options);
        assert_eq!(result.unwrap(), TestResults::new(1, 2, 0));
    }

    #[test]
    fn raise_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "bad.rst", ">>> 1\n2\n");
        let options = FileOptions {
            raise_on_error: true,
            ..FileOptions::default()
        };
        let (result, _, aggregator) = run(&path, &options);
        assert!(matches!(result, Err(Error::Failure(Failure::DocTest { .. }))));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn usage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "x.rst", ">>> 1\n1\n");

        let options = FileOptions {
            package: Some(dir.path().to_path_buf()),
            ..FileOptions::default()
        };
        assert!(matches!(run(&path, &options).0, Err(Error::PackageRelative)));

        let options = FileOptions {
            module_relative: true,
            ..options
        };
        assert!(matches!(run(&path, &options).0, Err(Error::AbsolutePath(_))));
        assert_eq!(
            run(Path::new("x.rst"), &options).0.unwrap(),
            TestResults::new(0, 1, 0)
        );

        let options = FileOptions {
            encoding: Some("latin-1".into()),
            ..FileOptions::default()
        };
        assert!(matches!(run(&path, &options).0, Err(Error::Encoding(_))));

        let missing = dir.path().join("missing.rst");
        assert!(matches!(
            run(&missing, &FileOptions::default()).0,
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn session_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "session.txt", "Prose.\n\n>>> 2 ** 3\n8\n");
        let mut out = Vec::new();
        let mut aggregator = Aggregator::new();
        let options = FileOptions {
            verbose: true,
            ..FileOptions::default()
        };
        let results = run_session_file_with(&path, &options, &mut out, &mut aggregator).unwrap();
        assert_eq!(results, TestResults::new(0, 1, 0));
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("1 test in 1 item.\n1 passed.\nTest passed.\n"));
    }
}
