//! The `docsession` command: run the examples of the given documents.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use docsession::{Aggregator, FileOptions, OptionFlags};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Run the interactive examples of reStructuredText and Markdown documents.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Files containing the tests to run.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Report every example, not only the failing ones.
    #[arg(short, long)]
    verbose: bool,

    /// Log level of diagnostics. `RUST_LOG` takes precedence when set.
    #[arg(long, value_enum, env = "DOCSESSION_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Option flag to apply to the test run; may be given more than once.
    #[arg(short = 'o', long = "option", value_name = "NAME", value_parser = parse_flag)]
    options: Vec<OptionFlags>,

    /// Stop running tests after the first failure (shorthand for
    /// `-o FAIL_FAST`).
    #[arg(short, long)]
    fail_fast: bool,

    /// Parse every file as a document, whatever its extension.
    #[arg(long)]
    docutils: bool,
}

fn parse_flag(name: &str) -> Result<OptionFlags, String> {
    OptionFlags::by_name(name).ok_or_else(|| {
        let names = OptionFlags::names().collect::<Vec<_>>().join(", ");
        format!("'{name}' is not a valid option (expected one of {names})")
    })
}

fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "rst" || ext == "md")
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => cli.log_level.map_or("warn", LogLevel::directive).to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(io::stderr)
        .init();

    let mut optionflags = cli.options.iter().fold(OptionFlags::empty(), |acc, flag| acc | *flag);
    if cli.fail_fast {
        optionflags |= OptionFlags::FAIL_FAST;
    }
    let options = FileOptions {
        verbose: cli.verbose,
        optionflags,
        ..FileOptions::default()
    };
    debug!(?optionflags, files = cli.files.len(), "starting");

    let mut aggregator = Aggregator::new();
    for path in &cli.files {
        let mut out = io::stdout().lock();
        let results = if is_document(path) || cli.docutils {
            docsession::run_file_with(path, &options, &mut out, &mut aggregator)
        } else {
            docsession::run_session_file_with(path, &options, &mut out, &mut aggregator)
        }
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;

        info!(path = %path.display(), ?results, "done");
        if results.failed > 0 {
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn arguments() {
        let cli = Cli::try_parse_from([
            "docsession",
            "-v",
            "-o",
            "ELLIPSIS",
            "--option",
            "NORMALIZE_WHITESPACE",
            "--log-level",
            "WARNING",
            "-f",
            "a.rst",
            "b.txt",
        ])
        .unwrap();
        assert!(cli.verbose && cli.fail_fast && !cli.docutils);
        assert_eq!(cli.options, vec![OptionFlags::ELLIPSIS, OptionFlags::NORMALIZE_WHITESPACE]);
        assert_eq!(cli.log_level, Some(LogLevel::Warning));
        assert_eq!(cli.files.len(), 2);

        assert!(Cli::try_parse_from(["docsession", "-o", "NOPE", "a.rst"]).is_err());
        assert!(Cli::try_parse_from(["docsession", "-o", "COMPARISON_FLAGS", "a.rst"]).is_err());
        assert!(Cli::try_parse_from(["docsession"]).is_err());
    }

    #[test]
    fn routing() {
        assert!(is_document(Path::new("docs/index.rst")));
        assert!(is_document(Path::new("README.md")));
        assert!(!is_document(Path::new("notes.txt")));
    }
}
