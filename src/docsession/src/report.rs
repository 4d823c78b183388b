//! Outcome counters and their aggregation across runs.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::AddAssign;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// Outcome counters of one or more test cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestResults {
    pub failed: usize,
    pub attempted: usize,
    pub skipped: usize,
}

impl TestResults {
    pub fn new(failed: usize, attempted: usize, skipped: usize) -> Self {
        Self {
            failed,
            attempted,
            skipped,
        }
    }

    pub fn merge(&mut self, other: &TestResults) {
        self.failed += other.failed;
        self.attempted += other.attempted;
        self.skipped += other.skipped;
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl AddAssign for TestResults {
    fn add_assign(&mut self, other: Self) {
        self.merge(&other);
    }
}

pub const DIVIDER: &str = "**********************************************************************";

static GLOBAL: LazyLock<Mutex<Aggregator>> = LazyLock::new(Mutex::default);

/// Results accumulated per test case name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregator {
    stats: BTreeMap<String, TestResults>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide aggregator used by entry points that are not given
    /// one explicitly.
    pub fn global() -> MutexGuard<'static, Aggregator> {
        GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add the results of a test case run to the entry of `name`.
    pub fn record(&mut self, name: &str, results: TestResults) {
        *self.stats.entry(name.to_string()).or_default() += results;
    }

    pub fn merge(&mut self, other: &Aggregator) {
        for (name, results) in &other.stats {
            self.record(name, *results);
        }
    }

    pub fn get(&self, name: &str) -> Option<TestResults> {
        self.stats.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestResults)> {
        self.stats.iter().map(|(name, results)| (name.as_str(), results))
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn totals(&self) -> TestResults {
        self.stats.values().fold(TestResults::default(), |mut acc, results| {
            acc += *results;
            acc
        })
    }

    pub fn reset(&mut self) {
        self.stats.clear();
    }

    /// Print a summary of the recorded results and return the totals.
    ///
    /// Failures and the final verdict are always printed; the lists of
    /// passing and empty test cases only when `verbose` is set.
    pub fn summarize(&self, out: &mut dyn Write, verbose: bool) -> io::Result<TestResults> {
        let mut notests = Vec::new();
        let mut passed = Vec::new();
        let mut failed = Vec::new();
        for (name, results) in &self.stats {
            if results.attempted == 0 {
                notests.push(name);
            } else if results.failed == 0 {
                passed.push((name, results.attempted));
            } else {
                failed.push((name, results));
            }
        }
        let totals = self.totals();

        if verbose {
            if !notests.is_empty() {
                writeln!(out, "{} had no tests:", items(notests.len()))?;
                for name in &notests {
                    writeln!(out, "    {name}")?;
                }
            }
            if !passed.is_empty() {
                writeln!(out, "{} passed all tests:", items(passed.len()))?;
                for (name, count) in &passed {
                    writeln!(out, " {count:3} test{} in {name}", plural(*count))?;
                }
            }
        }
        if !failed.is_empty() {
            writeln!(out, "{DIVIDER}")?;
            writeln!(out, "{} had failures:", items(failed.len()))?;
            for (name, results) in &failed {
                writeln!(out, " {:3} of {:3} in {name}", results.failed, results.attempted)?;
            }
        }
        if verbose {
            writeln!(
                out,
                "{} test{} in {}.",
                totals.attempted,
                plural(totals.attempted),
                items(self.stats.len())
            )?;
            let passed = totals.attempted - totals.failed;
            if totals.failed > 0 {
                writeln!(out, "{passed} passed and {} failed.", totals.failed)?;
            } else {
                writeln!(out, "{passed} passed.")?;
            }
        }
        if totals.failed > 0 {
            let mut msg = format!("***Test Failed*** {} failure{}", totals.failed, plural(totals.failed));
            if totals.skipped > 0 {
                msg.push_str(&format!(
                    " and {} skipped test{}",
                    totals.skipped,
                    plural(totals.skipped)
                ));
            }
            writeln!(out, "{msg}.")?;
        } else if verbose {
            writeln!(out, "Test passed.")?;
        }
        Ok(totals)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn items(n: usize) -> String {
    format!("{n} item{}", plural(n))
}
