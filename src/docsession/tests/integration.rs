use std::path::Path;

use docsession::collect::ItemOutcome;
use docsession::{Aggregator, FileOptions, HarnessConfig, OptionFlags, TestResults};

#[docsession::doc_test("testdata/pass/**/*.rst", "testdata/pass/**/*.md")]
fn passing(path: &str) {
    let mut out = Vec::new();
    let mut aggregator = Aggregator::new();
    let options = FileOptions {
        verbose: true,
        ..FileOptions::default()
    };
    let results = docsession::run_file_with(path, &options, &mut out, &mut aggregator).unwrap();
    let report = String::from_utf8_lossy(&out);
    assert_eq!(results.failed, 0, "{report}");
    assert!(results.attempted > 0);
    assert!(report.ends_with("Test passed.\n"), "{report}");
}

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

#[test]
fn failing_document() {
    let mut out = Vec::new();
    let mut aggregator = Aggregator::new();
    let results =
        docsession::run_file_with(fixture("fail/mixed.rst"), &FileOptions::default(), &mut out, &mut aggregator)
            .unwrap();
    assert_eq!(results, TestResults::new(4, 7, 1));
    assert_eq!(aggregator.get("arithmetic"), Some(TestResults::new(1, 2, 0)));
    assert_eq!(aggregator.get("exceptions"), Some(TestResults::new(3, 4, 0)));
    assert_eq!(aggregator.get("skipping"), Some(TestResults::new(0, 1, 1)));

    let report = String::from_utf8_lossy(&out);
    assert!(report.contains("File \"mixed.rst\", line 8, in arithmetic"), "{report}");
    assert!(report.contains("NameError: name 'undefined_name' is not defined"), "{report}");
    assert!(report.contains("***Test Failed*** 4 failures and 1 skipped test."), "{report}");
}

#[test]
fn fail_fast_stops_each_test_case() {
    let mut out = Vec::new();
    let mut aggregator = Aggregator::new();
    let options = FileOptions {
        optionflags: OptionFlags::FAIL_FAST,
        report: false,
        ..FileOptions::default()
    };
    let results = docsession::run_file_with(fixture("fail/mixed.rst"), &options, &mut out, &mut aggregator).unwrap();
    assert_eq!(aggregator.get("exceptions"), Some(TestResults::new(1, 2, 0)));
    assert_eq!(results.failed, 2);
}

#[test]
fn harness_collection() {
    let files = docsession::collect_dir(fixture(""), &docsession::collect::DEFAULT_PATTERNS).unwrap();
    assert_eq!(files.len(), 4);

    let config = HarnessConfig::new(OptionFlags::ELLIPSIS, true);
    let mixed = files
        .iter()
        .find(|file| file.path().ends_with("fail/mixed.rst"))
        .unwrap();
    let mut items = mixed.collect(&config).unwrap();
    let names = items.iter().map(|item| item.name().to_string()).collect::<Vec<_>>();
    assert_eq!(names, vec!["arithmetic", "exceptions", "skipping"]);

    let outcomes = items.iter_mut().map(|item| item.run().unwrap()).collect::<Vec<_>>();
    assert!(matches!(&outcomes[0], ItemOutcome::Failed(failures) if failures.len() == 1));
    assert!(matches!(&outcomes[1], ItemOutcome::Failed(failures) if failures.len() == 3));
    assert!(matches!(&outcomes[2], ItemOutcome::Passed(results) if results.skipped == 1));
}
