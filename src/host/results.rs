//! Test results reports
//!
//! `results.get_testjob_results_yaml` returns a YAML list with one entry per
//! test case. Only `suite`, `name` and `result` are read; the scheduler adds
//! further fields (`id`, `url`, `measurement`, ...) that are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestOutcome {
    Pass,
    Fail,
    Skip,
    Other(String),
}

impl From<String> for TestOutcome {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pass" => TestOutcome::Pass,
            "fail" => TestOutcome::Fail,
            "skip" => TestOutcome::Skip,
            _ => TestOutcome::Other(raw),
        }
    }
}

impl From<TestOutcome> for String {
    fn from(outcome: TestOutcome) -> Self {
        outcome.to_string()
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Pass => f.write_str("pass"),
            TestOutcome::Fail => f.write_str("fail"),
            TestOutcome::Skip => f.write_str("skip"),
            TestOutcome::Other(raw) => f.write_str(raw),
        }
    }
}

/// One entry of a results report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub suite: String,
    pub name: String,
    pub result: TestOutcome,
}

impl TestResult {
    pub fn new(suite: impl Into<String>, name: impl Into<String>, result: TestOutcome) -> Self {
        Self {
            suite: suite.into(),
            name: name.into(),
            result,
        }
    }

    pub fn passed(&self) -> bool {
        self.result == TestOutcome::Pass
    }
}

/// Parse a results report. An empty document is an empty report.
pub fn parse_report(text: &str) -> Result<Vec<TestResult>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let results: Option<Vec<TestResult>> = serde_yaml::from_str(text)?;
    Ok(results.unwrap_or_default())
}

/// Counts over one or more reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultsSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub other: usize,
}

impl ResultsSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        results.into_iter().fold(Self::default(), |mut summary, result| {
            match result.result {
                TestOutcome::Pass => summary.passed += 1,
                TestOutcome::Fail => summary.failed += 1,
                TestOutcome::Skip => summary.skipped += 1,
                TestOutcome::Other(_) => summary.other += 1,
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.other
    }

    /// Every test passed
    pub fn all_passed(&self) -> bool {
        self.passed == self.total()
    }
}

impl fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )?;
        if self.other > 0 {
            write!(f, ", {} other", self.other)?;
        }
        Ok(())
    }
}
