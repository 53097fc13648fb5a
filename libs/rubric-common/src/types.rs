use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single graded test.
///
/// `Failed` is an assertion failure (the submission misbehaved), `Error` is an
/// unexpected error while grading (bad scaffold, broken instrumentation).
/// The distinction is carried into the report so graders can tell student
/// mistakes from grader defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
}

/// One entry in the final report, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub description: String,
    pub status: TestStatus,
    pub score: u32,
    pub max_score: u32,
    /// Captured print output, plus the failure message when the test did not pass.
    pub output: String,
    pub execution_time_ms: u64,
}

impl TestRecord {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Aggregated grading report, serialized to `results.json`.
///
/// Entries appear in the order the tests executed, which the suite runner
/// guarantees is declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub suite: String,
    pub score: u32,
    pub max_score: u32,
    pub tests: Vec<TestRecord>,
    pub execution_time_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl TestReport {
    /// Aggregate records into a report.
    ///
    /// score = sum of earned scores, max_score = sum of test weights.
    pub fn new(suite: impl Into<String>, tests: Vec<TestRecord>, execution_time_ms: u64) -> Self {
        let score = tests.iter().map(|t| t.score).sum();
        let max_score = tests.iter().map(|t| t.max_score).sum();
        TestReport {
            suite: suite.into(),
            score,
            max_score,
            tests,
            execution_time_ms,
            generated_at: Utc::now(),
        }
    }

    /// Number of tests that did not pass. Used as the process exit code.
    pub fn failure_count(&self) -> usize {
        self.tests.iter().filter(|t| !t.passed()).count()
    }
}
