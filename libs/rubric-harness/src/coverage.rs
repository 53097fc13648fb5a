//! Student-test execution and coverage gating.
//!
//! The student-authored suite lives in `<source>/student_tests` and is kept
//! strictly separate from the grading suite. It runs in a fresh interpreter
//! subprocess: a small generated driver discovers and runs it, then writes a
//! JSON summary the grader parses. For coverage checks the same driver runs
//! under `coverage.py` instrumentation; the driver drops each checked module
//! from the interpreter's module registry and imports it fresh, so the
//! module's definition lines execute while instrumentation is active even
//! when the student tests themselves never import it. A checked file that
//! still fails to appear in the coverage report is a configuration defect,
//! never a zero-coverage score.

use crate::harness::{Failure, TestContext};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{error, info, warn};

const DRIVER_TEMPLATE: &str = r#"import importlib
import json
import sys
import unittest


def main():
    for name in MODULES:
        sys.modules.pop(name, None)
        importlib.import_module(name)
    suite = unittest.defaultTestLoader.discover('student_tests', top_level_dir='.')
    result = unittest.TestResult()
    suite.run(result)
    summary = {
        'tests_run': result.testsRun,
        'failures': [{'test': t.id(), 'trace': trace} for t, trace in result.failures],
        'errors': [{'test': t.id(), 'trace': trace} for t, trace in result.errors],
    }
    with open(sys.argv[1], 'w') as out:
        json.dump(summary, out)


main()
"#;

#[derive(Debug, Clone, Copy)]
pub struct StudentTestOptions {
    /// Print a success or failure message into the test feedback.
    pub print_feedback: bool,
    /// Include failure/error tracebacks in the feedback.
    pub show_traces: bool,
    /// Fail the calling test if any student test fails.
    pub success_required: bool,
}

impl Default for StudentTestOptions {
    fn default() -> Self {
        StudentTestOptions {
            print_feedback: true,
            show_traces: true,
            success_required: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoverageOptions {
    /// Also measure branch coverage. The configured default applies when unset.
    pub branch: bool,
    pub print_feedback: bool,
    /// Print a detailed per-file table when coverage is short of 100%.
    pub show_details: bool,
    /// Fail the calling test if the coverage target is not met.
    pub success_required: bool,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        CoverageOptions {
            branch: false,
            print_feedback: true,
            show_details: true,
            success_required: true,
        }
    }
}

/// Coverage outcome for one checked file.
#[derive(Debug, Clone)]
pub struct CoverageVerdict {
    pub file: String,
    pub percent: f64,
    /// covered% >= the configured target.
    pub meets_target: bool,
    /// 100% covered.
    pub full: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TestProblem {
    test: String,
    trace: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StudentSummary {
    tests_run: u32,
    #[serde(default)]
    failures: Vec<TestProblem>,
    #[serde(default)]
    errors: Vec<TestProblem>,
}

impl StudentSummary {
    fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CoverageJson {
    files: HashMap<String, CoverageFile>,
}

#[derive(Debug, Deserialize)]
struct CoverageFile {
    summary: CoverageSummary,
}

#[derive(Debug, Deserialize)]
struct CoverageSummary {
    percent_covered: f64,
}

struct DriverRun {
    dir: TempDir,
    summary: StudentSummary,
}

fn module_name(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

fn driver_source(checked_files: &[&str]) -> String {
    let modules = checked_files
        .iter()
        .map(|name| format!("'{}'", module_name(name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("MODULES = [{modules}]\n{DRIVER_TEMPLATE}")
}

fn coverage_data_path(dir: &TempDir) -> PathBuf {
    dir.path().join(".coverage")
}

/// Run the generated driver from the source root. `branch_coverage` selects
/// an instrumented run; the coverage data file lands in the driver's private
/// directory so nothing leaks into the shared tree.
async fn run_driver(
    ctx: &TestContext,
    checked_files: &[&str],
    branch_coverage: Option<bool>,
) -> Result<DriverRun> {
    let dir = tempfile::tempdir().context("failed to create driver directory")?;
    let driver = dir.path().join("run_student_tests.py");
    let summary_path = dir.path().join("summary.json");
    std::fs::write(&driver, driver_source(checked_files))
        .context("failed to write student test driver")?;

    let mut command = Command::new(ctx.engine().interpreter());
    if let Some(branch) = branch_coverage {
        command.args(["-m", "coverage", "run"]);
        if branch {
            command.arg("--branch");
        }
        command.env("COVERAGE_FILE", coverage_data_path(&dir));
    }
    command.arg(&driver);
    command.arg(&summary_path);
    command.current_dir(ctx.paths().source_dir());
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = command
        .output()
        .await
        .context("failed to run student test suite")?;
    if !output.status.success() {
        bail!(
            "student test driver exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let text = std::fs::read_to_string(&summary_path)
        .context("failed to read student test summary")?;
    let summary = serde_json::from_str(&text).context("failed to parse student test summary")?;
    Ok(DriverRun { dir, summary })
}

async fn coverage_json(ctx: &TestContext, dir: &TempDir) -> Result<CoverageJson> {
    let json_path = dir.path().join("coverage.json");
    let output = Command::new(ctx.engine().interpreter())
        .args(["-m", "coverage", "json", "-o"])
        .arg(&json_path)
        .env("COVERAGE_FILE", coverage_data_path(dir))
        .current_dir(ctx.paths().source_dir())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to produce coverage data")?;
    if !output.status.success() {
        bail!(
            "coverage json exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let text = std::fs::read_to_string(&json_path).context("failed to read coverage json")?;
    serde_json::from_str(&text).context("failed to parse coverage json")
}

async fn coverage_table(ctx: &TestContext, dir: &TempDir, files: &[&str]) -> Result<String> {
    let output = Command::new(ctx.engine().interpreter())
        .args(["-m", "coverage", "report"])
        .args(files)
        .env("COVERAGE_FILE", coverage_data_path(dir))
        .current_dir(ctx.paths().source_dir())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to produce coverage table")?;
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

fn verdicts_from_report(
    report: &CoverageJson,
    checked_files: &[&str],
    target_percent: f64,
) -> Result<Vec<CoverageVerdict>> {
    let mut verdicts = Vec::with_capacity(checked_files.len());
    for name in checked_files {
        let Some(entry) = report.files.get(*name) else {
            bail!(
                "file missing from coverage report: {name} (was it imported during the instrumented run?)"
            );
        };
        let percent = entry.summary.percent_covered;
        verdicts.push(CoverageVerdict {
            file: (*name).to_string(),
            percent,
            meets_target: percent >= target_percent,
            full: percent >= 100.0,
        });
    }
    Ok(verdicts)
}

impl TestContext {
    /// Run the student-authored test suite.
    ///
    /// Returns whether all student tests passed. With `success_required`,
    /// any failing student test fails the calling test instead. Problems
    /// running the suite itself (missing directory, import errors) are
    /// logged and treated as a failing result, never a grader crash.
    pub async fn run_student_tests(&self, opts: StudentTestOptions) -> Result<bool, Failure> {
        let run = match run_driver(self, &[], None).await {
            Ok(run) => run,
            Err(e) => {
                error!(error = %e, "student test suite could not be run");
                if opts.success_required {
                    return Err(Failure::failed("Student tests failed."));
                }
                return Ok(false);
            }
        };

        let summary = run.summary;
        let succeeded = summary.succeeded();

        if !succeeded {
            if opts.print_feedback {
                self.print("It looks like your submission is not passing your own tests:");
                if !summary.errors.is_empty() {
                    self.print("Errors:");
                    for problem in &summary.errors {
                        self.print(&problem.test);
                        if opts.show_traces {
                            self.print(&problem.trace);
                        }
                    }
                }
                if !summary.failures.is_empty() {
                    self.print("Failures:");
                    for problem in &summary.failures {
                        self.print(&problem.test);
                        if opts.show_traces {
                            self.print(&problem.trace);
                        }
                    }
                }
            }
            if opts.success_required {
                return Err(Failure::failed("Student tests failed."));
            }
        } else if opts.print_feedback {
            self.print("Submission passes student tests.");
        }

        Ok(succeeded)
    }

    /// Run the student suite under coverage instrumentation and judge each
    /// checked file against the configured target percentage.
    ///
    /// Returns whether every checked file reached full (100%) coverage.
    /// With `success_required`, fails the calling test when the aggregate
    /// target is not met. A checked file absent from the instrumentation
    /// report is a grader configuration error and is surfaced loudly.
    pub async fn check_coverage(
        &self,
        checked_files: &[&str],
        opts: CoverageOptions,
    ) -> Result<bool, Failure> {
        let target = self.config().coverage.target_percent;
        let branch = opts.branch || self.config().coverage.branch;

        let run = match run_driver(self, checked_files, Some(branch)).await {
            Ok(run) => run,
            Err(e) => {
                error!(error = %e, "instrumented student test run failed");
                if opts.success_required {
                    return Err(Failure::failed("Coverage failed."));
                }
                return Ok(false);
            }
        };
        info!(
            tests_run = run.summary.tests_run,
            "student suite executed under instrumentation"
        );

        let report = match coverage_json(self, &run.dir).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "coverage data could not be collected");
                if opts.success_required {
                    return Err(Failure::failed("Coverage failed."));
                }
                return Ok(false);
            }
        };

        let verdicts = verdicts_from_report(&report, checked_files, target)
            .map_err(|e| Failure::error(format!("{e:#}")))?;

        let full_coverage = verdicts.iter().all(|v| v.full);
        let meets_target = verdicts.iter().all(|v| v.meets_target);

        if !full_coverage {
            if opts.print_feedback {
                self.print("Test coverage is less than 100%.");
                if opts.show_details {
                    match coverage_table(self, &run.dir, checked_files).await {
                        Ok(table) => self.print(table),
                        Err(e) => warn!(error = %e, "coverage table unavailable"),
                    }
                }
            }
            if opts.success_required && !meets_target {
                return Err(Failure::failed("Coverage failed."));
            }
        } else if opts.print_feedback {
            let names = checked_files.join(", ");
            if branch {
                self.print(format!("100% statement and branch coverage of: {names}"));
            } else {
                self.print(format!("100% statement coverage of: {names}"));
            }
        }

        Ok(full_coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraderConfig;
    use crate::engine::ScriptEngine;
    use crate::sources::GraderPaths;
    use std::fs;

    fn report_with(entries: &[(&str, f64)]) -> CoverageJson {
        let files = entries
            .iter()
            .map(|(name, percent)| {
                (
                    (*name).to_string(),
                    CoverageFile {
                        summary: CoverageSummary {
                            percent_covered: *percent,
                        },
                    },
                )
            })
            .collect();
        CoverageJson { files }
    }

    #[test]
    fn test_verdicts_full_coverage() {
        let report = report_with(&[("hello_world.py", 100.0)]);
        let verdicts = verdicts_from_report(&report, &["hello_world.py"], 100.0).unwrap();

        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].full);
        assert!(verdicts[0].meets_target);
    }

    #[test]
    fn test_verdicts_partial_coverage_against_target() {
        let report = report_with(&[("prog.py", 85.0)]);

        let verdicts = verdicts_from_report(&report, &["prog.py"], 80.0).unwrap();
        assert!(!verdicts[0].full);
        assert!(verdicts[0].meets_target);

        let verdicts = verdicts_from_report(&report, &["prog.py"], 90.0).unwrap();
        assert!(!verdicts[0].meets_target);
    }

    #[test]
    fn test_missing_file_is_fatal_not_zero() {
        let report = report_with(&[("present.py", 100.0)]);
        let err = verdicts_from_report(&report, &["absent.py"], 100.0).unwrap_err();
        assert!(err.to_string().contains("missing from coverage report"));
    }

    #[test]
    fn test_driver_reimports_checked_modules() {
        let source = driver_source(&["hello_world.py", "util.py"]);
        assert!(source.starts_with("MODULES = ['hello_world', 'util']\n"));
        assert!(source.contains("sys.modules.pop(name, None)"));
        assert!(source.contains("importlib.import_module(name)"));
        assert!(source.contains("discover('student_tests'"));
    }

    #[test]
    fn test_summary_parsing() {
        let summary: StudentSummary = serde_json::from_str(
            r#"{
                "tests_run": 3,
                "failures": [{"test": "test_hello (TestHello)", "trace": "AssertionError"}],
                "errors": []
            }"#,
        )
        .unwrap();

        assert_eq!(summary.tests_run, 3);
        assert!(!summary.succeeded());
        assert_eq!(summary.failures[0].test, "test_hello (TestHello)");
    }

    #[test]
    fn test_coverage_json_parsing() {
        let report: CoverageJson = serde_json::from_str(
            r#"{
                "files": {
                    "hello_world.py": {"summary": {"percent_covered": 87.5}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(report.files["hello_world.py"].summary.percent_covered, 87.5);
    }

    /// End-to-end check against a real interpreter.
    #[tokio::test]
    #[ignore] // Requires python3 and coverage.py
    async fn test_check_coverage_full() {
        let dir = tempfile::tempdir().unwrap();
        let paths = GraderPaths::new(dir.path());
        fs::create_dir_all(paths.student_tests_dir()).unwrap();
        fs::create_dir_all(paths.submission_dir()).unwrap();

        fs::write(
            paths.source_dir().join("hello_world.py"),
            "def hello_func():\n    return 'Hello World'\n",
        )
        .unwrap();
        fs::write(paths.student_tests_dir().join("__init__.py"), "").unwrap();
        fs::write(
            paths.student_tests_dir().join("test_hello_world.py"),
            "import unittest\nimport hello_world\n\n\nclass TestHello(unittest.TestCase):\n    def test_hello(self):\n        self.assertEqual(hello_world.hello_func(), 'Hello World')\n",
        )
        .unwrap();

        let engine = ScriptEngine::new(paths, "python3");
        let ctx = TestContext::new(engine, GraderConfig::default());

        let full = ctx
            .check_coverage(&["hello_world.py"], CoverageOptions::default())
            .await
            .unwrap();
        assert!(full);
    }

    /// End-to-end check that student failures propagate.
    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_run_student_tests_failure() {
        let dir = tempfile::tempdir().unwrap();
        let paths = GraderPaths::new(dir.path());
        fs::create_dir_all(paths.student_tests_dir()).unwrap();
        fs::create_dir_all(paths.submission_dir()).unwrap();

        fs::write(paths.student_tests_dir().join("__init__.py"), "").unwrap();
        fs::write(
            paths.student_tests_dir().join("test_broken.py"),
            "import unittest\n\n\nclass TestBroken(unittest.TestCase):\n    def test_nope(self):\n        self.fail('broken')\n",
        )
        .unwrap();

        let engine = ScriptEngine::new(paths, "python3");
        let ctx = TestContext::new(engine, GraderConfig::default());

        let failure = ctx
            .run_student_tests(StudentTestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.message(), "Student tests failed.");
    }
}
