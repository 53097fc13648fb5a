//! Path resolution and source-level checks against the staged submission.
//!
//! Everything the grader reads lives under a single base directory:
//! `submission/` holds the files exactly as the student uploaded them,
//! `source/` holds the grader-side scaffolding plus the staged copies that
//! scripts actually execute, and `results/` receives the final report.

use crate::harness::{Failure, TestContext};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

const LOOP_REGEX: &str = r"(^|(\r\n?|\n))\s*(for|while).*:\s*(#.*)*($|(\r\n?|\n))";
const FOR_LOOP_REGEX: &str = r"(^|(\r\n?|\n))\s*(for).*:\s*(#.*)*($|(\r\n?|\n))";
const WHILE_LOOP_REGEX: &str = r"(^|(\r\n?|\n))\s*(while).*:\s*(#.*)*($|(\r\n?|\n))";
const IF_REGEX: &str = r"(^|(\r\n?|\n))\s*if.*:\s*(#.*)*($|(\r\n?|\n))";
const MAIN_GUARD_REGEX: &str = r"(^|(\r\n?|\n))\s*if\s*__name__.*:\s*(#.*)*($|(\r\n?|\n))";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("bad submission file path: {0}")]
    BadSubmissionPath(String),
    #[error("bad source file path: {0}")]
    BadSourcePath(String),
    #[error("no such file: {0}")]
    MissingFile(String),
    #[error("invalid pattern: {0}")]
    BadPattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SourceError> for Failure {
    fn from(err: SourceError) -> Self {
        Failure::error(err.to_string())
    }
}

/// Directory layout for one grading run.
#[derive(Debug, Clone)]
pub struct GraderPaths {
    base: PathBuf,
}

impl GraderPaths {
    pub const BASE_ENV: &'static str = "RUBRIC_BASE";
    pub const DEFAULT_BASE: &'static str = "/autograder";

    pub fn new(base: impl Into<PathBuf>) -> Self {
        GraderPaths { base: base.into() }
    }

    /// Base directory from the environment, falling back to the conventional
    /// location the grading platform mounts.
    pub fn from_env() -> Self {
        let base = std::env::var(Self::BASE_ENV).unwrap_or_else(|_| Self::DEFAULT_BASE.to_string());
        GraderPaths::new(base)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn submission_dir(&self) -> PathBuf {
        self.base.join("submission")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.base.join("source")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.base.join("results")
    }

    pub fn student_tests_dir(&self) -> PathBuf {
        self.source_dir().join("student_tests")
    }

    /// Resolve a file name against the submission root.
    ///
    /// Accepts a bare file name, or a path whose directory component is
    /// exactly the submission root. Anything else is rejected so a grader
    /// test can never be tricked into reading outside the sandbox.
    pub fn full_submission_path(&self, filename: &str) -> Result<PathBuf, SourceError> {
        resolve_in(&self.submission_dir(), filename)
            .ok_or_else(|| SourceError::BadSubmissionPath(filename.to_string()))
    }

    /// Resolve a file name against the source root, with the same rules as
    /// [`full_submission_path`](Self::full_submission_path).
    pub fn full_source_path(&self, filename: &str) -> Result<PathBuf, SourceError> {
        resolve_in(&self.source_dir(), filename)
            .ok_or_else(|| SourceError::BadSourcePath(filename.to_string()))
    }

    /// Which of the given files were not submitted.
    ///
    /// Presence is checked per file, so the answer does not depend on the
    /// order of the list.
    pub fn check_submitted_files(&self, required: &[&str]) -> Result<Vec<String>, SourceError> {
        let mut missing = Vec::new();
        for name in required {
            let path = self.full_submission_path(name)?;
            if !path.exists() {
                missing.push((*name).to_string());
            }
        }
        Ok(missing)
    }

    /// Count matches of `pattern` in a submitted file, after stripping
    /// comments and docstrings so commented-out code does not count.
    pub fn count_regex_matches(&self, pattern: &str, filename: &str) -> Result<usize, SourceError> {
        self.count_matches(pattern, filename, true)
    }

    pub fn count_matches(
        &self,
        pattern: &str,
        filename: &str,
        strip: bool,
    ) -> Result<usize, SourceError> {
        let full_path = self.full_submission_path(filename)?;
        if !full_path.exists() {
            return Err(SourceError::MissingFile(full_path.display().to_string()));
        }

        let contents = fs::read_to_string(&full_path)?;
        let contents = if strip {
            strip_comments(&contents)
        } else {
            contents
        };

        let regex = Regex::new(pattern)?;
        Ok(regex.find_iter(&contents).count())
    }
}

fn resolve_in(root: &Path, filename: &str) -> Option<PathBuf> {
    let path = Path::new(filename);
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(root.join(filename)),
        Some(parent) if parent == root => Some(path.to_path_buf()),
        _ => None,
    }
}

/// Strip `#` comments and docstrings from Python source.
///
/// Line-oriented: a string literal that opens a logical line is treated as a
/// docstring and removed through its closing delimiter; `#` outside string
/// literals removes the rest of the line. Line boundaries are preserved so
/// line-anchored patterns keep matching.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut doc_delim: Option<&str> = None;

    for line in source.lines() {
        if let Some(delim) = doc_delim {
            if line.contains(delim) {
                doc_delim = None;
            }
            out.push('\n');
            continue;
        }

        let trimmed = line.trim_start();
        if let Some(delim) = ["\"\"\"", "'''"].into_iter().find(|d| trimmed.starts_with(d)) {
            let rest = &trimmed[delim.len()..];
            if !rest.contains(delim) {
                doc_delim = Some(delim);
            }
            out.push('\n');
            continue;
        }

        out.push_str(strip_line_comment(line));
        out.push('\n');
    }

    out
}

fn strip_line_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if quote.is_some() => escaped = true,
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                _ => {}
            },
            '#' if quote.is_none() => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Run the configured linter against a submitted file and return its trimmed
/// output. Empty output means a clean submission. The linter binary itself is
/// external; only its output is consumed here.
pub async fn run_linter(ctx: &TestContext, filename: &str) -> Result<String, SourceError> {
    let paths = ctx.paths();
    let full_path = paths.full_submission_path(filename)?;
    if !full_path.exists() {
        return Err(SourceError::MissingFile(full_path.display().to_string()));
    }

    let linter = &ctx.config().linter;
    let mut parts = linter.command.split_whitespace();
    let program = parts.next().unwrap_or("flake8");
    let mut command = Command::new(program);
    command.args(parts);
    if let Some(config_file) = &linter.config {
        command.arg(format!(
            "--config={}",
            paths.source_dir().join(config_file).display()
        ));
    }
    command.arg(&full_path);

    let output = command.output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl TestContext {
    /// Fail unless every file in the list was submitted, printing each
    /// missing name into the test feedback.
    pub fn assert_required_files_present(&self, required_files: &[&str]) -> Result<(), Failure> {
        let missing = self.paths().check_submitted_files(required_files)?;
        for path in &missing {
            self.print(format!("Missing {path}"));
        }
        if !missing.is_empty() {
            return Err(Failure::failed("Missing some required files!"));
        }
        self.print("All required files submitted!");
        Ok(())
    }

    /// Fail unless the pattern matches exactly `num_matches` times.
    /// Comments and docstrings are ignored.
    pub fn assert_match_count(
        &self,
        filename: &str,
        pattern: &str,
        num_matches: usize,
        msg: Option<&str>,
    ) -> Result<(), Failure> {
        let count = self.paths().count_regex_matches(pattern, filename)?;
        if count != num_matches {
            let mut message = format!(
                "expected {num_matches} matches of {pattern} in {filename}, found {count}"
            );
            if let Some(msg) = msg {
                message.push('\n');
                message.push_str(msg);
            }
            return Err(Failure::failed(message));
        }
        Ok(())
    }

    /// Fail if the file contains any for or while loop.
    pub fn assert_no_loops(&self, filename: &str, msg: Option<&str>) -> Result<(), Failure> {
        self.assert_absent(
            filename,
            LOOP_REGEX,
            format!("It looks like the file {filename} contains at least one loop."),
            msg,
        )
    }

    /// Fail if the file contains any for loop.
    pub fn assert_no_for_loops(&self, filename: &str, msg: Option<&str>) -> Result<(), Failure> {
        self.assert_absent(
            filename,
            FOR_LOOP_REGEX,
            format!("It looks like the file {filename} contains at least one for loop."),
            msg,
        )
    }

    /// Fail if the file contains any while loop.
    pub fn assert_no_while_loops(&self, filename: &str, msg: Option<&str>) -> Result<(), Failure> {
        self.assert_absent(
            filename,
            WHILE_LOOP_REGEX,
            format!("It looks like the file {filename} contains at least one while loop."),
            msg,
        )
    }

    /// Fail if the file contains any conditional. The `if __name__` entry
    /// point guard is not counted.
    pub fn assert_no_conditionals(&self, filename: &str, msg: Option<&str>) -> Result<(), Failure> {
        let count = self.paths().count_regex_matches(IF_REGEX, filename)?;
        let main_count = self.paths().count_regex_matches(MAIN_GUARD_REGEX, filename)?;
        if count > main_count {
            let mut message =
                format!("It looks like the file {filename} contains at least one if statement.");
            if let Some(msg) = msg {
                message.push('\n');
                message.push_str(msg);
            }
            return Err(Failure::failed(message));
        }
        Ok(())
    }

    fn assert_absent(
        &self,
        filename: &str,
        pattern: &str,
        message: String,
        msg: Option<&str>,
    ) -> Result<(), Failure> {
        let count = self.paths().count_regex_matches(pattern, filename)?;
        if count > 0 {
            let mut message = message;
            if let Some(msg) = msg {
                message.push('\n');
                message.push_str(msg);
            }
            return Err(Failure::failed(message));
        }
        Ok(())
    }

    /// Fail if the configured linter reports anything for the file.
    pub async fn assert_passes_style(&self, filename: &str) -> Result<(), Failure> {
        let output = run_linter(self, filename).await?;
        if !output.is_empty() {
            return Err(Failure::failed(format!(
                "Submission does not pass style checks:\n{output}"
            )));
        }
        self.print("Submission passes all formatting checks!");
        Ok(())
    }
}
