use anyhow::{Context, Result};
use rubric_harness::{GraderConfig, GraderPaths};
use std::fs;
use tracing::{info, warn};

/// Stage the submission into the execution environment.
///
/// Submitted code files are copied from the submission root into the source
/// root, where the grading suite resolves and executes them. Submitted test
/// files become the student-authored suite under `student_tests/`. A file
/// the student never uploaded is skipped with a warning so the
/// required-files gate can report it, instead of the whole run dying here.
pub fn setup_autograder(paths: &GraderPaths, config: &GraderConfig) -> Result<()> {
    info!("Configuring autograder...");
    let submission = paths.submission_dir();
    let source = paths.source_dir();

    for name in &config.submit.code {
        let from = submission.join(name);
        if !from.exists() {
            warn!("Submitted file missing, skipping: {}", name);
            continue;
        }
        let to = source.join(name);
        info!("Copying student submitted file: {} to {}", name, to.display());
        fs::copy(&from, &to)
            .with_context(|| format!("failed to stage submitted file {name}"))?;
    }

    let student_tests = paths.student_tests_dir();
    fs::create_dir_all(&student_tests)
        .with_context(|| format!("failed to create {}", student_tests.display()))?;
    fs::write(student_tests.join("__init__.py"), "")
        .context("failed to create student_tests/__init__.py")?;

    for name in &config.submit.tests {
        let from = submission.join(name);
        if !from.exists() {
            warn!("Submitted test file missing, skipping: {}", name);
            continue;
        }
        let to = student_tests.join(name);
        info!(
            "Copying student submitted test file: {} to {}",
            name,
            to.display()
        );
        fs::copy(&from, &to)
            .with_context(|| format!("failed to stage submitted test file {name}"))?;
    }

    Ok(())
}
