//! Output assertions built on the script engine.
//!
//! Every relation shares one contract: run the script, fail immediately if
//! it wrote anything to standard error, then compare the (optionally
//! post-processed) standard output against the expected text. A crashing
//! program can never be judged to have "correctly" produced or omitted some
//! string, so stderr is an unconditional failure cause regardless of the
//! relation being checked.

use crate::engine::{ScriptOutput, ScriptRun};
use crate::harness::{Failure, TestContext};
use std::fs;

enum Relation {
    Equal,
    NotEqual,
    Contains,
    NotContains,
}

impl TestContext {
    /// Run a script and return its classified output. Infrastructure
    /// problems (missing file, spawn failure) surface as grader errors
    /// rather than submission failures.
    pub async fn script_output(&self, run: ScriptRun) -> Result<ScriptOutput, Failure> {
        self.engine()
            .run_script(run)
            .await
            .map_err(|e| Failure::error(format!("{e:#}")))
    }

    /// Assert the script's stdout equals `expected`.
    ///
    /// When the run carries the from-file flag, both the stdin argument and
    /// `expected` name scaffold files in the source root.
    pub async fn assert_output_equal(&self, run: ScriptRun, expected: &str) -> Result<(), Failure> {
        self.output_assertion(run, expected, Relation::Equal).await
    }

    /// Assert the script's stdout is NOT equal to `expected`.
    pub async fn assert_output_not_equal(
        &self,
        run: ScriptRun,
        expected: &str,
    ) -> Result<(), Failure> {
        self.output_assertion(run, expected, Relation::NotEqual)
            .await
    }

    /// Assert the script's stdout contains `expected`.
    pub async fn assert_in_output(&self, run: ScriptRun, expected: &str) -> Result<(), Failure> {
        self.output_assertion(run, expected, Relation::Contains)
            .await
    }

    /// Assert the script's stdout does not contain `expected`.
    pub async fn assert_not_in_output(
        &self,
        run: ScriptRun,
        expected: &str,
    ) -> Result<(), Failure> {
        self.output_assertion(run, expected, Relation::NotContains)
            .await
    }

    async fn output_assertion(
        &self,
        run: ScriptRun,
        expected: &str,
        relation: Relation,
    ) -> Result<(), Failure> {
        let from_files = run.from_file;
        let result = self.script_output(run).await?;

        if result.failed() {
            return Err(Failure::failed(result.message));
        }

        let expected = if from_files {
            let path = self.paths().full_source_path(expected)?;
            fs::read_to_string(&path).map_err(|e| {
                Failure::error(format!(
                    "failed to read expected output file {}: {e}",
                    path.display()
                ))
            })?
        } else {
            expected.to_string()
        };

        let actual = &result.stdout;
        let message = &result.message;
        let mismatch = match relation {
            Relation::Equal if *actual != expected => Some(format!(
                "output {actual:?} does not equal expected {expected:?}\n{message}"
            )),
            Relation::NotEqual if *actual == expected => Some(format!(
                "output unexpectedly equals {expected:?}\n{message}"
            )),
            Relation::Contains if !actual.contains(&expected) => Some(format!(
                "{expected:?} not found in output {actual:?}\n{message}"
            )),
            Relation::NotContains if actual.contains(&expected) => Some(format!(
                "{expected:?} unexpectedly found in output {actual:?}\n{message}"
            )),
            _ => None,
        };

        match mismatch {
            Some(message) => Err(Failure::failed(message)),
            None => Ok(()),
        }
    }
}
