//! Ordered test suite with required-test gating.
//!
//! Two guarantees for every suite built here:
//!
//! 1. Test bodies run in the order they were registered, regardless of what
//!    their names would sort to. Registration is the explicit analog of
//!    definition order; the comparator exists so any discovery/sorting step
//!    keeps that order instead of falling back to alphabetical.
//! 2. If a test registered as `required` fails, every later test in the same
//!    run fails automatically with a message naming the original failure,
//!    and its body is never executed. Graders get one root cause instead of
//!    a cascade of confusing downstream errors.

use crate::config::GraderConfig;
use crate::engine::ScriptEngine;
use crate::sources::GraderPaths;
use futures_util::future::BoxFuture;
use rubric_common::types::{TestRecord, TestReport, TestStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// A grading failure, mirroring the usual failure/error split: `Failed` is
/// the submission's fault, `Error` means the grader itself hit something
/// unexpected.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Error(String),
}

impl Failure {
    pub fn failed(msg: impl Into<String>) -> Self {
        Failure::Failed(msg.into())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Failure::Error(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Failure::Failed(m) | Failure::Error(m) => m,
        }
    }

    pub fn status(&self) -> TestStatus {
        match self {
            Failure::Failed(_) => TestStatus::Failed,
            Failure::Error(_) => TestStatus::Error,
        }
    }

    /// Keep the failure kind, append the required-test note.
    fn with_required_note(self) -> Self {
        let note = "\nThis test was required. All of the following tests will fail automatically.";
        match self {
            Failure::Failed(m) => Failure::Failed(m + note),
            Failure::Error(m) => Failure::Error(m + note),
        }
    }
}

pub type TestOutcome = Result<(), Failure>;

/// Shared grading context handed to every test body.
pub type SharedContext = Arc<TestContext>;

type TestBody = Box<dyn Fn(SharedContext) -> BoxFuture<'static, TestOutcome> + Send + Sync>;

/// Everything a test body needs: the script engine, the grader config, and a
/// feedback buffer whose contents end up in the report entry.
pub struct TestContext {
    engine: ScriptEngine,
    config: GraderConfig,
    feedback: Mutex<String>,
}

impl TestContext {
    pub fn new(engine: ScriptEngine, config: GraderConfig) -> Self {
        TestContext {
            engine,
            config,
            feedback: Mutex::new(String::new()),
        }
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    pub fn paths(&self) -> &GraderPaths {
        self.engine.paths()
    }

    /// Append a line to the current test's feedback.
    pub fn print(&self, line: impl AsRef<str>) {
        let mut feedback = self
            .feedback
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        feedback.push_str(line.as_ref());
        feedback.push('\n');
    }

    fn clear_feedback(&self) {
        self.feedback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn take_feedback(&self) -> String {
        std::mem::take(&mut *self.feedback.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Declarative description of one test: name, human-readable description
/// (used in required-failure messages), point weight, required flag.
#[derive(Debug, Clone)]
pub struct TestSpec {
    name: String,
    description: String,
    weight: u32,
    required: bool,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        TestSpec {
            name: name.into(),
            description: description.into(),
            weight: 0,
            required: false,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// A failed required test fails all subsequently declared tests.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

struct TestCase {
    name: String,
    description: String,
    weight: u32,
    required: bool,
    body: TestBody,
}

/// Per-run gating state. Lives for exactly one `Suite::run`, so reusing a
/// suite across runs can never leak a stale required failure.
#[derive(Default)]
struct RunState {
    failed_required: Option<String>,
}

/// Compare two test names using the declaration-order table.
///
/// Both registered: earlier declared sorts first. Exactly one registered:
/// the registered one sorts first. Neither: lexicographic.
pub fn order_compare(a: &str, b: &str, table: &HashMap<String, usize>) -> Ordering {
    match (table.get(a), table.get(b)) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// A named, ordered collection of test cases.
pub struct Suite {
    name: String,
    tests: Vec<TestCase>,
    order: HashMap<String, usize>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Suite {
            name: name.into(),
            tests: Vec::new(),
            order: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// The declaration-order table backing [`order_compare`].
    pub fn order_table(&self) -> &HashMap<String, usize> {
        &self.order
    }

    /// Register a test body. The registration position is the test's
    /// declaration order; names must be unique within the suite.
    pub fn register<F, Fut>(&mut self, spec: TestSpec, body: F)
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestOutcome> + Send + 'static,
    {
        if self.order.contains_key(&spec.name) {
            warn!(test = %spec.name, "duplicate test registration ignored");
            return;
        }
        self.order.insert(spec.name.clone(), self.order.len());
        self.tests.push(TestCase {
            name: spec.name,
            description: spec.description,
            weight: spec.weight,
            required: spec.required,
            body: Box::new(move |ctx| Box::pin(body(ctx))),
        });
    }

    /// Run every test sequentially in declaration order and aggregate the
    /// records into a report.
    pub async fn run(&self, ctx: &SharedContext) -> TestReport {
        let run_start = Instant::now();

        // Discovery may hand tests over in any order; the comparator puts
        // them back into declaration order.
        let mut ordered: Vec<&TestCase> = self.tests.iter().collect();
        ordered.sort_by(|a, b| order_compare(&a.name, &b.name, &self.order));

        let mut state = RunState::default();
        let mut records = Vec::with_capacity(ordered.len());

        for test in ordered {
            let start = Instant::now();
            ctx.clear_feedback();

            let outcome = match &state.failed_required {
                Some(description) => Err(Failure::failed(format!(
                    "Failed required test: {description}"
                ))),
                None => (test.body)(ctx.clone()).await,
            };

            let outcome = match outcome {
                Err(failure) if test.required && state.failed_required.is_none() => {
                    state.failed_required = Some(test.description.clone());
                    Err(failure.with_required_note())
                }
                other => other,
            };

            let execution_time_ms = start.elapsed().as_millis() as u64;
            let mut output = ctx.take_feedback();
            let (status, score) = match &outcome {
                Ok(()) => (TestStatus::Passed, test.weight),
                Err(failure) => {
                    if !output.is_empty() && !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push_str(failure.message());
                    (failure.status(), 0)
                }
            };

            info!(
                test = %test.name,
                status = ?status,
                score = score,
                max_score = test.weight,
                execution_ms = execution_time_ms,
                "Test finished"
            );

            records.push(TestRecord {
                name: test.name.clone(),
                description: test.description.clone(),
                status,
                score,
                max_score: test.weight,
                output,
                execution_time_ms,
            });
        }

        TestReport::new(
            self.name.clone(),
            records,
            run_start.elapsed().as_millis() as u64,
        )
    }
}
