pub mod config;
pub mod coverage;
pub mod engine;
pub mod evaluator;
pub mod harness;
pub mod sources;
pub mod substitute;

pub use config::GraderConfig;
pub use coverage::{CoverageOptions, CoverageVerdict, StudentTestOptions};
pub use engine::{ScriptEngine, ScriptOutput, ScriptRun, SubstitutedScript};
pub use harness::{order_compare, Failure, SharedContext, Suite, TestContext, TestOutcome, TestSpec};
pub use sources::GraderPaths;
pub use substitute::VarValue;
