// Grader configuration management
use crate::sources::GraderPaths;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Files the student is expected to upload: `code` is staged into the source
/// root for execution, `tests` becomes the student-authored test suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitConfig {
    #[serde(default)]
    pub code: Vec<String>,
    #[serde(default)]
    pub tests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinterConfig {
    #[serde(default = "default_linter_command")]
    pub command: String,
    /// Config file name, resolved inside the source root.
    #[serde(default)]
    pub config: Option<String>,
}

impl Default for LinterConfig {
    fn default() -> Self {
        LinterConfig {
            command: default_linter_command(),
            config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Minimum percentage the student suite must cover per checked file.
    #[serde(default = "default_coverage_target")]
    pub target_percent: f64,
    /// Measure branch coverage in addition to statement coverage.
    #[serde(default)]
    pub branch: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        CoverageConfig {
            target_percent: default_coverage_target(),
            branch: false,
        }
    }
}

/// Grader-side configuration, read from `<source>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub linter: LinterConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
}

impl Default for GraderConfig {
    fn default() -> Self {
        GraderConfig {
            submit: SubmitConfig::default(),
            interpreter: default_interpreter(),
            linter: LinterConfig::default(),
            coverage: CoverageConfig::default(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_linter_command() -> String {
    "flake8".to_string()
}

fn default_coverage_target() -> f64 {
    100.0
}

impl GraderConfig {
    /// Load configuration from a config.json file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("grader config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("failed to read config.json")?;

        serde_json::from_str(&content).context("failed to parse config.json")
    }

    /// Load from the conventional location inside the source root.
    pub fn load_default(paths: &GraderPaths) -> Result<Self> {
        Self::load(&paths.source_dir().join("config.json"))
    }
}
