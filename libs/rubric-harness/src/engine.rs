//! Sandboxed script execution.
//!
//! The submission is treated as an untrusted black box: it runs as a child
//! process of the configured interpreter with piped standard I/O, so nothing
//! it does (tracebacks, bad exits, garbage output) can crash the grader.
//! Failures surface as data in [`ScriptOutput`] for the assertion layer.
//!
//! No timeout is imposed here: a hung submission hangs the grading run. That
//! is an accepted property of the design, matching strictly sequential
//! execution.

use crate::sources::GraderPaths;
use crate::substitute::{self, VarValue};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// One script invocation: target file, simulated stdin, and the optional
/// knobs the assertion layer exposes.
#[derive(Debug, Clone)]
pub struct ScriptRun {
    pub(crate) filename: String,
    pub(crate) stdin: String,
    pub(crate) variables: Vec<(String, VarValue)>,
    pub(crate) args: String,
    pub(crate) msg: Option<String>,
    pub(crate) processor: Option<fn(String) -> String>,
    pub(crate) only_output: bool,
    pub(crate) from_file: bool,
}

impl ScriptRun {
    pub fn new(filename: impl Into<String>) -> Self {
        ScriptRun {
            filename: filename.into(),
            stdin: String::new(),
            variables: Vec::new(),
            args: String::new(),
            msg: None,
            processor: None,
            only_output: false,
            from_file: false,
        }
    }

    /// Text fed to the script's standard input.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Pin a top-level variable before execution.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    pub fn with_variables(mut self, variables: Vec<(String, VarValue)>) -> Self {
        self.variables = variables;
        self
    }

    /// Whitespace-split command line arguments.
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    /// Extra text appended to the diagnostic message on failure.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Post-process captured stdout before it is returned or compared.
    pub fn with_processor(mut self, processor: fn(String) -> String) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Return only the processed stdout, skipping stderr classification.
    pub fn only_output(mut self) -> Self {
        self.only_output = true;
        self
    }

    /// Interpret the stdin argument as a scaffold file name instead of a
    /// literal string. When the assertion layer sees this flag, the expected
    /// value is loaded from a scaffold file as well.
    pub fn stdin_from_file(mut self) -> Self {
        self.from_file = true;
        self
    }
}

/// Observable behavior of one script invocation.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Captured (possibly post-processed) standard output.
    pub stdout: String,
    /// Captured standard error, present only if the script wrote any.
    pub stderr: Option<String>,
    /// Diagnostic text for failure messages: the input that was fed in, or
    /// the error context when the script failed.
    pub message: String,
}

impl ScriptOutput {
    /// Any stderr content means the invocation must be treated as failed
    /// before output comparison happens.
    pub fn failed(&self) -> bool {
        self.stderr.is_some()
    }
}

/// Handle to a rewritten copy of a submission, scoped to its own temporary
/// directory. Dropping the handle deletes the copy; nothing global (search
/// paths, module registries) is touched.
pub struct SubstitutedScript {
    path: PathBuf,
    module_name: String,
    _dir: TempDir,
}

impl SubstitutedScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }
}

/// Restores the staged submission file after a substituted run.
///
/// Engaging the guard backs the original up into the substitution's
/// temporary directory and stages the rewritten copy in its place; dropping
/// it puts the original back on every exit path, then the directory itself
/// is removed.
struct FileSwapGuard {
    target: PathBuf,
    backup: PathBuf,
    _tmpdir: TempDir,
}

impl FileSwapGuard {
    fn engage(target: &Path, variables: &[(String, VarValue)]) -> Result<Self> {
        let (tmpdir, rewritten) = substitute::replace_variables(target, variables, None)?;
        let backup = tmpdir.path().join("__tmp_backup.py");
        fs::copy(target, &backup)
            .with_context(|| format!("failed to back up {}", target.display()))?;
        fs::copy(&rewritten, target)
            .with_context(|| format!("failed to stage substituted copy of {}", target.display()))?;
        Ok(FileSwapGuard {
            target: target.to_path_buf(),
            backup,
            _tmpdir: tmpdir,
        })
    }
}

impl Drop for FileSwapGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::copy(&self.backup, &self.target) {
            warn!(
                target = %self.target.display(),
                error = %e,
                "failed to restore submission file"
            );
        }
    }
}

/// Executes submissions with the configured interpreter.
pub struct ScriptEngine {
    paths: GraderPaths,
    interpreter: String,
}

impl ScriptEngine {
    pub fn new(paths: GraderPaths, interpreter: impl Into<String>) -> Self {
        ScriptEngine {
            paths,
            interpreter: interpreter.into(),
        }
    }

    pub fn paths(&self) -> &GraderPaths {
        &self.paths
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Run one submission file and classify its behavior.
    ///
    /// When substitutions are requested the staged file is swapped for the
    /// rewritten copy for the duration of the run and restored afterwards,
    /// so successive assertions always start from pristine state.
    pub async fn run_script(&self, run: ScriptRun) -> Result<ScriptOutput> {
        let target = self.paths.full_source_path(&run.filename)?;
        if !target.exists() {
            bail!("no such file: {}", target.display());
        }

        let _swap = if run.variables.is_empty() {
            None
        } else {
            Some(FileSwapGuard::engage(&target, &run.variables)?)
        };

        let input = if run.from_file {
            let stdin_path = self.paths.full_source_path(&run.stdin)?;
            fs::read_to_string(&stdin_path)
                .with_context(|| format!("failed to read input file {}", stdin_path.display()))?
        } else {
            run.stdin.clone()
        };

        let mut command = Command::new(&self.interpreter);
        command.arg(&target);
        if !run.args.is_empty() {
            command.args(run.args.split_whitespace());
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(script = %target.display(), "spawning submission");
        let mut child = command.spawn().with_context(|| {
            format!("failed to spawn {} {}", self.interpreter, target.display())
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The child is free to exit without draining its stdin.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(error = %e, "submission closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("failed to collect submission output")?;

        let mut actual_text = String::from_utf8_lossy(&output.stdout).to_string();
        if let Some(processor) = run.processor {
            actual_text = processor(actual_text);
            if run.only_output {
                return Ok(ScriptOutput {
                    stdout: actual_text,
                    stderr: None,
                    message: String::new(),
                });
            }
        }

        if !output.stderr.is_empty() {
            let source_prefix = format!("{}/", self.paths.source_dir().display());
            let stderr_text =
                String::from_utf8_lossy(&output.stderr).replace(&source_prefix, "");
            let message = format!(
                "Error during script execution:\n{stderr_text}\nOutput before failure:\n{actual_text}"
            );
            return Ok(ScriptOutput {
                stdout: actual_text,
                stderr: Some(stderr_text),
                message,
            });
        }

        let mut message = format!("Input was: '{}'", escape_input(&input));
        if !run.args.is_empty() {
            message.push_str(&format!("\nCommand line arguments: {}", run.args));
        }
        if let Some(msg) = &run.msg {
            message.push('\n');
            message.push_str(msg);
        }

        Ok(ScriptOutput {
            stdout: actual_text,
            stderr: None,
            message,
        })
    }

    /// Rewrite a submission under a unique synthetic module name and return
    /// the sandbox-scoped handle.
    pub fn substituted_script(
        &self,
        filename: &str,
        variables: &[(String, VarValue)],
    ) -> Result<SubstitutedScript> {
        let target = self.paths.full_source_path(filename)?;
        if !target.exists() {
            bail!("no such file: {}", target.display());
        }

        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        let unique = Uuid::new_v4().simple().to_string();
        let module_name = format!("{}_{}", stem, &unique[..8]);

        let (dir, path) =
            substitute::replace_variables(&target, variables, Some(&format!("{module_name}.py")))?;

        Ok(SubstitutedScript {
            path,
            module_name,
            _dir: dir,
        })
    }

    /// Substitute variable values, then hand the rewritten script to `f`.
    /// The temporary copy lives exactly as long as the closure's future.
    pub async fn run_with_substitution<F, Fut, T>(
        &self,
        filename: &str,
        variables: &[(String, VarValue)],
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(SubstitutedScript) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let script = self.substituted_script(filename, variables)?;
        f(script).await
    }
}

/// Render control characters visibly so failure messages stay on one line.
fn escape_input(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    // The engine only cares that `interpreter <file>` runs the file, so the
    // tests use the shell as a stand-in interpreter.
    fn scaffold() -> (TempDir, ScriptEngine) {
        let dir = tempfile::tempdir().unwrap();
        let paths = GraderPaths::new(dir.path());
        fs::create_dir_all(paths.source_dir()).unwrap();
        fs::create_dir_all(paths.submission_dir()).unwrap();
        let engine = ScriptEngine::new(paths, "sh");
        (dir, engine)
    }

    fn stage_script(engine: &ScriptEngine, name: &str, contents: &str) {
        fs::write(engine.paths().source_dir().join(name), contents).unwrap();
    }

    fn to_upper(s: String) -> String {
        s.to_uppercase()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "hello.py", "printf 'Hello World!\\n'\n");

        let result = engine
            .run_script(ScriptRun::new("hello.py"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "Hello World!\n");
        assert!(result.stderr.is_none());
        assert!(result.message.contains("Input was: ''"));
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "echo.py", "cat\n");

        let result = engine
            .run_script(ScriptRun::new("echo.py").with_stdin("line one\n"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "line one\n");
        assert!(result.message.contains("Input was: 'line one\\n'"));
    }

    #[tokio::test]
    async fn test_stderr_classified_as_failure() {
        let (_dir, engine) = scaffold();
        stage_script(
            &engine,
            "crash.py",
            "printf 'partial'\necho 'boom' 1>&2\n",
        );

        let result = engine.run_script(ScriptRun::new("crash.py")).await.unwrap();

        assert!(result.failed());
        assert_eq!(result.stdout, "partial");
        assert!(result.stderr.as_deref().unwrap().contains("boom"));
        assert!(result.message.starts_with("Error during script execution:"));
        assert!(result.message.contains("Output before failure:\npartial"));
    }

    #[tokio::test]
    async fn test_command_line_arguments() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "args.py", "echo \"$1\"\n");

        let result = engine
            .run_script(ScriptRun::new("args.py").with_args("foo"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "foo\n");
        assert!(result.message.contains("Command line arguments: foo"));
    }

    #[tokio::test]
    async fn test_substitution_swaps_and_restores() {
        let (_dir, engine) = scaffold();
        // The script prints its own source, so the substituted line is
        // observable in stdout while never being executed.
        let original = "cat \"$0\"\nexit 0\ngreeting = 'original'\n";
        stage_script(&engine, "subst.py", original);

        let result = engine
            .run_script(ScriptRun::new("subst.py").with_variable("greeting", "changed"))
            .await
            .unwrap();

        assert!(result.stdout.contains("greeting = 'changed'"));
        assert!(!result.stdout.contains("greeting = 'original'"));

        // Pristine state restored for the next assertion.
        let on_disk =
            fs::read_to_string(engine.paths().source_dir().join("subst.py")).unwrap();
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn test_processor_applied() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "hello.py", "printf 'Hello\\n'\n");

        let result = engine
            .run_script(ScriptRun::new("hello.py").with_processor(to_upper))
            .await
            .unwrap();

        assert_eq!(result.stdout, "HELLO\n");
    }

    #[tokio::test]
    async fn test_only_output_skips_diagnostics() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "hello.py", "printf 'hi'\n");

        let result = engine
            .run_script(
                ScriptRun::new("hello.py")
                    .with_processor(to_upper)
                    .only_output(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout, "HI");
        assert!(result.message.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_distinct_error() {
        let (_dir, engine) = scaffold();

        let err = engine
            .run_script(ScriptRun::new("ghost.py"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn test_stdin_from_scaffold_file() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "echo.py", "cat\n");
        stage_script(&engine, "input.txt", "data from file\n");

        let result = engine
            .run_script(
                ScriptRun::new("echo.py")
                    .with_stdin("input.txt")
                    .stdin_from_file(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout, "data from file\n");
    }

    #[tokio::test]
    async fn test_substituted_script_handle() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "prog.py", "limit = 10\n");

        let script = engine
            .substituted_script("prog.py", &[("limit".to_string(), VarValue::Int(3))])
            .unwrap();

        assert!(script.module_name().starts_with("prog_"));
        let contents = fs::read_to_string(script.path()).unwrap();
        assert_eq!(contents, "limit = 3\n");

        let path = script.path().to_path_buf();
        drop(script);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_with_substitution_scopes_cleanup() {
        let (_dir, engine) = scaffold();
        stage_script(&engine, "prog.py", "limit = 10\n");

        let seen_path = engine
            .run_with_substitution(
                "prog.py",
                &[("limit".to_string(), VarValue::Int(5))],
                |script| async move {
                    assert!(script.path().exists());
                    Ok(script.path().to_path_buf())
                },
            )
            .await
            .unwrap();

        assert!(!seen_path.exists());
    }
}
