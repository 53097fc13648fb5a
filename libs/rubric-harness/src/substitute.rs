//! Variable substitution: pin top-level variables of a submitted script to
//! grader-chosen values before execution.
//!
//! The rewrite happens on an isolated copy inside a private temporary
//! directory; the submitted file itself is never touched. Only a line whose
//! left-hand side is the bare identifier followed by a single `=` is
//! eligible, and only the first such line per identifier is replaced, so
//! comparisons like `count == 3` and later reassignments stay intact.
//! Chained targets (`a = b = 1`) are unsupported.

use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstituteError {
    #[error("invalid identifier {0:?}: {1}")]
    BadIdentifier(String, regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A literal value rendered into the rewritten script.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for VarValue {
    /// Python literal form, so the rewritten line parses in the target
    /// interpreter.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Int(v) => write!(f, "{v}"),
            VarValue::Float(v) => write!(f, "{v}"),
            VarValue::Bool(true) => write!(f, "True"),
            VarValue::Bool(false) => write!(f, "False"),
            VarValue::Str(v) => {
                let escaped = v
                    .replace('\\', "\\\\")
                    .replace('\'', "\\'")
                    .replace('\n', "\\n")
                    .replace('\r', "\\r")
                    .replace('\t', "\\t");
                write!(f, "'{escaped}'")
            }
        }
    }
}

impl From<i64> for VarValue {
    fn from(v: i64) -> Self {
        VarValue::Int(v)
    }
}

impl From<f64> for VarValue {
    fn from(v: f64) -> Self {
        VarValue::Float(v)
    }
}

impl From<bool> for VarValue {
    fn from(v: bool) -> Self {
        VarValue::Bool(v)
    }
}

impl From<&str> for VarValue {
    fn from(v: &str) -> Self {
        VarValue::Str(v.to_string())
    }
}

impl From<String> for VarValue {
    fn from(v: String) -> Self {
        VarValue::Str(v)
    }
}

/// Rewrite `source_path` with each identifier pinned to its value and write
/// the result into a fresh temporary directory.
///
/// Identifiers that never appear as a top-level assignment are silently
/// skipped, so callers may pass a superset of candidate variables. Returns
/// the temporary directory (the caller owns its lifetime; dropping it deletes
/// the copy) and the path of the rewritten file inside it. `new_name`
/// overrides the file name of the copy.
pub fn replace_variables(
    source_path: &Path,
    variables: &[(String, VarValue)],
    new_name: Option<&str>,
) -> Result<(TempDir, PathBuf), SubstituteError> {
    let mut contents = fs::read_to_string(source_path)?;

    for (name, value) in variables {
        let pattern = format!(
            r"(?m)^(?P<indent>[ \t]*){}[ \t]*=([^=\n][^\n]*)?$",
            regex::escape(name)
        );
        let regex = Regex::new(&pattern)
            .map_err(|e| SubstituteError::BadIdentifier(name.clone(), e))?;

        let replacement = value.to_string();
        // Regex::replace rewrites only the first match.
        contents = regex
            .replace(&contents, |caps: &regex::Captures<'_>| {
                format!("{}{} = {}", &caps["indent"], name, replacement)
            })
            .into_owned();
    }

    let dir = tempfile::tempdir()?;
    let file_name = match new_name {
        Some(name) => name.to_string(),
        None => source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script.py".to_string()),
    };
    let new_path = dir.path().join(file_name);
    fs::write(&new_path, contents)?;

    Ok((dir, new_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_script(contents: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.py");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn substitute(contents: &str, variables: &[(String, VarValue)]) -> String {
        let (_src, path) = write_script(contents);
        let (dir, new_path) = replace_variables(&path, variables, None).unwrap();
        let rewritten = fs::read_to_string(&new_path).unwrap();
        drop(dir);
        rewritten
    }

    #[test]
    fn test_replaces_simple_assignment() {
        let rewritten = substitute(
            "size = 10\nprint(size)\n",
            &[("size".to_string(), VarValue::Int(42))],
        );
        assert_eq!(rewritten, "size = 42\nprint(size)\n");
    }

    #[test]
    fn test_replaces_only_first_occurrence() {
        let rewritten = substitute(
            "size = 10\nsize = 20\n",
            &[("size".to_string(), VarValue::Int(1))],
        );
        assert_eq!(rewritten, "size = 1\nsize = 20\n");
    }

    #[test]
    fn test_leaves_comparison_alone() {
        let source = "size = 10\nif size == 10:\n    print('ten')\n";
        let rewritten = substitute(source, &[("size".to_string(), VarValue::Int(5))]);
        assert!(rewritten.contains("size = 5"));
        assert!(rewritten.contains("size == 10"));
    }

    #[test]
    fn test_preserves_indentation() {
        let rewritten = substitute(
            "    size = 10\n",
            &[("size".to_string(), VarValue::Int(3))],
        );
        assert_eq!(rewritten, "    size = 3\n");
    }

    #[test]
    fn test_does_not_match_prefixed_identifiers() {
        let source = "max_size = 10\nsize = 20\n";
        let rewritten = substitute(source, &[("size".to_string(), VarValue::Int(1))]);
        assert!(rewritten.contains("max_size = 10"));
        assert!(rewritten.contains("size = 1"));
    }

    #[test]
    fn test_missing_identifier_is_skipped() {
        let source = "x = 1\n";
        let rewritten = substitute(source, &[("ghost".to_string(), VarValue::Int(9))]);
        assert_eq!(rewritten, source);
    }

    #[test]
    fn test_original_file_unchanged() {
        let (_src, path) = write_script("greeting = 'hi'\n");
        let (dir, _new_path) = replace_variables(
            &path,
            &[("greeting".to_string(), VarValue::from("hello"))],
            None,
        )
        .unwrap();
        drop(dir);
        assert_eq!(fs::read_to_string(&path).unwrap(), "greeting = 'hi'\n");
    }

    #[test]
    fn test_temporary_directory_cleaned_up() {
        let (_src, path) = write_script("x = 1\n");
        let (dir, new_path) =
            replace_variables(&path, &[("x".to_string(), VarValue::Int(2))], None).unwrap();
        assert!(new_path.exists());
        drop(dir);
        assert!(!new_path.exists());
    }

    #[test]
    fn test_new_name_override() {
        let (_src, path) = write_script("x = 1\n");
        let (_dir, new_path) =
            replace_variables(&path, &[], Some("prog_1.py")).unwrap();
        assert_eq!(new_path.file_name().unwrap(), "prog_1.py");
    }

    #[test]
    fn test_python_literal_rendering() {
        assert_eq!(VarValue::Int(-3).to_string(), "-3");
        assert_eq!(VarValue::Float(2.5).to_string(), "2.5");
        assert_eq!(VarValue::Bool(true).to_string(), "True");
        assert_eq!(VarValue::Bool(false).to_string(), "False");
        assert_eq!(
            VarValue::from("it's\n").to_string(),
            "'it\\'s\\n'"
        );
    }

    #[test]
    fn test_string_substitution_round_trip() {
        let rewritten = substitute(
            "greeting = 'hi'\n",
            &[("greeting".to_string(), VarValue::from("hello world"))],
        );
        assert_eq!(rewritten, "greeting = 'hello world'\n");
    }
}
