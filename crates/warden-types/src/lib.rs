use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verdict assigned to a unit by a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The unit passed every stage that applies to it.
    Enabled,
    /// The unit failed a stage and must not be loaded.
    Disabled,
    /// Manually excluded. Never changed by a verification pass.
    NotImplemented,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Enabled => "enabled",
            Status::Disabled => "disabled",
            Status::NotImplemented => "not_implemented",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    /// Case-insensitive; the legacy spelling `not implemented` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" => Ok(Status::Enabled),
            "disabled" => Ok(Status::Disabled),
            "not_implemented" | "not implemented" => Ok(Status::NotImplemented),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Whether a unit is a passive resource or an executable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Data,
    Program,
}

/// Registry coordinates of a unit: its group (section) and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub group: String,
    pub name: String,
}

impl UnitKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// A candidate file discovered under one of the base directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub key: UnitKey,
    /// Absolute location on disk.
    pub path: PathBuf,
    pub kind: UnitKind,
}

impl Unit {
    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn group(&self) -> &str {
        &self.key.group
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// How to check and run program units of one file extension.
///
/// Every `{path}` token in an argv is replaced with the unit's absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerSpec {
    /// Parse-only well-formedness check. Empty means "always passes".
    #[serde(default)]
    pub check: Vec<String>,
    /// Standalone execution used by the runtime check and by worker hosts.
    pub run: Vec<String>,
}

impl RunnerSpec {
    /// Substitute `{path}` into `argv`.
    pub fn expand(argv: &[String], path: &std::path::Path) -> Vec<String> {
        let path = path.to_string_lossy();
        argv.iter().map(|arg| arg.replace("{path}", &path)).collect()
    }
}

/// Why a unit was marked [`Status::Disabled`] during verification.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFailure {
    #[error("invalid data file: {details}")]
    DataValidation { details: String },

    #[error("syntax check failed: {details}")]
    Syntax { details: String },

    #[error("exited with code {code:?}: {stderr}")]
    Runtime { code: Option<i32>, stderr: String },

    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("failed to launch: {details}")]
    Launch { details: String },
}

/// Failure of a host load/reload/unload action.
///
/// Only [`LoadError::NotFound`] triggers a self-healing verification pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("unit not found: {0}")]
    NotFound(UnitKey),

    #[error("failed to load {unit}: {details}")]
    Failed { unit: UnitKey, details: String },
}

/// Errors that abort a whole operation rather than a single unit.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("registry I/O error at {path}: {source}")]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registry at line {line}: {details}")]
    RegistryParse { line: usize, details: String },

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_legacy_spelling() {
        assert_eq!("not implemented".parse::<Status>(), Ok(Status::NotImplemented));
        assert_eq!(" Enabled ".parse::<Status>(), Ok(Status::Enabled));
        assert!("maybe".parse::<Status>().is_err());
    }

    #[test]
    fn status_display_is_canonical() {
        assert_eq!(Status::NotImplemented.to_string(), "not_implemented");
    }

    #[test]
    fn unit_key_display() {
        let key = UnitKey::new("SystemPrograms.Vision", "AI_Vision.py");
        assert_eq!(key.to_string(), "SystemPrograms.Vision/AI_Vision.py");
    }

    #[test]
    fn runner_spec_expands_path() {
        let argv = vec!["sh".to_string(), "-n".to_string(), "{path}".to_string()];
        let out = RunnerSpec::expand(&argv, std::path::Path::new("/tmp/a.sh"));
        assert_eq!(out, vec!["sh", "-n", "/tmp/a.sh"]);
    }

    #[test]
    fn unit_failure_serializes_with_kind_tag() {
        let failure = UnitFailure::Timeout { after_ms: 10_000 };
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"kind\":\"timeout\""));
        assert!(failure.to_string().contains("10000 ms"));
    }

    #[test]
    fn unit_extension_is_lowercased() {
        let unit = Unit {
            key: UnitKey::new("SystemFiles", "Tokens.JSON"),
            path: PathBuf::from("/x/SystemFiles/Tokens.JSON"),
            kind: UnitKind::Data,
        };
        assert_eq!(unit.extension().as_deref(), Some("json"));
    }
}
