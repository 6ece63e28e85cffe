//! Configuration Vault – reads/writes `warden.toml`.
//!
//! Lookup order: the `--config` flag, then `./warden.toml`, then
//! `~/.warden/config.toml`.  A missing file means defaults.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use warden_kernel::VerifierConfig;
use warden_kernel::verifier::default_runners;
use warden_types::{RunnerSpec, WardenError};

/// File name looked for in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "warden.toml";

/// Persisted configuration.  Relative paths are resolved against `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Project root.  Defaults to the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Base directory of data units.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base directory of program units.
    #[serde(default = "default_program_dir")]
    pub program_dir: PathBuf,

    /// Where the published registry lives.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Bound on each syntax/runtime check, in seconds.
    #[serde(default = "default_runtime_timeout_secs")]
    pub runtime_timeout_secs: u64,

    /// Pause between supervisor cycles, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// File names that are never verified.
    #[serde(default)]
    pub excluded_files: Vec<String>,

    /// Directories whose units are never verified.
    #[serde(default)]
    pub excluded_dirs: Vec<PathBuf>,

    /// Runner per file extension.
    #[serde(default = "default_runners")]
    pub runners: BTreeMap<String, RunnerSpec>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("SystemFiles")
}
fn default_program_dir() -> PathBuf {
    PathBuf::from("SystemPrograms")
}
fn default_registry_path() -> PathBuf {
    PathBuf::from("state").join("registry.cfg")
}
fn default_runtime_timeout_secs() -> u64 {
    10
}
fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: None,
            data_dir: default_data_dir(),
            program_dir: default_program_dir(),
            registry_path: default_registry_path(),
            runtime_timeout_secs: default_runtime_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            excluded_files: Vec::new(),
            excluded_dirs: Vec::new(),
            runners: default_runners(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Absolute-path [`VerifierConfig`], with `cwd` standing in for an unset
    /// root.
    ///
    /// # Errors
    ///
    /// [`WardenError::Config`] for a zero timeout or poll interval, or a
    /// runner without a `run` command.
    pub fn verifier_config(&self, cwd: &Path) -> Result<VerifierConfig, WardenError> {
        if self.runtime_timeout_secs == 0 {
            return Err(WardenError::Config("runtime_timeout_secs must be positive".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(WardenError::Config("poll_interval_secs must be positive".into()));
        }
        if let Some((ext, _)) = self.runners.iter().find(|(_, spec)| spec.run.is_empty()) {
            return Err(WardenError::Config(format!("runner '{ext}' has an empty run command")));
        }

        let root = match &self.root {
            Some(root) => cwd.join(root),
            None => cwd.to_path_buf(),
        };
        Ok(VerifierConfig {
            data_dir: root.join(&self.data_dir),
            program_dir: root.join(&self.program_dir),
            registry_path: root.join(&self.registry_path),
            runtime_timeout: Duration::from_secs(self.runtime_timeout_secs),
            excluded_files: self.excluded_files.iter().cloned().collect::<BTreeSet<_>>(),
            excluded_dirs: self.excluded_dirs.iter().map(|d| root.join(d)).collect(),
            runners: self
                .runners
                .iter()
                .map(|(ext, spec)| (ext.to_ascii_lowercase(), spec.clone()))
                .collect(),
            root,
        })
    }
}

/// Pick the config file: `explicit`, else `./warden.toml` when present,
/// else `~/.warden/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    home_config_path()
}

/// `~/.warden/config.toml`.
pub fn home_config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".warden").join("config.toml")
}

/// Load `path` (or defaults when absent) and apply environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config, WardenError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the config at `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, WardenError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| WardenError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| WardenError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `WARDEN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WARDEN_ROOT` | `root` |
/// | `WARDEN_REGISTRY` | `registry_path` |
/// | `WARDEN_RUNTIME_TIMEOUT_SECS` | `runtime_timeout_secs` |
/// | `WARDEN_POLL_INTERVAL_SECS` | `poll_interval_secs` |
///
/// Values that do not parse as numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WARDEN_ROOT") {
        cfg.root = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("WARDEN_REGISTRY") {
        cfg.registry_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("WARDEN_RUNTIME_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.runtime_timeout_secs = secs;
    }
    if let Ok(v) = std::env::var("WARDEN_POLL_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.poll_interval_secs = secs;
    }
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), WardenError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| WardenError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| WardenError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| WardenError::Config(format!("failed to write {}: {e}", path.display())))
}
