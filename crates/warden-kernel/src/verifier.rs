//! [`Verifier`] – the file authorization pass.
//!
//! A pass runs four stages in a fixed order, each feeding the next:
//!
//! 1. **Discover** – every file under the data directory is marked `enabled`.
//! 2. **Validate data** – `.json` and `.toml` data files are parsed; a parse
//!    failure marks the unit `disabled`.
//! 3. **Check syntax** – program units with a configured runner are parsed
//!    without executing.  Manually excluded units become `not_implemented`
//!    and are skipped.  Passing units move on to stage 4.
//! 4. **Check runtime** – each passing unit is executed standalone with a
//!    timeout; anything but exit code 0 marks it `disabled`.
//!
//! All verdicts land in a [`DraftPass`].  Only after stage 4 is the draft
//! published, by replacing the registry file in one rename.  A per-unit
//! failure never aborts a pass; only a failed publish does.
//!
//! `not_implemented` is terminal: an entry that the previously published
//! registry already marks `not_implemented` is carried into the draft as is
//! and its unit is not checked again.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use warden_registry::{Manifest, StatusRegistry, UnitLocator};
use warden_types::{RunnerSpec, Status, Unit, UnitFailure, UnitKey, UnitKind, WardenError};

use crate::runner::ProgramRunner;

/// Default bound on a single runtime check.
pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a [`Verifier`] needs to know about the project layout.
///
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Project root; groups are derived relative to it and checks run in it.
    pub root: PathBuf,
    /// Base directory of data units.
    pub data_dir: PathBuf,
    /// Base directory of program units.
    pub program_dir: PathBuf,
    /// Location of the published registry.
    pub registry_path: PathBuf,
    /// Bound on each syntax and runtime check.
    pub runtime_timeout: Duration,
    /// File names that are always `not_implemented`.
    pub excluded_files: BTreeSet<String>,
    /// Directories whose program units are always `not_implemented`.
    pub excluded_dirs: Vec<PathBuf>,
    /// Runner per lower-case file extension.
    pub runners: BTreeMap<String, RunnerSpec>,
}

impl VerifierConfig {
    /// Conventional layout under `root`: `SystemFiles/`, `SystemPrograms/`
    /// and `state/registry.cfg`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("SystemFiles"),
            program_dir: root.join("SystemPrograms"),
            registry_path: root.join("state").join("registry.cfg"),
            runtime_timeout: DEFAULT_RUNTIME_TIMEOUT,
            excluded_files: BTreeSet::new(),
            excluded_dirs: Vec::new(),
            runners: default_runners(),
            root,
        }
    }
}

/// Built-in runners for Python and POSIX shell units.
pub fn default_runners() -> BTreeMap<String, RunnerSpec> {
    let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut runners = BTreeMap::new();
    runners.insert(
        "py".to_string(),
        RunnerSpec {
            check: argv(&[
                "python3",
                "-c",
                "import ast, sys; ast.parse(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1])",
                "{path}",
            ]),
            run: argv(&["python3", "{path}"]),
        },
    );
    runners.insert(
        "sh".to_string(),
        RunnerSpec {
            check: argv(&["sh", "-n", "{path}"]),
            run: argv(&["sh", "{path}"]),
        },
    );
    runners
}

// ─────────────────────────────────────────────────────────────────────────────
// Draft and report
// ─────────────────────────────────────────────────────────────────────────────

/// Verdict for one unit plus the reason when it was disabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub key: UnitKey,
    pub kind: UnitKind,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnitFailure>,
}

/// Private working state of one pass.  Nothing in it is visible to readers of
/// the published registry until [`Verifier::run_pass`] publishes it.
#[derive(Debug, Default)]
pub struct DraftPass {
    registry: StatusRegistry,
    findings: BTreeMap<UnitKey, Finding>,
    terminal: BTreeSet<UnitKey>,
    data_units: Vec<Unit>,
}

impl DraftPass {
    /// Start a draft, carrying over every `not_implemented` entry of
    /// `previous`.
    pub fn new(previous: &StatusRegistry) -> Self {
        let mut draft = Self::default();
        for key in previous.not_implemented() {
            draft.registry.set(&key, Status::NotImplemented);
            draft.terminal.insert(key);
        }
        draft
    }

    /// Record a verdict.  Returns `false` (and changes nothing) when the unit
    /// is terminally `not_implemented`.
    pub fn record(&mut self, unit: &Unit, status: Status, reason: Option<UnitFailure>) -> bool {
        let (status, reason, accepted) = if self.terminal.contains(&unit.key) {
            (Status::NotImplemented, None, false)
        } else {
            (status, reason, true)
        };
        self.registry.set(&unit.key, status);
        self.findings.insert(
            unit.key.clone(),
            Finding {
                key: unit.key.clone(),
                kind: unit.kind,
                status,
                reason,
            },
        );
        accepted
    }

    pub fn is_terminal(&self, key: &UnitKey) -> bool {
        self.terminal.contains(key)
    }

    pub fn status(&self, key: &UnitKey) -> Option<Status> {
        self.registry.get(key)
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.values()
    }
}

/// Outcome of a published pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub registry: StatusRegistry,
    pub findings: Vec<Finding>,
}

impl VerificationReport {
    pub fn count(&self, status: Status) -> usize {
        self.findings.iter().filter(|f| f.status == status).count()
    }

    pub fn finding(&self, key: &UnitKey) -> Option<&Finding> {
        self.findings.iter().find(|f| &f.key == key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Runs verification passes and publishes their verdicts.
///
/// Share it behind an `Arc`; concurrent calls to [`Verifier::run_pass`]
/// queue on an internal lock so drafts never interleave.
pub struct Verifier {
    config: VerifierConfig,
    locator: UnitLocator,
    runner: ProgramRunner,
    pass_lock: Mutex<()>,
    passes: AtomicU64,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        let locator = UnitLocator::new(config.root.clone());
        let runner = ProgramRunner::new(
            config.runners.clone(),
            config.root.clone(),
            config.runtime_timeout,
        );
        Self {
            config,
            locator,
            runner,
            pass_lock: Mutex::new(()),
            passes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn locator(&self) -> &UnitLocator {
        &self.locator
    }

    /// Number of passes that have been published by this verifier.
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Run all four stages and publish the result.
    ///
    /// # Errors
    ///
    /// Only a failure to publish the registry is returned; the previously
    /// published registry is then left as it was.
    pub async fn run_pass(&self) -> Result<VerificationReport, WardenError> {
        let _guard = self.pass_lock.lock().await;
        let pass_id = Uuid::new_v4();
        self.execute_pass(pass_id)
            .instrument(info_span!("verification_pass", %pass_id))
            .await
    }

    async fn execute_pass(&self, pass_id: Uuid) -> Result<VerificationReport, WardenError> {
        let started_at = Utc::now();
        info!("verification pass started");

        let previous = StatusRegistry::load(&self.config.registry_path).unwrap_or_else(|e| {
            warn!(error = %e, "previous registry unreadable; starting from empty");
            StatusRegistry::new()
        });
        let mut draft = DraftPass::new(&previous);
        let manifest = self.discover_manifest();

        self.discover(&manifest, &mut draft);
        self.validate_data(&mut draft);
        let passed = self.check_syntax(&manifest, &mut draft).await;
        self.check_runtime(passed, &mut draft).await;

        draft.registry.publish(&self.config.registry_path)?;
        self.passes.fetch_add(1, Ordering::SeqCst);

        let report = VerificationReport {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            findings: draft.findings().cloned().collect(),
            registry: draft.registry,
        };
        info!(
            enabled = report.count(Status::Enabled),
            disabled = report.count(Status::Disabled),
            not_implemented = report.count(Status::NotImplemented),
            "verification pass published"
        );
        Ok(report)
    }

    /// Walk both base directories, ignoring the registry file itself.
    pub fn discover_manifest(&self) -> Manifest {
        Manifest::discover(
            &self.locator,
            &self.config.data_dir,
            &self.config.program_dir,
            std::slice::from_ref(&self.config.registry_path),
        )
    }

    /// Whether the manual exclusion policy applies to `unit`.
    pub fn is_excluded(&self, unit: &Unit) -> bool {
        if self.config.excluded_files.contains(unit.name()) {
            return true;
        }
        unit.path
            .parent()
            .is_some_and(|dir| self.config.excluded_dirs.iter().any(|x| dir.starts_with(x)))
    }

    /// Stage 1: existence is the only criterion for data units.
    pub fn discover(&self, manifest: &Manifest, draft: &mut DraftPass) {
        for unit in manifest.of_kind(UnitKind::Data) {
            debug!(unit = %unit.key, path = %unit.path.display(), "discovered");
            draft.record(unit, Status::Enabled, None);
            draft.data_units.push(unit.clone());
        }
    }

    /// Stage 2: parse every recognized structured data file found in stage 1.
    pub fn validate_data(&self, draft: &mut DraftPass) {
        let units = std::mem::take(&mut draft.data_units);
        for unit in &units {
            if draft.is_terminal(&unit.key) {
                continue;
            }
            match validate_data_file(unit) {
                None => {}
                Some(Ok(())) => {
                    debug!(unit = %unit.key, "data file valid");
                    draft.record(unit, Status::Enabled, None);
                }
                Some(Err(failure)) => {
                    warn!(unit = %unit.key, reason = %failure, "data file invalid");
                    draft.record(unit, Status::Disabled, Some(failure));
                }
            }
        }
        draft.data_units = units;
    }

    /// Stage 3: static well-formedness of program units.  Returns the units
    /// that go on to the runtime stage.
    pub async fn check_syntax(&self, manifest: &Manifest, draft: &mut DraftPass) -> Vec<Unit> {
        let mut passed = Vec::new();
        for unit in manifest.of_kind(UnitKind::Program) {
            if draft.is_terminal(&unit.key) {
                debug!(unit = %unit.key, "not_implemented; skipping");
                draft.record(unit, Status::NotImplemented, None);
                continue;
            }
            if self.is_excluded(unit) {
                info!(unit = %unit.key, "manually excluded");
                draft.record(unit, Status::NotImplemented, None);
                continue;
            }
            if self.runner.spec_for(unit).is_none() {
                debug!(unit = %unit.key, "no runner for extension; ignoring");
                continue;
            }
            match self.runner.check_syntax(unit).await {
                Ok(()) => {
                    debug!(unit = %unit.key, "syntax ok");
                    draft.record(unit, Status::Enabled, None);
                    passed.push(unit.clone());
                }
                Err(failure) => {
                    warn!(unit = %unit.key, reason = %failure, "syntax check failed");
                    draft.record(unit, Status::Disabled, Some(failure));
                }
            }
        }
        passed
    }

    /// Stage 4: isolated standalone execution of every unit that passed
    /// stage 3.
    pub async fn check_runtime(&self, passed: Vec<Unit>, draft: &mut DraftPass) {
        for unit in passed {
            match self.runner.check_runtime(&unit).await {
                Ok(()) => {
                    info!(unit = %unit.key, "runtime ok");
                    draft.record(&unit, Status::Enabled, None);
                }
                Err(failure) => {
                    warn!(unit = %unit.key, reason = %failure, "runtime check failed");
                    draft.record(&unit, Status::Disabled, Some(failure));
                }
            }
        }
    }
}

/// `None` when the file type is not a recognized structured format.
fn validate_data_file(unit: &Unit) -> Option<Result<(), UnitFailure>> {
    let ext = unit.extension()?;
    if ext != "json" && ext != "toml" {
        return None;
    }
    Some(parse_structured(&unit.path, &ext))
}

fn parse_structured(path: &Path, ext: &str) -> Result<(), UnitFailure> {
    let invalid = |details: String| UnitFailure::DataValidation { details };
    let text = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    match ext {
        "json" => serde_json::from_str::<serde_json::Value>(&text)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        _ => toml::from_str::<toml::Table>(&text)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
    }
}
