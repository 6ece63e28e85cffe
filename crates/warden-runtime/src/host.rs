//! Managed-unit hosting.
//!
//! The [`Supervisor`][crate::supervisor::Supervisor] never touches a unit
//! directly.  It asks a [`UnitHost`] to load, reload or unload units by key
//! and only looks at whether that worked.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::{debug, info, warn};
use warden_kernel::VerifierConfig;
use warden_registry::{Manifest, UnitLocator};
use warden_types::{LoadError, RunnerSpec, Unit, UnitKey, UnitKind};

/// Load/reload/unload actions for units identified by registry key.
///
/// `load` and `reload` must be idempotent.  A unit whose backing file cannot
/// be located must fail with [`LoadError::NotFound`]; every other failure is
/// [`LoadError::Failed`].
pub trait UnitHost: Send {
    /// Bring an untracked unit up.
    fn load(&mut self, key: &UnitKey) -> Result<(), LoadError>;

    /// Bring a unit up again after an earlier failure.
    fn reload(&mut self, key: &UnitKey) -> Result<(), LoadError>;

    /// Take a unit down.
    fn unload(&mut self, key: &UnitKey) -> Result<(), LoadError>;

    /// Asked every cycle for units the supervisor believes are healthy.  An
    /// error marks the unit unhealthy so the next cycle reloads it.
    fn health_check(&mut self, _key: &UnitKey) -> Result<(), LoadError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessHost
// ─────────────────────────────────────────────────────────────────────────────

enum Worker {
    Process(Child),
    /// A worker that ran to completion with exit code 0.
    Finished,
    /// A data unit; nothing runs, it is only attached.
    Resource,
}

/// Runs program units as worker processes and attaches data units.
///
/// Units are looked up by key in a [`Manifest`] of the configured base
/// directories, never by turning the group back into a directory.  The
/// manifest is rediscovered whenever a key is missing from it or its file
/// has gone.
///
/// Only units found under the program directory whose extension has a
/// [`RunnerSpec`] get a worker: the runner's `run` argv, started in the
/// project root with stdin closed.  Everything else is a resource whose load
/// only checks that the file exists.  A worker that exits 0 is done; one
/// that exits with any other status fails its next health check.
pub struct ProcessHost {
    locator: UnitLocator,
    data_dir: PathBuf,
    program_dir: PathBuf,
    ignore: Vec<PathBuf>,
    runners: BTreeMap<String, RunnerSpec>,
    manifest: Manifest,
    workers: HashMap<UnitKey, Worker>,
}

impl ProcessHost {
    /// Host the units laid out as `config` describes.
    pub fn new(config: &VerifierConfig) -> Self {
        let mut host = Self {
            locator: UnitLocator::new(config.root.clone()),
            data_dir: config.data_dir.clone(),
            program_dir: config.program_dir.clone(),
            ignore: vec![config.registry_path.clone()],
            runners: config.runners.clone(),
            manifest: Manifest::default(),
            workers: HashMap::new(),
        };
        host.refresh();
        host
    }

    /// Rediscover the units on disk.
    pub fn refresh(&mut self) {
        self.manifest = Manifest::discover(&self.locator, &self.data_dir, &self.program_dir, &self.ignore);
    }

    /// Whether `key` is attached (resource) or has a worker still running.
    pub fn is_active(&mut self, key: &UnitKey) -> bool {
        match self.workers.get_mut(key) {
            Some(Worker::Resource) => true,
            Some(Worker::Process(child)) => matches!(child.try_wait(), Ok(None)),
            Some(Worker::Finished) | None => false,
        }
    }

    /// OS process id of the unit's worker, if it has one.
    pub fn worker_pid(&self, key: &UnitKey) -> Option<u32> {
        match self.workers.get(key)? {
            Worker::Process(child) => Some(child.id()),
            Worker::Finished | Worker::Resource => None,
        }
    }

    fn locate(&mut self, key: &UnitKey) -> Result<Unit, LoadError> {
        let found = |manifest: &Manifest| manifest.get(key).filter(|u| u.path.is_file()).cloned();
        if let Some(unit) = found(&self.manifest) {
            return Ok(unit);
        }
        self.refresh();
        found(&self.manifest).ok_or_else(|| LoadError::NotFound(key.clone()))
    }

    fn launch(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        let unit = self.locate(key)?;

        let spec = match unit.kind {
            UnitKind::Program => unit.extension().and_then(|e| self.runners.get(&e)),
            UnitKind::Data => None,
        };
        let Some(spec) = spec else {
            debug!(unit = %key, "attached resource");
            self.workers.insert(key.clone(), Worker::Resource);
            return Ok(());
        };

        let argv = RunnerSpec::expand(&spec.run, &unit.path);
        let Some((program, args)) = argv.split_first() else {
            return Err(LoadError::Failed {
                unit: key.clone(),
                details: "runner has an empty run command".to_string(),
            });
        };
        let child = Command::new(program)
            .args(args)
            .current_dir(self.locator.root())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| LoadError::Failed {
                unit: key.clone(),
                details: format!("{program}: {e}"),
            })?;

        info!(unit = %key, pid = child.id(), "worker started");
        self.workers.insert(key.clone(), Worker::Process(child));
        Ok(())
    }

    fn stop(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        let Some(Worker::Process(mut child)) = self.workers.remove(key) else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(unit = %key, %status, "worker had already exited");
            return Ok(());
        }
        let failed = |e: std::io::Error| LoadError::Failed {
            unit: key.clone(),
            details: e.to_string(),
        };
        child.kill().map_err(failed)?;
        child.wait().map_err(failed)?;
        info!(unit = %key, "worker stopped");
        Ok(())
    }
}

impl UnitHost for ProcessHost {
    fn load(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        if self.is_active(key) {
            return Ok(());
        }
        self.launch(key)
    }

    fn reload(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        if let Err(e) = self.stop(key) {
            warn!(unit = %key, error = %e, "could not stop previous worker");
        }
        self.launch(key)
    }

    fn unload(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        self.stop(key)
    }

    fn health_check(&mut self, key: &UnitKey) -> Result<(), LoadError> {
        let exited = match self.workers.get_mut(key) {
            Some(Worker::Process(child)) => child.try_wait().map_err(|e| LoadError::Failed {
                unit: key.clone(),
                details: e.to_string(),
            })?,
            _ => return Ok(()),
        };
        match exited {
            None => Ok(()),
            Some(status) if status.success() => {
                debug!(unit = %key, "worker finished");
                self.workers.insert(key.clone(), Worker::Finished);
                Ok(())
            }
            Some(status) => {
                self.workers.remove(key);
                Err(LoadError::Failed {
                    unit: key.clone(),
                    details: format!("worker exited with {status}"),
                })
            }
        }
    }
}
