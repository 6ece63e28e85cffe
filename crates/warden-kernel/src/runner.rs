//! [`ProgramRunner`] – isolated, time-bounded execution of program units.
//!
//! Every invocation is a fresh child process started in the project root
//! with stdin closed and stdout/stderr captured.  If the child has not exited
//! when the timeout elapses it is killed and the call reports
//! [`UnitFailure::Timeout`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;
use warden_types::{RunnerSpec, Unit, UnitFailure};

/// Longest stderr excerpt kept in a failure reason.
const STDERR_EXCERPT_BYTES: usize = 2048;

/// Runs syntax and runtime checks for program units, selected by extension.
pub struct ProgramRunner {
    runners: BTreeMap<String, RunnerSpec>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ProgramRunner {
    /// `runners` is keyed by lower-case file extension without the dot.
    pub fn new(runners: BTreeMap<String, RunnerSpec>, working_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            runners,
            working_dir,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The runner responsible for `unit`, if its extension has one.
    pub fn spec_for(&self, unit: &Unit) -> Option<&RunnerSpec> {
        self.runners.get(&unit.extension()?)
    }

    /// Parse `unit` without executing it.
    ///
    /// Every failure, including a launch failure or a timeout of the checker
    /// itself, is reported as [`UnitFailure::Syntax`].
    pub async fn check_syntax(&self, unit: &Unit) -> Result<(), UnitFailure> {
        let spec = self.require_spec(unit)?;
        if spec.check.is_empty() {
            return Ok(());
        }
        let argv = RunnerSpec::expand(&spec.check, &unit.path);
        let output = self.execute(&argv).await.map_err(|failure| UnitFailure::Syntax {
            details: failure.to_string(),
        })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(UnitFailure::Syntax {
                details: stderr_excerpt(&output),
            })
        }
    }

    /// Execute `unit` standalone and require exit code 0.
    pub async fn check_runtime(&self, unit: &Unit) -> Result<(), UnitFailure> {
        let spec = self.require_spec(unit)?;
        let argv = RunnerSpec::expand(&spec.run, &unit.path);
        let output = self.execute(&argv).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(UnitFailure::Runtime {
                code: output.status.code(),
                stderr: stderr_excerpt(&output),
            })
        }
    }

    fn require_spec(&self, unit: &Unit) -> Result<&RunnerSpec, UnitFailure> {
        self.spec_for(unit).ok_or_else(|| UnitFailure::Launch {
            details: format!("no runner configured for {}", unit.key),
        })
    }

    async fn execute(&self, argv: &[String]) -> Result<Output, UnitFailure> {
        let Some((program, args)) = argv.split_first() else {
            return Err(UnitFailure::Launch {
                details: "empty command".to_string(),
            });
        };
        debug!(?argv, "spawning");

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UnitFailure::Launch {
                details: format!("{program}: {e}"),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(UnitFailure::Launch {
                details: format!("{program}: {e}"),
            }),
            Err(_) => Err(UnitFailure::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    if text.len() <= STDERR_EXCERPT_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_EXCERPT_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}
