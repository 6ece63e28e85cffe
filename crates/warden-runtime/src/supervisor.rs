//! [`Supervisor`] – registry-driven reconciliation loop.
//!
//! Every cycle:
//!
//! 1. **Read** – the published registry is loaded afresh; nothing is cached
//!    between cycles.
//! 2. **Diff** – the desired set is every key marked `enabled`.
//! 3. **Converge** – desired units that are untracked are loaded, desired
//!    units that are tracked but unhealthy are reloaded, healthy ones are
//!    left alone.  Tracked units that are no longer desired are unloaded.
//!
//! Healthy units are only asked for a [`UnitHost::health_check`]; a failed
//! check marks them unhealthy so the next cycle reloads them.
//!
//! A load that fails with [`LoadError::NotFound`] marks the unit unhealthy
//! and runs a full verification pass before the cycle moves on to the next
//! unit.  The registry is then read again, so the rest of the cycle works
//! from the refreshed verdicts.  Any other failure only marks the unit
//! unhealthy.  No failure ends the cycle or the loop.
//!
//! Cancellation is observed between cycles only.  Units that are up when the
//! loop stops stay up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use warden_kernel::Verifier;
use warden_registry::StatusRegistry;
use warden_types::{LoadError, UnitKey};

use crate::host::UnitHost;
use crate::loaded_set::{LoadedUnitSet, UnitHealth};

/// Default pause between reconciliation cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tuning for [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub loaded: usize,
    pub reloaded: usize,
    pub unloaded: usize,
    pub failed: usize,
    pub self_heals: usize,
}

impl CycleSummary {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Load,
    Reload,
}

/// Reconciles a [`UnitHost`] against the published registry.
pub struct Supervisor<H: UnitHost> {
    host: H,
    verifier: Arc<Verifier>,
    loaded: LoadedUnitSet,
    config: SupervisorConfig,
}

impl<H: UnitHost> Supervisor<H> {
    /// The registry is read from the verifier's configured registry path.
    pub fn new(host: H, verifier: Arc<Verifier>, config: SupervisorConfig) -> Self {
        Self {
            host,
            verifier,
            loaded: LoadedUnitSet::new(),
            config,
        }
    }

    pub fn loaded(&self) -> &LoadedUnitSet {
        &self.loaded
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Run cycles until `shutdown` becomes `true` (or its sender is dropped),
    /// then hand the supervisor back.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        info!(interval = ?self.config.poll_interval, "supervisor started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let summary = self.reconcile().await;
            if summary.is_quiet() {
                debug!("cycle: nothing to do");
            } else {
                info!(
                    loaded = summary.loaded,
                    reloaded = summary.reloaded,
                    unloaded = summary.unloaded,
                    failed = summary.failed,
                    self_heals = summary.self_heals,
                    "cycle complete"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(tracked = self.loaded.len(), "supervisor stopped");
        self
    }

    /// One reconciliation cycle.
    pub async fn reconcile(&mut self) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let Some(mut desired) = self.read_desired() else {
            return summary;
        };

        let pending: Vec<UnitKey> = desired.iter().cloned().collect();
        for key in &pending {
            // A self-heal pass earlier in this cycle may have dropped it.
            if !desired.contains(key) {
                continue;
            }
            let action = match self.loaded.health(key) {
                Some(UnitHealth::Healthy) => {
                    if let Err(e) = self.host.health_check(key) {
                        warn!(unit = %key, error = %e, "unit no longer healthy");
                        self.loaded.mark(key, UnitHealth::Unhealthy);
                        summary.failed += 1;
                    }
                    continue;
                }
                Some(UnitHealth::Unhealthy) => Action::Reload,
                None => Action::Load,
            };
            let healed = self.apply(key, action, &mut summary).await;
            if healed && let Some(fresh) = self.read_desired() {
                desired = fresh;
            }
        }

        for key in self.loaded.keys() {
            if desired.contains(&key) {
                continue;
            }
            match self.host.unload(&key) {
                Ok(()) => {
                    info!(unit = %key, "unloaded");
                    self.loaded.remove(&key);
                    summary.unloaded += 1;
                }
                Err(e) => {
                    warn!(unit = %key, error = %e, "unload failed; will retry");
                    self.loaded.mark(&key, UnitHealth::Unhealthy);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Keys marked `enabled` in the published registry, or `None` when it
    /// cannot be read.
    fn read_desired(&self) -> Option<BTreeSet<UnitKey>> {
        match StatusRegistry::load(&self.verifier.config().registry_path) {
            Ok(registry) => Some(registry.enabled().collect()),
            Err(e) => {
                warn!(error = %e, "registry unreadable; skipping cycle");
                None
            }
        }
    }

    /// Returns whether a self-heal pass ran.
    async fn apply(&mut self, key: &UnitKey, action: Action, summary: &mut CycleSummary) -> bool {
        let result = match action {
            Action::Load => self.host.load(key),
            Action::Reload => self.host.reload(key),
        };
        match result {
            Ok(()) => {
                self.loaded.mark(key, UnitHealth::Healthy);
                match action {
                    Action::Load => {
                        info!(unit = %key, "loaded");
                        summary.loaded += 1;
                    }
                    Action::Reload => {
                        info!(unit = %key, "reloaded");
                        summary.reloaded += 1;
                    }
                }
                false
            }
            Err(e @ LoadError::NotFound(_)) => {
                warn!(unit = %key, error = %e, "unit missing; re-verifying files");
                self.loaded.mark(key, UnitHealth::Unhealthy);
                summary.failed += 1;
                self.run_authorize_files().await;
                summary.self_heals += 1;
                true
            }
            Err(e) => {
                warn!(unit = %key, error = %e, "load failed");
                self.loaded.mark(key, UnitHealth::Unhealthy);
                summary.failed += 1;
                false
            }
        }
    }

    /// Run a full verification pass and wait for it to publish.
    ///
    /// Every unit is re-verified, not just the one that went missing.
    pub async fn run_authorize_files(&self) {
        match self.verifier.run_pass().await {
            Ok(report) => info!(pass_id = %report.pass_id, "file authorization refreshed"),
            Err(e) => error!(error = %e, "file authorization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use warden_kernel::VerifierConfig;
    use warden_types::{RunnerSpec, Status};

    // ------------------------------------------------------------------ fakes

    #[derive(Default)]
    struct FakeHost {
        present: BTreeSet<UnitKey>,
        broken: BTreeSet<UnitKey>,
        stuck: BTreeSet<UnitKey>,
        crashed: BTreeSet<UnitKey>,
        active: BTreeSet<UnitKey>,
        log: Vec<String>,
    }

    impl FakeHost {
        fn bring_up(&mut self, verb: &str, key: &UnitKey) -> Result<(), LoadError> {
            self.log.push(format!("{verb} {}", key.name));
            if !self.present.contains(key) {
                return Err(LoadError::NotFound(key.clone()));
            }
            if self.broken.contains(key) {
                return Err(LoadError::Failed {
                    unit: key.clone(),
                    details: "boom".into(),
                });
            }
            self.active.insert(key.clone());
            Ok(())
        }
    }

    impl UnitHost for FakeHost {
        fn load(&mut self, key: &UnitKey) -> Result<(), LoadError> {
            self.bring_up("load", key)
        }

        fn reload(&mut self, key: &UnitKey) -> Result<(), LoadError> {
            self.bring_up("reload", key)
        }

        fn unload(&mut self, key: &UnitKey) -> Result<(), LoadError> {
            self.log.push(format!("unload {}", key.name));
            if self.stuck.contains(key) {
                return Err(LoadError::Failed {
                    unit: key.clone(),
                    details: "stuck".into(),
                });
            }
            self.active.remove(key);
            Ok(())
        }

        fn health_check(&mut self, key: &UnitKey) -> Result<(), LoadError> {
            if self.crashed.remove(key) {
                self.active.remove(key);
                return Err(LoadError::Failed {
                    unit: key.clone(),
                    details: "exited".into(),
                });
            }
            Ok(())
        }
    }

    // ------------------------------------------------------------------ helpers

    struct Fixture {
        _dir: tempfile::TempDir,
        verifier: Arc<Verifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = VerifierConfig::new(dir.path());
            config.runners.clear();
            config.runners.insert(
                "sh".into(),
                RunnerSpec {
                    check: vec!["sh".into(), "-n".into(), "{path}".into()],
                    run: vec!["sh".into(), "{path}".into()],
                },
            );
            fs::create_dir_all(&config.program_dir).unwrap();
            Self {
                _dir: dir,
                verifier: Arc::new(Verifier::new(config)),
            }
        }

        fn publish(&self, entries: &[(&UnitKey, Status)]) {
            let mut reg = StatusRegistry::new();
            for (key, status) in entries {
                reg.set(key, *status);
            }
            reg.publish(&self.verifier.config().registry_path).unwrap();
        }

        fn supervisor(&self, host: FakeHost) -> Supervisor<FakeHost> {
            Supervisor::new(
                host,
                Arc::clone(&self.verifier),
                SupervisorConfig {
                    poll_interval: Duration::from_millis(20),
                },
            )
        }
    }

    fn key(name: &str) -> UnitKey {
        UnitKey::new("SystemPrograms", name)
    }

    fn host_with(present: &[&UnitKey]) -> FakeHost {
        FakeHost {
            present: present.iter().map(|k| (*k).clone()).collect(),
            ..FakeHost::default()
        }
    }

    // ------------------------------------------------------------------ convergence

    #[tokio::test]
    async fn converges_to_enabled_set_and_follows_flips() {
        let fx = Fixture::new();
        let (a, b) = (key("a.sh"), key("b.sh"));
        fx.publish(&[(&a, Status::Enabled), (&b, Status::Disabled)]);
        let mut sup = fx.supervisor(host_with(&[&a, &b]));

        let first = sup.reconcile().await;
        assert_eq!(first.loaded, 1);
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Healthy));
        assert_eq!(sup.loaded().health(&b), None);

        fx.publish(&[(&a, Status::Disabled), (&b, Status::Enabled)]);
        let second = sup.reconcile().await;
        assert_eq!((second.loaded, second.unloaded), (1, 1));
        assert_eq!(sup.loaded().health(&a), None);
        assert_eq!(sup.loaded().health(&b), Some(UnitHealth::Healthy));
        assert_eq!(sup.host().active, BTreeSet::from([b.clone()]));
        assert_eq!(fx.verifier.passes_completed(), 0);
    }

    #[tokio::test]
    async fn healthy_units_are_not_reloaded() {
        let fx = Fixture::new();
        let a = key("a.sh");
        fx.publish(&[(&a, Status::Enabled)]);
        let mut sup = fx.supervisor(host_with(&[&a]));

        sup.reconcile().await;
        let quiet = sup.reconcile().await;

        assert!(quiet.is_quiet());
        assert_eq!(sup.host().log, vec!["load a.sh"]);
    }

    #[tokio::test]
    async fn not_implemented_and_vanished_units_are_unloaded() {
        let fx = Fixture::new();
        let (a, b) = (key("a.sh"), key("b.sh"));
        fx.publish(&[(&a, Status::Enabled), (&b, Status::Enabled)]);
        let mut sup = fx.supervisor(host_with(&[&a, &b]));
        sup.reconcile().await;

        fx.publish(&[(&a, Status::NotImplemented)]);
        let summary = sup.reconcile().await;

        assert_eq!(summary.unloaded, 2);
        assert!(sup.loaded().is_empty());
    }

    // ------------------------------------------------------------------ failures

    #[tokio::test]
    async fn failed_load_is_retried_as_reload_without_self_heal() {
        let fx = Fixture::new();
        let a = key("a.sh");
        fx.publish(&[(&a, Status::Enabled)]);
        let mut host = host_with(&[&a]);
        host.broken.insert(a.clone());
        let mut sup = fx.supervisor(host);

        let first = sup.reconcile().await;
        assert_eq!((first.failed, first.self_heals), (1, 0));
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Unhealthy));
        assert_eq!(fx.verifier.passes_completed(), 0);

        sup.host_mut().broken.clear();
        let second = sup.reconcile().await;
        assert_eq!(second.reloaded, 1);
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Healthy));
        assert_eq!(sup.host().log, vec!["load a.sh", "reload a.sh"]);
    }

    #[tokio::test]
    async fn missing_unit_triggers_exactly_one_verification_pass() {
        let fx = Fixture::new();
        let ghost = key("ghost.sh");
        let real = key("real.sh");
        fs::write(fx.verifier.config().program_dir.join("real.sh"), "exit 0\n").unwrap();
        fx.publish(&[(&ghost, Status::Enabled)]);
        let mut sup = fx.supervisor(host_with(&[&real]));

        let first = sup.reconcile().await;
        assert_eq!((first.failed, first.self_heals), (1, 1));
        assert_eq!(fx.verifier.passes_completed(), 1);
        // The refreshed registry no longer lists the ghost, so it is dropped
        // in the same cycle.
        assert_eq!(first.unloaded, 1);
        assert_eq!(sup.loaded().health(&ghost), None);
        assert_eq!(sup.host().log, vec!["load ghost.sh", "unload ghost.sh"]);

        let second = sup.reconcile().await;
        assert_eq!(fx.verifier.passes_completed(), 1);
        assert_eq!((second.loaded, second.self_heals), (1, 0));
        assert_eq!(sup.loaded().health(&real), Some(UnitHealth::Healthy));
    }

    #[tokio::test]
    async fn several_stale_units_share_one_verification_pass() {
        let fx = Fixture::new();
        let (a, b, c) = (key("gone_a.sh"), key("gone_b.sh"), key("gone_c.sh"));
        fx.publish(&[(&a, Status::Enabled), (&b, Status::Enabled), (&c, Status::Enabled)]);
        let mut sup = fx.supervisor(host_with(&[]));

        let summary = sup.reconcile().await;

        assert_eq!(summary.self_heals, 1);
        assert_eq!(fx.verifier.passes_completed(), 1);
        assert!(!sup.host().log.iter().any(|l| l == "load gone_b.sh" || l == "load gone_c.sh"));
        assert!(sup.loaded().is_empty());
    }

    #[tokio::test]
    async fn failed_health_check_leads_to_reload_next_cycle() {
        let fx = Fixture::new();
        let a = key("a.sh");
        fx.publish(&[(&a, Status::Enabled)]);
        let mut sup = fx.supervisor(host_with(&[&a]));
        sup.reconcile().await;

        sup.host_mut().crashed.insert(a.clone());
        let noticed = sup.reconcile().await;
        assert_eq!(noticed.failed, 1);
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Unhealthy));

        let restarted = sup.reconcile().await;
        assert_eq!(restarted.reloaded, 1);
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Healthy));
        assert_eq!(sup.host().log, vec!["load a.sh", "reload a.sh"]);
        assert_eq!(fx.verifier.passes_completed(), 0);
    }

    #[tokio::test]
    async fn process_host_runs_only_verified_programs_and_settles() {
        let fx = Fixture::new();
        let config = fx.verifier.config().clone();
        let marker = config.root.join("EXECUTED");
        for (path, body) in [
            (config.program_dir.join("v1.2").join("tool.sh"), "exit 0\n".to_string()),
            (
                config.data_dir.join("notes.sh"),
                format!("touch {}\nif true; then\n", marker.display()),
            ),
        ] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        fx.verifier.run_pass().await.unwrap();

        let mut sup = Supervisor::new(
            crate::host::ProcessHost::new(&config),
            Arc::clone(&fx.verifier),
            SupervisorConfig::default(),
        );
        let tool = UnitKey::new("SystemPrograms.v1.2", "tool.sh");
        let notes = UnitKey::new("SystemFiles", "notes.sh");

        let first = sup.reconcile().await;
        assert_eq!((first.loaded, first.failed, first.self_heals), (2, 0, 0));
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let again = sup.reconcile().await;
            assert_eq!((again.failed, again.self_heals), (0, 0));
        }

        assert_eq!(fx.verifier.passes_completed(), 1);
        assert_eq!(sup.loaded().health(&tool), Some(UnitHealth::Healthy));
        assert_eq!(sup.host().worker_pid(&notes), None);
        assert!(!marker.exists(), "data unit must not be executed");
    }

    #[tokio::test]
    async fn failed_unload_keeps_unit_tracked_for_retry() {
        let fx = Fixture::new();
        let a = key("a.sh");
        fx.publish(&[(&a, Status::Enabled)]);
        let mut host = host_with(&[&a]);
        host.stuck.insert(a.clone());
        let mut sup = fx.supervisor(host);
        sup.reconcile().await;

        fx.publish(&[(&a, Status::Disabled)]);
        let summary = sup.reconcile().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Unhealthy));

        sup.host_mut().stuck.clear();
        let retry = sup.reconcile().await;
        assert_eq!(retry.unloaded, 1);
        assert!(sup.loaded().is_empty());
    }

    #[tokio::test]
    async fn unreadable_registry_skips_the_cycle() {
        let fx = Fixture::new();
        let path = &fx.verifier.config().registry_path;
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "not a registry\n").unwrap();
        let mut sup = fx.supervisor(host_with(&[]));

        assert!(sup.reconcile().await.is_quiet());
        assert!(sup.host().log.is_empty());
    }

    // ------------------------------------------------------------------ loop

    #[tokio::test]
    async fn loop_rereads_registry_and_stops_on_cancel_without_unloading() {
        let fx = Fixture::new();
        let (a, b) = (key("a.sh"), key("b.sh"));
        fx.publish(&[(&a, Status::Enabled)]);
        let sup = fx.supervisor(host_with(&[&a, &b]));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.publish(&[(&a, Status::Enabled), (&b, Status::Enabled)]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        tx.send(true).unwrap();
        let sup = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert_eq!(sup.loaded().health(&a), Some(UnitHealth::Healthy));
        assert_eq!(sup.loaded().health(&b), Some(UnitHealth::Healthy));
        assert_eq!(sup.host().active.len(), 2);
        assert!(!sup.host().log.iter().any(|l| l.starts_with("unload")));
    }

    #[tokio::test]
    async fn loop_stops_when_sender_is_dropped() {
        let fx = Fixture::new();
        let sup = fx.supervisor(host_with(&[]));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sup.run(rx));
        drop(tx);
        assert!(
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_ok()
        );
    }
}
