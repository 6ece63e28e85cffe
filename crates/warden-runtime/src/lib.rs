//! `warden-runtime` – The Reconciliation Loop
//!
//! Keeps the set of live units in step with the published registry.
//!
//! # Modules
//!
//! - [`loaded_set`] – [`LoadedUnitSet`][loaded_set::LoadedUnitSet]: the
//!   supervisor's private record of active units and their health.
//! - [`host`] – the [`UnitHost`][host::UnitHost] trait through which units are
//!   loaded, reloaded and unloaded, plus [`ProcessHost`][host::ProcessHost],
//!   which runs program units as worker processes.
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: polls the
//!   registry, diffs desired against loaded units and applies the difference.
//!   A "not found" load failure triggers a synchronous verification pass.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod host;
pub mod loaded_set;
pub mod supervisor;
pub mod telemetry;

pub use host::{ProcessHost, UnitHost};
pub use loaded_set::{LoadedUnitSet, UnitHealth};
pub use supervisor::{CycleSummary, Supervisor, SupervisorConfig};
pub use telemetry::{TracerProviderGuard, init_tracing};

// Re-exported so hosts embedding the supervisor need only this crate.
pub use warden_kernel::Verifier;
