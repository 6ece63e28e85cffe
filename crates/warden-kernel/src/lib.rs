//! `warden-kernel` – File Authorization
//!
//! Decides which units are fit to run.  It does not load anything; it only
//! produces verdicts and publishes them.
//!
//! # Modules
//!
//! - [`runner`] – [`ProgramRunner`][runner::ProgramRunner]: executes a
//!   program unit's syntax check or standalone run as an isolated child
//!   process with a hard timeout and no stdin.
//! - [`verifier`] – [`Verifier`][verifier::Verifier]: the four-stage pass
//!   (discover → validate data → check syntax → check runtime) that fills a
//!   draft registry and atomically publishes it.  Only one pass runs at a
//!   time.

pub mod runner;
pub mod verifier;

pub use runner::ProgramRunner;
pub use verifier::{DraftPass, Finding, VerificationReport, Verifier, VerifierConfig};
