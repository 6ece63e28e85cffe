//! `warden-registry` – durable verdict storage and unit discovery.
//!
//! # Modules
//!
//! - [`registry`] – [`StatusRegistry`][registry::StatusRegistry]: the
//!   `group → {name → status}` mapping, its section-file codec, and the
//!   write-then-rename publish that keeps readers from ever seeing a
//!   half-written pass.
//! - [`manifest`] – [`Manifest`][manifest::Manifest]: a one-shot walk of the
//!   data and program base directories producing the declared unit list.
//! - [`locator`] – [`UnitLocator`][locator::UnitLocator]: maps between
//!   logical groups and directories and resolves unit names to paths.

pub mod locator;
pub mod manifest;
pub mod registry;

pub use locator::UnitLocator;
pub use manifest::Manifest;
pub use registry::StatusRegistry;
