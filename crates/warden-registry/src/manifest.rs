//! Manifest discovery.
//!
//! Walks the data and program base directories once and produces the list of
//! declared [`Unit`]s.  Dotfiles, editor swap files and `*.tmp` files are
//! skipped, as is any path in the caller's ignore list (the registry file
//! itself when it lives inside a scanned directory).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use warden_types::{Unit, UnitKey, UnitKind};

use crate::locator::UnitLocator;

/// The declared units found under the two base directories.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub units: Vec<Unit>,
}

impl Manifest {
    /// Walk `data_dir` and `program_dir` (recursively, in sorted order).
    ///
    /// A base directory that does not exist contributes no units.
    pub fn discover(
        locator: &UnitLocator,
        data_dir: &Path,
        program_dir: &Path,
        ignore: &[PathBuf],
    ) -> Self {
        let mut units = Vec::new();
        walk(locator, data_dir, UnitKind::Data, ignore, &mut units);
        walk(locator, program_dir, UnitKind::Program, ignore, &mut units);
        info!(
            data = units.iter().filter(|u| u.kind == UnitKind::Data).count(),
            programs = units.iter().filter(|u| u.kind == UnitKind::Program).count(),
            "manifest discovered"
        );
        Self { units }
    }

    /// The unit discovered under `key`, if any.
    pub fn get(&self, key: &UnitKey) -> Option<&Unit> {
        self.units.iter().find(|u| &u.key == key)
    }

    pub fn of_kind(&self, kind: UnitKind) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(move |u| u.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn walk(locator: &UnitLocator, base: &Path, kind: UnitKind, ignore: &[PathBuf], out: &mut Vec<Unit>) {
    if !base.exists() {
        warn!(dir = %base.display(), "base directory does not exist");
        return;
    }

    // Symlinks are yielded but never descended into.
    let walker = WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let keep = entry.depth() == 0
                || !(is_hidden_or_scratch(entry.path()) || ignore.iter().any(|i| i == entry.path()));
            if !keep {
                debug!(path = %entry.path().display(), "skipping");
            }
            keep
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() || !path.is_file() {
            continue;
        }
        if let Some(key) = locator.key_for_path(path) {
            out.push(Unit {
                key,
                path: entry.into_path(),
                kind,
            });
        }
    }
}

fn is_hidden_or_scratch(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".swp"))
}
