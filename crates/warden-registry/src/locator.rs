//! [`UnitLocator`] – translation between logical groups and directories.
//!
//! A group is the path of a directory relative to the project root with the
//! separators replaced by dots: `<root>/SystemPrograms/Vision` is the group
//! `SystemPrograms.Vision`.  Directory names that themselves contain dots do
//! not survive the reverse mapping.

use std::path::{Component, Path, PathBuf};

use warden_types::UnitKey;

use crate::registry::StatusRegistry;

/// Resolves unit names and registry keys to filesystem paths.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use warden_registry::{StatusRegistry, UnitLocator};
/// use warden_types::{Status, UnitKey};
///
/// let locator = UnitLocator::new("/srv/assistant");
/// let mut registry = StatusRegistry::new();
/// registry.set(&UnitKey::new("SystemFiles", "tokens.json"), Status::Enabled);
///
/// assert_eq!(
///     locator.resolve_path(&registry, "tokens.json").as_deref(),
///     Some(Path::new("/srv/assistant/SystemFiles/tokens.json"))
/// );
/// assert!(locator.resolve_path(&registry, "missing.json").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct UnitLocator {
    root: PathBuf,
}

impl UnitLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Group name for `dir`.
    ///
    /// Directories outside the root fall back to their own file name; the
    /// root itself maps to `"."`.
    pub fn group_for_dir(&self, dir: &Path) -> String {
        let segments: Vec<String> = match dir.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect(),
            Err(_) => dir
                .file_name()
                .map(|n| vec![n.to_string_lossy().into_owned()])
                .unwrap_or_default(),
        };
        if segments.is_empty() {
            ".".to_string()
        } else {
            segments.join(".")
        }
    }

    /// Directory for `group`, the inverse of [`UnitLocator::group_for_dir`].
    pub fn dir_for_group(&self, group: &str) -> PathBuf {
        if group == "." {
            return self.root.clone();
        }
        group
            .split('.')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    /// Registry key of the file at `path`.
    pub fn key_for_path(&self, path: &Path) -> Option<UnitKey> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let dir = path.parent()?;
        Some(UnitKey::new(self.group_for_dir(dir), name))
    }

    /// Filesystem path of a registry key.
    pub fn path_for(&self, key: &UnitKey) -> PathBuf {
        self.dir_for_group(&key.group).join(&key.name)
    }

    /// Find the first group (in registry order) containing `name` and return
    /// the reconstructed path.
    ///
    /// Read-only; an empty registry simply yields `None`.
    pub fn resolve_path(&self, registry: &StatusRegistry, name: &str) -> Option<PathBuf> {
        self.resolve_key(registry, name).map(|key| self.path_for(&key))
    }

    /// Like [`UnitLocator::resolve_path`] but returns the registry key.
    pub fn resolve_key(&self, registry: &StatusRegistry, name: &str) -> Option<UnitKey> {
        registry
            .iter()
            .map(|(key, _)| key)
            .find(|key| key.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Status;

    #[test]
    fn nested_dir_maps_to_dotted_group() {
        let loc = UnitLocator::new("/base");
        assert_eq!(
            loc.group_for_dir(Path::new("/base/SystemPrograms/Vision")),
            "SystemPrograms.Vision"
        );
        assert_eq!(loc.group_for_dir(Path::new("/base")), ".");
    }

    #[test]
    fn group_maps_back_to_dir() {
        let loc = UnitLocator::new("/base");
        assert_eq!(
            loc.dir_for_group("SystemPrograms.Vision"),
            PathBuf::from("/base/SystemPrograms/Vision")
        );
        assert_eq!(loc.dir_for_group("."), PathBuf::from("/base"));
    }

    #[test]
    fn dir_outside_root_uses_its_name() {
        let loc = UnitLocator::new("/base");
        assert_eq!(loc.group_for_dir(Path::new("/elsewhere/data")), "data");
    }

    #[test]
    fn key_for_path_splits_group_and_name() {
        let loc = UnitLocator::new("/base");
        let key = loc
            .key_for_path(Path::new("/base/SystemFiles/tokens.json"))
            .unwrap();
        assert_eq!(key, UnitKey::new("SystemFiles", "tokens.json"));
        assert_eq!(loc.path_for(&key), PathBuf::from("/base/SystemFiles/tokens.json"));
    }

    #[test]
    fn resolve_picks_first_group_in_order() {
        let loc = UnitLocator::new("/base");
        let mut reg = StatusRegistry::new();
        reg.set(&UnitKey::new("B", "dup.py"), Status::Enabled);
        reg.set(&UnitKey::new("A", "dup.py"), Status::Disabled);
        assert_eq!(
            loc.resolve_path(&reg, "dup.py"),
            Some(PathBuf::from("/base/A/dup.py"))
        );
    }

    #[test]
    fn resolve_finds_disabled_and_excluded_units() {
        let loc = UnitLocator::new("/base");
        let mut reg = StatusRegistry::new();
        reg.set(&UnitKey::new("P", "off.py"), Status::Disabled);
        reg.set(&UnitKey::new("P", "skip.py"), Status::NotImplemented);
        assert!(loc.resolve_path(&reg, "off.py").is_some());
        assert!(loc.resolve_path(&reg, "skip.py").is_some());
    }

    #[test]
    fn resolve_on_empty_registry_is_none() {
        let loc = UnitLocator::new("/base");
        assert!(loc.resolve_path(&StatusRegistry::new(), "x").is_none());
    }
}
