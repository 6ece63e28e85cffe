//! [`LoadedUnitSet`] – health ledger of the units a supervisor has acted on.
//!
//! A unit is *tracked* from its first load attempt until it is unloaded.
//! Tracked units are either [`UnitHealth::Healthy`] (the last load/reload
//! succeeded) or [`UnitHealth::Unhealthy`] (it failed and will be retried).
//! The set is never persisted.

use std::collections::BTreeMap;

use warden_types::UnitKey;

/// Health flag of a tracked unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitHealth {
    Healthy,
    Unhealthy,
}

/// Units currently tracked by a supervisor.
///
/// # Example
///
/// ```
/// use warden_runtime::loaded_set::{LoadedUnitSet, UnitHealth};
/// use warden_types::UnitKey;
///
/// let mut set = LoadedUnitSet::new();
/// let key = UnitKey::new("SystemPrograms.Vision", "AI_Vision.py");
/// set.mark(&key, UnitHealth::Healthy);
///
/// assert_eq!(set.health(&key), Some(UnitHealth::Healthy));
/// assert!(set.remove(&key));
/// assert_eq!(set.health(&key), None);
/// ```
#[derive(Debug, Default)]
pub struct LoadedUnitSet {
    units: BTreeMap<UnitKey, UnitHealth>,
}

impl LoadedUnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `key` with `health`, replacing any previous flag.
    pub fn mark(&mut self, key: &UnitKey, health: UnitHealth) {
        self.units.insert(key.clone(), health);
    }

    /// `None` for untracked units.
    pub fn health(&self, key: &UnitKey) -> Option<UnitHealth> {
        self.units.get(key).copied()
    }

    /// Stop tracking `key`.  Returns whether it was tracked.
    pub fn remove(&mut self, key: &UnitKey) -> bool {
        self.units.remove(key).is_some()
    }

    /// Tracked keys in sorted order.
    pub fn keys(&self) -> Vec<UnitKey> {
        self.units.keys().cloned().collect()
    }

    pub fn unhealthy(&self) -> Vec<UnitKey> {
        self.units
            .iter()
            .filter(|(_, h)| **h == UnitHealth::Unhealthy)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> UnitKey {
        UnitKey::new("SystemPrograms", name)
    }

    #[test]
    fn untracked_unit_has_no_health() {
        let set = LoadedUnitSet::new();
        assert_eq!(set.health(&key("ghost.py")), None);
        assert!(set.is_empty());
    }

    #[test]
    fn mark_overwrites_previous_flag() {
        let mut set = LoadedUnitSet::new();
        set.mark(&key("a.py"), UnitHealth::Unhealthy);
        set.mark(&key("a.py"), UnitHealth::Healthy);
        assert_eq!(set.health(&key("a.py")), Some(UnitHealth::Healthy));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unhealthy_lists_only_failed_units() {
        let mut set = LoadedUnitSet::new();
        set.mark(&key("ok.py"), UnitHealth::Healthy);
        set.mark(&key("bad.py"), UnitHealth::Unhealthy);
        assert_eq!(set.unhealthy(), vec![key("bad.py")]);
    }

    #[test]
    fn remove_untracked_is_noop() {
        let mut set = LoadedUnitSet::new();
        assert!(!set.remove(&key("ghost.py")));
    }

    #[test]
    fn keys_are_sorted() {
        let mut set = LoadedUnitSet::new();
        set.mark(&key("b.py"), UnitHealth::Healthy);
        set.mark(&key("a.py"), UnitHealth::Healthy);
        assert_eq!(set.keys(), vec![key("a.py"), key("b.py")]);
    }
}
