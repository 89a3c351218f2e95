use indexmap::IndexMap;

use crate::patching::registration::{InterceptionRegistration, MethodId};

/// Registrations accumulated during an open phase, in first-seen order.
///
/// Not synchronized on its own: the scheduler only touches it while holding
/// the compilation lock and its state mutex.
#[derive(Debug, Default)]
pub struct PhaseRegistry {
    entries: IndexMap<MethodId, InterceptionRegistration>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for a method not seen yet. A repeated method keeps its
    /// position but takes the newer patch set.
    pub fn insert(&mut self, registration: InterceptionRegistration) -> bool {
        self.entries
            .insert(registration.method.clone(), registration)
            .is_none()
    }

    pub fn snapshot_and_clear(&mut self) -> Vec<InterceptionRegistration> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn contains(&self, method: &MethodId) -> bool {
        self.entries.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patching::registration::PatchSet;

    fn registration(ty: &str, prefixes: &[&str]) -> InterceptionRegistration {
        InterceptionRegistration::new(
            MethodId::new(ty, "Awake()"),
            PatchSet {
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
                ..PatchSet::default()
            },
        )
    }

    #[test]
    fn test_snapshot_keeps_accumulation_order() {
        let mut registry = PhaseRegistry::new();
        for ty in ["C", "A", "B"] {
            registry.insert(registration(ty, &["p"]));
        }

        let order: Vec<String> = registry
            .snapshot_and_clear()
            .into_iter()
            .map(|r| r.method.declaring_type)
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_repeat_registration_takes_latest_patches() {
        let mut registry = PhaseRegistry::new();
        assert!(registry.insert(registration("A", &["first"])));
        assert!(registry.insert(registration("B", &["other"])));
        assert!(!registry.insert(registration("A", &["first", "second"])));

        let snapshot = registry.snapshot_and_clear();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].method.declaring_type, "A");
        assert_eq!(snapshot[0].patches.len(), 2);
    }
}
