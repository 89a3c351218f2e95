use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::profile::PassthroughProfile;

/// Fully-qualified type names whose patches are never deferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughSet {
    types: HashSet<String>,
}

impl PassthroughSet {
    /// Built-in names, the localization type while merging is on, then the
    /// comma-separated user list.
    pub fn resolve(
        profile: &PassthroughProfile,
        merge_localization: bool,
        configured: &str,
    ) -> Self {
        let mut types: HashSet<String> = profile.builtin.iter().cloned().collect();

        if merge_localization {
            types.insert(profile.localization_type.clone());
        }

        types.extend(
            configured
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        );

        Self { types }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains(type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<S: Into<String>> FromIterator<S> for PassthroughSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// The live passthrough set. Readers always see one whole set; a config
/// reload swaps in a new one.
#[derive(Debug, Default)]
pub struct PassthroughAllowList {
    current: RwLock<Arc<PassthroughSet>>,
}

impl PassthroughAllowList {
    pub fn new(set: PassthroughSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.current.read().contains(type_name)
    }

    pub fn snapshot(&self) -> Arc<PassthroughSet> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, set: PassthroughSet) {
        tracing::debug!(types = set.len(), "passthrough classes updated");
        *self.current.write() = Arc::new(set);
    }
}
