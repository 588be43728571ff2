//! Lookup of remote targets by id.

use dashmap::DashMap;
use shellmux_types::Target;

/// Resolves target ids into connection details.
pub trait TargetDirectory: Send + Sync {
    fn target(&self, target_id: &str) -> Option<Target>;
}

/// In-memory target directory.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: DashMap<String, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: Target) {
        self.targets.insert(target.id.clone(), target);
    }

    pub fn remove(&self, target_id: &str) -> Option<Target> {
        self.targets.remove(target_id).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl TargetDirectory for TargetRegistry {
    fn target(&self, target_id: &str) -> Option<Target> {
        self.targets.get(target_id).map(|t| t.clone())
    }
}

impl FromIterator<Target> for TargetRegistry {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let registry = Self::new();
        for target in iter {
            registry.insert(target);
        }
        registry
    }
}
