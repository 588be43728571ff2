//! One-time credentials for ephemeral targets.

use dashmap::DashMap;
use shellmux_types::Secret;
use tracing::debug;

/// Single-use secrets keyed by target id.
///
/// `consume` removes the entry in the same map operation that reads it, so two
/// concurrent consumers can never both receive the same secret.
#[derive(Debug, Default)]
pub struct CredentialVault {
    pending: DashMap<String, Secret>,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over a secret for the next connection to `target_id`.
    /// Replaces any secret not yet consumed.
    pub fn store(&self, target_id: impl Into<String>, secret: Secret) {
        let target_id = target_id.into();
        debug!(target: "shellmux::vault", "Stored pending credential for target {}", target_id);
        self.pending.insert(target_id, secret);
    }

    /// Take the pending secret. `None` means "use the default auth path".
    pub fn consume(&self, target_id: &str) -> Option<Secret> {
        let taken = self.pending.remove(target_id).map(|(_, secret)| secret);
        if taken.is_some() {
            debug!(target: "shellmux::vault", "Consumed pending credential for target {}", target_id);
        }
        taken
    }

    pub fn has_pending(&self, target_id: &str) -> bool {
        self.pending.contains_key(target_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
