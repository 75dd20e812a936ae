//! Startup-owned registries handed to collaborators by reference.

use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::roles::normalize_key;
use crate::authz::types::{PermissionKind, RuleSpec};

/// Permission kinds keyed by identifier, populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct PermissionRegistry {
    kinds: HashMap<String, PermissionKind>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: PermissionKind) -> Result<(), AuthzError> {
        if self.kinds.contains_key(&kind.key) {
            return Err(AuthzError::InvalidDefinitions(format!(
                "permission kind `{}` is registered twice",
                kind.key
            )));
        }
        self.kinds.insert(kind.key.clone(), kind);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PermissionKind> {
        self.kinds.get(key)
    }

    /// Kinds sorted by key.
    pub fn kinds(&self) -> Vec<&PermissionKind> {
        let mut kinds: Vec<_> = self.kinds.values().collect();
        kinds.sort_by(|a, b| a.key.cmp(&b.key));
        kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Default rule for a kind as one singleton conjunction per role.
    /// A kind without default roles yields the bypass-only rule.
    pub fn default_rule(&self, key: &str) -> Option<RuleSpec> {
        self.get(key).map(|kind| {
            kind.default_roles
                .iter()
                .map(|r| vec![normalize_key(r)])
                .collect()
        })
    }
}

/// Implemented by caches that hold derived permission state, such as a
/// holder-identity cache, so they can drop it after an administrative change.
pub trait PermissionsChangedListener: Send + Sync {
    fn permissions_changed(&self);
}

#[derive(Clone, Default)]
pub struct ChangeListeners {
    listeners: Vec<Arc<dyn PermissionsChangedListener>>,
}

impl ChangeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn PermissionsChangedListener>) {
        self.listeners.push(listener);
    }

    pub fn notify(&self) {
        tracing::debug!(listeners = self.listeners.len(), "Notifying permission change");
        for listener in &self.listeners {
            listener.permissions_changed();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ChangeListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
