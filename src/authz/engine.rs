use std::collections::BTreeSet;

use crate::authz::roles::RoleGraph;
use crate::authz::types::{PermissionHolder, PermissionValue, Role, RoleId, RoleSet};

/// False when the holder is unset or disabled. Every check starts here.
pub fn is_valid_holder(holder: Option<&dyn PermissionHolder>) -> bool {
    matches!(holder, Some(h) if !h.is_disabled())
}

/// A holder's effective roles, resolved once against a graph snapshot and
/// reused for every check made through this context.
#[derive(Debug, Clone)]
pub struct HolderContext<'g> {
    graph: &'g RoleGraph,
    effective: RoleSet,
    bypass: bool,
}

impl<'g> HolderContext<'g> {
    /// `None` for an invalid holder.
    pub fn new(graph: &'g RoleGraph, holder: Option<&dyn PermissionHolder>) -> Option<Self> {
        if !is_valid_holder(holder) {
            return None;
        }
        let holder = holder?;
        let effective = graph.effective_role_ids(holder);
        let bypass = graph
            .bypass_role()
            .map(|id| effective.contains(&id))
            .unwrap_or(false);
        Some(Self {
            graph,
            effective,
            bypass,
        })
    }

    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    pub fn effective_role_ids(&self) -> &RoleSet {
        &self.effective
    }

    pub fn effective_roles(&self) -> BTreeSet<Role> {
        self.effective
            .iter()
            .filter_map(|id| self.graph.role(*id).cloned())
            .collect()
    }

    pub fn has_any_role(&self, required: &RoleSet) -> bool {
        if self.bypass {
            return true;
        }
        !required.is_empty() && !self.effective.is_disjoint(required)
    }

    pub fn has_single_role(&self, required: RoleId) -> bool {
        self.bypass || self.effective.contains(&required)
    }

    /// Disjunction of conjunctions: satisfied when some minterm is a subset
    /// of the effective roles. An empty minterm never matches.
    pub fn evaluate(&self, permission: &PermissionValue) -> bool {
        if self.bypass {
            return true;
        }
        permission
            .minterms
            .iter()
            .any(|m| !m.is_empty() && m.is_subset(&self.effective))
    }
}

pub fn effective_roles(graph: &RoleGraph, holder: Option<&dyn PermissionHolder>) -> BTreeSet<Role> {
    HolderContext::new(graph, holder)
        .map(|ctx| ctx.effective_roles())
        .unwrap_or_default()
}

pub fn has_any_role(
    graph: &RoleGraph,
    holder: Option<&dyn PermissionHolder>,
    required: &RoleSet,
) -> bool {
    HolderContext::new(graph, holder)
        .map(|ctx| ctx.has_any_role(required))
        .unwrap_or(false)
}

pub fn has_single_role(
    graph: &RoleGraph,
    holder: Option<&dyn PermissionHolder>,
    required: RoleId,
) -> bool {
    HolderContext::new(graph, holder)
        .map(|ctx| ctx.has_single_role(required))
        .unwrap_or(false)
}

pub fn evaluate(
    graph: &RoleGraph,
    holder: Option<&dyn PermissionHolder>,
    permission: &PermissionValue,
) -> bool {
    HolderContext::new(graph, holder)
        .map(|ctx| ctx.evaluate(permission))
        .unwrap_or(false)
}
