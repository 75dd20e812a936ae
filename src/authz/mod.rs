pub mod canonical;
pub mod engine;
pub mod errors;
pub mod legacy;
pub mod loader;
pub mod minterm;
pub mod permission;
pub mod policy;
pub mod registry;
pub mod roles;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::sync::RwLock;

use crate::entities::resource;
use crate::settings::Authz as AuthzSettings;
use engine::HolderContext;
use errors::AuthzError;
use registry::{ChangeListeners, PermissionRegistry, PermissionsChangedListener};
use roles::{normalize_key, RoleGraph};
use types::{
    Action, PermissionHolder, PermissionId, PermissionValue, Role, RoleSet, RuleSpec,
    ValidationReport,
};

/// Entry point for permission checks and administrative changes.
///
/// Holds a cached [`RoleGraph`] snapshot that is loaded on first use and
/// dropped by [`Authorizer::permissions_changed`]. Canonical minterm and
/// permission rows are immutable, so only the graph needs invalidation.
pub struct Authorizer {
    db: DatabaseConnection,
    bypass_role: String,
    graph: RwLock<Option<Arc<RoleGraph>>>,
    registry: Arc<PermissionRegistry>,
    listeners: ChangeListeners,
}

impl Authorizer {
    pub fn new(db: DatabaseConnection, settings: &AuthzSettings) -> Self {
        Self {
            db,
            bypass_role: normalize_key(&settings.bypass_role),
            graph: RwLock::new(None),
            registry: Arc::new(PermissionRegistry::new()),
            listeners: ChangeListeners::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PermissionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn PermissionsChangedListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.registry
    }

    pub async fn role_graph(&self) -> Result<Arc<RoleGraph>, AuthzError> {
        if let Some(graph) = self.graph.read().await.as_ref() {
            return Ok(graph.clone());
        }

        let mut slot = self.graph.write().await;
        if let Some(graph) = slot.as_ref() {
            return Ok(graph.clone());
        }

        let graph = Arc::new(
            roles::load_role_graph(&self.db)
                .await?
                .with_bypass_role(&self.bypass_role),
        );
        tracing::debug!(
            roles = graph.roles().len(),
            edges = graph.edge_count(),
            "Loaded role graph"
        );
        *slot = Some(graph.clone());
        Ok(graph)
    }

    /// Drop the cached role graph and tell every registered listener.
    pub async fn permissions_changed(&self) {
        *self.graph.write().await = None;
        self.listeners.notify();
    }

    pub async fn effective_roles(
        &self,
        holder: Option<&dyn PermissionHolder>,
    ) -> Result<BTreeSet<Role>, AuthzError> {
        let graph = self.role_graph().await?;
        Ok(engine::effective_roles(&graph, holder))
    }

    /// True if the holder has at least one of `keys`. Unknown keys never match.
    pub async fn has_any_role(
        &self,
        holder: Option<&dyn PermissionHolder>,
        keys: &[&str],
    ) -> Result<bool, AuthzError> {
        let graph = self.role_graph().await?;
        let required: RoleSet = keys
            .iter()
            .filter_map(|k| graph.resolve(k).map(|r| r.id))
            .collect();
        Ok(engine::has_any_role(&graph, holder, &required))
    }

    pub async fn has_single_role(
        &self,
        holder: Option<&dyn PermissionHolder>,
        key: &str,
    ) -> Result<bool, AuthzError> {
        let graph = self.role_graph().await?;
        let ctx = match HolderContext::new(&graph, holder) {
            Some(ctx) => ctx,
            None => return Ok(false),
        };
        Ok(match graph.resolve(key) {
            Some(role) => ctx.has_single_role(role.id),
            None => ctx.is_bypass(),
        })
    }

    pub async fn evaluate(
        &self,
        holder: Option<&dyn PermissionHolder>,
        permission: &PermissionValue,
    ) -> Result<bool, AuthzError> {
        let graph = self.role_graph().await?;
        Ok(engine::evaluate(&graph, holder, permission))
    }

    /// Evaluate a stored permission. Invalid holders are rejected before the
    /// permission is loaded.
    pub async fn evaluate_id(
        &self,
        holder: Option<&dyn PermissionHolder>,
        id: PermissionId,
    ) -> Result<bool, AuthzError> {
        if !engine::is_valid_holder(holder) {
            return Ok(false);
        }
        let permission = permission::load_permission(&self.db, id).await?;
        self.evaluate(holder, &permission).await
    }

    pub async fn authorize(
        &self,
        holder: Option<&dyn PermissionHolder>,
        id: PermissionId,
    ) -> Result<(), AuthzError> {
        if self.evaluate_id(holder, id).await? {
            Ok(())
        } else {
            Err(AuthzError::Forbidden)
        }
    }

    /// Check `action` on the named resource. A missing resource is reported
    /// as [`AuthzError::ResourceNotFound`], a failed check as
    /// [`AuthzError::Forbidden`].
    pub async fn authorize_resource(
        &self,
        holder: Option<&dyn PermissionHolder>,
        name: &str,
        action: Action,
    ) -> Result<(), AuthzError> {
        let model = resource::Entity::find()
            .filter(resource::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .ok_or_else(|| AuthzError::ResourceNotFound(name.to_string()))?;

        let slot = match action {
            Action::Read => model.read_permission_id,
            Action::Edit => model.edit_permission_id,
        };

        let allowed = match slot {
            Some(id) => self.evaluate_id(holder, id).await?,
            None => {
                tracing::debug!(resource = %name, action = %action, "No permission set; bypass only");
                self.evaluate(holder, &PermissionValue::bypass_only()).await?
            }
        };

        if allowed {
            Ok(())
        } else {
            tracing::debug!(resource = %name, action = %action, "Denied");
            Err(AuthzError::Forbidden)
        }
    }

    /// Resolve a rule written with role keys against the current graph.
    /// Every unknown key and empty conjunction is recorded under `field`.
    pub async fn resolve_rule(
        &self,
        field: &str,
        rule: &RuleSpec,
        report: &mut ValidationReport,
    ) -> Result<Vec<RoleSet>, AuthzError> {
        let graph = self.role_graph().await?;
        Ok(permission::resolve_rule(&graph, field, rule, report))
    }

    /// Canonicalize a rule written with role keys.
    pub async fn build_permission(
        &self,
        field: &str,
        rule: &RuleSpec,
    ) -> Result<PermissionId, AuthzError> {
        let mut report = ValidationReport::new();
        let minterms = self.resolve_rule(field, rule, &mut report).await?;
        if !report.is_empty() {
            return Err(AuthzError::Validation(report));
        }
        permission::get_or_create_permission(&self.db, minterms).await
    }

    /// Canonical permission for a registered kind's default roles.
    pub async fn default_permission(&self, kind: &str) -> Result<PermissionId, AuthzError> {
        let rule = self.registry.default_rule(kind).ok_or_else(|| {
            AuthzError::InvalidDefinitions(format!("unknown permission kind `{kind}`"))
        })?;
        self.build_permission(kind, &rule).await
    }

    pub async fn get_or_create_permission<I>(&self, minterms: I) -> Result<PermissionId, AuthzError>
    where
        I: IntoIterator<Item = RoleSet>,
    {
        permission::get_or_create_permission(&self.db, minterms).await
    }

    pub async fn create_role(&self, key: &str) -> Result<Role, AuthzError> {
        let role = roles::create_role(&self.db, key).await?;
        self.permissions_changed().await;
        Ok(role)
    }

    pub async fn add_inheritance(&self, role: &str, inherited: &str) -> Result<bool, AuthzError> {
        let added = roles::add_inheritance(&self.db, role, inherited).await?;
        if added {
            self.permissions_changed().await;
        }
        Ok(added)
    }

    pub async fn remove_inheritance(
        &self,
        role: &str,
        inherited: &str,
    ) -> Result<bool, AuthzError> {
        let removed = roles::remove_inheritance(&self.db, role, inherited).await?;
        if removed {
            self.permissions_changed().await;
        }
        Ok(removed)
    }

    /// Delete an unreferenced role. The configured bypass role cannot be
    /// deleted.
    pub async fn delete_role(&self, key: &str) -> Result<(), AuthzError> {
        let key = normalize_key(key);
        if key == self.bypass_role {
            return Err(AuthzError::RoleInUse(key));
        }
        roles::delete_role(&self.db, &key).await?;
        self.permissions_changed().await;
        Ok(())
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("bypass_role", &self.bypass_role)
            .field("kinds", &self.registry.len())
            .field("listeners", &self.listeners)
            .finish()
    }
}
