//! Role store and inheritance closure.
//!
//! Roles are rows with a stable id and a unique lower-case key. Inheritance
//! edges point from a role to the roles it implies; the graph is kept acyclic
//! by [`add_inheritance`]. A [`RoleGraph`] is an in-memory snapshot of both
//! tables that answers closure queries without touching the database.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

use crate::authz::errors::AuthzError;
use crate::authz::types::{PermissionHolder, Role, RoleId, RoleSet};
use crate::entities::{minterm_mapping, role, role_inheritance};

/// Trim and lower-case a role key.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn validate_key(key: &str) -> Result<String, AuthzError> {
    let normalized = normalize_key(key);
    if normalized.is_empty()
        || normalized.contains(',')
        || normalized.chars().any(char::is_control)
    {
        return Err(AuthzError::InvalidRoleKey(key.to_string()));
    }
    Ok(normalized)
}

impl From<role::Model> for Role {
    fn from(m: role::Model) -> Self {
        Role { id: m.id, key: m.key }
    }
}

/// Snapshot of all roles and inheritance edges.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    by_key: HashMap<String, Role>,
    by_id: HashMap<RoleId, Role>,
    /// role -> roles it directly inherits
    inherits: HashMap<RoleId, Vec<RoleId>>,
    bypass: Option<RoleId>,
}

impl RoleGraph {
    pub fn new(roles: Vec<Role>, edges: Vec<(RoleId, RoleId)>) -> Self {
        let mut graph = RoleGraph::default();
        for role in roles {
            graph.by_id.insert(role.id, role.clone());
            graph.by_key.insert(role.key.clone(), role);
        }
        for (from, to) in edges {
            graph.inherits.entry(from).or_default().push(to);
        }
        graph
    }

    /// Mark the role with `key` as the bypass role. Unknown keys leave the
    /// graph without one.
    pub fn with_bypass_role(mut self, key: &str) -> Self {
        self.bypass = self.resolve(key).map(|r| r.id);
        if self.bypass.is_none() {
            tracing::warn!(role = %key, "bypass role not found; no holder will bypass checks");
        }
        self
    }

    pub fn bypass_role(&self) -> Option<RoleId> {
        self.bypass
    }

    pub fn resolve(&self, key: &str) -> Option<&Role> {
        self.by_key.get(&normalize_key(key))
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.by_id.get(&id)
    }

    /// All roles, keyed by role key.
    pub fn roles(&self) -> &HashMap<String, Role> {
        &self.by_key
    }

    pub fn edge_count(&self) -> usize {
        self.inherits.values().map(|v| v.len()).sum()
    }

    /// Roles directly inherited by `id`.
    pub fn inherited_by(&self, id: RoleId) -> &[RoleId] {
        self.inherits.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Seeds plus everything reachable over inheritance edges.
    pub fn closure<I>(&self, seeds: I) -> RoleSet
    where
        I: IntoIterator<Item = RoleId>,
    {
        let mut result = RoleSet::new();
        let mut queue: VecDeque<RoleId> = VecDeque::new();

        for seed in seeds {
            if result.insert(seed) {
                queue.push_back(seed);
            }
        }

        while let Some(current) = queue.pop_front() {
            for next in self.inherited_by(current) {
                if result.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }

        result
    }

    /// True if `to` is reachable from `from` (a role always reaches itself).
    pub fn reaches(&self, from: RoleId, to: RoleId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.inherited_by(current) {
                if *next == to {
                    return true;
                }
                if visited.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        false
    }

    /// Ids of the holder's directly assigned roles. Keys that do not resolve
    /// are skipped.
    pub fn direct_role_ids(&self, holder: &dyn PermissionHolder) -> RoleSet {
        holder
            .role_keys()
            .iter()
            .filter_map(|key| match self.resolve(key) {
                Some(role) => Some(role.id),
                None => {
                    tracing::debug!(role = %key, "holder references unknown role; ignoring");
                    None
                }
            })
            .collect()
    }

    pub fn effective_role_ids(&self, holder: &dyn PermissionHolder) -> RoleSet {
        self.closure(self.direct_role_ids(holder))
    }

    pub fn effective_roles(&self, holder: &dyn PermissionHolder) -> BTreeSet<Role> {
        self.effective_role_ids(holder)
            .into_iter()
            .filter_map(|id| self.role(id).cloned())
            .collect()
    }
}

// ---------- Store operations ----------

pub async fn get_role_by_key<C>(conn: &C, key: &str) -> Result<Option<Role>, AuthzError>
where
    C: ConnectionTrait,
{
    use role::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Key.eq(normalize_key(key)))
        .one(conn)
        .await?
        .map(Role::from))
}

pub async fn resolve_role<C>(conn: &C, key: &str) -> Result<Role, AuthzError>
where
    C: ConnectionTrait,
{
    get_role_by_key(conn, key)
        .await?
        .ok_or_else(|| AuthzError::RoleNotFound(normalize_key(key)))
}

pub async fn all_roles<C>(conn: &C) -> Result<HashMap<String, Role>, AuthzError>
where
    C: ConnectionTrait,
{
    use role::{Column, Entity};

    Ok(Entity::find()
        .order_by_asc(Column::Id)
        .all(conn)
        .await?
        .into_iter()
        .map(|m| (m.key.clone(), Role::from(m)))
        .collect())
}

/// Create a new role. Fails if the key is taken.
pub async fn create_role<C>(conn: &C, key: &str) -> Result<Role, AuthzError>
where
    C: ConnectionTrait,
{
    let key = validate_key(key)?;
    if get_role_by_key(conn, &key).await?.is_some() {
        return Err(AuthzError::DuplicateRole(key));
    }

    let model = role::ActiveModel {
        key: Set(key.clone()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::info!(role = %model.key, id = model.id, "Created role");
    Ok(model.into())
}

/// Insert-or-fetch on the unique key; safe under concurrent callers.
pub async fn resolve_or_create_role<C>(conn: &C, key: &str) -> Result<Role, AuthzError>
where
    C: ConnectionTrait,
{
    use role::{Column, Entity};

    let key = validate_key(key)?;
    let inserted = Entity::insert(role::ActiveModel {
        key: Set(key.clone()),
        ..Default::default()
    })
    .on_conflict(OnConflict::column(Column::Key).do_nothing().to_owned())
    .exec_without_returning(conn)
    .await?;

    let role = resolve_role(conn, &key).await?;
    if inserted > 0 {
        tracing::info!(role = %role.key, id = role.id, "Created role");
    }
    Ok(role)
}

pub async fn load_role_graph<C>(conn: &C) -> Result<RoleGraph, AuthzError>
where
    C: ConnectionTrait,
{
    let roles: Vec<Role> = role::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(Role::from)
        .collect();
    let edges = role_inheritance::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|e| (e.role_id, e.inherited_role_id))
        .collect();

    Ok(RoleGraph::new(roles, edges))
}

/// Record that `role_key` inherits `inherited_key`. Returns `false` when the
/// edge already existed. Edges that would close a cycle are rejected.
///
/// The edge is written before the graph is checked, and role rows are locked
/// before the graph is reloaded, so concurrent writers closing a cycle from
/// both ends cannot both commit.
pub async fn add_inheritance<C>(
    conn: &C,
    role_key: &str,
    inherited_key: &str,
) -> Result<bool, AuthzError>
where
    C: ConnectionTrait + TransactionTrait,
{
    use role_inheritance::{Column, Entity};

    let role = resolve_role(conn, role_key).await?;
    let inherited = resolve_role(conn, inherited_key).await?;
    let cycle = || AuthzError::CyclicRoleInheritance(format!("{} -> {}", role.key, inherited.key));

    if role.id == inherited.id {
        return Err(cycle());
    }

    let txn = conn.begin().await?;

    let inserted = Entity::insert(role_inheritance::ActiveModel {
        role_id: Set(role.id),
        inherited_role_id: Set(inherited.id),
    })
    .on_conflict(
        OnConflict::columns([Column::RoleId, Column::InheritedRoleId])
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    if inserted == 0 {
        txn.commit().await?;
        return Ok(false);
    }

    // Serializes graph checks where the backend supports row locks.
    role::Entity::find()
        .order_by_asc(role::Column::Id)
        .lock_exclusive()
        .all(&txn)
        .await?;

    let graph = load_role_graph(&txn).await?;
    if graph.reaches(inherited.id, role.id) {
        txn.rollback().await?;
        return Err(cycle());
    }

    txn.commit().await?;
    tracing::info!(role = %role.key, inherits = %inherited.key, "Added role inheritance");
    Ok(true)
}

pub async fn remove_inheritance<C>(
    conn: &C,
    role_key: &str,
    inherited_key: &str,
) -> Result<bool, AuthzError>
where
    C: ConnectionTrait,
{
    use role_inheritance::{Column, Entity};

    let role = resolve_role(conn, role_key).await?;
    let inherited = resolve_role(conn, inherited_key).await?;

    let res = Entity::delete_many()
        .filter(Column::RoleId.eq(role.id))
        .filter(Column::InheritedRoleId.eq(inherited.id))
        .exec(conn)
        .await?;

    Ok(res.rows_affected > 0)
}

/// Delete a role that nothing references.
pub async fn delete_role<C>(conn: &C, key: &str) -> Result<(), AuthzError>
where
    C: ConnectionTrait,
{
    let role = resolve_role(conn, key).await?;

    let mapped = minterm_mapping::Entity::find()
        .filter(minterm_mapping::Column::RoleId.eq(role.id))
        .count(conn)
        .await?;
    let edges = role_inheritance::Entity::find()
        .filter(
            role_inheritance::Column::RoleId
                .eq(role.id)
                .or(role_inheritance::Column::InheritedRoleId.eq(role.id)),
        )
        .count(conn)
        .await?;

    if mapped > 0 || edges > 0 {
        return Err(AuthzError::RoleInUse(role.key));
    }

    role::Entity::delete_by_id(role.id).exec(conn).await?;
    tracing::info!(role = %role.key, "Deleted role");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Principal;

    fn role(id: RoleId, key: &str) -> Role {
        Role {
            id,
            key: key.to_string(),
        }
    }

    fn chain() -> RoleGraph {
        // superadmin(1) -> user(2) -> anonymous(3); editor(4) -> user(2)
        RoleGraph::new(
            vec![
                role(1, "superadmin"),
                role(2, "user"),
                role(3, "anonymous"),
                role(4, "editor"),
            ],
            vec![(1, 2), (2, 3), (4, 2)],
        )
    }

    #[test]
    fn test_closure_follows_edges() {
        let g = chain();
        assert_eq!(g.closure([4]), RoleSet::from([4, 2, 3]));
        assert_eq!(g.closure([1]), RoleSet::from([1, 2, 3]));
        assert_eq!(g.closure([3]), RoleSet::from([3]));
        assert!(g.closure([]).is_empty());
    }

    #[test]
    fn test_effective_roles_for_holder() {
        let g = chain();
        let holder = Principal::new("bob", ["Editor ", "ghost"]);
        let keys: Vec<String> = g
            .effective_roles(&holder)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["user", "anonymous", "editor"]);
    }

    #[test]
    fn test_reaches() {
        let g = chain();
        assert!(g.reaches(1, 3));
        assert!(g.reaches(2, 2));
        assert!(!g.reaches(3, 1));
        assert!(!g.reaches(4, 1));
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let g = chain();
        assert_eq!(g.resolve("  SuperAdmin").map(|r| r.id), Some(1));
        assert!(g.resolve("nobody").is_none());
        assert_eq!(g.roles().len(), 4);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_bypass_role_marker() {
        assert_eq!(chain().with_bypass_role("superadmin").bypass_role(), Some(1));
        assert_eq!(chain().with_bypass_role("root").bypass_role(), None);
        assert_eq!(chain().bypass_role(), None);
    }

    #[test]
    fn test_unconnected_roles_are_not_implied() {
        let g = RoleGraph::new(vec![role(1, "anonymous"), role(2, "sitea")], vec![]);
        let holder = Principal::new("carol", ["sitea"]);
        assert_eq!(g.effective_role_ids(&holder), RoleSet::from([2]));

        let nobody = Principal::new("guest", Vec::<String>::new());
        assert!(g.effective_role_ids(&nobody).is_empty());
    }

    #[test]
    fn test_validate_key() {
        assert_eq!(validate_key(" Site-A ").unwrap(), "site-a");
        assert!(validate_key("").is_err());
        assert!(validate_key("a,b").is_err());
        assert!(validate_key("tab\tkey").is_err());
        assert_eq!(validate_key("Site Admins").unwrap(), "site admins");
    }
}
