use std::collections::{BTreeMap, BTreeSet};

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::authz::canonical::{content_hash, find_by_members};
use crate::authz::errors::AuthzError;
use crate::authz::minterm::{find_minterm, get_or_create_minterm};
use crate::authz::roles::RoleGraph;
use crate::authz::types::{
    MintermId, PermissionId, PermissionValue, RoleSet, RuleSpec, ValidationReport,
};
use crate::entities::{minterm_mapping, permission, permission_mapping, resource};

const TAG: &str = "permission";

/// Canonicalize a disjunction of role conjunctions into a permission id.
///
/// Each inner set goes through the minterm store first; the resulting set of
/// minterm ids is then deduplicated the same way at the permission level.
/// An empty disjunction maps to the reserved bypass-only permission.
pub async fn get_or_create_permission<C, I>(conn: &C, minterms: I) -> Result<PermissionId, AuthzError>
where
    C: ConnectionTrait + TransactionTrait,
    I: IntoIterator<Item = RoleSet>,
{
    let minterms: BTreeSet<RoleSet> = minterms.into_iter().collect();
    if minterms.is_empty() {
        return bypass_only_permission(conn).await;
    }

    let txn = conn.begin().await?;

    let mut minterm_ids: BTreeSet<MintermId> = BTreeSet::new();
    for roles in &minterms {
        minterm_ids.insert(get_or_create_minterm(&txn, roles).await?);
    }

    let hash = content_hash(TAG, &minterm_ids);
    let inserted = permission::Entity::insert(permission::ActiveModel {
        content_hash: Set(hash.clone()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(permission::Column::ContentHash)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    let row = permission::Entity::find()
        .filter(permission::Column::ContentHash.eq(hash.as_str()))
        .one(&txn)
        .await?
        .ok_or_else(|| AuthzError::Structural(format!("permission row for {hash} vanished")))?;

    if inserted > 0 {
        permission_mapping::Entity::insert_many(minterm_ids.iter().map(|minterm_id| {
            permission_mapping::ActiveModel {
                permission_id: Set(row.id),
                minterm_id: Set(*minterm_id),
            }
        }))
        .exec_without_returning(&txn)
        .await?;
        tracing::debug!(permission = row.id, minterms = ?minterm_ids, "Created permission");
    } else {
        let matched = find_by_members::<permission_mapping::Entity, _>(
            &txn,
            permission_mapping::Column::PermissionId,
            permission_mapping::Column::MintermId,
            &minterm_ids,
            Some(row.id),
        )
        .await?;
        if matched.is_none() {
            let err = AuthzError::Structural(format!(
                "permission {} has hash {hash} but its minterms differ from {minterm_ids:?}",
                row.id
            ));
            tracing::error!(error = %err, "Canonical permission store is inconsistent");
            return Err(err);
        }
    }

    txn.commit().await?;
    Ok(row.id)
}

/// Read-only lookup. `None` when any minterm or the permission itself has
/// never been created.
pub async fn find_permission<C>(conn: &C, minterms: &[RoleSet]) -> Result<Option<PermissionId>, AuthzError>
where
    C: ConnectionTrait,
{
    if minterms.is_empty() {
        return bypass_only_permission(conn).await.map(Some);
    }

    let mut minterm_ids = BTreeSet::new();
    for roles in minterms {
        match find_minterm(conn, roles).await? {
            Some(id) => {
                minterm_ids.insert(id);
            }
            None => return Ok(None),
        }
    }

    Ok(find_by_members::<permission_mapping::Entity, _>(
        conn,
        permission_mapping::Column::PermissionId,
        permission_mapping::Column::MintermId,
        &minterm_ids,
        None,
    )
    .await?)
}

/// Id of the reserved permission that only the bypass role satisfies.
pub async fn bypass_only_permission<C>(conn: &C) -> Result<PermissionId, AuthzError>
where
    C: ConnectionTrait,
{
    permission::Entity::find()
        .filter(permission::Column::ContentHash.eq(migration::BYPASS_ONLY_PERMISSION_HASH))
        .one(conn)
        .await?
        .map(|p| p.id)
        .ok_or_else(|| {
            AuthzError::Structural(
                "reserved bypass-only permission is missing; were migrations applied?".into(),
            )
        })
}

/// Materialize a stored permission for evaluation.
pub async fn load_permission<C>(conn: &C, id: PermissionId) -> Result<PermissionValue, AuthzError>
where
    C: ConnectionTrait,
{
    if permission::Entity::find_by_id(id).one(conn).await?.is_none() {
        return Err(AuthzError::PermissionNotFound(id));
    }

    let minterm_ids: Vec<MintermId> = permission_mapping::Entity::find()
        .filter(permission_mapping::Column::PermissionId.eq(id))
        .all(conn)
        .await?
        .into_iter()
        .map(|m| m.minterm_id)
        .collect();

    if minterm_ids.is_empty() {
        return Ok(PermissionValue {
            id: Some(id),
            minterms: Vec::new(),
        });
    }

    let mut grouped: BTreeMap<MintermId, RoleSet> =
        minterm_ids.iter().map(|m| (*m, RoleSet::new())).collect();
    for row in minterm_mapping::Entity::find()
        .filter(minterm_mapping::Column::MintermId.is_in(minterm_ids.clone()))
        .all(conn)
        .await?
    {
        grouped.entry(row.minterm_id).or_default().insert(row.role_id);
    }

    if let Some((missing, _)) = grouped.iter().find(|(_, roles)| roles.is_empty()) {
        let err = AuthzError::Structural(format!(
            "permission {id} references minterm {missing} which has no roles"
        ));
        tracing::error!(error = %err, "Canonical permission store is inconsistent");
        return Err(err);
    }

    Ok(PermissionValue {
        id: Some(id),
        minterms: grouped.into_values().collect(),
    })
}

/// Delete a permission nobody references. The reserved bypass-only
/// permission is never deleted.
pub async fn delete_permission<C>(conn: &C, id: PermissionId) -> Result<(), AuthzError>
where
    C: ConnectionTrait,
{
    if id == bypass_only_permission(conn).await? {
        return Err(AuthzError::PermissionInUse(id));
    }
    if permission::Entity::find_by_id(id).one(conn).await?.is_none() {
        return Err(AuthzError::PermissionNotFound(id));
    }

    let referencing = resource::Entity::find()
        .filter(
            Condition::any()
                .add(resource::Column::ReadPermissionId.eq(id))
                .add(resource::Column::EditPermissionId.eq(id)),
        )
        .count(conn)
        .await?;
    if referencing > 0 {
        return Err(AuthzError::PermissionInUse(id));
    }

    permission_mapping::Entity::delete_many()
        .filter(permission_mapping::Column::PermissionId.eq(id))
        .exec(conn)
        .await?;
    permission::Entity::delete_by_id(id).exec(conn).await?;
    tracing::info!(permission = id, "Deleted permission");
    Ok(())
}

/// Translate role keys into role-id minterms against `graph`.
///
/// Problems are pushed onto `report` under `field` instead of returned, so a
/// caller can check several fields before failing. Conjunctions that had a
/// problem are left out of the result.
pub fn resolve_rule(
    graph: &RoleGraph,
    field: &str,
    rule: &RuleSpec,
    report: &mut ValidationReport,
) -> Vec<RoleSet> {
    let mut minterms = Vec::with_capacity(rule.len());
    for conjunction in rule {
        if conjunction.iter().all(|k| k.trim().is_empty()) {
            report.push(field, "a conjunction needs at least one role");
            continue;
        }
        let mut roles = RoleSet::new();
        let mut complete = true;
        for key in conjunction.iter().filter(|k| !k.trim().is_empty()) {
            match graph.resolve(key) {
                Some(role) => {
                    roles.insert(role.id);
                }
                None => {
                    report.push(field, format!("unknown role `{}`", key.trim()));
                    complete = false;
                }
            }
        }
        if complete {
            minterms.push(roles);
        }
    }
    minterms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Role;

    fn graph() -> RoleGraph {
        RoleGraph::new(
            vec![
                Role {
                    id: 1,
                    key: "editor".into(),
                },
                Role {
                    id: 2,
                    key: "site-a".into(),
                },
            ],
            vec![],
        )
    }

    fn rule(parts: &[&[&str]]) -> RuleSpec {
        parts
            .iter()
            .map(|c| c.iter().map(|k| k.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_resolve_rule() {
        let mut report = ValidationReport::new();
        let minterms = resolve_rule(
            &graph(),
            "read",
            &rule(&[&["Editor", "site-a"], &["site-a"]]),
            &mut report,
        );
        assert!(report.is_empty());
        assert_eq!(minterms, vec![RoleSet::from([1, 2]), RoleSet::from([2])]);
    }

    #[test]
    fn test_resolve_rule_accumulates_errors() {
        let mut report = ValidationReport::new();
        let minterms = resolve_rule(
            &graph(),
            "edit",
            &rule(&[&["ghost", "editor"], &[" "], &["phantom"], &["editor"]]),
            &mut report,
        );
        assert_eq!(report.len(), 3);
        assert_eq!(report.for_field("edit").count(), 3);
        assert_eq!(minterms, vec![RoleSet::from([1])]);
    }
}
