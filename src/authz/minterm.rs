use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait,
};

use crate::authz::canonical::{content_hash, find_by_members};
use crate::authz::errors::AuthzError;
use crate::authz::types::{MintermId, RoleSet};
use crate::entities::{minterm, minterm_mapping, role};

const TAG: &str = "minterm";

/// Return the id of the minterm whose role membership equals `roles`,
/// creating it if no such minterm exists yet.
pub async fn get_or_create_minterm<C>(conn: &C, roles: &RoleSet) -> Result<MintermId, AuthzError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if roles.is_empty() {
        return Err(AuthzError::EmptyMinterm);
    }

    let hash = content_hash(TAG, roles);
    let txn = conn.begin().await?;

    // Write first: the hash row is the serialization point for identical content.
    let inserted = minterm::Entity::insert(minterm::ActiveModel {
        content_hash: Set(hash.clone()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::column(minterm::Column::ContentHash)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    let row = minterm::Entity::find()
        .filter(minterm::Column::ContentHash.eq(hash.as_str()))
        .one(&txn)
        .await?
        .ok_or_else(|| AuthzError::Structural(format!("minterm row for {hash} vanished")))?;

    if inserted > 0 {
        ensure_roles_exist(&txn, roles).await?;
        minterm_mapping::Entity::insert_many(roles.iter().map(|role_id| {
            minterm_mapping::ActiveModel {
                minterm_id: Set(row.id),
                role_id: Set(*role_id),
            }
        }))
        .exec_without_returning(&txn)
        .await?;
        tracing::debug!(minterm = row.id, roles = ?roles, "Created minterm");
    } else {
        let matched = find_by_members::<minterm_mapping::Entity, _>(
            &txn,
            minterm_mapping::Column::MintermId,
            minterm_mapping::Column::RoleId,
            roles,
            Some(row.id),
        )
        .await?;
        if matched.is_none() {
            let err = AuthzError::Structural(format!(
                "minterm {} has hash {hash} but its roles differ from {roles:?}",
                row.id
            ));
            tracing::error!(error = %err, "Canonical minterm store is inconsistent");
            return Err(err);
        }
    }

    txn.commit().await?;
    Ok(row.id)
}

/// Read-only lookup of an existing minterm with exactly these roles.
pub async fn find_minterm<C>(conn: &C, roles: &RoleSet) -> Result<Option<MintermId>, AuthzError>
where
    C: ConnectionTrait,
{
    Ok(find_by_members::<minterm_mapping::Entity, _>(
        conn,
        minterm_mapping::Column::MintermId,
        minterm_mapping::Column::RoleId,
        roles,
        None,
    )
    .await?)
}

/// Roles of a stored minterm. A minterm with no mapping rows is corrupt.
pub async fn load_minterm<C>(conn: &C, id: MintermId) -> Result<RoleSet, AuthzError>
where
    C: ConnectionTrait,
{
    let roles: RoleSet = minterm_mapping::Entity::find()
        .filter(minterm_mapping::Column::MintermId.eq(id))
        .all(conn)
        .await?
        .into_iter()
        .map(|m| m.role_id)
        .collect();

    if roles.is_empty() {
        return Err(AuthzError::Structural(format!(
            "minterm {id} is missing or has no roles"
        )));
    }
    Ok(roles)
}

async fn ensure_roles_exist<C>(conn: &C, roles: &RoleSet) -> Result<(), AuthzError>
where
    C: ConnectionTrait,
{
    let found = role::Entity::find()
        .filter(role::Column::Id.is_in(roles.iter().copied()))
        .count(conn)
        .await?;
    if found as usize != roles.len() {
        let ids: Vec<String> = roles.iter().map(|id| id.to_string()).collect();
        return Err(AuthzError::RoleNotFound(format!("one of ids [{}]", ids.join(", "))));
    }
    Ok(())
}
