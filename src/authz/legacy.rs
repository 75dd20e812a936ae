//! Upgrade path for resources that still carry free-text group lists.
//!
//! A legacy rule such as `"SiteA, siteB"` meant "any listed group may act".
//! It becomes a permission with one single-role minterm per group.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};

use crate::authz::errors::AuthzError;
use crate::authz::permission::get_or_create_permission;
use crate::authz::roles::{normalize_key, resolve_or_create_role};
use crate::authz::types::{PermissionId, RoleSet};
use crate::entities::resource;

/// Split a comma-separated group list into distinct, normalized role keys.
/// Order of first appearance is kept.
pub fn parse_legacy_groups(groups: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for token in groups.split(',') {
        let key = normalize_key(token);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Convert one legacy group string into a canonical permission id.
///
/// Roles are created on demand. Everything runs in one transaction, so a
/// caller that passes its own transaction sees either all rows or none.
pub async fn migrate_legacy_groups<C>(conn: &C, groups: &str) -> Result<PermissionId, AuthzError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let keys = parse_legacy_groups(groups);
    let txn = conn.begin().await?;

    let mut minterms: Vec<RoleSet> = Vec::with_capacity(keys.len());
    for key in &keys {
        let role = resolve_or_create_role(&txn, key).await?;
        minterms.push(RoleSet::from([role.id]));
    }

    let permission_id = get_or_create_permission(&txn, minterms).await?;
    txn.commit().await?;

    tracing::debug!(groups = %groups, permission = permission_id, "Migrated legacy groups");
    Ok(permission_id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub converted: usize,
    pub skipped: Vec<String>,
}

/// Convert every resource whose legacy group columns have not been turned
/// into permission ids yet. Each resource is converted and updated in its
/// own transaction; the consumed legacy columns are cleared.
pub async fn upgrade_legacy_resources(db: &DatabaseConnection) -> Result<UpgradeReport, AuthzError> {
    use resource::{Column, Entity};

    let pending = Entity::find()
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(Column::ReadGroups.is_not_null())
                        .add(Column::ReadPermissionId.is_null()),
                )
                .add(
                    Condition::all()
                        .add(Column::EditGroups.is_not_null())
                        .add(Column::EditPermissionId.is_null()),
                ),
        )
        .all(db)
        .await?;

    tracing::info!(pending = pending.len(), "Upgrading legacy resource permissions");

    let mut report = UpgradeReport::default();
    for model in pending {
        let name = model.name.clone();
        match upgrade_resource(db, model).await {
            Ok(()) => report.converted += 1,
            Err(e) => {
                tracing::error!(resource = %name, error = %e, "Failed to upgrade legacy permissions");
                report.skipped.push(name);
            }
        }
    }

    tracing::info!(
        converted = report.converted,
        skipped = report.skipped.len(),
        "Legacy permission upgrade complete"
    );
    Ok(report)
}

async fn upgrade_resource(db: &DatabaseConnection, model: resource::Model) -> Result<(), AuthzError> {
    let txn = db.begin().await?;

    let mut active: resource::ActiveModel = model.clone().into();

    if let (Some(groups), None) = (&model.read_groups, model.read_permission_id) {
        active.read_permission_id = Set(Some(migrate_legacy_groups(&txn, groups).await?));
        active.read_groups = Set(None);
    }
    if let (Some(groups), None) = (&model.edit_groups, model.edit_permission_id) {
        active.edit_permission_id = Set(Some(migrate_legacy_groups(&txn, groups).await?));
        active.edit_groups = Set(None);
    }
    active.updated_at = Set(Utc::now().timestamp());
    active.update(&txn).await?;

    txn.commit().await?;
    Ok(())
}
