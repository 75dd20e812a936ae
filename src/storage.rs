use std::collections::BTreeSet;

use crate::authz::errors::AuthzError;
use crate::authz::permission::{bypass_only_permission, get_or_create_permission};
use crate::authz::types::{PermissionId, RuleSpec, ValidationReport};
use crate::authz::Authorizer;
use crate::entities;
use crate::errors::Error;
use crate::settings::Database as DbCfg;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i32,
    pub name: String,
    pub read_groups: Option<String>,
    pub edit_groups: Option<String>,
    pub read_permission_id: Option<PermissionId>,
    pub edit_permission_id: Option<PermissionId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<entities::resource::Model> for Resource {
    fn from(m: entities::resource::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            read_groups: m.read_groups,
            edit_groups: m.edit_groups,
            read_permission_id: m.read_permission_id,
            edit_permission_id: m.edit_permission_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// A resource as it arrives from a legacy import: permissions are still
/// comma-separated group names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub read_groups: Option<String>,
    pub edit_groups: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub permissions: usize,
    pub minterms: usize,
}

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, Error> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database ready");
    Ok(db)
}

pub async fn create_resource(db: &DatabaseConnection, input: NewResource) -> Result<Resource, Error> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("resource name must not be empty".into()));
    }
    let now = Utc::now().timestamp();

    let model = entities::resource::ActiveModel {
        name: Set(name.to_string()),
        read_groups: Set(input.read_groups),
        edit_groups: Set(input.edit_groups),
        read_permission_id: Set(None),
        edit_permission_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(model.into())
}

pub async fn get_resource_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<Resource>, Error> {
    use entities::resource::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Name.eq(name))
        .one(db)
        .await?
        .map(Resource::from))
}

/// Replace the read and/or edit rule of a resource.
///
/// Both rules are validated before anything is written; all unknown role
/// keys are reported together under the `read` and `edit` fields.
pub async fn set_resource_permissions(
    authz: &Authorizer,
    name: &str,
    read: Option<&RuleSpec>,
    edit: Option<&RuleSpec>,
) -> Result<Resource, Error> {
    use entities::resource::{Column, Entity};

    let db = authz.db();
    let model = Entity::find()
        .filter(Column::Name.eq(name))
        .one(db)
        .await?
        .ok_or_else(|| AuthzError::ResourceNotFound(name.to_string()))?;

    let mut report = ValidationReport::new();
    let read = match read {
        Some(rule) => Some(authz.resolve_rule("read", rule, &mut report).await?),
        None => None,
    };
    let edit = match edit {
        Some(rule) => Some(authz.resolve_rule("edit", rule, &mut report).await?),
        None => None,
    };
    if !report.is_empty() {
        return Err(AuthzError::Validation(report).into());
    }

    let txn = db.begin().await?;
    let mut active: entities::resource::ActiveModel = model.into();
    if let Some(minterms) = read {
        active.read_permission_id = Set(Some(get_or_create_permission(&txn, minterms).await?));
        active.read_groups = Set(None);
    }
    if let Some(minterms) = edit {
        active.edit_permission_id = Set(Some(get_or_create_permission(&txn, minterms).await?));
        active.edit_groups = Set(None);
    }
    active.updated_at = Set(Utc::now().timestamp());
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(
        resource = %updated.name,
        read = ?updated.read_permission_id,
        edit = ?updated.edit_permission_id,
        "Updated resource permissions"
    );
    Ok(updated.into())
}

pub async fn delete_resource(db: &DatabaseConnection, name: &str) -> Result<bool, Error> {
    use entities::resource::{Column, Entity};

    let res = Entity::delete_many()
        .filter(Column::Name.eq(name))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

/// Delete permissions no resource references, then minterms no permission
/// references. Meant to run offline; the reserved bypass-only permission is
/// always kept.
pub async fn reap_unreferenced(db: &DatabaseConnection) -> Result<ReapReport, Error> {
    use entities::{minterm, minterm_mapping, permission, permission_mapping, resource};

    let txn = db.begin().await?;
    let reserved = bypass_only_permission(&txn).await?;

    let mut referenced: BTreeSet<PermissionId> = BTreeSet::from([reserved]);
    let slots: Vec<(Option<i32>, Option<i32>)> = resource::Entity::find()
        .select_only()
        .column(resource::Column::ReadPermissionId)
        .column(resource::Column::EditPermissionId)
        .into_tuple()
        .all(&txn)
        .await?;
    for (read, edit) in slots {
        referenced.extend(read);
        referenced.extend(edit);
    }

    let orphan_permissions: Vec<i32> = permission::Entity::find()
        .select_only()
        .column(permission::Column::Id)
        .filter(permission::Column::Id.is_not_in(referenced))
        .into_tuple()
        .all(&txn)
        .await?;

    if !orphan_permissions.is_empty() {
        permission_mapping::Entity::delete_many()
            .filter(permission_mapping::Column::PermissionId.is_in(orphan_permissions.clone()))
            .exec(&txn)
            .await?;
        permission::Entity::delete_many()
            .filter(permission::Column::Id.is_in(orphan_permissions.clone()))
            .exec(&txn)
            .await?;
    }

    let used_minterms: Vec<i32> = permission_mapping::Entity::find()
        .select_only()
        .column(permission_mapping::Column::MintermId)
        .distinct()
        .into_tuple()
        .all(&txn)
        .await?;

    let orphan_minterms: Vec<i32> = minterm::Entity::find()
        .select_only()
        .column(minterm::Column::Id)
        .filter(minterm::Column::Id.is_not_in(used_minterms))
        .into_tuple()
        .all(&txn)
        .await?;

    if !orphan_minterms.is_empty() {
        minterm_mapping::Entity::delete_many()
            .filter(minterm_mapping::Column::MintermId.is_in(orphan_minterms.clone()))
            .exec(&txn)
            .await?;
        minterm::Entity::delete_many()
            .filter(minterm::Column::Id.is_in(orphan_minterms.clone()))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;

    let report = ReapReport {
        permissions: orphan_permissions.len(),
        minterms: orphan_minterms.len(),
    };
    tracing::info!(
        permissions = report.permissions,
        minterms = report.minterms,
        "Reaped unreferenced canonical rows"
    );
    Ok(report)
}
