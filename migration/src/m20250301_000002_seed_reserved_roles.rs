use sea_orm_migration::prelude::*;

use crate::m20250301_000001_initial_schema::{Permissions, RoleInheritance, Roles};
use crate::{ANONYMOUS_ROLE, BYPASS_ONLY_PERMISSION_HASH, SUPERADMIN_ROLE, USER_ROLE};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for key in [SUPERADMIN_ROLE, USER_ROLE, ANONYMOUS_ROLE] {
            manager
                .exec_stmt(
                    Query::insert()
                        .into_table(Roles::Table)
                        .columns([Roles::Key])
                        .values_panic([key.into()])
                        .to_owned(),
                )
                .await?;
        }

        // superadmin -> user -> anonymous
        seed_edge(manager, SUPERADMIN_ROLE, USER_ROLE).await?;
        seed_edge(manager, USER_ROLE, ANONYMOUS_ROLE).await?;

        // Reserved permission with no minterms: satisfied only via the bypass role
        manager
            .exec_stmt(
                Query::insert()
                    .into_table(Permissions::Table)
                    .columns([Permissions::ContentHash])
                    .values_panic([BYPASS_ONLY_PERMISSION_HASH.into()])
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .exec_stmt(
                Query::delete()
                    .from_table(Permissions::Table)
                    .and_where(Expr::col(Permissions::ContentHash).eq(BYPASS_ONLY_PERMISSION_HASH))
                    .to_owned(),
            )
            .await?;
        manager
            .exec_stmt(Query::delete().from_table(RoleInheritance::Table).to_owned())
            .await?;
        manager
            .exec_stmt(
                Query::delete()
                    .from_table(Roles::Table)
                    .and_where(Expr::col(Roles::Key).is_in([SUPERADMIN_ROLE, USER_ROLE, ANONYMOUS_ROLE]))
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

async fn seed_edge(manager: &SchemaManager<'_>, role: &str, inherited: &str) -> Result<(), DbErr> {
    let parent = Alias::new("parent");
    let child = Alias::new("child");

    let select = Query::select()
        .column((parent.clone(), Roles::Id))
        .column((child.clone(), Roles::Id))
        .from_as(Roles::Table, parent.clone())
        .from_as(Roles::Table, child.clone())
        .and_where(Expr::col((parent, Roles::Key)).eq(role))
        .and_where(Expr::col((child, Roles::Key)).eq(inherited))
        .to_owned();

    let insert = Query::insert()
        .into_table(RoleInheritance::Table)
        .columns([RoleInheritance::RoleId, RoleInheritance::InheritedRoleId])
        .select_from(select)
        .map_err(|e| DbErr::Custom(e.to_string()))?
        .to_owned();

    manager.exec_stmt(insert).await
}
