use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create roles table
        manager
            .create_table(
                Table::create()
                    .table(Roles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Roles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Roles::Key).string().not_null().unique_key())
                    .to_owned(),
            )
            .await?;

        // Create role_inheritance table (edge: role inherits inherited_role)
        manager
            .create_table(
                Table::create()
                    .table(RoleInheritance::Table)
                    .if_not_exists()
                    .col(integer(RoleInheritance::RoleId))
                    .col(integer(RoleInheritance::InheritedRoleId))
                    .primary_key(
                        Index::create()
                            .col(RoleInheritance::RoleId)
                            .col(RoleInheritance::InheritedRoleId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_role_inheritance_role")
                            .from(RoleInheritance::Table, RoleInheritance::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_role_inheritance_inherited")
                            .from(RoleInheritance::Table, RoleInheritance::InheritedRoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Create minterms table; content_hash closes the lookup-then-insert race
        manager
            .create_table(
                Table::create()
                    .table(Minterms::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Minterms::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Minterms::ContentHash)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MintermMapping::Table)
                    .if_not_exists()
                    .col(integer(MintermMapping::MintermId))
                    .col(integer(MintermMapping::RoleId))
                    .primary_key(
                        Index::create()
                            .col(MintermMapping::MintermId)
                            .col(MintermMapping::RoleId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_minterm_mapping_minterm")
                            .from(MintermMapping::Table, MintermMapping::MintermId)
                            .to(Minterms::Table, Minterms::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_minterm_mapping_role")
                            .from(MintermMapping::Table, MintermMapping::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Index on role_id for the aggregate set-equality lookup
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_minterm_mapping_role")
                    .table(MintermMapping::Table)
                    .col(MintermMapping::RoleId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Permissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Permissions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Permissions::ContentHash)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PermissionMapping::Table)
                    .if_not_exists()
                    .col(integer(PermissionMapping::PermissionId))
                    .col(integer(PermissionMapping::MintermId))
                    .primary_key(
                        Index::create()
                            .col(PermissionMapping::PermissionId)
                            .col(PermissionMapping::MintermId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permission_mapping_permission")
                            .from(PermissionMapping::Table, PermissionMapping::PermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_permission_mapping_minterm")
                            .from(PermissionMapping::Table, PermissionMapping::MintermId)
                            .to(Minterms::Table, Minterms::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_permission_mapping_minterm")
                    .table(PermissionMapping::Table)
                    .col(PermissionMapping::MintermId)
                    .to_owned(),
            )
            .await?;

        // Create resources table: the owning entity with read/edit slots
        manager
            .create_table(
                Table::create()
                    .table(Resources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Resources::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Resources::Name).string().not_null().unique_key())
                    .col(string_null(Resources::ReadGroups))
                    .col(string_null(Resources::EditGroups))
                    .col(integer_null(Resources::ReadPermissionId))
                    .col(integer_null(Resources::EditPermissionId))
                    .col(big_integer(Resources::CreatedAt))
                    .col(big_integer(Resources::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resources_read_permission")
                            .from(Resources::Table, Resources::ReadPermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resources_edit_permission")
                            .from(Resources::Table, Resources::EditPermissionId)
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Resources::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PermissionMapping::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Permissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MintermMapping::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Minterms::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoleInheritance::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Roles {
    Table,
    Id,
    Key,
}

#[derive(DeriveIden)]
pub(crate) enum RoleInheritance {
    Table,
    RoleId,
    InheritedRoleId,
}

#[derive(DeriveIden)]
enum Minterms {
    Table,
    Id,
    ContentHash,
}

#[derive(DeriveIden)]
enum MintermMapping {
    Table,
    MintermId,
    RoleId,
}

#[derive(DeriveIden)]
pub(crate) enum Permissions {
    Table,
    Id,
    ContentHash,
}

#[derive(DeriveIden)]
enum PermissionMapping {
    Table,
    PermissionId,
    MintermId,
}

#[derive(DeriveIden)]
enum Resources {
    Table,
    Id,
    Name,
    ReadGroups,
    EditGroups,
    ReadPermissionId,
    EditPermissionId,
    CreatedAt,
    UpdatedAt,
}
