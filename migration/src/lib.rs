pub use sea_orm_migration::prelude::*;

mod m20250301_000001_initial_schema;
mod m20250301_000002_seed_reserved_roles;

/// Key of the role that satisfies every permission check.
pub const SUPERADMIN_ROLE: &str = "superadmin";
/// Key of the role every authenticated holder inherits.
pub const USER_ROLE: &str = "user";
/// Key of the base role at the bottom of the seeded chain.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Content hash stored on the reserved permission row that has no minterms.
/// Real content hashes are base64url SHA-256 digests, so this never collides.
pub const BYPASS_ONLY_PERMISSION_HASH: &str = "bypass-only";

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_initial_schema::Migration),
            Box::new(m20250301_000002_seed_reserved_roles::Migration),
        ]
    }
}
