use gatekeep::authz::types::{Role, RuleSpec};
use gatekeep::authz::{roles, Authorizer};
use gatekeep::settings::Authz;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Authorizer with the default reserved role names
pub fn authorizer(db: &DatabaseConnection) -> Authorizer {
    Authorizer::new(db.clone(), &Authz::default())
}

/// Create a role (or fetch it if it exists)
pub async fn seed_role(db: &DatabaseConnection, key: &str) -> Role {
    roles::resolve_or_create_role(db, key)
        .await
        .expect("Failed to seed role")
}

/// Build a rule from nested slices: outer is OR, inner is AND
pub fn rule(parts: &[&[&str]]) -> RuleSpec {
    parts
        .iter()
        .map(|c| c.iter().map(|k| k.to_string()).collect())
        .collect()
}
