use gatekeep::authz::types::Principal;
use gatekeep::storage::{self, NewResource, Resource};
use sea_orm::DatabaseConnection;

/// Builder for creating test resources
pub struct ResourceBuilder {
    name: String,
    read_groups: Option<String>,
    edit_groups: Option<String>,
}

impl ResourceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_groups: None,
            edit_groups: None,
        }
    }

    pub fn with_read_groups(mut self, groups: &str) -> Self {
        self.read_groups = Some(groups.to_string());
        self
    }

    pub fn with_edit_groups(mut self, groups: &str) -> Self {
        self.edit_groups = Some(groups.to_string());
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> Resource {
        storage::create_resource(
            db,
            NewResource {
                name: self.name,
                read_groups: self.read_groups,
                edit_groups: self.edit_groups,
            },
        )
        .await
        .expect("Failed to create test resource")
    }
}

/// Builder for in-memory permission holders
pub struct HolderBuilder {
    name: String,
    roles: Vec<String>,
    disabled: bool,
}

impl HolderBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            roles: Vec::new(),
            disabled: false,
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.push(role.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn build(self) -> Principal {
        let principal = Principal::new(&self.name, self.roles);
        if self.disabled {
            principal.disabled()
        } else {
            principal
        }
    }
}
