use miette::Diagnostic;
use thiserror::Error;

use crate::authz::types::ValidationReport;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load role definitions `{path}`")]
    #[diagnostic(
        code(gatekeep::authz::definitions_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    DefinitionsLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid role definitions: {0}")]
    #[diagnostic(
        code(gatekeep::authz::invalid_definitions),
        help("Definition files may contain `role` and `kind` KDL nodes")
    )]
    InvalidDefinitions(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(gatekeep::authz::kdl_parse),
        help("Check your KDL file syntax; see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("Role `{0}` not found")]
    #[diagnostic(code(gatekeep::authz::role_not_found))]
    RoleNotFound(String),

    #[error("Role `{0}` already exists")]
    #[diagnostic(code(gatekeep::authz::duplicate_role))]
    DuplicateRole(String),

    #[error("Invalid role key `{0}`")]
    #[diagnostic(
        code(gatekeep::authz::invalid_role_key),
        help("Role keys are non-empty and may not contain commas or control characters")
    )]
    InvalidRoleKey(String),

    #[error("Cyclic role inheritance detected: {0}")]
    #[diagnostic(
        code(gatekeep::authz::cyclic_roles),
        help("An inheritance edge may not lead back to the role that declares it")
    )]
    CyclicRoleInheritance(String),

    #[error("Role `{0}` is still referenced by minterms or inheritance edges")]
    #[diagnostic(code(gatekeep::authz::role_in_use))]
    RoleInUse(String),

    #[error("Permission {0} is still referenced")]
    #[diagnostic(code(gatekeep::authz::permission_in_use))]
    PermissionInUse(i32),

    #[error("A minterm needs at least one role")]
    #[diagnostic(
        code(gatekeep::authz::empty_minterm),
        help("Use the bypass-only permission to express \"nobody but superadmin\"")
    )]
    EmptyMinterm,

    #[error("Permission {0} not found")]
    #[diagnostic(code(gatekeep::authz::permission_not_found))]
    PermissionNotFound(i32),

    #[error("Resource `{0}` not found")]
    #[diagnostic(code(gatekeep::authz::resource_not_found))]
    ResourceNotFound(String),

    #[error("Forbidden")]
    #[diagnostic(code(gatekeep::authz::forbidden))]
    Forbidden,

    #[error("Validation failed: {0}")]
    #[diagnostic(code(gatekeep::authz::validation))]
    Validation(ValidationReport),

    #[error("Structural inconsistency: {0}")]
    #[diagnostic(
        code(gatekeep::authz::structural),
        help("The canonical store is corrupt; this is a defect, not a user error")
    )]
    Structural(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(gatekeep::authz::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    #[diagnostic(code(gatekeep::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Errors that a caller may show to the holder without leaking internals.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AuthzError::Forbidden
                | AuthzError::Validation(_)
                | AuthzError::RoleNotFound(_)
                | AuthzError::ResourceNotFound(_)
                | AuthzError::InvalidRoleKey(_)
                | AuthzError::DuplicateRole(_)
        )
    }
}
