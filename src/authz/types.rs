use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type RoleId = i32;
pub type MintermId = i32;
pub type PermissionId = i32;

/// A set of role ids read as a conjunction.
pub type RoleSet = BTreeSet<RoleId>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub key: String,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.key, self.id)
    }
}

/// Anything that carries directly assigned role keys. The engine only reads it.
pub trait PermissionHolder {
    fn role_keys(&self) -> &[String];

    fn is_disabled(&self) -> bool {
        false
    }
}

/// In-memory holder used by the CLI and by embedding services that have no
/// identity type of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl Principal {
    pub fn new<I, S>(name: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            roles: roles.into_iter().map(Into::into).collect(),
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

impl PermissionHolder for Principal {
    fn role_keys(&self) -> &[String] {
        &self.roles
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }
}

/// Materialized permission: a disjunction of role conjunctions.
///
/// An empty `minterms` list is the bypass-only permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionValue {
    pub id: Option<PermissionId>,
    pub minterms: Vec<RoleSet>,
}

impl PermissionValue {
    pub fn from_minterms<I>(minterms: I) -> Self
    where
        I: IntoIterator<Item = RoleSet>,
    {
        Self {
            id: None,
            minterms: minterms.into_iter().collect(),
        }
    }

    /// The "nobody but the bypass role" permission.
    pub fn bypass_only() -> Self {
        Self::default()
    }

    pub fn is_bypass_only(&self) -> bool {
        self.minterms.is_empty()
    }
}

/// Which permission slot of a resource a check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Edit,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Edit => write!(f, "edit"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "edit" => Ok(Action::Edit),
            other => Err(format!("unknown action `{other}` (expected `read` or `edit`)")),
        }
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Field-level problems collected over a whole operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Role-key description of a permission as it arrives from external data:
/// outer list is OR, inner lists are AND.
pub type RuleSpec = Vec<Vec<String>>;

// ---------- Definition file types ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDef {
    pub name: String,
    /// Role keys this role inherits
    pub includes: Vec<String>,
}

/// A permission kind registered by the host application or an extension,
/// e.g. `resource.read`. `default_roles` is the rule new owners start from:
/// any one of the listed roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionKind {
    pub key: String,
    pub description: Option<String>,
    pub default_roles: Vec<String>,
}

/// Intermediate result from parsing a single KDL definition file.
#[derive(Debug, Clone, Default)]
pub struct ParsedDefinitions {
    pub roles: Vec<RoleDef>,
    pub kinds: Vec<PermissionKind>,
}
